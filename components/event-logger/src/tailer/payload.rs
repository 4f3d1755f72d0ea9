// Local crates
use crate::tailer::models::{EventKind, OutputRecord, RawEvent, RecordType};

// External crates
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use std::fmt::Display;

/// Flatten a raw event into the record written to the output stream.
///
/// `host`, `vm` and `username` are only carried over when non-empty, so an
/// absent or blank source field drops the key entirely.
pub fn build_record(event: &RawEvent, category: String) -> OutputRecord {
    let (record_type, target_type, target_name) = match &event.kind {
        EventKind::Generic => (RecordType::Event, None, None),
        EventKind::Task {
            target_type,
            target_name,
        } => (
            RecordType::Task,
            Some(target_type.clone()),
            Some(target_name.clone()),
        ),
    };

    OutputRecord {
        record_type,
        target_type,
        target_name,
        message: event.message.as_deref().unwrap_or_default().trim().to_string(),
        category,
        host: non_empty(&event.host),
        vm: non_empty(&event.vm),
        username: non_empty(&event.user_name),
        time: event.created_time.timestamp(),
    }
}

fn non_empty(field: &Option<String>) -> Option<String> {
    field.as_deref().filter(|s| !s.is_empty()).map(str::to_string)
}

/// `<RFC 3339 time in tz>\t<compact JSON>`, without the trailing newline.
pub fn format_line<Tz>(
    record: &OutputRecord,
    created: &DateTime<Utc>,
    tz: &Tz,
) -> serde_json::Result<String>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let stamp = created
        .with_timezone(tz)
        .to_rfc3339_opts(SecondsFormat::Secs, true);
    Ok(format!("{stamp}\t{}", serde_json::to_string(record)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn generic(message: &str) -> RawEvent {
        RawEvent {
            kind: EventKind::Generic,
            type_name: "VmPoweredOnEvent".into(),
            created_time: "2024-01-01T00:00:00Z".parse().unwrap(),
            message: Some(message.into()),
            host: Some("esx01".into()),
            vm: None,
            user_name: Some(String::new()),
            severity: None,
        }
    }

    #[test]
    fn test_generic_event_record() {
        let record = build_record(&generic("  VM powered on  "), "info".into());
        assert_eq!(
            serde_json::to_string(&record).unwrap(),
            r#"{"type":"Event","message":"VM powered on","category":"info","host":"esx01","time":1704067200}"#
        );
    }

    #[test]
    fn test_task_event_record() {
        let event = RawEvent {
            kind: EventKind::Task {
                target_type: "VirtualMachine".into(),
                target_name: "web-01".into(),
            },
            type_name: "TaskEvent".into(),
            message: Some("Task: Power On".into()),
            host: None,
            user_name: Some("VSPHERE.LOCAL\\admin".into()),
            ..generic("")
        };
        let record = build_record(&event, "info".into());
        assert_eq!(
            serde_json::to_string(&record).unwrap(),
            r#"{"type":"Task","targetType":"VirtualMachine","targetName":"web-01","message":"Task: Power On","category":"info","username":"VSPHERE.LOCAL\\admin","time":1704067200}"#
        );
    }

    #[test]
    fn test_optional_fields_present_when_set() {
        let event = RawEvent {
            vm: Some("db-02".into()),
            user_name: Some("root".into()),
            ..generic("x")
        };
        let record = build_record(&event, String::new());
        assert_eq!(record.host.as_deref(), Some("esx01"));
        assert_eq!(record.vm.as_deref(), Some("db-02"));
        assert_eq!(record.username.as_deref(), Some("root"));
        assert_eq!(record.category, "");
    }

    #[test]
    fn test_missing_message_is_empty() {
        let event = RawEvent {
            message: None,
            ..generic("")
        };
        assert_eq!(build_record(&event, "info".into()).message, "");
    }

    #[test]
    fn test_line_prefix_uses_given_zone() {
        let event = generic("VM powered on");
        let record = build_record(&event, "info".into());

        let utc = format_line(&record, &event.created_time, &Utc).unwrap();
        assert!(utc.starts_with("2024-01-01T00:00:00Z\t{"));

        let nairobi = FixedOffset::east_opt(3 * 3600).unwrap();
        let local = format_line(&record, &event.created_time, &nairobi).unwrap();
        let (stamp, json) = local.split_once('\t').unwrap();
        assert_eq!(stamp, "2024-01-01T03:00:00+03:00");
        assert!(json.ends_with(r#""time":1704067200}"#));
        assert!(!local.contains('\n'));
    }
}
