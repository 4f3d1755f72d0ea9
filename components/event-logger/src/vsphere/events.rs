//! Event manager calls: collector lifecycle, event decoding and the
//! category lookup.

// Local crates
use crate::tailer::models::{EventKind, EventSource, RawEvent};
use crate::vsphere::{
    client::VimClient,
    models::{ManagedObjectReference, VimError},
    soap::{SoapRequest, XmlNode},
};

// External crates
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::instrument;

impl VimClient {
    /// Create an `EventHistoryCollector` over `root` and every entity below
    /// it.
    #[instrument(
        name = "vcel_vsphere::create_collector",
        target = "vsphere::events",
        skip_all,
        fields(root = %root),
        level = "debug"
    )]
    pub async fn create_collector_for_events(
        &self,
        root: &ManagedObjectReference,
    ) -> Result<ManagedObjectReference, VimError> {
        const OP: &str = "CreateCollectorForEvents";
        let filter = format!(
            "<filter><entity>{}<recursion>all</recursion></entity></filter>",
            root.to_xml("entity")
        );
        let response = self
            .invoke(SoapRequest::new(OP, &self.content.event_manager).raw(&filter))
            .await?;

        response
            .child("returnval")
            .and_then(XmlNode::as_moref)
            .ok_or_else(|| VimError::malformed(OP, "missing collector reference"))
    }

    /// Category (`info`, `warning`, `error`, `user`) of an event.
    ///
    /// `EventEx` carries its own severity. Everything else is looked up by
    /// type name in the event manager's `description.eventInfo`, which is
    /// fetched once per session.
    pub async fn event_category(&mut self, event: &RawEvent) -> Result<String, VimError> {
        if event.type_name == "EventEx" {
            return Ok(event
                .severity
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "info".to_string()));
        }

        if self.event_categories.is_none() {
            self.event_categories = Some(self.fetch_event_categories().await?);
        }

        Ok(self
            .event_categories
            .as_ref()
            .and_then(|categories| categories.get(&event.type_name))
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_event_categories(&self) -> Result<HashMap<String, String>, VimError> {
        const OP: &str = "RetrievePropertiesEx";
        let spec = format!(
            concat!(
                "<specSet>",
                "<propSet><type>EventManager</type><pathSet>description.eventInfo</pathSet></propSet>",
                "<objectSet>{obj}<skip>false</skip></objectSet>",
                "</specSet>",
                "<options></options>"
            ),
            obj = self.content.event_manager.to_xml("obj")
        );
        let response = self
            .invoke(SoapRequest::new(OP, &self.content.property_collector).raw(&spec))
            .await?;

        let details = response
            .path(&["returnval", "objects"])
            .into_iter()
            .flat_map(|objects| objects.children_named("propSet"))
            .filter(|p| p.text_at(&["name"]) == Some("description.eventInfo"))
            .filter_map(|p| p.child("val"))
            .flat_map(|val| val.children.iter());

        let categories: HashMap<String, String> = details
            .filter_map(|detail| {
                let key = detail.text_at(&["key"])?;
                let category = detail.text_at(&["category"]).unwrap_or_default();
                Some((key.to_string(), category.to_string()))
            })
            .collect();

        tracing::debug!(entries = categories.len(), "Cached event categories");
        Ok(categories)
    }
}

/// Decode one `returnval` of `ReadNextEvents`.
pub fn decode_event(node: &XmlNode) -> Result<RawEvent, VimError> {
    const OP: &str = "ReadNextEvents";

    let created = node
        .text_at(&["createdTime"])
        .ok_or_else(|| VimError::malformed(OP, "event without createdTime"))?;
    let created_time = DateTime::parse_from_rfc3339(created.trim())
        .map_err(|e| VimError::malformed(OP, format!("bad createdTime {created:?}: {e}")))?
        .with_timezone(&Utc);

    let text = |path: &[&str]| node.text_at(path).map(str::to_string);

    Ok(RawEvent {
        kind: task_target(node).unwrap_or(EventKind::Generic),
        type_name: node.xsi_type().unwrap_or("Event").to_string(),
        created_time,
        message: text(&["fullFormattedMessage"]),
        host: text(&["host", "name"]),
        vm: text(&["vm", "name"]),
        user_name: text(&["userName"]),
        severity: text(&["severity"]),
    })
}

/// Task events carry a `TaskInfo` naming the entity the task ran against.
fn task_target(node: &XmlNode) -> Option<EventKind> {
    let info = node.child("info")?;
    let entity = info.child("entity");
    let entity_name = info.child("entityName");
    if entity.is_none() && entity_name.is_none() {
        return None;
    }

    Some(EventKind::Task {
        target_type: entity
            .and_then(|e| e.attr("type"))
            .unwrap_or_default()
            .to_string(),
        target_name: entity_name.map(|n| n.text.clone()).unwrap_or_default(),
    })
}

/// An `EventHistoryCollector` bound to the session that created it.
#[derive(Debug)]
pub struct EventCollector {
    client: VimClient,
    reference: ManagedObjectReference,
    released: bool,
}

impl EventCollector {
    pub fn new(client: VimClient, reference: ManagedObjectReference) -> Self {
        Self {
            client,
            reference,
            released: false,
        }
    }

    pub fn reference(&self) -> &ManagedObjectReference {
        &self.reference
    }

    /// Set the page size and move the cursor to the newest event, so reads
    /// only return what happens from now on.
    #[instrument(
        name = "vcel_vsphere::collector_tail",
        target = "vsphere::events",
        skip(self),
        level = "debug"
    )]
    pub async fn tail_from_now(&self, page_size: u32) -> Result<(), VimError> {
        let request = SoapRequest::new("SetCollectorPageSize", &self.reference)
            .element("maxCount", &page_size.to_string());
        self.client.invoke(request).await?;

        self.client
            .invoke(SoapRequest::new("ResetCollector", &self.reference))
            .await?;
        Ok(())
    }

    async fn read_next(&self, max_count: u32) -> Result<Vec<RawEvent>, VimError> {
        let request = SoapRequest::new("ReadNextEvents", &self.reference)
            .element("maxCount", &max_count.to_string());
        let response = self.client.invoke(request).await?;

        response
            .children_named("returnval")
            .map(decode_event)
            .collect()
    }
}

impl EventSource for EventCollector {
    async fn read_next_events(&mut self, max_count: u32) -> Result<Vec<RawEvent>> {
        Ok(self.read_next(max_count).await?)
    }

    async fn event_category(&mut self, event: &RawEvent) -> Result<String> {
        Ok(self.client.event_category(event).await?)
    }

    /// Destroy the collector, then log out. Both are attempted even if the
    /// first fails.
    async fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let destroyed = self
            .client
            .invoke(SoapRequest::new("DestroyCollector", &self.reference))
            .await;
        let logged_out = self.client.logout().await;

        destroyed?;
        logged_out?;
        tracing::debug!(collector = %self.reference, "Event collector released");
        Ok(())
    }
}
