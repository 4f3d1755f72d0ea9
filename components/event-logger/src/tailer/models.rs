// External crates
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// What kind of event the server sent, decided by what the event carries
/// rather than by its wire type name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Generic,
    /// The event describes a task and names the entity the task acted on.
    Task {
        target_type: String,
        target_name: String,
    },
}

/// One event as read from the remote collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub kind: EventKind,
    /// Wire type name (`VmPoweredOnEvent`, `TaskEvent`, `EventEx`, ...).
    pub type_name: String,
    pub created_time: DateTime<Utc>,
    pub message: Option<String>,
    pub host: Option<String>,
    pub vm: Option<String>,
    pub user_name: Option<String>,
    /// Only set on `EventEx` style events.
    pub severity: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecordType {
    Event,
    Task,
}

/// The flat record written for every event. Field order is the JSON key
/// order on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputRecord {
    #[serde(rename = "type")]
    pub record_type: RecordType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_name: Option<String>,
    pub message: String,
    pub category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub time: i64,
}

/// A server-side cursor over an event stream.
///
/// Implemented by the vSphere event collector; tests swap in fakes.
#[allow(async_fn_in_trait)]
pub trait EventSource {
    /// Up to `max_count` events newer than the last read. An empty batch
    /// means nothing new.
    async fn read_next_events(&mut self, max_count: u32) -> Result<Vec<RawEvent>>;

    /// Server-assigned category of an event (`info`, `warning`, ...).
    async fn event_category(&mut self, event: &RawEvent) -> Result<String>;

    /// Give the server-side resources back. Best-effort.
    async fn release(&mut self) -> Result<()>;
}

/// Suspension between polls, injectable so tests don't wait.
#[allow(async_fn_in_trait)]
pub trait Sleeper {
    async fn sleep(&mut self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    async fn sleep(&mut self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TailerSettings {
    pub max_events: u32,
    pub poll_interval: Duration,
}

impl Default for TailerSettings {
    fn default() -> Self {
        Self {
            max_events: 10,
            poll_interval: Duration::from_secs(10),
        }
    }
}
