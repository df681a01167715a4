//! Event record for the NexusAgent event bus
//!
//! An [`Event`] is the only unit of communication between components. It is
//! built by the emitter and shared read-only with every handler of a dispatch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Ordered key/value payload carried by events.
pub type Payload = Map<String, Value>;

/// Source name assigned to events that do not declare one.
pub const DEFAULT_SOURCE: &str = "system";

/// A named message travelling over the bus.
///
/// # Example
/// ```
/// use nexus_agent::bus::Event;
/// use serde_json::json;
///
/// let event = Event::new("weather.current")
///     .with_field("city", json!("Rosario"))
///     .with_source("orchestrator");
/// assert_eq!(event.str_field("city"), Some("Rosario"));
/// assert_eq!(event.id.len(), 12);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Dot-separated topic, e.g. `browser.search`
    pub name: String,
    /// Event payload
    pub payload: Payload,
    /// Component that emitted the event
    pub source: String,
    /// Opaque identifier (12 hex characters)
    pub id: String,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// Correlation metadata (e.g. `reply_to`)
    pub metadata: Payload,
}

impl Event {
    /// Creates an event with an empty payload and the default source.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: Payload::new(),
            source: DEFAULT_SOURCE.to_string(),
            id: new_event_id(),
            timestamp: Utc::now(),
            metadata: Payload::new(),
        }
    }

    /// Replaces the payload.
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Inserts a single payload field.
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    /// Sets the emitting component.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Inserts a single metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Builds a `<name>.reply` event linked to this one through `metadata.reply_to`.
    pub fn reply(&self, payload: Payload) -> Event {
        Event::new(format!("{}.reply", self.name))
            .with_payload(payload)
            .with_source(self.source.clone())
            .with_metadata("reply_to", Value::String(self.id.clone()))
    }

    /// Returns a payload field as a string slice, if it is a string.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

impl From<&str> for Event {
    fn from(name: &str) -> Self {
        Event::new(name)
    }
}

impl From<String> for Event {
    fn from(name: String) -> Self {
        Event::new(name)
    }
}

/// First 12 hex characters of a random v4 UUID.
fn new_event_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(12);
    id
}
