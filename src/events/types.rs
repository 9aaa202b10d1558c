use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Identifier of a logical unit of work in the metadata store.
///
/// Derived from the event's `sourceKey`; every event touching the same object
/// maps to the same record, which is what makes redelivery idempotent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ObjectId(pub String);

impl ObjectId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// What happened to the object in the source location.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EventType {
    Created,
    Updated,
    Removed,
}

impl EventType {
    pub const ALL: [EventType; 3] = [EventType::Created, EventType::Updated, EventType::Removed];
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventType::Created => "Created",
            EventType::Updated => "Updated",
            EventType::Removed => "Removed",
        };
        f.write_str(name)
    }
}

/// A change notification for a single object. Immutable once emitted.
///
/// Wire form: `{"sourceKey": "...", "eventType": "Created", "timestamp": "<ISO-8601>"}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub source_key: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    /// Creates an event stamped with the current time.
    pub fn new(source_key: impl Into<String>, event_type: EventType) -> Self {
        Self {
            source_key: source_key.into(),
            event_type,
            timestamp: Utc::now(),
        }
    }

    pub fn object_id(&self) -> ObjectId {
        ObjectId(self.source_key.clone())
    }

    /// Decodes and validates a serialized event.
    pub fn from_json(body: &str) -> Result<Self, EventParseError> {
        let event: ChangeEvent = serde_json::from_str(body)?;
        event.validate()?;
        Ok(event)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn validate(&self) -> Result<(), EventParseError> {
        if self.source_key.trim().is_empty() {
            return Err(EventParseError::EmptySourceKey);
        }
        Ok(())
    }

    /// Identity of this logical event, used to recognise republished duplicates.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}",
            self.source_key,
            self.event_type,
            self.timestamp.to_rfc3339()
        )
    }
}

/// Errors raised while decoding events or notifications.
#[derive(Debug, Error)]
pub enum EventParseError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("notification is missing field `{0}`")]
    MissingField(&'static str),
    #[error("sourceKey must not be empty")]
    EmptySourceKey,
    #[error("unsupported notification event name: {0}")]
    UnknownEventName(String),
    #[error("object key is not valid UTF-8 after decoding: {0}")]
    InvalidKey(String),
    #[error("invalid event timestamp: {0}")]
    InvalidTimestamp(String),
}
