//! Notification Decoding
//!
//! The storage collaborator does not speak the pipeline's wire schema directly.
//! Depending on how the deployment is wired, the notifier receives one of:
//!
//! 1. A bare `ChangeEvent` (`{"sourceKey", "eventType", "timestamp"}`).
//! 2. A storage notification with a `Records[]` array, each record carrying
//!    `eventName`, `eventTime` and an URL-encoded `s3.object.key`.
//! 3. A topic envelope whose `Message` field is a JSON string containing (2).
//!
//! Storage "test" notifications (sent when a subscription is first created)
//! decode to an empty list.

use super::types::{ChangeEvent, EventParseError, EventType};

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Decodes any supported notification body into zero or more change events.
pub fn parse_notification(body: &str) -> Result<Vec<ChangeEvent>, EventParseError> {
    let value: Value = serde_json::from_str(body)?;
    parse_value(&value)
}

fn parse_value(value: &Value) -> Result<Vec<ChangeEvent>, EventParseError> {
    if let Some(message) = value.get("Message").and_then(Value::as_str) {
        let inner: Value = serde_json::from_str(message)?;
        return parse_value(&inner);
    }

    if value.get("Event").and_then(Value::as_str) == Some("s3:TestEvent") {
        tracing::debug!("Ignoring storage test notification");
        return Ok(Vec::new());
    }

    if let Some(records) = value.get("Records") {
        let records = records
            .as_array()
            .ok_or(EventParseError::MissingField("Records"))?;
        return records.iter().map(parse_record).collect();
    }

    let event: ChangeEvent = serde_json::from_value(value.clone())?;
    event.validate()?;
    Ok(vec![event])
}

fn parse_record(record: &Value) -> Result<ChangeEvent, EventParseError> {
    let event_name = record
        .get("eventName")
        .and_then(Value::as_str)
        .ok_or(EventParseError::MissingField("eventName"))?;
    let event_type = event_type_for(event_name)?;

    let raw_key = record
        .pointer("/s3/object/key")
        .and_then(Value::as_str)
        .ok_or(EventParseError::MissingField("s3.object.key"))?;
    let source_key = decode_key(raw_key)?;

    let timestamp = match record.get("eventTime").and_then(Value::as_str) {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|_| EventParseError::InvalidTimestamp(raw.to_string()))?,
        None => Utc::now(),
    };

    let event = ChangeEvent {
        source_key,
        event_type,
        timestamp,
    };
    event.validate()?;
    Ok(event)
}

/// Maps a storage event name (`ObjectCreated:Put`, `s3:ObjectRemoved:Delete`, ...)
/// onto the pipeline's event types.
pub fn event_type_for(event_name: &str) -> Result<EventType, EventParseError> {
    let name = event_name.strip_prefix("s3:").unwrap_or(event_name);
    let family = name.split(':').next().unwrap_or(name);

    match family {
        "ObjectCreated" => Ok(EventType::Created),
        "ObjectRemoved" => Ok(EventType::Removed),
        "ObjectRestore" | "LifecycleTransition" | "ObjectTagging" | "ObjectAcl" => {
            Ok(EventType::Updated)
        }
        _ => Err(EventParseError::UnknownEventName(event_name.to_string())),
    }
}

/// Object keys arrive form-encoded: spaces as `+`, everything else percent-escaped.
pub fn decode_key(raw: &str) -> Result<String, EventParseError> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|key| key.into_owned())
        .map_err(|_| EventParseError::InvalidKey(raw.to_string()))
}
