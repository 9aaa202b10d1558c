//! Event Module Tests
//!
//! ## Test Scopes
//! - **Wire schema**: camelCase field names, ISO-8601 timestamps, validation.
//! - **Notification decoding**: bare events, `Records[]` notifications, topic envelopes.

#[cfg(test)]
mod tests {
    use crate::events::notification::{decode_key, event_type_for};
    use crate::events::{parse_notification, ChangeEvent, EventParseError, EventType};

    // ============================================================
    // WIRE SCHEMA
    // ============================================================

    #[test]
    fn test_change_event_uses_camel_case_wire_names() {
        let event = ChangeEvent::new("doc/42.pdf", EventType::Created);

        let json: serde_json::Value =
            serde_json::from_str(&event.to_json().unwrap()).unwrap();

        assert_eq!(json["sourceKey"], "doc/42.pdf");
        assert_eq!(json["eventType"], "Created");
        assert!(json["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_change_event_parses_iso_timestamp() {
        let body = r#"{"sourceKey":"a.txt","eventType":"Updated","timestamp":"2024-05-01T10:00:00Z"}"#;

        let event = ChangeEvent::from_json(body).unwrap();

        assert_eq!(event.source_key, "a.txt");
        assert_eq!(event.event_type, EventType::Updated);
        assert_eq!(event.timestamp.to_rfc3339(), "2024-05-01T10:00:00+00:00");
        assert_eq!(event.object_id().as_str(), "a.txt");
    }

    #[test]
    fn test_change_event_rejects_empty_key() {
        let body = r#"{"sourceKey":"  ","eventType":"Created","timestamp":"2024-05-01T10:00:00Z"}"#;

        let result = ChangeEvent::from_json(body);

        assert!(matches!(result, Err(EventParseError::EmptySourceKey)));
    }

    #[test]
    fn test_change_event_rejects_unknown_event_type() {
        let body = r#"{"sourceKey":"a","eventType":"Renamed","timestamp":"2024-05-01T10:00:00Z"}"#;

        assert!(matches!(
            ChangeEvent::from_json(body),
            Err(EventParseError::Json(_))
        ));
    }

    #[test]
    fn test_fingerprint_distinguishes_event_types() {
        let created = ChangeEvent::new("a", EventType::Created);
        let mut removed = created.clone();
        removed.event_type = EventType::Removed;

        assert_ne!(created.fingerprint(), removed.fingerprint());
        assert_eq!(created.fingerprint(), created.clone().fingerprint());
    }

    // ============================================================
    // NOTIFICATION DECODING
    // ============================================================

    #[test]
    fn test_parse_bare_event() {
        let body = r#"{"sourceKey":"doc/1.md","eventType":"Created","timestamp":"2024-05-01T10:00:00Z"}"#;

        let events = parse_notification(body).unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source_key, "doc/1.md");
    }

    #[test]
    fn test_parse_records_notification_decodes_keys() {
        let body = r#"{
            "Records": [
                {
                    "eventName": "ObjectCreated:Put",
                    "eventTime": "2024-05-01T10:00:00.000Z",
                    "s3": {"bucket": {"name": "docs"}, "object": {"key": "reports/q1+summary%281%29.txt"}}
                },
                {
                    "eventName": "ObjectRemoved:Delete",
                    "eventTime": "2024-05-01T10:05:00.000Z",
                    "s3": {"bucket": {"name": "docs"}, "object": {"key": "old.txt"}}
                }
            ]
        }"#;

        let events = parse_notification(body).unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].source_key, "reports/q1 summary(1).txt");
        assert_eq!(events[0].event_type, EventType::Created);
        assert_eq!(events[1].event_type, EventType::Removed);
    }

    #[test]
    fn test_parse_topic_envelope() {
        let inner = r#"{"Records":[{"eventName":"ObjectCreated:Copy","eventTime":"2024-05-01T10:00:00Z","s3":{"object":{"key":"x.pdf"}}}]}"#;
        let envelope = serde_json::json!({
            "Type": "Notification",
            "Message": inner,
        });

        let events = parse_notification(&envelope.to_string()).unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source_key, "x.pdf");
    }

    #[test]
    fn test_parse_storage_test_event_is_empty() {
        let body = r#"{"Service":"Amazon S3","Event":"s3:TestEvent","Bucket":"docs"}"#;

        assert!(parse_notification(body).unwrap().is_empty());
    }

    #[test]
    fn test_parse_record_missing_key_is_error() {
        let body = r#"{"Records":[{"eventName":"ObjectCreated:Put","s3":{"object":{}}}]}"#;

        let result = parse_notification(body);

        assert!(matches!(
            result,
            Err(EventParseError::MissingField("s3.object.key"))
        ));
    }

    #[test]
    fn test_event_name_mapping() {
        assert_eq!(event_type_for("s3:ObjectCreated:Put").unwrap(), EventType::Created);
        assert_eq!(event_type_for("ObjectRestore:Completed").unwrap(), EventType::Updated);
        assert_eq!(event_type_for("ObjectRemoved:DeleteMarkerCreated").unwrap(), EventType::Removed);
        assert!(event_type_for("ReducedRedundancyLostObject").is_err());
    }

    #[test]
    fn test_decode_key_rejects_invalid_utf8() {
        assert!(decode_key("bad%FF").is_err());
        assert_eq!(decode_key("plain/key.txt").unwrap(), "plain/key.txt");
    }
}
