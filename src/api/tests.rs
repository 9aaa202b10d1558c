//! Operator API Tests
//!
//! Handlers are invoked directly with hand-built extractors.
//!
//! ## Test Scopes
//! - **Events**: notification decoding and fan-out status codes.
//! - **Sources**: uploads and removals announcing themselves as change events.
//! - **Records**: lookup and forced reprocessing.
//! - **Quarantine**: listing and one-shot replay.
//! - **Authorization**: operator capability checks.

#[cfg(test)]
mod tests {
    use crate::api::ApiContext;
    use crate::api::handlers::*;
    use crate::capabilities::{Capability, CapabilitySet, Role};
    use crate::events::{ChangeEvent, EventType, ObjectId};
    use crate::metadata::{Expected, MetadataStore, ProcessingStatus, RecordStore, RecordUpdate};
    use crate::notifier::FanoutNotifier;
    use crate::objects::ObjectStore;
    use crate::quarantine::{Quarantine, QuarantineReason};
    use crate::queue::{DurableQueue, QueueOptions};
    use axum::{Extension, body::Bytes, extract::Path, http::StatusCode};
    use std::sync::Arc;
    use std::time::Duration;

    fn context_with(credentials: CapabilitySet) -> Arc<ApiContext> {
        let quarantine = Arc::new(Quarantine::new());
        let queue = Arc::new(DurableQueue::new(
            "embeddings",
            QueueOptions::default(),
            quarantine.clone(),
        ));
        let mut notifier = FanoutNotifier::new(
            &CapabilitySet::for_role(Role::Notifier),
            Duration::from_secs(60),
        )
        .unwrap();
        notifier.subscribe(queue.clone());

        Arc::new(ApiContext {
            credentials,
            notifier: Arc::new(notifier),
            source: Arc::new(ObjectStore::new("source-documents")),
            queue,
            records: Arc::new(MetadataStore::new("records")),
            quarantine,
        })
    }

    fn context() -> Arc<ApiContext> {
        context_with(CapabilitySet::for_role(Role::Operator))
    }

    fn finish(context: &ApiContext, key: &str) {
        let object = ObjectId::from(key);
        let r = context
            .records
            .upsert(&object, Expected::Absent, RecordUpdate::processing("m-1"))
            .unwrap();
        context
            .records
            .upsert(&object, Expected::Version(r.version), RecordUpdate::done())
            .unwrap();
    }

    // ============================================================
    // TEST 1: Events
    // ============================================================

    #[tokio::test]
    async fn test_publish_s3_notification() {
        // ARRANGE
        let context = context();
        let body = r#"{"Records":[{"eventName":"ObjectCreated:Put","eventTime":"2024-05-01T12:00:00.000Z","s3":{"object":{"key":"docs/my+report.txt"}}}]}"#;

        // ACT
        let (status, response) =
            handle_publish_events(Extension(context.clone()), body.to_string()).await;

        // ASSERT
        assert_eq!(status, StatusCode::ACCEPTED);
        let data = response.0.data.unwrap();
        assert_eq!(data.events, 1);
        assert_eq!(data.reports[0].delivered(), 1);
        let leased = context.queue.try_lease(1);
        assert_eq!(leased[0].0.payload().unwrap().source_key, "docs/my report.txt");
    }

    #[tokio::test]
    async fn test_malformed_notification_is_bad_request() {
        let context = context();

        let (status, response) =
            handle_publish_events(Extension(context.clone()), "{oops".to_string()).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(response.0.error.is_some());
        assert!(context.queue.is_empty());
    }

    #[tokio::test]
    async fn test_upload_stores_document_and_announces_it() {
        // ARRANGE
        let context = context();
        let key = || Path("docs/a.txt".to_string());

        // ACT
        let (created, first) = handle_put_source(
            Extension(context.clone()),
            key(),
            Bytes::from_static(b"one\n\ntwo"),
        )
        .await;
        let (updated, second) =
            handle_put_source(Extension(context.clone()), key(), Bytes::from_static(b"three"))
                .await;
        let (removed, third) = handle_delete_source(Extension(context.clone()), key()).await;
        let (missing, _) = handle_delete_source(Extension(context.clone()), key()).await;

        // ASSERT
        assert_eq!(created, StatusCode::ACCEPTED);
        assert_eq!(updated, StatusCode::ACCEPTED);
        assert_eq!(removed, StatusCode::ACCEPTED);
        assert_eq!(missing, StatusCode::NOT_FOUND);
        assert_eq!(first.0.data.unwrap().event.event_type, EventType::Created);
        assert_eq!(second.0.data.unwrap().event.event_type, EventType::Updated);
        let third = third.0.data.unwrap();
        assert_eq!(third.event.event_type, EventType::Removed);
        assert_eq!(third.report.delivered(), 1);
        assert!(!context.source.contains("docs/a.txt"));

        let leased = context.queue.try_lease(3);
        let types: Vec<_> = leased
            .iter()
            .map(|(message, _)| message.payload().unwrap().event_type)
            .collect();
        assert_eq!(
            types,
            vec![EventType::Created, EventType::Updated, EventType::Removed]
        );
    }

    // ============================================================
    // TEST 2: Records
    // ============================================================

    #[tokio::test]
    async fn test_get_record_and_missing_record() {
        let context = context();
        finish(&context, "docs/a.txt");

        let (found, record) =
            handle_get_record(Extension(context.clone()), Path("docs/a.txt".to_string())).await;
        let (missing, _) =
            handle_get_record(Extension(context.clone()), Path("docs/b.txt".to_string())).await;

        assert_eq!(found, StatusCode::OK);
        assert_eq!(record.0.data.unwrap().record.status, ProcessingStatus::Done);
        assert_eq!(missing, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_force_reprocess_done_record() {
        let context = context();
        finish(&context, "docs/a.txt");

        let (status, response) =
            handle_force_reprocess(Extension(context.clone()), Path("docs/a.txt".to_string()))
                .await;
        let (again, _) =
            handle_force_reprocess(Extension(context.clone()), Path("docs/a.txt".to_string()))
                .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(response.0.data.unwrap().record.status, ProcessingStatus::Pending);
        assert_eq!(again, StatusCode::CONFLICT, "Pending cannot be forced again");
    }

    // ============================================================
    // TEST 3: Quarantine
    // ============================================================

    #[tokio::test]
    async fn test_list_and_replay_once() {
        // ARRANGE: one permanently failed message
        let context = context();
        context
            .queue
            .enqueue(&ChangeEvent::new("docs/a.txt", EventType::Created))
            .unwrap();
        let (_, token) = context.queue.try_lease(1).remove(0);
        context
            .queue
            .dead_letter(&token, QuarantineReason::Permanent, Some("bad".into()))
            .unwrap();
        let id = token.message_id.0.clone();

        // ACT
        let (replayed, response) =
            handle_replay_quarantined(Extension(context.clone()), Path(id.clone())).await;
        let (again, _) = handle_replay_quarantined(Extension(context.clone()), Path(id)).await;
        let (listed, entries) = handle_list_quarantine(Extension(context.clone())).await;

        // ASSERT
        assert_eq!(replayed, StatusCode::OK);
        let new_id = response.0.data.unwrap().new_message_id;
        assert_eq!(context.queue.peek(&new_id).unwrap().delivery_count, 0);
        assert_eq!(again, StatusCode::CONFLICT);
        assert_eq!(listed, StatusCode::OK);
        let entries = entries.0.data.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].replay.as_ref().unwrap().new_message_id, new_id);
    }

    #[tokio::test]
    async fn test_replay_unknown_id_is_not_found() {
        let context = context();

        let (status, _) =
            handle_replay_quarantined(Extension(context), Path("nope".to_string())).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_queue_stats_and_health() {
        let context = context();
        context
            .queue
            .enqueue(&ChangeEvent::new("docs/a.txt", EventType::Created))
            .unwrap();
        finish(&context, "docs/b.txt");

        let (status, stats) = handle_queue_stats(Extension(context.clone())).await;
        let (health, body) = handle_health(Extension(context)).await;

        assert_eq!(status, StatusCode::OK);
        let stats = stats.0.data.unwrap();
        assert_eq!(stats.queue, "embeddings");
        assert_eq!(stats.stats.available, 1);
        assert_eq!(stats.records.done, 1);
        assert_eq!(health, StatusCode::OK);
        assert_eq!(body.0.data.unwrap().metadata_table, "records");
    }

    // ============================================================
    // TEST 4: Authorization
    // ============================================================

    #[tokio::test]
    async fn test_operator_endpoints_require_capabilities() {
        let read_only = context_with(CapabilitySet::custom(
            Role::Operator,
            [Capability::ReadMetadata, Capability::ReadQuarantine],
        ));
        finish(&read_only, "docs/a.txt");

        let (forced, response) =
            handle_force_reprocess(Extension(read_only.clone()), Path("docs/a.txt".to_string()))
                .await;
        let (replay, _) =
            handle_replay_quarantined(Extension(read_only.clone()), Path("x".to_string())).await;
        let (read, _) =
            handle_get_record(Extension(read_only.clone()), Path("docs/a.txt".to_string())).await;
        let (upload, _) = handle_put_source(
            Extension(read_only.clone()),
            Path("docs/b.txt".to_string()),
            Bytes::from_static(b"text"),
        )
        .await;

        assert_eq!(forced, StatusCode::FORBIDDEN);
        assert!(response.0.error.unwrap().contains("WriteMetadata"));
        assert_eq!(replay, StatusCode::FORBIDDEN);
        assert_eq!(read, StatusCode::OK);
        assert_eq!(upload, StatusCode::FORBIDDEN);
        assert!(read_only.source.is_empty());
        assert_eq!(
            read_only.records.get(&ObjectId::from("docs/a.txt")).unwrap().unwrap().status,
            ProcessingStatus::Done
        );
    }
}
