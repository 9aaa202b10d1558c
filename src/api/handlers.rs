use super::ApiContext;
use super::protocol::*;
use crate::capabilities::Capability;
use crate::events::{ChangeEvent, EventType, ObjectId, parse_notification};
use crate::metadata::{MetadataError, RecordStore};
use crate::quarantine::QuarantineError;
use crate::queue::MessageId;

use axum::{Extension, Json, body::Bytes, extract::Path, http::StatusCode};
use std::sync::Arc;

type Reply<T> = (StatusCode, Json<ApiResponse<T>>);

fn fail<T>(status: StatusCode, error: impl ToString) -> Reply<T> {
    (status, Json(ApiResponse::err(error)))
}

/// Checks the operator credentials; a denial becomes a 403 reply.
fn authorize<T>(context: &ApiContext, capabilities: &[Capability]) -> Result<(), Reply<T>> {
    context
        .credentials
        .require_all(capabilities)
        .map_err(|e| fail(StatusCode::FORBIDDEN, e))
}

/// Accepts a storage notification and fans its events out to the subscribed queues.
///
/// Replies 502 when any delivery failed so the sender retries; redelivered
/// events that already went out are suppressed or tolerated downstream.
pub async fn handle_publish_events(
    Extension(context): Extension<Arc<ApiContext>>,
    body: String,
) -> Reply<PublishResponse> {
    let events = match parse_notification(&body) {
        Ok(events) => events,
        Err(e) => {
            tracing::warn!("Rejected notification: {}", e);
            return fail(StatusCode::BAD_REQUEST, e);
        }
    };

    let reports: Vec<_> = events
        .iter()
        .map(|event| context.notifier.publish(event))
        .collect();

    let status = if reports.iter().any(|report| report.failed() > 0) {
        StatusCode::BAD_GATEWAY
    } else {
        StatusCode::ACCEPTED
    };

    (
        status,
        Json(ApiResponse::ok(PublishResponse {
            events: events.len(),
            reports,
        })),
    )
}

/// Announces a change to the source location the way the storage service would.
fn announce(context: &ApiContext, event: ChangeEvent) -> Reply<SourceResponse> {
    let report = context.notifier.publish(&event);
    let status = if report.failed() > 0 {
        StatusCode::BAD_GATEWAY
    } else {
        StatusCode::ACCEPTED
    };
    (status, Json(ApiResponse::ok(SourceResponse { event, report })))
}

/// Stores a document in the source location and publishes `Created`, or
/// `Updated` when the key already existed.
pub async fn handle_put_source(
    Extension(context): Extension<Arc<ApiContext>>,
    Path(key): Path<String>,
    body: Bytes,
) -> Reply<SourceResponse> {
    if let Err(denied) = authorize(&context, &[Capability::WriteSource]) {
        return denied;
    }
    if key.trim().is_empty() {
        return fail(StatusCode::BAD_REQUEST, "empty source key");
    }

    let event_type = if context.source.contains(&key) {
        EventType::Updated
    } else {
        EventType::Created
    };
    context.source.put(&key, body.to_vec());
    tracing::info!("Stored {} ({} bytes) in '{}'", key, body.len(), context.source.location());

    announce(&context, ChangeEvent::new(key, event_type))
}

pub async fn handle_delete_source(
    Extension(context): Extension<Arc<ApiContext>>,
    Path(key): Path<String>,
) -> Reply<SourceResponse> {
    if let Err(denied) = authorize(&context, &[Capability::WriteSource]) {
        return denied;
    }
    if !context.source.delete(&key) {
        return fail(
            StatusCode::NOT_FOUND,
            format!("no object '{}' in '{}'", key, context.source.location()),
        );
    }
    tracing::info!("Removed {} from '{}'", key, context.source.location());

    announce(&context, ChangeEvent::new(key, EventType::Removed))
}

pub async fn handle_get_record(
    Extension(context): Extension<Arc<ApiContext>>,
    Path(object_id): Path<String>,
) -> Reply<RecordResponse> {
    if let Err(denied) = authorize(&context, &[Capability::ReadMetadata]) {
        return denied;
    }

    let object_id = ObjectId(object_id);
    match context.records.get(&object_id) {
        Ok(Some(record)) => (StatusCode::OK, Json(ApiResponse::ok(RecordResponse { record }))),
        Ok(None) => fail(
            StatusCode::NOT_FOUND,
            MetadataError::NotFound(object_id),
        ),
        Err(e) => {
            tracing::error!("Failed to read record {}: {}", object_id, e);
            fail(StatusCode::SERVICE_UNAVAILABLE, e)
        }
    }
}

/// Sends a `Done` or `Failed` object back to `Pending` so its next event is processed.
pub async fn handle_force_reprocess(
    Extension(context): Extension<Arc<ApiContext>>,
    Path(object_id): Path<String>,
) -> Reply<RecordResponse> {
    if let Err(denied) = authorize(&context, &[Capability::WriteMetadata]) {
        return denied;
    }

    match context.records.force_reprocess(&ObjectId(object_id)) {
        Ok(record) => (StatusCode::OK, Json(ApiResponse::ok(RecordResponse { record }))),
        Err(e @ MetadataError::NotFound(_)) => fail(StatusCode::NOT_FOUND, e),
        Err(e @ MetadataError::IllegalTransition { .. }) => fail(StatusCode::CONFLICT, e),
        Err(e) => fail(StatusCode::SERVICE_UNAVAILABLE, e),
    }
}

pub async fn handle_list_quarantine(
    Extension(context): Extension<Arc<ApiContext>>,
) -> Reply<Vec<QuarantineEntry>> {
    if let Err(denied) = authorize(&context, &[Capability::ReadQuarantine]) {
        return denied;
    }

    let entries = context
        .quarantine
        .list()
        .into_iter()
        .map(|record| {
            let replay = context.quarantine.replay_of(record.id());
            QuarantineEntry { record, replay }
        })
        .collect();

    (StatusCode::OK, Json(ApiResponse::ok(entries)))
}

pub async fn handle_replay_quarantined(
    Extension(context): Extension<Arc<ApiContext>>,
    Path(id): Path<String>,
) -> Reply<ReplayResponse> {
    if let Err(denied) = authorize(
        &context,
        &[Capability::ReplayQuarantine, Capability::PublishQueue],
    ) {
        return denied;
    }

    let quarantined_id = MessageId(id);
    match context.quarantine.replay(&quarantined_id, &context.queue) {
        Ok(new_message_id) => (
            StatusCode::OK,
            Json(ApiResponse::ok(ReplayResponse {
                quarantined_id,
                new_message_id,
            })),
        ),
        Err(e @ QuarantineError::NotFound(_)) => fail(StatusCode::NOT_FOUND, e),
        Err(e @ QuarantineError::AlreadyReplayed { .. }) => fail(StatusCode::CONFLICT, e),
    }
}

pub async fn handle_queue_stats(
    Extension(context): Extension<Arc<ApiContext>>,
) -> Reply<QueueStatsResponse> {
    if let Err(denied) = authorize(&context, &[Capability::ReadMetadata]) {
        return denied;
    }

    (
        StatusCode::OK,
        Json(ApiResponse::ok(QueueStatsResponse {
            queue: context.queue.name().to_string(),
            stats: context.queue.stats(),
            records: context.records.status_counts(),
            quarantined: context.quarantine.len(),
        })),
    )
}

pub async fn handle_health(
    Extension(context): Extension<Arc<ApiContext>>,
) -> Reply<HealthResponse> {
    (
        StatusCode::OK,
        Json(ApiResponse::ok(HealthResponse {
            status: "ok".to_string(),
            metadata_table: context.records.table_name().to_string(),
        })),
    )
}
