//! Operator HTTP Protocol
//!
//! Data Transfer Objects and endpoint paths of the operator surface.

use crate::events::ChangeEvent;
use crate::metadata::{ProcessingRecord, StatusCounts};
use crate::notifier::PublishReport;
use crate::quarantine::{QuarantineRecord, ReplayEntry};
use crate::queue::{MessageId, QueueStats};

use serde::{Deserialize, Serialize};

pub const ENDPOINT_EVENTS: &str = "/events";
pub const ENDPOINT_SOURCES: &str = "/sources/*key";
pub const ENDPOINT_RECORDS: &str = "/records/*object_id";
pub const ENDPOINT_QUARANTINE: &str = "/quarantine";
pub const ENDPOINT_QUARANTINE_REPLAY: &str = "/quarantine/:id/replay";
pub const ENDPOINT_QUEUE_STATS: &str = "/queue/stats";
pub const ENDPOINT_HEALTH: &str = "/health";

/// Envelope of every operator response: either `data` or `error` is set.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: impl ToString) -> Self {
        Self {
            data: None,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    /// Change events decoded from the notification.
    pub events: usize,
    pub reports: Vec<PublishReport>,
}

/// Result of an upload to or removal from the source location.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceResponse {
    pub event: ChangeEvent,
    pub report: PublishReport,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordResponse {
    pub record: ProcessingRecord,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuarantineEntry {
    pub record: QuarantineRecord,
    pub replay: Option<ReplayEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayResponse {
    pub quarantined_id: MessageId,
    pub new_message_id: MessageId,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatsResponse {
    pub queue: String,
    pub stats: QueueStats,
    pub records: StatusCounts,
    pub quarantined: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub metadata_table: String,
}
