use crate::queue::types::{MessageId, QueueMessage};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Why a message left the active queue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuarantineReason {
    /// The processing function reported a failure retrying cannot fix.
    Permanent,
    /// The delivery count reached the queue's `max_receive_count`.
    RetriesExhausted,
    /// The message outlived the queue's retention period.
    RetentionExpired,
}

impl QuarantineReason {
    pub fn label(&self) -> &'static str {
        match self {
            QuarantineReason::Permanent => "permanent",
            QuarantineReason::RetriesExhausted => "retries_exhausted",
            QuarantineReason::RetentionExpired => "retention_expired",
        }
    }
}

impl fmt::Display for QuarantineReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A message parked in the dead-letter quarantine. Written once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuarantineRecord {
    pub original_message: QueueMessage,
    pub failure_reason: QuarantineReason,
    /// Error text reported by the component that gave up on the message.
    pub detail: Option<String>,
    pub first_failed_at: DateTime<Utc>,
    pub delivery_count_at_quarantine: u32,
}

impl QuarantineRecord {
    pub fn id(&self) -> &MessageId {
        &self.original_message.id
    }
}

/// Entry in the replay log: which quarantined message was re-enqueued, and as what.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReplayEntry {
    pub replayed_at: DateTime<Utc>,
    pub new_message_id: MessageId,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuarantineError {
    #[error("no quarantined message with id {0}")]
    NotFound(MessageId),
    #[error("message {id} was already replayed as {new_message_id}")]
    AlreadyReplayed {
        id: MessageId,
        new_message_id: MessageId,
    },
}
