use crate::events::{ChangeEvent, EventParseError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for a message within a queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    /// Generates a new random UUID v4-based MessageId.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Proof of a single lease grant.
///
/// Every grant mints a fresh receipt, so a token from an expired lease cannot
/// acknowledge or extend the lease a later consumer holds on the same message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseToken {
    pub message_id: MessageId,
    receipt: Uuid,
}

impl LeaseToken {
    pub(crate) fn grant(message_id: MessageId) -> Self {
        Self {
            message_id,
            receipt: Uuid::new_v4(),
        }
    }

    pub fn receipt(&self) -> Uuid {
        self.receipt
    }
}

/// A unit of work buffered by the `DurableQueue`.
///
/// The body is the serialized `ChangeEvent` exactly as it was enqueued; it is
/// only decoded by the consumer, so a malformed upstream payload surfaces as a
/// processing failure instead of being lost at enqueue time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    pub id: MessageId,
    pub body: String,
    pub enqueued_at: DateTime<Utc>,
    /// Wall-clock end of the current lease, if any lease was ever granted.
    pub visibility_deadline: Option<DateTime<Utc>>,
    /// Number of lease grants so far. Starts at 0.
    pub delivery_count: u32,
}

impl QueueMessage {
    pub fn payload(&self) -> Result<ChangeEvent, EventParseError> {
        ChangeEvent::from_json(&self.body)
    }

    pub fn envelope(&self) -> MessageEnvelope {
        MessageEnvelope {
            message_id: self.id.clone(),
            body: self.body.clone(),
            attributes: MessageAttributes {
                approx_receive_count: self.delivery_count,
                enqueued_at: self.enqueued_at,
            },
        }
    }
}

/// External representation of a message: body plus delivery attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    pub message_id: MessageId,
    pub body: String,
    pub attributes: MessageAttributes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageAttributes {
    pub approx_receive_count: u32,
    pub enqueued_at: DateTime<Utc>,
}

/// Redrive and lease settings of a single queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    /// Lease duration granted by `lease_batch`.
    pub visibility_timeout: Duration,
    /// Deliveries allowed before the next lease attempt dead-letters the message.
    pub max_receive_count: u32,
    /// Messages older than this are dead-lettered instead of leased.
    pub retention_period: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(300),
            max_receive_count: 3,
            retention_period: Duration::from_secs(14 * 24 * 60 * 60),
        }
    }
}

/// Snapshot of queue occupancy.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub available: usize,
    pub in_flight: usize,
    pub dead_lettered: u64,
    pub acknowledged: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The message was already acknowledged or dead-lettered.
    #[error("message {0} is no longer in the queue")]
    UnknownMessage(MessageId),
    /// The lease deadline passed; the message may already be leased elsewhere.
    #[error("lease on message {0} has expired")]
    LeaseExpired(MessageId),
    /// The token belongs to an earlier lease grant.
    #[error("lease token for message {0} is stale")]
    StaleReceipt(MessageId),
    #[error("failed to serialize event: {0}")]
    Encode(String),
}
