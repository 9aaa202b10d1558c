use crate::queue::{MessageId, QueueError};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a single subscriber did not take an event.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("subscriber rejected the event: {0}")]
    Rejected(String),
    #[error("subscriber unavailable: {0}")]
    Unavailable(String),
}

impl From<QueueError> for DeliveryError {
    fn from(err: QueueError) -> Self {
        DeliveryError::Rejected(err.to_string())
    }
}

/// Outcome of delivering one event to one subscriber.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub subscriber: String,
    pub message_id: Option<MessageId>,
    pub error: Option<String>,
}

impl Delivery {
    pub fn is_delivered(&self) -> bool {
        self.message_id.is_some()
    }
}

/// What `publish` did with an event.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublishReport {
    /// The same event was already fanned out inside the dedup window; nothing was delivered.
    pub duplicate: bool,
    pub deliveries: Vec<Delivery>,
}

impl PublishReport {
    pub fn delivered(&self) -> usize {
        self.deliveries.iter().filter(|d| d.is_delivered()).count()
    }

    pub fn failed(&self) -> usize {
        self.deliveries.len() - self.delivered()
    }
}
