use super::types::*;
use crate::queue::DurableQueue;
use crate::queue::types::{MessageId, QueueMessage};

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Append-only sink for messages that left the active queue for good.
///
/// Records are keyed by the original message id, so admitting the same message
/// twice keeps the first record. Replays go to a separate log; the record
/// itself is never rewritten.
pub struct Quarantine {
    records: DashMap<MessageId, QuarantineRecord>,
    replays: DashMap<MessageId, ReplayEntry>,
}

impl Quarantine {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            replays: DashMap::new(),
        }
    }

    /// Stores `message` with the reason it was given up on.
    ///
    /// Returns `false` if the message was already quarantined.
    pub fn admit(
        &self,
        message: QueueMessage,
        reason: QuarantineReason,
        detail: Option<String>,
    ) -> bool {
        match self.records.entry(message.id.clone()) {
            Entry::Occupied(_) => {
                tracing::debug!("Message {} already quarantined", message.id);
                false
            }
            Entry::Vacant(slot) => {
                tracing::info!(
                    "Quarantined message {} after {} deliveries: {}",
                    message.id,
                    message.delivery_count,
                    reason
                );
                slot.insert(QuarantineRecord {
                    delivery_count_at_quarantine: message.delivery_count,
                    original_message: message,
                    failure_reason: reason,
                    detail,
                    first_failed_at: Utc::now(),
                });
                true
            }
        }
    }

    /// All records, oldest first.
    pub fn list(&self) -> Vec<QuarantineRecord> {
        let mut records: Vec<QuarantineRecord> = self
            .records
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by(|a, b| {
            a.first_failed_at
                .cmp(&b.first_failed_at)
                .then_with(|| a.id().cmp(b.id()))
        });
        records
    }

    pub fn get(&self, id: &MessageId) -> Option<QuarantineRecord> {
        self.records.get(id).map(|entry| entry.value().clone())
    }

    pub fn replay_of(&self, id: &MessageId) -> Option<ReplayEntry> {
        self.replays.get(id).map(|entry| entry.value().clone())
    }

    /// Re-enqueues the original body of a quarantined message onto `queue`.
    ///
    /// Operator-triggered only; nothing in the pipeline calls this on its own.
    /// The new message starts with a fresh delivery count. Each record can be
    /// replayed once.
    pub fn replay(&self, id: &MessageId, queue: &DurableQueue) -> Result<MessageId, QuarantineError> {
        let record = self
            .records
            .get(id)
            .ok_or_else(|| QuarantineError::NotFound(id.clone()))?;

        match self.replays.entry(id.clone()) {
            Entry::Occupied(existing) => Err(QuarantineError::AlreadyReplayed {
                id: id.clone(),
                new_message_id: existing.get().new_message_id.clone(),
            }),
            Entry::Vacant(slot) => {
                let new_message_id = queue.enqueue_raw(record.original_message.body.clone());
                tracing::info!(
                    "Replayed quarantined message {} onto '{}' as {}",
                    id,
                    queue.name(),
                    new_message_id
                );
                slot.insert(ReplayEntry {
                    replayed_at: Utc::now(),
                    new_message_id: new_message_id.clone(),
                });
                Ok(new_message_id)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for Quarantine {
    fn default() -> Self {
        Self::new()
    }
}
