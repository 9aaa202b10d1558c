//! Durable Queue Engine
//!
//! Buffers change events and hands them out under time-bounded leases.
//!
//! ## Responsibilities
//! - **Leasing**: A lease hides a message from other consumers until its deadline.
//!   Each grant bumps `delivery_count` and mints a new receipt.
//! - **Implicit Nack**: A lease that is neither acknowledged nor extended before its
//!   deadline lapses, and the message becomes available again. No heartbeat exists
//!   beyond `extend_lease`.
//! - **Redrive**: A message whose delivery count reached `max_receive_count` (or whose
//!   age exceeds the retention period) is moved to the `Quarantine` on the next lease
//!   attempt instead of being granted.
//! - **Cooperative Wait**: `lease_batch` parks on a `Notify` until work arrives, a lease
//!   lapses, or the wait window closes.

use super::types::*;
use crate::events::ChangeEvent;
use crate::quarantine::{Quarantine, QuarantineReason};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

struct Lease {
    receipt: Uuid,
    deadline: Instant,
}

/// Internal bookkeeping for one message.
struct Slot {
    message: QueueMessage,
    /// Enqueue order, used to hand out older messages first.
    seq: u64,
    enqueued: Instant,
    lease: Option<Lease>,
}

impl Slot {
    fn is_available(&self, now: Instant) -> bool {
        match &self.lease {
            None => true,
            Some(lease) => now >= lease.deadline,
        }
    }

    fn check_lease(&self, token: &LeaseToken, now: Instant) -> Result<(), QueueError> {
        match &self.lease {
            Some(lease) if lease.receipt == token.receipt() => {
                if now < lease.deadline {
                    Ok(())
                } else {
                    Err(QueueError::LeaseExpired(token.message_id.clone()))
                }
            }
            _ => Err(QueueError::StaleReceipt(token.message_id.clone())),
        }
    }
}

enum Claim {
    Granted(QueueMessage, LeaseToken),
    Redrive(QuarantineReason),
    Skipped,
}

/// A single named queue with its dead-letter target.
pub struct DurableQueue {
    name: String,
    options: QueueOptions,
    messages: DashMap<MessageId, Slot>,
    dead_letters: Arc<Quarantine>,
    available: Notify,
    next_seq: AtomicU64,
    acknowledged: AtomicU64,
    dead_lettered: AtomicU64,
}

impl DurableQueue {
    /// Creates an empty queue that redrives exhausted messages into `dead_letters`.
    pub fn new(name: &str, options: QueueOptions, dead_letters: Arc<Quarantine>) -> Self {
        Self {
            name: name.to_string(),
            options,
            messages: DashMap::new(),
            dead_letters,
            available: Notify::new(),
            next_seq: AtomicU64::new(0),
            acknowledged: AtomicU64::new(0),
            dead_lettered: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    pub fn dead_letters(&self) -> &Arc<Quarantine> {
        &self.dead_letters
    }

    /// Serializes `event` and appends it to the queue.
    pub fn enqueue(&self, event: &ChangeEvent) -> Result<MessageId, QueueError> {
        let body = event
            .to_json()
            .map_err(|e| QueueError::Encode(e.to_string()))?;
        Ok(self.enqueue_raw(body))
    }

    /// Appends an already-serialized body. The body is not validated here.
    pub fn enqueue_raw(&self, body: String) -> MessageId {
        let id = MessageId::new();
        let slot = Slot {
            message: QueueMessage {
                id: id.clone(),
                body,
                enqueued_at: Utc::now(),
                visibility_deadline: None,
                delivery_count: 0,
            },
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            enqueued: Instant::now(),
            lease: None,
        };
        self.messages.insert(id.clone(), slot);
        self.available.notify_waiters();

        tracing::debug!("Enqueued message {} on queue '{}'", id, self.name);
        id
    }

    /// Leases up to `max_count` messages, waiting at most `max_wait` for the batch to fill.
    ///
    /// Returns early as soon as `max_count` messages are leased. An empty result means
    /// the wait window closed with nothing available.
    pub async fn lease_batch(
        &self,
        max_count: usize,
        max_wait: Duration,
    ) -> Vec<(QueueMessage, LeaseToken)> {
        let deadline = Instant::now() + max_wait;
        let mut batch = Vec::new();

        loop {
            // Register interest before scanning so an enqueue racing the scan still wakes us.
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            batch.extend(self.try_lease(max_count.saturating_sub(batch.len())));
            if batch.len() >= max_count {
                break;
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }

            let wake_at = match self.next_expiry(now) {
                Some(expiry) => expiry.min(deadline),
                None => deadline,
            };
            let _ = tokio::time::timeout_at(wake_at, notified).await;
        }

        if !batch.is_empty() {
            tracing::trace!("Leased {} message(s) from '{}'", batch.len(), self.name);
        }
        batch
    }

    /// Non-blocking variant of `lease_batch`: one scan, no waiting.
    pub fn try_lease(&self, max_count: usize) -> Vec<(QueueMessage, LeaseToken)> {
        if max_count == 0 {
            return Vec::new();
        }

        let now = Instant::now();
        let mut candidates: Vec<(u64, MessageId)> = self
            .messages
            .iter()
            .filter(|entry| entry.value().is_available(now))
            .map(|entry| (entry.value().seq, entry.key().clone()))
            .collect();
        candidates.sort();

        let mut batch = Vec::new();
        for (_, id) in candidates {
            if batch.len() >= max_count {
                break;
            }
            match self.try_claim(&id, now) {
                Claim::Granted(message, token) => batch.push((message, token)),
                Claim::Redrive(reason) => self.redrive(&id, reason, now),
                Claim::Skipped => {}
            }
        }
        batch
    }

    fn redrive_reason(&self, slot: &Slot, now: Instant) -> Option<QuarantineReason> {
        if now.duration_since(slot.enqueued) >= self.options.retention_period {
            Some(QuarantineReason::RetentionExpired)
        } else if slot.message.delivery_count >= self.options.max_receive_count {
            Some(QuarantineReason::RetriesExhausted)
        } else {
            None
        }
    }

    /// Atomically grants a lease on `id` if it is still available.
    fn try_claim(&self, id: &MessageId, now: Instant) -> Claim {
        let Some(mut slot) = self.messages.get_mut(id) else {
            return Claim::Skipped;
        };
        // Another consumer may have claimed it since the scan.
        if !slot.is_available(now) {
            return Claim::Skipped;
        }
        if let Some(reason) = self.redrive_reason(&slot, now) {
            return Claim::Redrive(reason);
        }

        let token = LeaseToken::grant(id.clone());
        slot.message.delivery_count += 1;
        slot.message.visibility_deadline = Some(wall_clock_after(self.options.visibility_timeout));
        slot.lease = Some(Lease {
            receipt: token.receipt(),
            deadline: now + self.options.visibility_timeout,
        });

        tracing::debug!(
            "Leased message {} (delivery {})",
            id,
            slot.message.delivery_count
        );
        Claim::Granted(slot.message.clone(), token)
    }

    fn redrive(&self, id: &MessageId, reason: QuarantineReason, now: Instant) {
        let removed = self.messages.remove_if(id, |_, slot| {
            slot.is_available(now) && self.redrive_reason(slot, now).is_some()
        });

        if let Some((_, slot)) = removed {
            let detail = match reason {
                QuarantineReason::RetriesExhausted => Some(format!(
                    "delivery count reached max_receive_count={}",
                    self.options.max_receive_count
                )),
                QuarantineReason::RetentionExpired => Some(format!(
                    "message older than retention period of {}s",
                    self.options.retention_period.as_secs()
                )),
                QuarantineReason::Permanent => None,
            };
            tracing::warn!(
                "Redriving message {} from '{}' to quarantine ({})",
                id,
                self.name,
                reason
            );
            self.admit(slot.message, reason, detail);
        }
    }

    fn admit(&self, message: QueueMessage, reason: QuarantineReason, detail: Option<String>) {
        if self.dead_letters.admit(message, reason, detail) {
            self.dead_lettered.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Deletes a leased message. Fails if the lease is no longer held by `token`.
    pub fn acknowledge(&self, token: &LeaseToken) -> Result<(), QueueError> {
        let now = Instant::now();
        let removed = self
            .messages
            .remove_if(&token.message_id, |_, slot| slot.check_lease(token, now).is_ok());

        if removed.is_some() {
            self.acknowledged.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Acknowledged message {}", token.message_id);
            return Ok(());
        }

        Err(self.lease_error(token, now))
    }

    /// Pushes the lease deadline of a held lease to `now + duration`.
    pub fn extend_lease(&self, token: &LeaseToken, duration: Duration) -> Result<(), QueueError> {
        let now = Instant::now();
        let mut slot = self
            .messages
            .get_mut(&token.message_id)
            .ok_or_else(|| QueueError::UnknownMessage(token.message_id.clone()))?;
        slot.check_lease(token, now)?;

        slot.lease = Some(Lease {
            receipt: token.receipt(),
            deadline: now + duration,
        });
        slot.message.visibility_deadline = Some(wall_clock_after(duration));

        tracing::trace!("Extended lease on message {}", token.message_id);
        Ok(())
    }

    /// Releases a held lease so the message is immediately available again.
    pub fn nack(&self, token: &LeaseToken) -> Result<(), QueueError> {
        let now = Instant::now();
        {
            let mut slot = self
                .messages
                .get_mut(&token.message_id)
                .ok_or_else(|| QueueError::UnknownMessage(token.message_id.clone()))?;
            slot.check_lease(token, now)?;
            slot.lease = None;
            slot.message.visibility_deadline = None;
        }
        self.available.notify_waiters();

        tracing::debug!("Released message {} for redelivery", token.message_id);
        Ok(())
    }

    /// Moves a leased message straight to the quarantine, bypassing the retry budget.
    pub fn dead_letter(
        &self,
        token: &LeaseToken,
        reason: QuarantineReason,
        detail: Option<String>,
    ) -> Result<(), QueueError> {
        let now = Instant::now();
        let removed = self
            .messages
            .remove_if(&token.message_id, |_, slot| slot.check_lease(token, now).is_ok());

        match removed {
            Some((_, slot)) => {
                tracing::warn!(
                    "Dead-lettering message {} from '{}' ({})",
                    token.message_id,
                    self.name,
                    reason
                );
                self.admit(slot.message, reason, detail);
                Ok(())
            }
            None => Err(self.lease_error(token, now)),
        }
    }

    fn lease_error(&self, token: &LeaseToken, now: Instant) -> QueueError {
        match self.messages.get(&token.message_id) {
            None => QueueError::UnknownMessage(token.message_id.clone()),
            Some(slot) => match slot.check_lease(token, now) {
                Err(e) => e,
                Ok(()) => QueueError::StaleReceipt(token.message_id.clone()),
            },
        }
    }

    /// Earliest lease deadline still in the future.
    fn next_expiry(&self, now: Instant) -> Option<Instant> {
        self.messages
            .iter()
            .filter_map(|entry| entry.value().lease.as_ref().map(|lease| lease.deadline))
            .filter(|deadline| *deadline > now)
            .min()
    }

    /// Returns a copy of a message without affecting its lease.
    pub fn peek(&self, id: &MessageId) -> Option<QueueMessage> {
        self.messages.get(id).map(|slot| slot.message.clone())
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        let now = Instant::now();
        let mut stats = QueueStats {
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
            ..QueueStats::default()
        };
        for entry in self.messages.iter() {
            if entry.value().is_available(now) {
                stats.available += 1;
            } else {
                stats.in_flight += 1;
            }
        }
        stats
    }
}

fn wall_clock_after(duration: Duration) -> DateTime<Utc> {
    let now = Utc::now();
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(now)
}
