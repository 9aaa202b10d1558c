//! Fan-out Notifier
//!
//! Delivers every published event to each subscribed queue. Deliveries are
//! isolated: a subscriber that fails is reported and skipped, the others still
//! receive the event.
//!
//! Subscribers are registered with `&mut self` before the notifier is wrapped
//! in an `Arc`; after that the subscriber list is fixed.

use super::types::*;
use crate::capabilities::{Capability, CapabilityError, CapabilitySet};
use crate::events::ChangeEvent;
use crate::queue::{DurableQueue, MessageId};

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Upper bound on fingerprints kept for duplicate suppression.
const MAX_TRACKED_EVENTS: usize = 10_000;

/// A destination the notifier can deliver events to.
pub trait Subscriber: Send + Sync {
    fn name(&self) -> &str;

    fn deliver(&self, event: &ChangeEvent) -> Result<MessageId, DeliveryError>;
}

impl Subscriber for DurableQueue {
    fn name(&self) -> &str {
        DurableQueue::name(self)
    }

    fn deliver(&self, event: &ChangeEvent) -> Result<MessageId, DeliveryError> {
        Ok(self.enqueue(event)?)
    }
}

pub struct FanoutNotifier {
    subscribers: Vec<Arc<dyn Subscriber>>,
    dedup_window: Duration,
    /// Fingerprint -> when the event was last fanned out successfully.
    recent: DashMap<String, Instant>,
}

impl FanoutNotifier {
    /// Creates a notifier with no subscribers.
    ///
    /// A zero `dedup_window` disables duplicate suppression.
    pub fn new(credentials: &CapabilitySet, dedup_window: Duration) -> Result<Self, CapabilityError> {
        credentials.require(Capability::PublishQueue)?;

        Ok(Self {
            subscribers: Vec::new(),
            dedup_window,
            recent: DashMap::new(),
        })
    }

    pub fn subscribe(&mut self, subscriber: Arc<dyn Subscriber>) {
        tracing::info!("Subscribed '{}' to change events", subscriber.name());
        self.subscribers.push(subscriber);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Delivers `event` to every subscriber.
    ///
    /// An event is only remembered for duplicate suppression once every
    /// subscriber has taken it, so republishing after a partial failure
    /// reaches the subscribers that missed it.
    pub fn publish(&self, event: &ChangeEvent) -> PublishReport {
        let fingerprint = event.fingerprint();
        let now = Instant::now();

        if self.recently_published(&fingerprint, now) {
            tracing::debug!("Suppressed duplicate event for '{}'", event.source_key);
            return PublishReport {
                duplicate: true,
                deliveries: Vec::new(),
            };
        }

        let deliveries: Vec<Delivery> = self
            .subscribers
            .iter()
            .map(|subscriber| match subscriber.deliver(event) {
                Ok(message_id) => Delivery {
                    subscriber: subscriber.name().to_string(),
                    message_id: Some(message_id),
                    error: None,
                },
                Err(e) => {
                    tracing::warn!(
                        "Delivery of '{}' to '{}' failed: {}",
                        event.source_key,
                        subscriber.name(),
                        e
                    );
                    Delivery {
                        subscriber: subscriber.name().to_string(),
                        message_id: None,
                        error: Some(e.to_string()),
                    }
                }
            })
            .collect();

        let report = PublishReport {
            duplicate: false,
            deliveries,
        };
        if report.failed() == 0 {
            self.remember(fingerprint, now);
        }

        tracing::info!(
            "Published {} event for '{}' to {}/{} subscribers",
            event.event_type,
            event.source_key,
            report.delivered(),
            self.subscribers.len()
        );
        report
    }

    fn recently_published(&self, fingerprint: &str, now: Instant) -> bool {
        if self.dedup_window.is_zero() {
            return false;
        }
        self.recent
            .get(fingerprint)
            .is_some_and(|seen| now.duration_since(*seen) < self.dedup_window)
    }

    fn remember(&self, fingerprint: String, now: Instant) {
        if self.dedup_window.is_zero() {
            return;
        }
        self.recent.insert(fingerprint, now);

        if self.recent.len() > MAX_TRACKED_EVENTS {
            let window = self.dedup_window;
            self.recent.retain(|_, seen| now.duration_since(*seen) < window);
            // Still over the bound: every entry is inside the window
            if self.recent.len() > MAX_TRACKED_EVENTS {
                self.recent.clear();
            }
        }
    }
}
