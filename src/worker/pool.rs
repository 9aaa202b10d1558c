//! Worker Pool Implementation
//!
//! Spawns independent lease loops that pull batches from the `DurableQueue`,
//! consult the metadata store, and run the registered processor for each event.
//!
//! ## Responsibilities
//! - **Idempotency**: A `Done` object is acknowledged without invoking the processor,
//!   unless the event is newer than the one that finished it. An object another live
//!   worker holds in `Processing` is deferred until that claim would go stale.
//! - **Lease Management**: A sidecar task extends the lease once per processing slice,
//!   at most `max_lease_extensions` times. The processor is cut off when the budget runs out.
//! - **Outcome Recording**: Every outcome is written to the metadata store before the
//!   queue is told about it, so `last_error` is inspectable whatever happens next.
//! - **Back-off**: An infrastructure failure releases the rest of the batch and the
//!   loop sleeps with jittered exponential back-off before leasing again.

use super::registry::ProcessorRegistry;
use super::types::*;
use crate::capabilities::{CapabilityError, CapabilitySet, WORKER_CAPABILITIES};
use crate::events::{ChangeEvent, ObjectId};
use crate::metadata::{
    Expected, MetadataError, ProcessingRecord, ProcessingStatus, RecordStore, RecordUpdate,
};
use crate::quarantine::QuarantineReason;
use crate::queue::{DurableQueue, LeaseToken, QueueMessage};

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Result of a compare-and-set against the metadata store.
enum Commit {
    Written(ProcessingRecord),
    /// Another writer got there first and left this behind.
    Lost(Option<ProcessingRecord>),
}

/// The engine that drives event processing.
pub struct WorkerPool {
    queue: Arc<DurableQueue>,
    records: Arc<dyn RecordStore>,
    processors: Arc<ProcessorRegistry>,
    options: WorkerOptions,
}

impl WorkerPool {
    /// Creates a pool over `queue`.
    ///
    /// Refuses to build unless `credentials` carries the full worker capability set.
    /// The queue's visibility timeout overrides the one in `options`, since leases
    /// are granted by the queue.
    pub fn new(
        credentials: &CapabilitySet,
        queue: Arc<DurableQueue>,
        records: Arc<dyn RecordStore>,
        processors: Arc<ProcessorRegistry>,
        mut options: WorkerOptions,
    ) -> Result<Arc<Self>, CapabilityError> {
        credentials.require_all(WORKER_CAPABILITIES)?;

        let queue_timeout = queue.options().visibility_timeout;
        if options.visibility_timeout != queue_timeout {
            tracing::debug!(
                "Using visibility timeout of queue '{}' ({}s)",
                queue.name(),
                queue_timeout.as_secs()
            );
            options.visibility_timeout = queue_timeout;
        }

        Ok(Arc::new(Self {
            queue,
            records,
            processors,
            options,
        }))
    }

    pub fn options(&self) -> &WorkerOptions {
        &self.options
    }

    /// Spawns `worker_count` lease loops and returns their handles.
    pub fn start(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        tracing::info!(
            "Starting {} workers on queue '{}' (batch size {}, budget {}ms)",
            self.options.worker_count,
            self.queue.name(),
            self.options.batch_size,
            self.options.processing_budget().as_millis()
        );

        (0..self.options.worker_count)
            .map(|worker_id| {
                let pool = self.clone();
                tokio::spawn(async move {
                    pool.run(worker_id).await;
                })
            })
            .collect()
    }

    /// The main loop for a single worker. Never returns.
    pub async fn run(&self, worker_id: usize) {
        tracing::info!("Worker {} started", worker_id);
        let mut failures = 0u32;

        loop {
            match self.run_once(worker_id).await {
                Ok(report) => {
                    failures = 0;
                    // A zero wait window would otherwise spin on an empty queue.
                    if report.leased == 0 && self.options.max_batch_wait.is_zero() {
                        tokio::time::sleep(self.options.backoff_base).await;
                    }
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = self.backoff_delay(failures);
                    tracing::warn!(
                        "Worker {} hit an infrastructure error ({}), backing off {}ms",
                        worker_id,
                        e,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Jittered exponential delay after `failures` consecutive infrastructure errors.
    pub fn backoff_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        let delay = self
            .options
            .backoff_base
            .saturating_mul(1u32 << exponent)
            .min(self.options.backoff_max);
        // Simple jitter to keep workers from retrying in lockstep
        let jitter = rand::random::<u64>() % 50;
        delay + Duration::from_millis(jitter)
    }

    /// Leases one batch and processes it message by message.
    ///
    /// On an infrastructure error the current message and the rest of the batch
    /// are released before the error is returned.
    pub async fn run_once(&self, worker_id: usize) -> Result<BatchReport, WorkerError> {
        let batch = self
            .queue
            .lease_batch(self.options.batch_size, self.options.max_batch_wait)
            .await;

        let mut report = BatchReport {
            leased: batch.len(),
            ..BatchReport::default()
        };
        if batch.is_empty() {
            return Ok(report);
        }
        tracing::trace!("Worker {} leased {} message(s)", worker_id, batch.len());

        let mut pending = batch.into_iter();
        while let Some((message, token)) = pending.next() {
            match self.process_one(&message, &token).await {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    self.release(&token);
                    for (_, rest) in pending {
                        self.release(&rest);
                    }
                    return Err(e);
                }
            }
        }

        Ok(report)
    }

    /// Processes one leased message end to end.
    ///
    /// Processing failures are handled here and show up as an `Outcome`; only
    /// infrastructure failures are returned as errors.
    pub async fn process_one(
        &self,
        message: &QueueMessage,
        token: &LeaseToken,
    ) -> Result<Outcome, WorkerError> {
        // Earlier messages of the batch may have eaten into this lease.
        if let Err(e) = self
            .queue
            .extend_lease(token, self.options.visibility_timeout)
        {
            tracing::debug!("Lease on message {} lost before processing: {}", message.id, e);
            return Ok(Outcome::LeaseLost);
        }

        let event = match message.payload() {
            Ok(event) => event,
            Err(e) => {
                // No object id to record against; the body goes to quarantine as-is.
                let error = ProcessingError::from(e);
                tracing::error!("Message {} carries a malformed event: {}", message.id, error);
                self.quarantine(token, error.message);
                return Ok(Outcome::Quarantined);
            }
        };

        let object_id = event.object_id();
        let event_at = event.timestamp;
        let holder = message.id.to_string();

        let current = self.records.get(&object_id)?;
        if let Some(record) = &current {
            match record.status {
                ProcessingStatus::Done if !record.is_superseded_by(event_at) => {
                    tracing::debug!("Object {} already done, skipping", object_id);
                    self.acknowledge(token);
                    return Ok(Outcome::SkippedDone);
                }
                ProcessingStatus::Processing if !self.can_take_over(record, &holder) => {
                    tracing::debug!(
                        "Object {} is being processed by {:?}, deferring",
                        object_id,
                        record.holder
                    );
                    self.defer_until_stale(record, token);
                    return Ok(Outcome::Deferred);
                }
                _ => {}
            }
        }

        let claimed = match self.commit(
            &object_id,
            Expected::observed(current.as_ref()),
            RecordUpdate::processing(holder).for_event(event_at),
        )? {
            Commit::Written(record) => record,
            Commit::Lost(winner) => {
                return Ok(self.after_lost_claim(&object_id, event_at, winner, token));
            }
        };

        tracing::info!(
            "Processing {} event for {} (delivery {}, attempt {})",
            event.event_type,
            object_id,
            message.delivery_count,
            claimed.attempts
        );

        let result = self.invoke_with_lease(event, token).await;
        let expected = Expected::Version(claimed.version);

        match result {
            Ok(()) => {
                if let Commit::Lost(_) = self.commit(
                    &object_id,
                    expected,
                    RecordUpdate::done().for_event(event_at),
                )? {
                    tracing::warn!("Object {} was taken over while we processed it", object_id);
                }
                self.acknowledge(token);
                tracing::info!("Completed {}", object_id);
                Ok(Outcome::Completed)
            }
            Err(error) => {
                let lost = matches!(
                    self.commit(&object_id, expected, RecordUpdate::failed(error.to_string()))?,
                    Commit::Lost(_)
                );
                if lost {
                    tracing::warn!("Object {} was taken over while we processed it", object_id);
                }

                if error.is_retriable() {
                    tracing::warn!("Retrying {}: {}", object_id, error);
                    self.release(token);
                    Ok(Outcome::Retrying)
                } else {
                    tracing::error!("Giving up on {}: {}", object_id, error);
                    self.quarantine(token, error.message);
                    Ok(Outcome::Quarantined)
                }
            }
        }
    }

    /// Whether a `Processing` record no longer belongs to a live worker.
    ///
    /// The same holder means an earlier delivery of this very message lapsed.
    /// Otherwise the claim is stale once it is older than any lease could last.
    fn can_take_over(&self, record: &ProcessingRecord, holder: &str) -> bool {
        if record.holder.as_deref() == Some(holder) {
            return true;
        }
        let age = Utc::now().signed_duration_since(record.updated_at);
        chrono::Duration::from_std(self.options.lease_horizon())
            .map(|horizon| age >= horizon)
            .unwrap_or(false)
    }

    /// Holds a deferred message until the claim blocking it would count as stale.
    ///
    /// By then the holder has either committed an outcome or is gone.
    fn defer_until_stale(&self, record: &ProcessingRecord, token: &LeaseToken) {
        let age = Utc::now().signed_duration_since(record.updated_at);
        let remaining = chrono::Duration::from_std(self.options.lease_horizon())
            .ok()
            .and_then(|horizon| (horizon - age).to_std().ok())
            .unwrap_or_default();
        let hold = remaining.max(self.options.visibility_timeout);

        if let Err(e) = self.queue.extend_lease(token, hold) {
            tracing::debug!("Could not hold deferred message {}: {}", token.message_id, e);
        }
    }

    fn after_lost_claim(
        &self,
        object_id: &ObjectId,
        event_at: DateTime<Utc>,
        winner: Option<ProcessingRecord>,
        token: &LeaseToken,
    ) -> Outcome {
        match winner {
            Some(record)
                if record.status == ProcessingStatus::Done && !record.is_superseded_by(event_at) =>
            {
                tracing::debug!("Object {} finished by another worker, skipping", object_id);
                self.acknowledge(token);
                Outcome::SkippedDone
            }
            Some(record) if record.status == ProcessingStatus::Processing => {
                tracing::debug!("Lost claim on {}, deferring", object_id);
                self.defer_until_stale(&record, token);
                Outcome::Deferred
            }
            _ => {
                tracing::debug!("Lost claim on {}, deferring", object_id);
                Outcome::Deferred
            }
        }
    }

    fn commit(
        &self,
        object_id: &ObjectId,
        expected: Expected,
        update: RecordUpdate,
    ) -> Result<Commit, MetadataError> {
        match self.records.upsert(object_id, expected, update) {
            Ok(record) => Ok(Commit::Written(record)),
            Err(MetadataError::Conflict { current, .. }) => Ok(Commit::Lost(current.map(|r| *r))),
            Err(e) => Err(e),
        }
    }

    /// Runs the processor while a sidecar keeps the lease alive.
    async fn invoke_with_lease(
        &self,
        event: ChangeEvent,
        token: &LeaseToken,
    ) -> Result<(), ProcessingError> {
        let heartbeat = self.spawn_lease_extension(token);
        let budget = self.options.processing_budget();

        let result = match tokio::time::timeout(budget, self.processors.execute(event)).await {
            Ok(result) => result,
            Err(_) => Err(ProcessingError::deadline_exceeded(budget)),
        };

        heartbeat.abort();
        result
    }

    /// Extends the lease once per processing slice, up to `max_lease_extensions` times.
    ///
    /// If the worker hangs past the budget the extensions run out and the lease
    /// lapses, which makes the message available again.
    fn spawn_lease_extension(&self, token: &LeaseToken) -> JoinHandle<()> {
        let queue = self.queue.clone();
        let token = token.clone();
        let slice = self.options.processing_slice();
        let extension = self.options.visibility_timeout;
        let max_extensions = self.options.max_lease_extensions;

        tokio::spawn(async move {
            for n in 1..=max_extensions {
                tokio::time::sleep(slice).await;

                match queue.extend_lease(&token, extension) {
                    Ok(()) => {
                        tracing::trace!(
                            "Extended lease on {} ({}/{})",
                            token.message_id,
                            n,
                            max_extensions
                        );
                    }
                    Err(e) => {
                        tracing::debug!("Stopped extending lease on {}: {}", token.message_id, e);
                        break;
                    }
                }
            }
        })
    }

    fn acknowledge(&self, token: &LeaseToken) {
        if let Err(e) = self.queue.acknowledge(token) {
            tracing::warn!("Could not acknowledge {}: {}", token.message_id, e);
        }
    }

    fn release(&self, token: &LeaseToken) {
        if let Err(e) = self.queue.nack(token) {
            tracing::warn!("Could not release {}: {}", token.message_id, e);
        }
    }

    fn quarantine(&self, token: &LeaseToken, detail: String) {
        if let Err(e) = self
            .queue
            .dead_letter(token, QuarantineReason::Permanent, Some(detail))
        {
            tracing::warn!("Could not quarantine {}: {}", token.message_id, e);
        }
    }
}
