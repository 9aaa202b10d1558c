use crate::events::EventParseError;
use crate::metadata::MetadataError;
use crate::objects::ObjectError;
use crate::queue::QueueError;

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// How a processing failure should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Retry-eligible: timeouts, throttling, temporarily unavailable dependencies.
    Transient,
    /// Retrying cannot help: malformed payloads, unresolvable references, validation failures.
    Permanent,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Transient => f.write_str("transient"),
            FailureKind::Permanent => f.write_str("permanent"),
        }
    }
}

/// Failure reported by a processing function.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind} failure: {message}")]
pub struct ProcessingError {
    pub kind: FailureKind,
    pub message: String,
}

impl ProcessingError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            message: message.into(),
        }
    }

    pub fn deadline_exceeded(budget: Duration) -> Self {
        Self::transient(format!(
            "processing exceeded its deadline of {}ms",
            budget.as_millis()
        ))
    }

    pub fn is_retriable(&self) -> bool {
        self.kind == FailureKind::Transient
    }
}

impl From<EventParseError> for ProcessingError {
    fn from(err: EventParseError) -> Self {
        ProcessingError::permanent(format!("malformed event: {}", err))
    }
}

impl From<ObjectError> for ProcessingError {
    fn from(err: ObjectError) -> Self {
        match err {
            ObjectError::Unavailable(_) => ProcessingError::transient(err.to_string()),
            ObjectError::NotFound { .. } | ObjectError::AccessDenied(_) => {
                ProcessingError::permanent(err.to_string())
            }
        }
    }
}

/// What `process_one` did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Processed, recorded `Done`, acknowledged.
    Completed,
    /// Object was already `Done`; acknowledged without invoking the processor.
    SkippedDone,
    /// Another worker is on this object; left unacknowledged until the lease lapses.
    Deferred,
    /// Transient failure; recorded `Failed` and released for redelivery.
    Retrying,
    /// Permanent failure; recorded and moved to the quarantine.
    Quarantined,
    /// The lease lapsed before processing started; another consumer owns the message now.
    LeaseLost,
}

/// Tally of one `run_once` iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub leased: usize,
    pub completed: usize,
    pub skipped: usize,
    pub deferred: usize,
    pub retrying: usize,
    pub quarantined: usize,
    pub lease_lost: usize,
}

impl BatchReport {
    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Completed => self.completed += 1,
            Outcome::SkippedDone => self.skipped += 1,
            Outcome::Deferred => self.deferred += 1,
            Outcome::Retrying => self.retrying += 1,
            Outcome::Quarantined => self.quarantined += 1,
            Outcome::LeaseLost => self.lease_lost += 1,
        }
    }
}

/// Infrastructure failure. Fatal to the current batch iteration, never to the message.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("metadata store error: {0}")]
    Metadata(#[from] MetadataError),
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Tuning of the batch-lease loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerOptions {
    /// Independent lease loops started by `WorkerPool::start`.
    pub worker_count: usize,
    /// Max messages per lease.
    pub batch_size: usize,
    /// Max time spent waiting for a batch to fill.
    pub max_batch_wait: Duration,
    /// Lease duration; also bounds each processing slice.
    pub visibility_timeout: Duration,
    /// Time kept in reserve before the lease deadline.
    pub lease_safety_margin: Duration,
    /// Heartbeat extensions allowed for one message.
    pub max_lease_extensions: u32,
    /// First delay after an infrastructure failure.
    pub backoff_base: Duration,
    /// Cap for the doubling back-off delay.
    pub backoff_max: Duration,
}

impl WorkerOptions {
    /// Length of one processing slice: the lease minus the safety margin.
    ///
    /// A margin that would consume more than half the lease is clamped to half.
    pub fn processing_slice(&self) -> Duration {
        let margin = self.lease_safety_margin.min(self.visibility_timeout / 2);
        self.visibility_timeout.saturating_sub(margin)
    }

    /// Total time a processor may run, counting every allowed extension.
    pub fn processing_budget(&self) -> Duration {
        self.processing_slice() * (self.max_lease_extensions + 1)
    }

    /// How long a `Processing` record is considered owned by a live worker.
    pub fn lease_horizon(&self) -> Duration {
        self.visibility_timeout * (self.max_lease_extensions + 1)
    }
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            worker_count: 4,
            batch_size: 1,
            max_batch_wait: Duration::from_secs(10),
            visibility_timeout: Duration::from_secs(300),
            lease_safety_margin: Duration::from_secs(10),
            max_lease_extensions: 3,
            backoff_base: Duration::from_millis(150),
            backoff_max: Duration::from_millis(1200),
        }
    }
}
