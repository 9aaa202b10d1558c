use crate::events::ObjectId;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Lifecycle state of an object's processing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ProcessingStatus {
    /// Known to the pipeline but not yet picked up (fresh, or forced back for reprocessing).
    Pending,
    /// A worker holds a lease on a message for this object and is running the processor.
    Processing,
    /// Processed successfully. Terminal for the event that got it here; only a newer
    /// event or an explicit force leaves this state.
    Done,
    /// The last attempt failed; `last_error` says why. A redelivery may move it back to Processing.
    Failed,
}

impl ProcessingStatus {
    /// Whether a record may be created directly in this state.
    pub fn is_initial(&self) -> bool {
        matches!(self, ProcessingStatus::Pending | ProcessingStatus::Processing)
    }

    pub fn can_transition_to(&self, next: ProcessingStatus) -> bool {
        use ProcessingStatus::*;
        match (self, next) {
            (Pending, Processing) => true,
            // Processing -> Processing is a takeover of a stale claim.
            (Processing, Processing | Done | Failed) => true,
            (Failed, Processing) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessingStatus::Pending => "Pending",
            ProcessingStatus::Processing => "Processing",
            ProcessingStatus::Done => "Done",
            ProcessingStatus::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Per-object processing state, the idempotency record of the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingRecord {
    pub object_id: ObjectId,
    pub status: ProcessingStatus,
    /// Most recent failure. A later success does not erase it.
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
    /// Bumped on every write; the compare-and-set token.
    pub version: u64,
    /// Number of times the record entered `Processing`.
    pub attempts: u32,
    /// Opaque id of the delivery that holds the `Processing` claim (the message id).
    pub holder: Option<String>,
    /// Timestamp of the last event processed to completion.
    #[serde(default)]
    pub completed_event_at: Option<DateTime<Utc>>,
}

impl ProcessingRecord {
    /// Whether an event stamped `event_at` is newer work than what this record finished.
    ///
    /// Redeliveries of the completed event, and anything older, are not.
    pub fn is_superseded_by(&self, event_at: DateTime<Utc>) -> bool {
        self.status == ProcessingStatus::Done
            && self.completed_event_at.is_some_and(|done| event_at > done)
    }
}

/// The new state a writer wants to commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordUpdate {
    pub status: ProcessingStatus,
    pub last_error: Option<String>,
    pub holder: Option<String>,
    /// Timestamp of the event this write is made on behalf of.
    pub event_at: Option<DateTime<Utc>>,
}

impl RecordUpdate {
    pub fn processing(holder: impl Into<String>) -> Self {
        Self {
            status: ProcessingStatus::Processing,
            last_error: None,
            holder: Some(holder.into()),
            event_at: None,
        }
    }

    pub fn done() -> Self {
        Self {
            status: ProcessingStatus::Done,
            last_error: None,
            holder: None,
            event_at: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: ProcessingStatus::Failed,
            last_error: Some(error.into()),
            holder: None,
            event_at: None,
        }
    }

    /// Tags the write with the event it is made for.
    pub fn for_event(mut self, event_at: DateTime<Utc>) -> Self {
        self.event_at = Some(event_at);
        self
    }

    pub fn status(status: ProcessingStatus) -> Self {
        Self {
            status,
            last_error: None,
            holder: None,
            event_at: None,
        }
    }
}

/// Precondition of a compare-and-set write: the state the writer last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expected {
    Absent,
    Version(u64),
}

impl Expected {
    pub fn observed(record: Option<&ProcessingRecord>) -> Self {
        match record {
            Some(record) => Expected::Version(record.version),
            None => Expected::Absent,
        }
    }
}

/// Record counts per status.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub pending: usize,
    pub processing: usize,
    pub done: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MetadataError {
    /// Another writer got there first; `current` is what it left behind.
    #[error("concurrent update on {object_id}")]
    Conflict {
        object_id: ObjectId,
        current: Option<Box<ProcessingRecord>>,
    },
    #[error("illegal transition for {object_id}: {from:?} -> {to}")]
    IllegalTransition {
        object_id: ObjectId,
        from: Option<ProcessingStatus>,
        to: ProcessingStatus,
    },
    #[error("no processing record for {0}")]
    NotFound(ObjectId),
    /// The backing table could not be reached.
    #[error("metadata store unavailable: {0}")]
    Unavailable(String),
}
