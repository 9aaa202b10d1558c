use super::types::*;
use crate::events::ObjectId;

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Access to processing records.
///
/// Every write is a compare-and-set against the version the writer observed,
/// so of two racing workers exactly one wins and the other sees the winner's
/// record in the returned `Conflict`.
pub trait RecordStore: Send + Sync {
    fn get(&self, object_id: &ObjectId) -> Result<Option<ProcessingRecord>, MetadataError>;

    fn upsert(
        &self,
        object_id: &ObjectId,
        expected: Expected,
        update: RecordUpdate,
    ) -> Result<ProcessingRecord, MetadataError>;
}

/// In-process metadata table.
pub struct MetadataStore {
    table_name: String,
    records: DashMap<ObjectId, ProcessingRecord>,
}

impl MetadataStore {
    pub fn new(table_name: &str) -> Self {
        Self {
            table_name: table_name.to_string(),
            records: DashMap::new(),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Explicitly sends a finished object back to `Pending` so its next event is processed again.
    ///
    /// Apart from a strictly newer event, this is the only way out of `Done`.
    pub fn force_reprocess(&self, object_id: &ObjectId) -> Result<ProcessingRecord, MetadataError> {
        let mut record = self
            .records
            .get_mut(object_id)
            .ok_or_else(|| MetadataError::NotFound(object_id.clone()))?;

        if !matches!(
            record.status,
            ProcessingStatus::Done | ProcessingStatus::Failed
        ) {
            return Err(MetadataError::IllegalTransition {
                object_id: object_id.clone(),
                from: Some(record.status),
                to: ProcessingStatus::Pending,
            });
        }

        record.status = ProcessingStatus::Pending;
        record.holder = None;
        record.version += 1;
        record.updated_at = Utc::now();

        tracing::info!("Forced {} back to Pending", object_id);
        Ok(record.clone())
    }

    /// Bulk-loads records (e.g. from a snapshot). Keeps whichever copy has the higher version.
    pub fn import(&self, records: Vec<ProcessingRecord>) {
        for record in records {
            match self.records.entry(record.object_id.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(record);
                }
                Entry::Occupied(mut slot) => {
                    if record.version > slot.get().version {
                        slot.insert(record);
                    }
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for entry in self.records.iter() {
            match entry.value().status {
                ProcessingStatus::Pending => counts.pending += 1,
                ProcessingStatus::Processing => counts.processing += 1,
                ProcessingStatus::Done => counts.done += 1,
                ProcessingStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }
}

impl RecordStore for MetadataStore {
    fn get(&self, object_id: &ObjectId) -> Result<Option<ProcessingRecord>, MetadataError> {
        Ok(self.records.get(object_id).map(|entry| entry.value().clone()))
    }

    fn upsert(
        &self,
        object_id: &ObjectId,
        expected: Expected,
        update: RecordUpdate,
    ) -> Result<ProcessingRecord, MetadataError> {
        let RecordUpdate {
            status,
            last_error,
            holder,
            event_at,
        } = update;
        let entering_processing = u32::from(status == ProcessingStatus::Processing);

        match self.records.entry(object_id.clone()) {
            Entry::Vacant(slot) => {
                if expected != Expected::Absent {
                    return Err(MetadataError::Conflict {
                        object_id: object_id.clone(),
                        current: None,
                    });
                }
                if !status.is_initial() {
                    return Err(MetadataError::IllegalTransition {
                        object_id: object_id.clone(),
                        from: None,
                        to: status,
                    });
                }

                let record = ProcessingRecord {
                    object_id: object_id.clone(),
                    status,
                    last_error,
                    updated_at: Utc::now(),
                    version: 1,
                    attempts: entering_processing,
                    holder,
                    completed_event_at: None,
                };
                slot.insert(record.clone());
                tracing::debug!("Created record {} as {}", object_id, status);
                Ok(record)
            }
            Entry::Occupied(mut slot) => {
                let current = slot.get_mut();
                if expected != Expected::Version(current.version) {
                    return Err(MetadataError::Conflict {
                        object_id: object_id.clone(),
                        current: Some(Box::new(current.clone())),
                    });
                }
                let newer_event = status == ProcessingStatus::Processing
                    && event_at.is_some_and(|at| current.is_superseded_by(at));
                if !newer_event && !current.status.can_transition_to(status) {
                    return Err(MetadataError::IllegalTransition {
                        object_id: object_id.clone(),
                        from: Some(current.status),
                        to: status,
                    });
                }

                tracing::debug!("Record {}: {} -> {}", object_id, current.status, status);
                current.status = status;
                if last_error.is_some() {
                    current.last_error = last_error;
                }
                current.updated_at = Utc::now();
                current.version += 1;
                current.attempts += entering_processing;
                current.holder = holder;
                if status == ProcessingStatus::Done && event_at.is_some() {
                    current.completed_event_at = event_at;
                }
                Ok(current.clone())
            }
        }
    }
}
