//! Idempotency / Metadata Store Module
//!
//! Durable per-object processing state. The worker pool consults it before
//! invoking the processor (skip finished objects, defer objects another worker
//! is on) and commits every outcome to it, so `last_error` is always
//! inspectable whatever happened to the message.
//!
//! Writes are compare-and-set keyed by object id; that is the only mutual
//! exclusion in the pipeline.

pub mod store;
pub mod types;

pub use store::{MetadataStore, RecordStore};
pub use types::{
    Expected, MetadataError, ProcessingRecord, ProcessingStatus, RecordUpdate, StatusCounts,
};
