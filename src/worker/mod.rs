//! Worker Pool Module
//!
//! Consumes leased change events, runs the processor registered for each event
//! type, and records every outcome in the metadata store.
//!
//! ## Architecture
//! * **Registry**: event type to processing function, filled before the pool starts.
//! * **Pool**: independent lease loops with heartbeat lease extension.
//! * **Types**: failure classification, outcomes, and tuning options.

pub mod pool;
pub mod registry;
pub mod types;

pub use pool::WorkerPool;
pub use registry::{ProcessFn, ProcessorRegistry};
pub use types::{
    BatchReport, FailureKind, Outcome, ProcessingError, WorkerError, WorkerOptions,
};
