//! Dead-Letter Quarantine Module
//!
//! Terminal sink for messages the pipeline gave up on, either because the retry
//! budget ran out or because the failure was classified as permanent. Records
//! are written once and only leave via an explicit operator `replay`.

pub mod store;
pub mod types;

pub use store::Quarantine;
pub use types::{QuarantineError, QuarantineReason, QuarantineRecord, ReplayEntry};
