//! Change Event Module
//!
//! Defines the unit of work that flows through the whole pipeline: a
//! `ChangeEvent` describing a created, updated or removed object in the source
//! location.
//!
//! ## Submodules
//! - **`types`**: The `ChangeEvent` wire schema and the `ObjectId` idempotency key.
//! - **`notification`**: Decoding of the notification formats the storage
//!   collaborator emits (bare events, `Records[]` notifications, topic envelopes).

pub mod notification;
pub mod types;

pub use notification::parse_notification;
pub use types::{ChangeEvent, EventParseError, EventType, ObjectId};

#[cfg(test)]
mod tests;
