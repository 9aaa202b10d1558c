//! Durable Queue Module
//!
//! Decouples change notifications from the slow processing step.
//!
//! ## Lease Lifecycle
//! 1. **Enqueue**: The message is stored with `delivery_count = 0` and is available.
//! 2. **Lease**: A consumer receives the message plus a `LeaseToken`; the message is
//!    hidden until the visibility deadline and its delivery count is incremented.
//! 3. **Outcome**: The holder acknowledges (delete), nacks (immediate redelivery),
//!    extends the lease, or dead-letters the message. Doing nothing lets the lease
//!    lapse, which is treated as a nack.
//! 4. **Redrive**: Once the delivery count has reached `max_receive_count`, the next
//!    lease attempt moves the message to the quarantine instead.
//!
//! ## Submodules
//! - **`types`**: Message, token, option and error types.
//! - **`durable`**: The `DurableQueue` engine.

pub mod durable;
pub mod types;

pub use durable::DurableQueue;
pub use types::{
    LeaseToken, MessageAttributes, MessageEnvelope, MessageId, QueueError, QueueMessage,
    QueueOptions, QueueStats,
};

#[cfg(test)]
mod tests;
