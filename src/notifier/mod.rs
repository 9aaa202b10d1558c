//! Notifier Module
//!
//! Turns storage change notifications into queue messages, one per subscribed
//! queue. Several independent pipelines can consume the same source this way.

pub mod fanout;
pub mod types;

pub use fanout::{FanoutNotifier, Subscriber};
pub use types::{Delivery, DeliveryError, PublishReport};
