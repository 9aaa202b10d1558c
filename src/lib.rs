//! Document Embedding Pipeline Library
//!
//! Event-driven processing of documents dropped into a source location. Every
//! change notification becomes a queue message, a pool of workers leases the
//! messages and runs the processing function for each object, and the outcome
//! is recorded per object so redelivered events are processed at most once to
//! completion.
//!
//! ## Architecture Modules
//! - **`events`**: The `ChangeEvent` wire schema and decoding of storage notifications.
//! - **`queue`**: The durable queue. Lease-based delivery with visibility timeouts,
//!   implicit nack on lease expiry, and redrive into the quarantine.
//! - **`quarantine`**: The dead-letter sink. Append-only, with operator-triggered replay.
//! - **`metadata`**: Per-object processing records behind a compare-and-set `RecordStore`.
//! - **`notifier`**: Fan-out of change events to every subscribed queue.
//! - **`worker`**: The processor registry and the pool of lease loops.
//! - **`documents`**: The paragraph chunking processor and its manifests.
//! - **`objects`**: Source and destination object stores behind capability checks.
//! - **`capabilities`**: Named capability sets per role.
//! - **`config`**: Startup configuration from the environment.
//! - **`api`**: The HTTP edge for notifications and operator actions.

pub mod api;
pub mod capabilities;
pub mod config;
pub mod documents;
pub mod events;
pub mod metadata;
pub mod notifier;
pub mod objects;
pub mod quarantine;
pub mod queue;
pub mod worker;
