//! Operator HTTP Surface
//!
//! The notifier's HTTP edge (`POST /events`), the source location's upload
//! edge (`PUT`/`DELETE /sources/*key`), and the operator endpoints for
//! inspecting records, forcing reprocessing, and replaying quarantined
//! messages. Everything but `/events` and `/health` checks the operator
//! capability set on every call.

pub mod handlers;
pub mod protocol;

use crate::capabilities::CapabilitySet;
use crate::metadata::MetadataStore;
use crate::notifier::FanoutNotifier;
use crate::objects::ObjectStore;
use crate::quarantine::Quarantine;
use crate::queue::DurableQueue;

use axum::{
    Extension, Router,
    routing::{get, post, put},
};
use handlers::*;
use protocol::*;
use std::sync::Arc;

/// Everything the handlers reach, shared through an axum `Extension`.
pub struct ApiContext {
    /// Credentials the operator endpoints run with.
    pub credentials: CapabilitySet,
    pub notifier: Arc<FanoutNotifier>,
    /// Uploads land here and announce themselves through `notifier`.
    pub source: Arc<ObjectStore>,
    /// Target of quarantine replays.
    pub queue: Arc<DurableQueue>,
    pub records: Arc<MetadataStore>,
    pub quarantine: Arc<Quarantine>,
}

pub fn router(context: Arc<ApiContext>) -> Router {
    Router::new()
        .route(ENDPOINT_EVENTS, post(handle_publish_events))
        .route(
            ENDPOINT_SOURCES,
            put(handle_put_source).delete(handle_delete_source),
        )
        .route(
            ENDPOINT_RECORDS,
            get(handle_get_record).post(handle_force_reprocess),
        )
        .route(ENDPOINT_QUARANTINE, get(handle_list_quarantine))
        .route(ENDPOINT_QUARANTINE_REPLAY, post(handle_replay_quarantined))
        .route(ENDPOINT_QUEUE_STATS, get(handle_queue_stats))
        .route(ENDPOINT_HEALTH, get(handle_health))
        .layer(Extension(context))
}

#[cfg(test)]
mod tests;
