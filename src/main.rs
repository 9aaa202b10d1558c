use embedding_pipeline::api::{self, ApiContext};
use embedding_pipeline::capabilities::{CapabilitySet, Role};
use embedding_pipeline::config::PipelineConfig;
use embedding_pipeline::documents::register_document_processors;
use embedding_pipeline::metadata::MetadataStore;
use embedding_pipeline::notifier::FanoutNotifier;
use embedding_pipeline::objects::{ObjectAccess, ObjectStore};
use embedding_pipeline::quarantine::Quarantine;
use embedding_pipeline::queue::DurableQueue;
use embedding_pipeline::worker::{ProcessorRegistry, WorkerPool};

use std::sync::Arc;

const QUEUE_NAME: &str = "embedding-queue";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = PipelineConfig::from_env()?;
    tracing::info!(
        "Starting pipeline: {} -> {} (records in '{}')",
        config.source_location,
        config.destination_location,
        config.metadata_table_name
    );

    // 1. Storage collaborators:
    let source = Arc::new(ObjectStore::new(&config.source_location));
    let destination = Arc::new(ObjectStore::new(&config.destination_location));
    let records = Arc::new(MetadataStore::new(&config.metadata_table_name));

    // 2. Queue with its dead-letter quarantine:
    let quarantine = Arc::new(Quarantine::new());
    let queue = Arc::new(DurableQueue::new(
        QUEUE_NAME,
        config.queue_options(),
        quarantine.clone(),
    ));

    // 3. Notifier (subscriptions are fixed once it is shared):
    let mut notifier =
        FanoutNotifier::new(&CapabilitySet::for_role(Role::Notifier), config.dedup_window)?;
    notifier.subscribe(queue.clone());
    let notifier = Arc::new(notifier);

    // 4. Processors and workers:
    let worker_credentials = CapabilitySet::for_role(Role::Worker);
    let objects = Arc::new(ObjectAccess::new(
        source.clone(),
        destination,
        worker_credentials.clone(),
    ));
    let mut processors = ProcessorRegistry::new();
    register_document_processors(&mut processors, objects);

    let pool = WorkerPool::new(
        &worker_credentials,
        queue.clone(),
        records.clone(),
        Arc::new(processors),
        config.worker_options(),
    )?;
    let workers = pool.start();

    // 5. HTTP edge (documents enter through PUT /sources/*key):
    let app = api::router(Arc::new(ApiContext {
        credentials: CapabilitySet::for_role(Role::Operator),
        notifier,
        source,
        queue,
        records,
        quarantine,
    }));

    tracing::info!("HTTP server listening on {}", config.bind_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    // Queue and records live in memory; anything still in flight is lost here.
    for worker in workers {
        worker.abort();
    }
    tracing::info!("Shut down");
    Ok(())
}
