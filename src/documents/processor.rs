//! Document Processors
//!
//! The processing functions the pipeline runs for document changes. A created
//! or updated document is read from the source, split into chunks and written
//! to the destination as a chunk manifest. A removed document has its manifest
//! deleted. Both are idempotent: rerunning them leaves the same destination state.

use super::chunker::{ChunkManifest, manifest_key};
use crate::events::{ChangeEvent, EventType};
use crate::objects::ObjectAccess;
use crate::worker::{ProcessingError, ProcessorRegistry};

use std::sync::Arc;

/// Registers the document processors for every event type.
pub fn register_document_processors(registry: &mut ProcessorRegistry, objects: Arc<ObjectAccess>) {
    for event_type in [EventType::Created, EventType::Updated] {
        let objects = objects.clone();
        registry.register(event_type, move |event| index_document(objects.clone(), event));
    }
    registry.register(EventType::Removed, move |event| {
        purge_manifest(objects.clone(), event)
    });
}

pub async fn index_document(
    objects: Arc<ObjectAccess>,
    event: ChangeEvent,
) -> Result<(), ProcessingError> {
    let bytes = objects.read_source(&event.source_key)?;
    let text = String::from_utf8(bytes).map_err(|e| {
        ProcessingError::permanent(format!(
            "'{}' is not UTF-8 text: {}",
            event.source_key, e
        ))
    })?;

    let manifest = ChunkManifest::build(&event, &text);
    for chunk in &manifest.chunks {
        let preview: String = chunk.text.chars().take(100).collect();
        tracing::trace!("Chunk {}: {}", chunk.index, preview);
    }

    let body = serde_json::to_vec_pretty(&manifest).map_err(|e| {
        ProcessingError::permanent(format!("could not encode chunk manifest: {}", e))
    })?;
    let key = manifest_key(&event.source_key);
    objects.write_destination(&key, body)?;

    tracing::info!(
        "Indexed '{}' into {} chunks ({} words)",
        event.source_key,
        manifest.chunk_count,
        manifest.word_count
    );
    Ok(())
}

pub async fn purge_manifest(
    objects: Arc<ObjectAccess>,
    event: ChangeEvent,
) -> Result<(), ProcessingError> {
    let key = manifest_key(&event.source_key);
    if objects.delete_destination(&key)? {
        tracing::info!("Removed manifest '{}'", key);
    } else {
        tracing::debug!("No manifest '{}' to remove", key);
    }
    Ok(())
}
