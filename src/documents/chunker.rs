use crate::events::{ChangeEvent, EventType};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One paragraph of a source document, the unit an embedding is computed for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub index: usize,
    pub text: String,
    pub word_count: usize,
}

/// Derived artifact written to the destination for every indexed document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChunkManifest {
    pub source_key: String,
    pub event_type: EventType,
    /// Timestamp of the change event the manifest was built from.
    pub source_timestamp: DateTime<Utc>,
    pub chunk_count: usize,
    pub word_count: usize,
    pub chunks: Vec<Chunk>,
}

impl ChunkManifest {
    pub fn build(event: &ChangeEvent, text: &str) -> Self {
        let chunks = split_chunks(text);
        Self {
            source_key: event.source_key.clone(),
            event_type: event.event_type,
            source_timestamp: event.timestamp,
            chunk_count: chunks.len(),
            word_count: chunks.iter().map(|c| c.word_count).sum(),
            chunks,
        }
    }
}

/// Key of the manifest derived from `source_key`.
pub fn manifest_key(source_key: &str) -> String {
    format!("{}.chunks.json", source_key)
}

/// Splits text into paragraphs separated by blank lines.
///
/// Paragraphs are trimmed; blank ones are dropped and do not consume an index.
pub fn split_chunks(text: &str) -> Vec<Chunk> {
    let normalized = text.replace("\r\n", "\n");
    normalized
        .split("\n\n")
        .map(str::trim)
        .filter(|paragraph| !paragraph.is_empty())
        .enumerate()
        .map(|(index, paragraph)| Chunk {
            index,
            text: paragraph.to_string(),
            word_count: paragraph.split_whitespace().count(),
        })
        .collect()
}
