//! Document Chunking
//!
//! Turns raw text documents into paragraph chunks, the input of the embedding
//! step, and stores them as JSON manifests next to the source key.

pub mod chunker;
pub mod processor;

pub use chunker::{Chunk, ChunkManifest, manifest_key, split_chunks};
pub use processor::{index_document, purge_manifest, register_document_processors};
