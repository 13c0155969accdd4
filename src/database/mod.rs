// Database module
// Flat inner-product vector index with chunk metadata, persisted as files

pub mod flat_index;
pub mod persistence;
pub mod vector_store;


use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::embeddings::TextChunk;

pub use flat_index::FlatIndex;
pub use vector_store::{SearchHit, StoreStats, VectorStore};

/// Metadata for a chunk stored alongside its embedding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Ordinal of this chunk in the knowledge base, assigned on append
    pub chunk_id: u64,
    /// File name of the source document
    pub source: String,
    /// Absolute path the document was ingested from
    pub source_path: String,
    /// 1-based page number
    pub page: u32,
    /// Index of this chunk within its document
    pub chunk_index: usize,
    /// The chunk text
    pub text: String,
    /// RFC 3339 timestamp of ingestion
    pub created_at: String,
}

impl ChunkMetadata {
    #[inline]
    pub fn from_chunk(chunk: &TextChunk, source: &str, source_path: &Path) -> Self {
        Self {
            chunk_id: 0,
            source: source.to_string(),
            source_path: source_path.display().to_string(),
            page: chunk.page,
            chunk_index: chunk.chunk_index,
            text: chunk.text.clone(),
            created_at: Utc::now().to_rfc3339(),
        }
    }
}

/// The vector index and its metadata, entry `i` of one pairing with entry
/// `i` of the other
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KnowledgeBase {
    pub index: FlatIndex,
    pub metadata: Vec<ChunkMetadata>,
    /// Incremented on every committed write
    pub generation: u64,
}

impl KnowledgeBase {
    #[inline]
    pub fn empty(dimension: usize) -> Self {
        Self {
            index: FlatIndex::new(dimension),
            metadata: Vec::new(),
            generation: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }

    /// Number of distinct source documents
    #[inline]
    pub fn source_count(&self) -> usize {
        use itertools::Itertools;
        self.metadata.iter().map(|m| &m.source_path).unique().count()
    }
}
