//! Query embedding and nearest-neighbor lookup


use std::sync::Arc;

use tracing::debug;

use crate::database::{ChunkMetadata, VectorStore};
use crate::embeddings::Embedder;
use crate::{RagError, Result};

/// A chunk returned for a question, with its cosine similarity
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub metadata: ChunkMetadata,
    pub score: f32,
}

/// Finds the chunks most relevant to a question
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<VectorStore>,
}

impl Retriever {
    #[inline]
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<VectorStore>) -> Self {
        Self { embedder, store }
    }

    /// Top `k` chunks for `query`, best first.
    ///
    /// An empty knowledge base yields no chunks without consulting the model.
    #[inline]
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievedChunk>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RagError::InvalidQuestion(
                "question must not be empty".to_string(),
            ));
        }

        if self.store.is_empty() || k == 0 {
            debug!("Nothing to retrieve for query");
            return Ok(Vec::new());
        }

        let mut vectors = self.embedder.embed(&[query.to_string()]).await?;
        let query_vector = vectors.pop().ok_or_else(|| {
            RagError::ModelUnavailable("model returned no embedding for the query".to_string())
        })?;

        let hits = self.store.search(&query_vector, k)?;
        debug!(
            "Retrieved {} chunks (best score {:?})",
            hits.len(),
            hits.first().map(|hit| hit.score)
        );

        Ok(hits
            .into_iter()
            .map(|hit| RetrievedChunk {
                metadata: hit.metadata,
                score: hit.score,
            })
            .collect())
    }
}
