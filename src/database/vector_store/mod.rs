
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use itertools::Itertools;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{ChunkMetadata, KnowledgeBase, persistence};
use crate::embeddings::is_normalized;
use crate::{RagError, Result};

/// Vector store over a persisted [`KnowledgeBase`].
///
/// Readers work on an immutable snapshot, so a search never sees a partially
/// appended batch. Writers are serialized and only publish a new snapshot
/// after it has been committed to disk. Once a commit has started it runs to
/// completion, publish included, even if the caller stops waiting.
#[derive(Debug)]
pub struct VectorStore {
    dir: PathBuf,
    dimension: usize,
    state: Arc<RwLock<Arc<KnowledgeBase>>>,
    writer: Arc<Mutex<()>>,
}

/// Search result from vector similarity search
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Position of the entry in the knowledge base
    pub ordinal: usize,
    /// Inner product with the query, i.e. cosine similarity
    pub score: f32,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub chunk_count: usize,
    pub source_count: usize,
    pub dimension: usize,
    pub generation: u64,
    pub data_dir: PathBuf,
}

impl VectorStore {
    /// Open the knowledge base in `dir`, starting empty if none was committed.
    ///
    /// A non-empty knowledge base built with another dimension is rejected,
    /// since its vectors cannot be compared with the embedder's.
    #[inline]
    pub async fn open(dir: impl AsRef<Path>, dimension: usize) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if dimension == 0 {
            return Err(RagError::Config(
                "embedding dimension must be positive".to_string(),
            ));
        }

        let load_dir = dir.clone();
        let loaded = tokio::task::spawn_blocking(move || persistence::load(&load_dir))
            .await
            .map_err(|e| RagError::Index(format!("load task failed: {e}")))??;

        let kb = match loaded {
            Some(kb) if !kb.is_empty() && kb.index.dimension() != dimension => {
                return Err(RagError::Index(format!(
                    "knowledge base in {} holds {}-dimensional vectors but the embedder produces {}",
                    dir.display(),
                    kb.index.dimension(),
                    dimension
                )));
            }
            Some(kb) if !kb.is_empty() => {
                info!(
                    "Loaded {} chunks (generation {}) from {}",
                    kb.len(),
                    kb.generation,
                    dir.display()
                );
                kb
            }
            Some(kb) => KnowledgeBase {
                generation: kb.generation,
                ..KnowledgeBase::empty(dimension)
            },
            None => {
                debug!("No knowledge base in {}, starting empty", dir.display());
                KnowledgeBase::empty(dimension)
            }
        };

        Ok(Self {
            dir,
            dimension,
            state: Arc::new(RwLock::new(Arc::new(kb))),
            writer: Arc::new(Mutex::new(())),
        })
    }

    /// Current committed state
    #[inline]
    pub fn snapshot(&self) -> Arc<KnowledgeBase> {
        Arc::clone(&self.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn data_dir(&self) -> &Path {
        &self.dir
    }

    #[inline]
    pub fn metadata(&self, ordinal: usize) -> Option<ChunkMetadata> {
        self.snapshot().metadata.get(ordinal).cloned()
    }

    /// Append `vectors` and their `metadata` as one committed batch.
    ///
    /// Every vector must have the store dimension and unit length. On any
    /// error, including a failed write to disk, the store is left unchanged.
    /// Returns the ordinals assigned to the new entries.
    #[inline]
    pub async fn add(
        &self,
        vectors: Vec<Vec<f32>>,
        metadata: Vec<ChunkMetadata>,
    ) -> Result<Range<usize>> {
        self.validate_batch(&vectors, &metadata)?;

        let guard = Arc::clone(&self.writer).lock_owned().await;
        let current = self.snapshot();
        let start = current.len();
        if vectors.is_empty() {
            return Ok(start..start);
        }

        let mut next = KnowledgeBase::clone(&current);
        for (ordinal, (vector, mut record)) in (start..).zip(vectors.into_iter().zip(metadata)) {
            record.chunk_id = ordinal as u64;
            next.index.push(&vector);
            next.metadata.push(record);
        }
        next.generation += 1;
        let end = next.len();

        // The blocking task owns the writer guard and publishes what it
        // commits, whether or not this future is still being polled.
        let dir = self.dir.clone();
        let state = Arc::clone(&self.state);
        tokio::task::spawn_blocking(move || {
            persistence::save(&dir, &next)?;
            *state.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
            drop(guard);
            Ok::<_, RagError>(())
        })
        .await
        .map_err(|e| RagError::Index(format!("persist task failed: {e}")))??;

        debug!("Committed entries {}..{} to the vector store", start, end);
        Ok(start..end)
    }

    /// Top `k` entries by cosine similarity to `query`, best first.
    ///
    /// An empty store yields an empty result.
    #[inline]
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let kb = self.snapshot();
        if kb.is_empty() {
            return Ok(Vec::new());
        }

        if query.len() != self.dimension {
            return Err(RagError::Index(format!(
                "query has dimension {}, expected {}",
                query.len(),
                self.dimension
            )));
        }

        let hits = kb
            .index
            .search(query, k)
            .into_iter()
            .filter_map(|(ordinal, score)| {
                kb.metadata.get(ordinal).map(|metadata| SearchHit {
                    ordinal,
                    score,
                    metadata: metadata.clone(),
                })
            })
            .collect();
        Ok(hits)
    }

    #[inline]
    pub fn stats(&self) -> StoreStats {
        let kb = self.snapshot();
        StoreStats {
            chunk_count: kb.len(),
            source_count: kb.source_count(),
            dimension: self.dimension,
            generation: kb.generation,
            data_dir: self.dir.clone(),
        }
    }

    /// Chunk counts per source document, sorted by source name
    #[inline]
    pub fn sources(&self) -> Vec<(String, usize)> {
        self.snapshot()
            .metadata
            .iter()
            .counts_by(|m| m.source.clone())
            .into_iter()
            .sorted()
            .collect()
    }

    fn validate_batch(&self, vectors: &[Vec<f32>], metadata: &[ChunkMetadata]) -> Result<()> {
        if vectors.len() != metadata.len() {
            return Err(RagError::Index(format!(
                "got {} vectors but {} metadata records",
                vectors.len(),
                metadata.len()
            )));
        }

        for (position, vector) in vectors.iter().enumerate() {
            if vector.len() != self.dimension {
                return Err(RagError::Index(format!(
                    "vector {} has dimension {}, expected {}",
                    position,
                    vector.len(),
                    self.dimension
                )));
            }
            if vector.iter().any(|v| !v.is_finite()) {
                return Err(RagError::Index(format!(
                    "vector {position} contains non-finite values"
                )));
            }
            if !is_normalized(vector) {
                return Err(RagError::Index(format!(
                    "vector {position} is not unit length"
                )));
            }
        }

        Ok(())
    }
}
