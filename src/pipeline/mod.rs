// Pipeline module
// Owns the shared components and drives ingestion and question answering


use std::path::{Path, PathBuf};
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, error, info, warn};

use crate::answer::{AnswerComposer, AnswerMode, Source};
use crate::config::Config;
use crate::database::{ChunkMetadata, StoreStats, VectorStore};
use crate::document::{load_document, source_name};
use crate::embeddings::{Embedder, OllamaEmbedder, chunk_document};
use crate::generation::GenerationBackend;
use crate::retrieval::Retriever;
use crate::{RagError, Result};

/// A file that was ingested
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestedFile {
    pub path: PathBuf,
    pub source: String,
    pub pages: usize,
    pub chunks: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The file could not be read as a PDF; the batch went on
    Unreadable,
    /// Embedding or storing failed; the batch stopped here
    Fatal,
    /// The batch stopped before this file was reached
    NotAttempted,
}

/// A file that was not ingested
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedFile {
    pub path: PathBuf,
    pub kind: FailureKind,
    pub reason: String,
}

/// Outcome of ingesting a batch of files
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub succeeded: Vec<IngestedFile>,
    pub failed: Vec<FailedFile>,
    /// Set when a fatal error stopped the batch early
    pub aborted: bool,
    /// Chunks added by this batch
    pub total_chunks: usize,
}

impl IngestReport {
    #[inline]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Answer to a question, with the passages it was drawn from
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub answer: String,
    pub mode: AnswerMode,
    pub sources: Vec<Source>,
}

/// Everything ingestion and question answering need, built once and shared
pub struct RagContext {
    config: Config,
    embedder: Arc<dyn Embedder>,
    store: Arc<VectorStore>,
    retriever: Retriever,
    composer: AnswerComposer,
}

impl RagContext {
    /// Build the production context: Ollama embeddings, the knowledge base in
    /// the configured data directory and the configured generation backend
    #[inline]
    pub async fn from_config(config: Config) -> Result<Self> {
        let embedder: Arc<dyn Embedder> = Arc::new(OllamaEmbedder::new(&config.embedding)?);
        let backend = GenerationBackend::from_config(&config.generation)?;
        Self::with_components(config, embedder, backend).await
    }

    /// Build a context around the given embedder and generation backend
    #[inline]
    pub async fn with_components(
        config: Config,
        embedder: Arc<dyn Embedder>,
        backend: GenerationBackend,
    ) -> Result<Self> {
        let dimension = config.embedding.embedding_dimension as usize;
        let store = Arc::new(VectorStore::open(config.data_dir(), dimension).await?);
        let retriever = Retriever::new(Arc::clone(&embedder), Arc::clone(&store));
        let composer = AnswerComposer::new(backend, config.answer.clone());

        info!(
            "Knowledge base ready with {} chunks, embedding model {}",
            store.len(),
            embedder.model_name()
        );

        Ok(Self {
            config,
            embedder,
            store,
            retriever,
            composer,
        })
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    #[inline]
    pub fn generation_backend(&self) -> &GenerationBackend {
        self.composer.backend()
    }

    #[inline]
    pub fn stats(&self) -> StoreStats {
        self.store.stats()
    }

    /// Ingest `paths` one after another, each file committed on its own.
    ///
    /// Unreadable files are recorded and skipped. A model or storage failure
    /// stops the batch: the failing file and those after it are reported as
    /// failed, while files already committed stay in the knowledge base.
    #[inline]
    pub async fn ingest(&self, paths: &[PathBuf]) -> IngestReport {
        let mut report = IngestReport::default();
        let bar = progress_bar(paths.len());

        for (position, path) in paths.iter().enumerate() {
            bar.set_message(source_name(path));

            match self.ingest_file(path).await {
                Ok(file) => {
                    info!("Ingested {} ({} chunks)", path.display(), file.chunks);
                    report.total_chunks += file.chunks;
                    report.succeeded.push(file);
                }
                Err(e) if !e.is_fatal_for_batch() => {
                    warn!("Skipping {}: {}", path.display(), e);
                    report.failed.push(FailedFile {
                        path: path.clone(),
                        kind: FailureKind::Unreadable,
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    error!("Aborting ingestion at {}: {}", path.display(), e);
                    report.failed.push(FailedFile {
                        path: path.clone(),
                        kind: FailureKind::Fatal,
                        reason: e.to_string(),
                    });
                    report.failed.extend(paths.iter().skip(position + 1).map(|rest| {
                        FailedFile {
                            path: rest.clone(),
                            kind: FailureKind::NotAttempted,
                            reason: format!("not attempted after fatal error: {e}"),
                        }
                    }));
                    report.aborted = true;
                    break;
                }
            }
            bar.inc(1);
        }

        bar.finish_and_clear();
        report
    }

    async fn ingest_file(&self, path: &Path) -> Result<IngestedFile> {
        let owned = path.to_path_buf();
        let document = tokio::task::spawn_blocking(move || load_document(&owned))
            .await
            .map_err(|e| RagError::DocumentRead {
                path: path.to_path_buf(),
                reason: format!("PDF parser failed: {e}"),
            })??;

        let chunks = chunk_document(&document.pages, &self.config.chunking);
        debug!(
            "{} yielded {} chunks from {} pages",
            document.source,
            chunks.len(),
            document.page_count()
        );

        if !chunks.is_empty() {
            let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
            let vectors = self.embedder.embed(&texts).await?;
            let metadata = chunks
                .iter()
                .map(|chunk| ChunkMetadata::from_chunk(chunk, &document.source, &document.path))
                .collect();
            self.store.add(vectors, metadata).await?;
        } else {
            warn!("{} contains no extractable text", document.source);
        }

        Ok(IngestedFile {
            path: document.path,
            source: document.source,
            pages: document.pages.len(),
            chunks: chunks.len(),
        })
    }

    /// Answer `question` from the knowledge base using the top `k` chunks,
    /// or the configured default when `k` is `None`
    #[inline]
    pub async fn ask(&self, question: &str, k: Option<usize>) -> Result<Answer> {
        let k = k.unwrap_or(self.config.retrieval.top_k);
        let retrieved = self.retriever.retrieve(question, k).await?;
        let composed = self.composer.compose(question, &retrieved).await;

        debug!(
            "Answered with mode {} from {} sources",
            composed.mode.as_str(),
            composed.sources.len()
        );

        Ok(Answer {
            answer: composed.text,
            mode: composed.mode,
            sources: composed.sources,
        })
    }
}

fn progress_bar(len: usize) -> ProgressBar {
    if console::user_attended_stderr() {
        ProgressBar::new(len as u64).with_style(
            ProgressStyle::with_template("{spinner} [{pos}/{len}] Ingesting {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        )
    } else {
        ProgressBar::hidden()
    }
}
