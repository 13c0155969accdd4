use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Failed to read document {path}: {reason}")]
    DocumentRead { path: PathBuf, reason: String },

    #[error("Embedding model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Knowledge base is corrupt: {0}")]
    IndexCorrupt(String),

    #[error("Generation provider error: {0}")]
    Provider(String),

    #[error("Invalid question: {0}")]
    InvalidQuestion(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl RagError {
    /// Errors that abort a multi-file ingestion instead of skipping one file
    #[inline]
    pub fn is_fatal_for_batch(&self) -> bool {
        !matches!(self, Self::DocumentRead { .. })
    }
}

pub mod answer;
pub mod commands;
pub mod config;
pub mod database;
pub mod document;
pub mod embeddings;
pub mod generation;
pub mod pipeline;
pub mod retrieval;

#[cfg(test)]
pub(crate) mod test_support;
