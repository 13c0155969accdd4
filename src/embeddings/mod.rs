// Embeddings module
// Sentence-embedding generation through Ollama and content chunking

pub mod chunking;
pub mod ollama;


use async_trait::async_trait;

use crate::{RagError, Result};

pub use chunking::{ChunkingConfig, TextChunk, chunk_document, chunk_page};
pub use ollama::{OllamaClient, OllamaEmbedder};

/// Tolerance on the L2 norm of every stored and query vector
pub const NORM_TOLERANCE: f32 = 1e-5;

/// Maps text to L2-normalized vectors of a fixed dimension.
///
/// Chunks and queries must go through the same instance so that both land in
/// the same embedding space.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed `texts`, returning one normalized vector per input in order
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Name of the underlying model, recorded for diagnostics
    fn model_name(&self) -> &str;
}

#[inline]
pub fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|v| v * v).sum::<f32>().sqrt()
}

#[inline]
pub fn is_normalized(vector: &[f32]) -> bool {
    (l2_norm(vector) - 1.0).abs() <= NORM_TOLERANCE
}

/// Scale `vector` to unit length in place.
///
/// Zero and non-finite vectors cannot be normalized and are rejected, since
/// they would compare equal to nothing.
#[inline]
pub fn normalize(vector: &mut [f32]) -> Result<()> {
    if vector.is_empty() {
        return Err(RagError::ModelUnavailable(
            "model returned an empty embedding".to_string(),
        ));
    }

    // Accumulate in f64 so long vectors still land within tolerance
    let norm = vector
        .iter()
        .map(|&v| f64::from(v) * f64::from(v))
        .sum::<f64>()
        .sqrt();

    if !norm.is_finite() || norm <= f64::EPSILON {
        return Err(RagError::ModelUnavailable(format!(
            "model returned a degenerate embedding (norm {norm})"
        )));
    }

    for value in vector.iter_mut() {
        *value = (f64::from(*value) / norm) as f32;
    }
    Ok(())
}
