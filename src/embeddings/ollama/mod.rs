
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::RagError;
use crate::config::EmbeddingConfig;
use crate::embeddings::{Embedder, normalize};

/// Output dimension of the default `all-minilm` model
pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 384;

const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
const EXPONENTIAL_BACKOFF_BASE: u32 = 2;

/// Blocking client for the Ollama embedding API
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    model: String,
    batch_size: u32,
    agent: ureq::Agent,
    retry_attempts: u32,
    retry_delay: Duration,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub digest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let base_url = config
            .ollama_url()
            .context("Failed to generate Ollama URL from config")?;

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(config.timeout()))
            .build()
            .into();

        Ok(Self {
            base_url,
            model: config.model.clone(),
            batch_size: config.batch_size.max(1),
            agent,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Delay before the first retry; later retries back off exponentially
    #[inline]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[inline]
    pub fn batch_size(&self) -> u32 {
        self.batch_size
    }

    /// Check that the server answers and serves the configured model
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        debug!("Performing health check for Ollama at {}", self.base_url);

        self.ping().context("Server ping failed")?;
        self.validate_model().context("Model validation failed")?;

        info!(
            "Health check passed for Ollama server at {} with model {}",
            self.base_url, self.model
        );
        Ok(())
    }

    #[inline]
    pub fn ping(&self) -> Result<()> {
        let url = self
            .base_url
            .join("/api/version")
            .context("Failed to build ping URL")?;

        debug!("Pinging Ollama server at {}", url);

        self.make_request_with_retry(|| {
            self.agent
                .get(url.as_str())
                .call()
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
        .context("Failed to ping Ollama server")?;

        Ok(())
    }

    /// Fail unless the configured model is pulled on the server.
    ///
    /// A model configured without a tag matches its `:latest` variant.
    #[inline]
    pub fn validate_model(&self) -> Result<()> {
        let models = self.list_models().context("Failed to list models")?;
        let tagged = format!("{}:latest", self.model);

        if models
            .iter()
            .any(|m| m.name == self.model || m.name == tagged)
        {
            debug!("Model {} is available", self.model);
            return Ok(());
        }

        let available: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
        warn!(
            "Model {} not found. Available models: {:?}",
            self.model, available
        );
        Err(anyhow::anyhow!(
            "Model '{}' is not available (try `ollama pull {}`). Available models: {:?}",
            self.model,
            self.model,
            available
        ))
    }

    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self
            .base_url
            .join("/api/tags")
            .context("Failed to build models URL")?;

        let response_text = self
            .make_request_with_retry(|| {
                self.agent
                    .get(url.as_str())
                    .call()
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to fetch models")?;

        let models: ModelsResponse =
            serde_json::from_str(&response_text).context("Failed to parse models response")?;

        debug!("Found {} models", models.models.len());
        Ok(models.models)
    }

    /// Embed `texts` in batches of `batch_size`, returning raw model vectors
    /// in input order
    #[inline]
    pub fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size as usize) {
            let embedded = self
                .embed_single_batch(batch)
                .with_context(|| format!("Failed to process batch of {} texts", batch.len()))?;
            vectors.extend(embedded);
        }

        debug!("Generated {} embeddings with {}", vectors.len(), self.model);
        Ok(vectors)
    }

    fn embed_single_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = self
            .base_url
            .join("/api/embed")
            .context("Failed to build embedding URL")?;

        let request_json = serde_json::to_string(&EmbedRequest {
            model: &self.model,
            input: texts,
        })
        .context("Failed to serialize embedding request")?;

        let response_text = self
            .make_request_with_retry(|| {
                self.agent
                    .post(url.as_str())
                    .header("Content-Type", "application/json")
                    .send(&request_json)
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to generate embeddings")?;

        let response: EmbedResponse = serde_json::from_str(&response_text)
            .context("Failed to parse embedding response")?;

        if response.embeddings.len() != texts.len() {
            return Err(anyhow::anyhow!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                response.embeddings.len()
            ));
        }

        Ok(response.embeddings)
    }

    fn make_request_with_retry<F>(&self, mut request_fn: F) -> Result<String>
    where
        F: FnMut() -> Result<String, ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            match request_fn() {
                Ok(response_text) => return Ok(response_text),
                Err(ureq::Error::StatusCode(status)) if status < 500 => {
                    warn!("Client error (status {}), not retrying", status);
                    return Err(anyhow::anyhow!("Client error: HTTP {}", status));
                }
                Err(
                    error @ (ureq::Error::StatusCode(_)
                    | ureq::Error::ConnectionFailed
                    | ureq::Error::HostNotFound
                    | ureq::Error::Timeout(_)
                    | ureq::Error::Io(_)),
                ) => {
                    warn!(
                        "Request error: {}, attempt {}/{}",
                        error, attempt, self.retry_attempts
                    );
                    last_error = Some(anyhow::anyhow!("Request error: {}", error));

                    if attempt < self.retry_attempts {
                        let delay = self.retry_delay * EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1);
                        debug!("Waiting {:?} before retry", delay);
                        std::thread::sleep(delay);
                    }
                }
                Err(error) => {
                    warn!("Non-retryable error: {}", error);
                    return Err(anyhow::anyhow!("Non-retryable error: {}", error));
                }
            }
        }

        error!("All retry attempts failed for request to {}", self.base_url);
        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Request failed after retries")))
    }
}

/// [`Embedder`] backed by an Ollama server.
///
/// The model is checked once, on first use, and the result is shared by every
/// later call. A failed check is not cached, so a later call retries it.
#[derive(Debug)]
pub struct OllamaEmbedder {
    client: Arc<OllamaClient>,
    dimension: usize,
    ready: OnceCell<()>,
}

impl OllamaEmbedder {
    #[inline]
    pub fn new(config: &EmbeddingConfig) -> crate::Result<Self> {
        let client = OllamaClient::new(config)
            .map_err(|e| RagError::Config(format!("{e:#}")))?;
        Ok(Self::from_client(client, config.embedding_dimension as usize))
    }

    #[inline]
    pub fn from_client(client: OllamaClient, dimension: usize) -> Self {
        Self {
            client: Arc::new(client),
            dimension,
            ready: OnceCell::new(),
        }
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    async fn ensure_ready(&self) -> crate::Result<()> {
        self.ready
            .get_or_try_init(|| async {
                let client = Arc::clone(&self.client);
                tokio::task::spawn_blocking(move || client.health_check())
                    .await
                    .map_err(|e| {
                        RagError::ModelUnavailable(format!("health check task failed: {e}"))
                    })?
                    .map_err(|e| RagError::ModelUnavailable(format!("{e:#}")))
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        self.ensure_ready().await?;

        let client = Arc::clone(&self.client);
        let owned = texts.to_vec();
        let mut vectors = tokio::task::spawn_blocking(move || client.embed_batch(&owned))
            .await
            .map_err(|e| RagError::ModelUnavailable(format!("embedding task failed: {e}")))?
            .map_err(|e| RagError::ModelUnavailable(format!("{e:#}")))?;

        if vectors.len() != texts.len() {
            return Err(RagError::ModelUnavailable(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                vectors.len()
            )));
        }

        for vector in &mut vectors {
            if vector.len() != self.dimension {
                return Err(RagError::ModelUnavailable(format!(
                    "model {} returned {} dimensions, expected {}",
                    self.client.model(),
                    vector.len(),
                    self.dimension
                )));
            }
            normalize(vector)?;
        }

        Ok(vectors)
    }

    fn model_name(&self) -> &str {
        self.client.model()
    }
}
