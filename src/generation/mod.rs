// Generation module
// Single-shot chat completion against an OpenAI-compatible provider


use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::config::GenerationConfig;
use crate::{RagError, Result};

/// Produces text from a system instruction and a user prompt
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, system: &str, prompt: &str) -> Result<String>;

    /// Model identifier, for logs and status output
    fn model_name(&self) -> &str;
}

/// How answers are produced, decided once at startup
#[derive(Clone)]
pub enum GenerationBackend {
    External(Arc<dyn TextGenerator>),
    None,
}

impl GenerationBackend {
    /// External when generation is enabled and the API key variable is set
    #[inline]
    pub fn from_config(config: &GenerationConfig) -> Result<Self> {
        if !config.enabled {
            info!("Answer generation disabled, using extractive answers");
            return Ok(Self::None);
        }

        let Some(api_key) = config.api_key() else {
            info!(
                "${} is not set, using extractive answers",
                config.api_key_env
            );
            return Ok(Self::None);
        };

        let client = ChatCompletionClient::new(config, api_key)?;
        info!("Answer generation via {} at {}", config.model, config.base_url);
        Ok(Self::External(Arc::new(client)))
    }

    #[inline]
    pub fn is_external(&self) -> bool {
        matches!(self, Self::External(_))
    }
}

impl fmt::Debug for GenerationBackend {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::External(generator) => f
                .debug_tuple("External")
                .field(&generator.model_name())
                .finish(),
            Self::None => f.write_str("None"),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// Client for `POST {base_url}/chat/completions`
#[derive(Clone)]
pub struct ChatCompletionClient {
    endpoint: Url,
    model: String,
    api_key: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
    agent: ureq::Agent,
}

impl fmt::Debug for ChatCompletionClient {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatCompletionClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ChatCompletionClient {
    #[inline]
    pub fn new(config: &GenerationConfig, api_key: String) -> Result<Self> {
        let endpoint_str = format!(
            "{}/chat/completions",
            config.base_url.trim_end_matches('/')
        );
        let endpoint = Url::parse(&endpoint_str)
            .map_err(|e| RagError::Config(format!("invalid provider URL {endpoint_str}: {e}")))?;

        let timeout = config.timeout();
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();

        Ok(Self {
            endpoint,
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout,
            agent,
        })
    }

    #[inline]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn complete_blocking(&self, system: &str, prompt: &str) -> anyhow::Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        let request_json =
            serde_json::to_string(&request).context("Failed to serialize chat request")?;

        debug!(
            "Requesting completion from {} ({} prompt chars)",
            self.endpoint,
            prompt.chars().count()
        );

        let response_text = self
            .agent
            .post(self.endpoint.as_str())
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send(&request_json)
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .map_err(|e| match e {
                ureq::Error::StatusCode(status) => anyhow::anyhow!("provider returned HTTP {status}"),
                other => anyhow::anyhow!("request failed: {other}"),
            })?;

        let response: ChatResponse =
            serde_json::from_str(&response_text).context("Failed to parse chat response")?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .unwrap_or_default();

        if content.is_empty() {
            anyhow::bail!("provider returned an empty completion");
        }
        Ok(content)
    }
}

#[async_trait]
impl TextGenerator for ChatCompletionClient {
    async fn generate(&self, system: &str, prompt: &str) -> Result<String> {
        let client = self.clone();
        let system = system.to_string();
        let prompt = prompt.to_string();
        let task =
            tokio::task::spawn_blocking(move || client.complete_blocking(&system, &prompt));

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(Ok(content))) => Ok(content),
            Ok(Ok(Err(e))) => Err(RagError::Provider(format!("{e:#}"))),
            Ok(Err(e)) => Err(RagError::Provider(format!("completion task failed: {e}"))),
            Err(_) => Err(RagError::Provider(format!(
                "no response within {:?}",
                self.timeout
            ))),
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
