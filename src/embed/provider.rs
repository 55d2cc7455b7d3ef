//! Embedding provider client.
//!
//! The provider is an external, hosted capability: a text in, a fixed-length
//! vector out, with a well-defined set of failure modes. Callers decide what
//! a failure means; search falls back to keyword matching, enrichment
//! records the failure and leaves the item without an embedding.

use std::time::Duration;

use serde::Deserialize;

use crate::config::EmbeddingConfig;

/// Failure modes of the embedding provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("no api credentials configured")]
    MissingCredentials,

    #[error("request timed out")]
    Timeout,

    #[error("authentication rejected")]
    Auth,

    #[error("quota exhausted")]
    Quota,

    #[error("provider returned http {0}")]
    Http(u16),

    #[error("malformed provider response: {0}")]
    Malformed(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Converts text into a fixed-length embedding vector.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
    fn dimensions(&self) -> usize;
}

/// Client for an OpenAI-compatible `/embeddings` endpoint.
pub struct HttpEmbeddings {
    client: reqwest::blocking::Client,
    api_base: String,
    api_key: Option<String>,
    model: String,
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl HttpEmbeddings {
    /// Build a client from config. The api key is read from the configured
    /// environment variable; a missing key is not an error until `embed` is
    /// called, so the daemon can run in keyword-only mode.
    pub fn new(config: &EmbeddingConfig) -> Result<Self, ProviderError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| ProviderError::Transport(err.to_string()))?;

        let api_key = std::env::var(&config.api_key_env).ok().filter(|key| !key.is_empty());
        if api_key.is_none() {
            log::warn!(
                "{} is not set; semantic search will fall back to keyword matching",
                config.api_key_env
            );
        }

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            dimensions: config.dimensions,
        })
    }
}

impl EmbeddingProvider for HttpEmbeddings {
    fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let api_key = self.api_key.as_ref().ok_or(ProviderError::MissingCredentials)?;

        let response = self
            .client
            .post(format!("{}/embeddings", self.api_base))
            .bearer_auth(api_key)
            .json(&serde_json::json!({
                "model": self.model,
                "input": text,
                "encoding_format": "float",
            }))
            .send()
            .map_err(|err| {
                if err.is_timeout() {
                    ProviderError::Timeout
                } else {
                    ProviderError::Transport(err.to_string())
                }
            })?;

        match response.status().as_u16() {
            200 => {}
            401 | 403 => return Err(ProviderError::Auth),
            429 => return Err(ProviderError::Quota),
            status => return Err(ProviderError::Http(status)),
        }

        let body: EmbeddingResponse = response
            .json()
            .map_err(|err| ProviderError::Malformed(err.to_string()))?;

        let embedding = body
            .data
            .into_iter()
            .next()
            .map(|data| data.embedding)
            .ok_or_else(|| ProviderError::Malformed("empty data array".to_string()))?;

        // a wrong-length vector must never reach the store
        if embedding.len() != self.dimensions {
            return Err(ProviderError::Malformed(format!(
                "expected {} dimensions, got {}",
                self.dimensions,
                embedding.len()
            )));
        }

        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
