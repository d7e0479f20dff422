//! Ollama embedding client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use rag_core::protocol::{ensure_non_empty, first_candidates};
use rag_core::{Embedder, EmbedderDescriptor, EmbeddingConfig, Result};

use crate::http::{build_client, endpoint, read_json, transport_error};

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

/// Embedder backed by an Ollama server's `/api/embed` endpoint.
///
/// Issues one request per text, in input order. Ollama may return several
/// embeddings for one input; only the first is kept.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dimension: Option<usize>,
}

impl OllamaEmbedder {
    /// Create a client for `model` served at `base_url`.
    pub fn new(base_url: &str, model: &str, timeout_secs: u64) -> Result<Self> {
        let url = endpoint(base_url, "api/embed");
        info!("Ollama embedder: url={}, model={}", url, model);

        Ok(Self {
            client: build_client(timeout_secs)?,
            url,
            model: model.to_string(),
            dimension: None,
        })
    }

    /// Create a client from configuration.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let mut embedder = Self::new(
            config.base_url_or_default(),
            config.model_or_default(),
            config.timeout_secs,
        )?;
        embedder.dimension = config.dimension;
        Ok(embedder)
    }

    /// Declare the model's output dimension.
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = Some(dimension);
        self
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<Vec<f32>>> {
        let request = EmbedRequest {
            model: &self.model,
            input: text,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(&self.url, e))?;

        let body: EmbedResponse = read_json(&self.url, response).await?;
        Ok(body.embeddings)
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed_texts(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        ensure_non_empty(texts)?;

        let mut candidates = Vec::with_capacity(texts.len());
        for text in texts {
            candidates.push(self.embed_one(text).await?);
        }

        debug!("Ollama embedded {} texts with {}", texts.len(), self.model);
        first_candidates(texts.len(), candidates)
    }

    fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    fn descriptor(&self) -> EmbedderDescriptor {
        EmbedderDescriptor::new("ollama", Some(&self.model))
    }
}
