//! OpenAI-compatible embedding client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use rag_core::protocol::{ensure_non_empty, first_candidates};
use rag_core::{Embedder, EmbedderDescriptor, EmbeddingConfig, RagError, Result};

use crate::http::{build_client, endpoint, read_json, transport_error};

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    encoding_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// Embedder backed by an OpenAI-compatible `/embeddings` endpoint.
///
/// The whole batch goes out as one multi-input request; the response is
/// reordered by its `index` field.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    dimension: Option<usize>,
}

impl OpenAiEmbedder {
    /// Create a client for `model` served at `base_url`.
    pub fn new(base_url: &str, api_key: &str, model: &str, timeout_secs: u64) -> Result<Self> {
        let url = endpoint(base_url, "embeddings");
        info!("OpenAI embedder: url={}, model={}", url, model);

        Ok(Self {
            client: build_client(timeout_secs)?,
            url,
            api_key: api_key.to_string(),
            model: model.to_string(),
            dimension: None,
        })
    }

    /// Create a client from configuration.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .ok_or_else(|| RagError::config("embedding.api_key is required for openai"))?;
        let mut embedder = Self::new(
            config.base_url_or_default(),
            api_key,
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
}

/// Place each returned embedding at its input position.
fn order_by_index(expected: usize, data: Vec<EmbeddingData>) -> Result<Vec<Vec<f32>>> {
    let mut slots: Vec<Vec<Vec<f32>>> = vec![Vec::new(); expected];
    for item in data {
        let slot = slots.get_mut(item.index).ok_or_else(|| {
            RagError::embedding(format!(
                "response index {} out of range for {} inputs",
                item.index, expected
            ))
        })?;
        slot.push(item.embedding);
    }
    first_candidates(expected, slots)
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed_texts(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        ensure_non_empty(texts)?;

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
            encoding_format: "float",
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(&self.url, e))?;

        let body: EmbeddingResponse = read_json(&self.url, response).await?;
        debug!("OpenAI embedded {} texts with {}", texts.len(), self.model);
        order_by_index(texts.len(), body.data)
    }

    fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    fn descriptor(&self) -> EmbedderDescriptor {
        EmbedderDescriptor::new("openai", Some(&self.model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_shape() {
        let texts = ["a", "b"];
        let request = EmbeddingRequest {
            model: "text-embedding-3-small",
            input: &texts,
            encoding_format: "float",
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "model": "text-embedding-3-small",
                "input": ["a", "b"],
                "encoding_format": "float"
            })
        );
    }

    #[test]
    fn test_response_reordered_by_index() {
        let body: EmbeddingResponse = serde_json::from_value(json!({
            "object": "list",
            "data": [
                {"object": "embedding", "index": 1, "embedding": [0.0, 1.0]},
                {"object": "embedding", "index": 0, "embedding": [1.0, 0.0]}
            ],
            "model": "text-embedding-3-small"
        }))
        .unwrap();

        let vectors = order_by_index(2, body.data).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_missing_or_stray_index_is_error() {
        let missing = vec![EmbeddingData {
            index: 0,
            embedding: vec![1.0],
        }];
        assert!(order_by_index(2, missing).is_err());

        let stray = vec![EmbeddingData {
            index: 5,
            embedding: vec![1.0],
        }];
        assert!(order_by_index(1, stray).is_err());
    }

    #[test]
    fn test_from_config_requires_key() {
        let config = EmbeddingConfig::default();
        assert!(OpenAiEmbedder::from_config(&config).is_err());

        let config = EmbeddingConfig {
            provider: rag_core::EmbeddingProvider::OpenAi,
            api_key: Some("sk-test".to_string()),
            ..Default::default()
        };
        let embedder = OpenAiEmbedder::from_config(&config).unwrap();
        assert_eq!(embedder.url, "https://api.openai.com/v1/embeddings");
        assert_eq!(embedder.descriptor().model.as_deref(), Some("text-embedding-3-small"));
    }
}
