//! Configuration types for the RAG system.
//!
//! Every backend address, model name and key is an explicit value here and
//! is handed to constructors; nothing is read from the process environment.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{RagError, Result};
use crate::traits::DuplicatePolicy;

/// Default Ollama endpoint.
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Default Ollama embedding model.
pub const DEFAULT_OLLAMA_MODEL: &str = "bge-m3:latest";

/// Default OpenAI-compatible endpoint.
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

/// Default OpenAI embedding model.
pub const DEFAULT_OPENAI_MODEL: &str = "text-embedding-3-small";

/// Default Weaviate endpoint.
pub const DEFAULT_WEAVIATE_URL: &str = "http://localhost:8080";

/// Main configuration for the RAG system.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RagConfig {
    /// Embedding configuration.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Vector store configuration.
    #[serde(default)]
    pub store: StoreConfig,
}

/// Embedding backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Deterministic hash-based vectors, no model.
    Mock,
    #[default]
    Ollama,
    OpenAi,
    Onnx,
}

/// Embedding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Which backend produces embeddings.
    #[serde(default)]
    pub provider: EmbeddingProvider,

    /// Model name (HTTP providers). Falls back to the provider default.
    #[serde(default)]
    pub model: Option<String>,

    /// Endpoint (HTTP providers). Falls back to the provider default.
    #[serde(default)]
    pub base_url: Option<String>,

    /// API key sent as a bearer token.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Declared output dimension, checked against the store at startup.
    #[serde(default)]
    pub dimension: Option<usize>,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Entries kept by the embedding cache. 0 disables caching.
    #[serde(default)]
    pub cache_capacity: usize,

    /// ONNX model file.
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,

    /// ONNX tokenizer file. Defaults to `tokenizer.json` next to the model.
    #[serde(default)]
    pub tokenizer_path: Option<PathBuf>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::default(),
            model: None,
            base_url: None,
            api_key: None,
            dimension: None,
            timeout_secs: default_timeout_secs(),
            cache_capacity: 0,
            model_path: default_model_path(),
            tokenizer_path: None,
        }
    }
}

impl EmbeddingConfig {
    /// The configured model, or the provider's default.
    pub fn model_or_default(&self) -> &str {
        match (&self.model, self.provider) {
            (Some(model), _) => model.as_str(),
            (None, EmbeddingProvider::OpenAi) => DEFAULT_OPENAI_MODEL,
            (None, _) => DEFAULT_OLLAMA_MODEL,
        }
    }

    /// The configured endpoint, or the provider's default.
    pub fn base_url_or_default(&self) -> &str {
        match (&self.base_url, self.provider) {
            (Some(url), _) => url.as_str(),
            (None, EmbeddingProvider::OpenAi) => DEFAULT_OPENAI_URL,
            (None, _) => DEFAULT_OLLAMA_URL,
        }
    }

    /// The tokenizer file for the ONNX provider.
    pub fn tokenizer_path_or_default(&self) -> PathBuf {
        self.tokenizer_path.clone().unwrap_or_else(|| {
            self.model_path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join("tokenizer.json")
        })
    }
}

/// Vector store backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    #[default]
    Sqlite,
    Weaviate,
}

/// Vector store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Which backend persists documents.
    #[serde(default)]
    pub backend: StoreBackend,

    /// Table (sqlite) or class (weaviate) name.
    #[serde(default = "default_collection")]
    pub collection: String,

    /// Vector dimension, fixed for the lifetime of the collection.
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Behaviour when an indexed id is already present.
    #[serde(default)]
    pub duplicates: DuplicatePolicy,

    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    /// Weaviate endpoint.
    #[serde(default = "default_weaviate_url")]
    pub base_url: String,

    /// Weaviate API key.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Request timeout in seconds (weaviate).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            collection: default_collection(),
            dimension: default_dimension(),
            duplicates: DuplicatePolicy::default(),
            path: default_database_path(),
            base_url: default_weaviate_url(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

// Default value functions

fn default_timeout_secs() -> u64 {
    30
}

fn default_collection() -> String {
    "documents".to_string()
}

fn default_dimension() -> usize {
    1024
}

fn default_weaviate_url() -> String {
    DEFAULT_WEAVIATE_URL.to_string()
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rag-kit")
        .join("rag.db")
}

fn default_model_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rag-kit")
        .join("models")
        .join("model.onnx")
}

impl RagConfig {
    /// Load configuration from file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| RagError::config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default paths.
    pub fn load_default() -> Result<Self> {
        // Try user config first
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("rag-kit").join("config.toml");
            if user_config.exists() {
                return Self::load(&user_config);
            }
        }

        // Try local config
        let local_config = PathBuf::from("rag-kit.toml");
        if local_config.exists() {
            return Self::load(&local_config);
        }

        Ok(Self::default())
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.store.dimension == 0 {
            return Err(RagError::config("store.dimension must be positive"));
        }
        if self.store.collection.trim().is_empty() {
            return Err(RagError::config("store.collection must not be empty"));
        }
        if let Some(dim) = self.embedding.dimension {
            if dim != self.store.dimension {
                return Err(RagError::config(format!(
                    "embedding.dimension ({}) differs from store.dimension ({})",
                    dim, self.store.dimension
                )));
            }
        }
        if self.embedding.provider == EmbeddingProvider::OpenAi && self.embedding.api_key.is_none()
        {
            return Err(RagError::config("embedding.api_key is required for openai"));
        }
        Ok(())
    }
}
