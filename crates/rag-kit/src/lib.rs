//! rag-kit - Configuration-driven wiring
//!
//! Turns a [`RagConfig`] into a ready embedder and vector store. Nothing is
//! read from the environment: every address, model and key comes from the
//! configuration value.
//!
//! ```no_run
//! # async fn example() -> rag_core::Result<()> {
//! use rag_core::{make_docs_from_texts, Metadata, RagConfig};
//!
//! let config = RagConfig::load(std::path::Path::new("rag-kit.toml"))?;
//! let store = rag_kit::connect(&config).await?;
//! store
//!     .index(make_docs_from_texts(&["hello"], &Metadata::new()))
//!     .await?;
//! let hits = store.retrieve_text("hello", 5, &[]).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tracing::info;

use rag_core::{
    EmbeddingConfig, EmbeddingProvider, RagConfig, RagError, Result, StoreBackend, StoreConfig,
};
use rag_embed::{CachedEmbedder, MockEmbedder};
use rag_store::{MemoryStore, SqliteStore};

pub use rag_core::{Document, Embedder, RetrievedDoc, VectorStore};

/// Build the embedder described by `config`, wrapped in a cache when
/// `cache_capacity` is positive.
pub fn build_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    let embedder: Arc<dyn Embedder> = match config.provider {
        EmbeddingProvider::Mock => Arc::new(match config.dimension {
            Some(dimension) => MockEmbedder::new(dimension),
            None => MockEmbedder::default(),
        }),
        #[cfg(feature = "ollama")]
        EmbeddingProvider::Ollama => Arc::new(rag_embed::OllamaEmbedder::from_config(config)?),
        #[cfg(feature = "openai")]
        EmbeddingProvider::OpenAi => Arc::new(rag_embed::OpenAiEmbedder::from_config(config)?),
        #[cfg(feature = "onnx")]
        EmbeddingProvider::Onnx => {
            let embedder = rag_embed::OnnxEmbedder::new(
                &config.model_path,
                config.tokenizer_path_or_default(),
            )?;
            Arc::new(match config.dimension {
                Some(dimension) => embedder.with_dimension(dimension),
                None => embedder,
            })
        }
        #[allow(unreachable_patterns)]
        provider => {
            return Err(RagError::config(format!(
                "embedding provider {:?} is not compiled in",
                provider
            )))
        }
    };

    info!("Embedder: {}", embedder.descriptor());

    if config.cache_capacity > 0 {
        return Ok(Arc::new(CachedEmbedder::new(embedder, config.cache_capacity)));
    }
    Ok(embedder)
}

/// Open the store described by `config` around `embedder`.
pub async fn open_store(
    config: &StoreConfig,
    embedder: Arc<dyn Embedder>,
) -> Result<Arc<dyn VectorStore>> {
    let store: Arc<dyn VectorStore> = match config.backend {
        StoreBackend::Memory => Arc::new(
            MemoryStore::new(config.collection.as_str(), config.dimension, embedder)?
                .with_duplicate_policy(config.duplicates),
        ),
        StoreBackend::Sqlite => Arc::new(SqliteStore::from_config(config, embedder)?),
        #[cfg(feature = "weaviate")]
        StoreBackend::Weaviate => {
            Arc::new(rag_store::WeaviateStore::from_config(config, embedder).await?)
        }
        #[allow(unreachable_patterns)]
        backend => {
            return Err(RagError::config(format!(
                "store backend {:?} is not compiled in",
                backend
            )))
        }
    };

    info!("Store: {}", store.descriptor());
    Ok(store)
}

/// Validate `config`, then build its embedder and store.
///
/// An embedding section without a dimension inherits the store's.
pub async fn connect(config: &RagConfig) -> Result<Arc<dyn VectorStore>> {
    config.validate()?;

    let mut embedding = config.embedding.clone();
    embedding.dimension.get_or_insert(config.store.dimension);

    let embedder = build_embedder(&embedding)?;
    open_store(&config.store, embedder).await
}
