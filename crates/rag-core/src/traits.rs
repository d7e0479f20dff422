//! Capability traits defining the interfaces between components.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::types::{Document, RetrievedDoc};

/// Structured description of an embedder, for logs and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedderDescriptor {
    /// Backend name, e.g. `ollama`.
    pub backend: String,

    /// Model name, when the backend has one.
    pub model: Option<String>,
}

impl EmbedderDescriptor {
    pub fn new(backend: impl Into<String>, model: Option<&str>) -> Self {
        Self {
            backend: backend.into(),
            model: model.map(String::from),
        }
    }
}

impl fmt::Display for EmbedderDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.model {
            Some(model) => write!(f, "{}({})", self.backend, model),
            None => write!(f, "{}", self.backend),
        }
    }
}

/// Structured description of a vector store, for logs and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreDescriptor {
    /// Backend name, e.g. `sqlite`.
    pub backend: String,

    /// Table, class or collection holding the documents.
    pub collection: String,

    /// Declared vector dimension.
    pub dimension: usize,

    /// The embedder used for text operations.
    pub embedder: EmbedderDescriptor,
}

impl fmt::Display for StoreDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}(collection: {}, dim: {}, embedder: {})",
            self.backend, self.collection, self.dimension, self.embedder
        )
    }
}

/// Embedding model trait.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a non-empty batch of texts.
    ///
    /// The result has one vector per input, in input order. Any failure
    /// aborts the whole batch.
    async fn embed_texts(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text. Equivalent to a batch of one.
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_texts(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::embedding("No embedding returned"))
    }

    /// Output dimension, when known without calling the backend.
    fn dimension(&self) -> Option<usize> {
        None
    }

    fn descriptor(&self) -> EmbedderDescriptor;
}

/// What a store does when an indexed id is already present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Replace the existing record.
    #[default]
    Overwrite,

    /// Fail with [`RagError::DuplicateId`].
    Reject,
}

/// Vector store trait.
///
/// A store is built around exactly one embedder, which it uses for every
/// text-based operation but does not own: closing the store leaves the
/// embedder usable.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Index documents in input order and return their ids.
    ///
    /// Documents without an id get their content-addressed id; documents
    /// without a vector are embedded first. The batch is not transactional:
    /// a failure after the first persisted document is reported as
    /// [`RagError::PartialWrite`] listing the ids already written.
    async fn index(&self, docs: Vec<Document>) -> Result<Vec<String>>;

    /// Delete a document. Deleting a missing id succeeds.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Check whether a document is present.
    async fn exists(&self, id: &str) -> Result<bool>;

    /// Nearest neighbours of `vector`, most similar first, at most `top_k`.
    ///
    /// Ties between equally distant documents come back in backend order.
    /// An empty `fields` returns all metadata; otherwise metadata is
    /// projected onto the named keys.
    async fn retrieve(
        &self,
        vector: &[f32],
        top_k: usize,
        fields: &[&str],
    ) -> Result<Vec<RetrievedDoc>>;

    /// Embed `text` with the store's embedder and retrieve by the result.
    async fn retrieve_text(
        &self,
        text: &str,
        top_k: usize,
        fields: &[&str],
    ) -> Result<Vec<RetrievedDoc>> {
        let vector = self
            .embedder()
            .embed_texts(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::embedding("No embedding returned"))?;
        self.retrieve(&vector, top_k, fields).await
    }

    /// Release backend resources. Later operations fail with
    /// [`RagError::Closed`].
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    /// The embedder this store was built with.
    fn embedder(&self) -> Arc<dyn Embedder>;

    fn descriptor(&self) -> StoreDescriptor;
}
