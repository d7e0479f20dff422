//! Embedders that need no model: hash-based mock vectors and a fixed table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tracing::debug;

use rag_core::protocol::ensure_non_empty;
use rag_core::{Embedder, EmbedderDescriptor, RagError, Result};

/// A mock embedder for testing that doesn't require actual models.
///
/// Vectors are derived from the blake3 hash of the text and L2 normalized,
/// so equal texts always embed equally.
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    /// Create a mock embedder producing `dimension`-length vectors.
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let hash = blake3::hash(text.as_bytes());
        let bytes = hash.as_bytes();
        let mut embedding: Vec<f32> = (0..self.dimension)
            .map(|i| bytes[i % 32] as f32 / 255.0 - 0.5 + (i / 32) as f32 * 1e-3)
            .collect();

        // L2 normalize
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut embedding {
                *x /= norm;
            }
        }
        embedding
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(768)
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed_texts(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        ensure_non_empty(texts)?;
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }

    fn dimension(&self) -> Option<usize> {
        Some(self.dimension)
    }

    fn descriptor(&self) -> EmbedderDescriptor {
        EmbedderDescriptor::new("mock", None)
    }
}

/// An embedder backed by a fixed text-to-vector table.
///
/// Texts missing from the table fail the whole batch, which makes it easy to
/// provoke embedding errors at a chosen position.
pub struct StubEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    dimension: usize,
    calls: AtomicUsize,
}

impl StubEmbedder {
    /// Build from `(text, vector)` pairs. All vectors must share one length.
    pub fn new<I, S>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Vec<f32>)>,
        S: Into<String>,
    {
        let vectors: HashMap<String, Vec<f32>> = entries
            .into_iter()
            .map(|(text, vector)| (text.into(), vector))
            .collect();

        let mut lengths = vectors.values().map(Vec::len);
        let dimension = lengths
            .next()
            .ok_or_else(|| RagError::invalid_argument("stub table must not be empty"))?;
        if lengths.any(|len| len != dimension) {
            return Err(RagError::invalid_argument(
                "stub vectors must all have the same length",
            ));
        }

        Ok(Self {
            vectors,
            dimension,
            calls: AtomicUsize::new(0),
        })
    }

    /// Number of `embed_texts` calls served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for StubEmbedder {
    async fn embed_texts(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        ensure_non_empty(texts)?;
        self.calls.fetch_add(1, Ordering::SeqCst);
        debug!("Stub embedding batch of {}", texts.len());

        texts
            .iter()
            .map(|text| {
                self.vectors
                    .get(*text)
                    .cloned()
                    .ok_or_else(|| RagError::embedding(format!("no stub vector for {:?}", text)))
            })
            .collect()
    }

    fn dimension(&self) -> Option<usize> {
        Some(self.dimension)
    }

    fn descriptor(&self) -> EmbedderDescriptor {
        EmbedderDescriptor::new("stub", None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abc() -> StubEmbedder {
        StubEmbedder::new([
            ("A", vec![1.0, 0.0, 0.0]),
            ("B", vec![0.0, 1.0, 0.0]),
            ("C", vec![0.0, 0.0, 1.0]),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_mock_embedder() {
        let embedder = MockEmbedder::default();
        assert_eq!(embedder.dimension(), Some(768));

        let embeddings = embedder
            .embed_texts(&["Hello world", "Rust is great"])
            .await
            .unwrap();
        assert_eq!(embeddings.len(), 2);
        assert_eq!(embeddings[0].len(), 768);
        assert_eq!(embeddings[1].len(), 768);

        // Check L2 normalization
        let norm: f32 = embeddings[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_deterministic_embeddings() {
        let embedder = MockEmbedder::new(64);
        let e1 = embedder.embed_text("consistent input").await.unwrap();
        let e2 = embedder.embed_text("consistent input").await.unwrap();
        assert_eq!(e1, e2);
    }

    #[tokio::test]
    async fn test_different_texts_different_embeddings() {
        let embedder = MockEmbedder::new(64);
        let e1 = embedder.embed_text("hello").await.unwrap();
        let e2 = embedder.embed_text("olleh").await.unwrap();
        assert_ne!(e1, e2);
    }

    #[tokio::test]
    async fn test_empty_batch_rejected() {
        let embedder = MockEmbedder::new(8);
        let err = embedder.embed_texts(&[]).await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_ARGUMENT");
    }

    #[tokio::test]
    async fn test_stub_preserves_order() {
        let embedder = abc();
        let vectors = embedder.embed_texts(&["C", "A", "B"]).await.unwrap();
        assert_eq!(
            vectors,
            vec![
                vec![0.0, 0.0, 1.0],
                vec![1.0, 0.0, 0.0],
                vec![0.0, 1.0, 0.0]
            ]
        );
        assert_eq!(embedder.calls(), 1);
    }

    #[tokio::test]
    async fn test_stub_unknown_text_fails_whole_batch() {
        let embedder = abc();
        let err = embedder.embed_texts(&["A", "Z", "B"]).await.unwrap_err();
        assert_eq!(err.error_code(), "EMBEDDING_ERROR");
    }

    #[test]
    fn test_stub_rejects_ragged_table() {
        assert!(StubEmbedder::new([("a", vec![1.0]), ("b", vec![1.0, 2.0])]).is_err());
        assert!(StubEmbedder::new(Vec::<(String, Vec<f32>)>::new()).is_err());
    }
}
