//! Embedding cache for avoiding redundant provider calls.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;

use rag_core::protocol::ensure_non_empty;
use rag_core::{Embedder, EmbedderDescriptor, RagError, Result};

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of texts served from the cache
    pub hits: u64,
    /// Number of texts sent to the provider
    pub misses: u64,
    /// Number of entries evicted
    pub evictions: u64,
}

struct Entry {
    vector: Vec<f32>,
    last_used: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<blake3::Hash, Entry>,
    clock: u64,
    stats: CacheStats,
}

/// Decorator that remembers embeddings by the blake3 hash of the text.
///
/// Misses of one call go to the wrapped embedder as a single batch, in
/// input order. When full, the least recently used entry is evicted. A
/// capacity of zero disables caching.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    capacity: usize,
    state: Mutex<CacheState>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, capacity: usize) -> Self {
        Self {
            inner,
            capacity,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Snapshot of the hit/miss counters.
    pub fn stats(&self) -> CacheStats {
        self.state
            .lock()
            .map(|state| state.stats)
            .unwrap_or_default()
    }

    /// Number of cached embeddings.
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .map(|state| state.entries.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, CacheState>> {
        self.state
            .lock()
            .map_err(|e| RagError::internal(format!("embedding cache poisoned: {}", e)))
    }

    fn insert(&self, state: &mut CacheState, key: blake3::Hash, vector: Vec<f32>) {
        if self.capacity == 0 {
            return;
        }
        if !state.entries.contains_key(&key) && state.entries.len() >= self.capacity {
            let oldest = state
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(k, _)| *k);
            if let Some(oldest) = oldest {
                state.entries.remove(&oldest);
                state.stats.evictions += 1;
            }
        }
        state.clock += 1;
        let last_used = state.clock;
        state.entries.insert(key, Entry { vector, last_used });
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    async fn embed_texts(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        ensure_non_empty(texts)?;

        let keys: Vec<blake3::Hash> = texts.iter().map(|t| blake3::hash(t.as_bytes())).collect();
        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut missing: Vec<&str> = Vec::new();
        let mut missing_keys: Vec<blake3::Hash> = Vec::new();

        {
            let mut state = self.lock()?;
            for (i, key) in keys.iter().enumerate() {
                state.clock += 1;
                let now = state.clock;
                if let Some(entry) = state.entries.get_mut(key) {
                    entry.last_used = now;
                    results[i] = Some(entry.vector.clone());
                    state.stats.hits += 1;
                } else if !missing_keys.contains(key) {
                    missing.push(texts[i]);
                    missing_keys.push(*key);
                    state.stats.misses += 1;
                }
            }
        }

        let mut fresh: HashMap<blake3::Hash, Vec<f32>> = HashMap::new();
        if !missing.is_empty() {
            let vectors = self.inner.embed_texts(&missing).await?;
            if vectors.len() != missing.len() {
                return Err(RagError::embedding(format!(
                    "expected {} embeddings, got {}",
                    missing.len(),
                    vectors.len()
                )));
            }

            let mut state = self.lock()?;
            for (key, vector) in missing_keys.iter().zip(vectors) {
                self.insert(&mut state, *key, vector.clone());
                fresh.insert(*key, vector);
            }
        }

        debug!(
            "Embedding cache: {} of {} texts served locally",
            texts.len() - missing.len(),
            texts.len()
        );

        results
            .into_iter()
            .zip(keys.iter())
            .map(|(cached, key)| {
                cached
                    .or_else(|| fresh.get(key).cloned())
                    .ok_or_else(|| RagError::internal("embedding missing after cache fill"))
            })
            .collect()
    }

    fn dimension(&self) -> Option<usize> {
        self.inner.dimension()
    }

    fn descriptor(&self) -> EmbedderDescriptor {
        self.inner.descriptor()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StubEmbedder;

    fn stub() -> Arc<StubEmbedder> {
        Arc::new(
            StubEmbedder::new([
                ("a", vec![1.0, 0.0]),
                ("b", vec![0.0, 1.0]),
                ("c", vec![1.0, 1.0]),
            ])
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_hits_skip_provider() {
        let inner = stub();
        let cached = CachedEmbedder::new(inner.clone(), 10);

        let first = cached.embed_texts(&["a", "b"]).await.unwrap();
        let second = cached.embed_texts(&["b", "a"]).await.unwrap();

        assert_eq!(first, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert_eq!(second, vec![vec![0.0, 1.0], vec![1.0, 0.0]]);
        assert_eq!(inner.calls(), 1);
        assert_eq!(
            cached.stats(),
            CacheStats {
                hits: 2,
                misses: 2,
                evictions: 0
            }
        );
    }

    #[tokio::test]
    async fn test_mixed_batch_preserves_order() {
        let inner = stub();
        let cached = CachedEmbedder::new(inner.clone(), 10);

        cached.embed_text("b").await.unwrap();
        let vectors = cached.embed_texts(&["a", "b", "c", "a"]).await.unwrap();
        assert_eq!(
            vectors,
            vec![
                vec![1.0, 0.0],
                vec![0.0, 1.0],
                vec![1.0, 1.0],
                vec![1.0, 0.0]
            ]
        );
        assert_eq!(inner.calls(), 2);
    }

    #[tokio::test]
    async fn test_eviction() {
        let cached = CachedEmbedder::new(stub(), 2);
        cached.embed_text("a").await.unwrap();
        cached.embed_text("b").await.unwrap();
        cached.embed_text("a").await.unwrap();
        cached.embed_text("c").await.unwrap();

        assert_eq!(cached.len(), 2);
        assert_eq!(cached.stats().evictions, 1);

        // "b" was least recently used
        cached.embed_text("a").await.unwrap();
        assert_eq!(cached.stats().hits, 2);
    }

    #[tokio::test]
    async fn test_zero_capacity_disables_cache() {
        let inner = stub();
        let cached = CachedEmbedder::new(inner.clone(), 0);
        cached.embed_text("a").await.unwrap();
        cached.embed_text("a").await.unwrap();
        assert!(cached.is_empty());
        assert_eq!(inner.calls(), 2);
    }

    #[tokio::test]
    async fn test_provider_error_is_not_cached() {
        let inner = stub();
        let cached = CachedEmbedder::new(inner, 10);
        assert!(cached.embed_texts(&["a", "missing"]).await.is_err());
        assert!(cached.is_empty());
    }
}
