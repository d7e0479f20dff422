//! In-memory store.
//!
//! Brute-force cosine search over records kept in insertion order. Useful
//! for tests and small corpora that do not need persistence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use rag_core::protocol::{
    check_dimension, check_embedder_dimension, cosine_similarity, project_metadata,
    resolve_record, Record,
};
use rag_core::{
    Document, DuplicatePolicy, Embedder, RagError, Result, RetrievedDoc, StoreDescriptor,
    VectorStore,
};

/// In-memory vector store.
///
/// Equal scores come back in insertion order. Overwriting an id keeps the
/// record's original position.
pub struct MemoryStore {
    collection: String,
    dimension: usize,
    duplicates: DuplicatePolicy,
    embedder: Arc<dyn Embedder>,
    records: RwLock<Vec<Record>>,
    closed: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store. Fails when the embedder's declared dimension
    /// differs from `dimension`.
    pub fn new(
        collection: impl Into<String>,
        dimension: usize,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        check_embedder_dimension(&*embedder, dimension)?;
        let collection = collection.into();
        debug!("MemoryStore {} created (dimension: {})", collection, dimension);

        Ok(Self {
            collection,
            dimension,
            duplicates: DuplicatePolicy::default(),
            embedder,
            records: RwLock::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Set how re-indexing an existing id is handled.
    pub fn with_duplicate_policy(mut self, duplicates: DuplicatePolicy) -> Self {
        self.duplicates = duplicates;
        self
    }

    /// Number of stored documents.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RagError::Closed);
        }
        Ok(())
    }

    async fn write_record(&self, record: Record) -> Result<()> {
        self.ensure_open()?;
        let mut records = self.records.write().await;
        match records.iter_mut().find(|existing| existing.id == record.id) {
            Some(_) if self.duplicates == DuplicatePolicy::Reject => {
                Err(RagError::DuplicateId { id: record.id })
            }
            Some(existing) => {
                *existing = record;
                Ok(())
            }
            None => {
                records.push(record);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn index(&self, docs: Vec<Document>) -> Result<Vec<String>> {
        self.ensure_open()?;
        let mut ids = Vec::with_capacity(docs.len());

        for doc in docs {
            let record = match resolve_record(doc, &*self.embedder, self.dimension).await {
                Ok(record) => record,
                Err(e) => return Err(RagError::after_partial_write(ids, e)),
            };
            let id = record.id.clone();
            if let Err(e) = self.write_record(record).await {
                return Err(RagError::after_partial_write(ids, e));
            }
            ids.push(id);
        }

        debug!("Indexed {} documents into {}", ids.len(), self.collection);
        Ok(ids)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.ensure_open()?;
        self.records.write().await.retain(|record| record.id != id);
        Ok(())
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.records.read().await.iter().any(|record| record.id == id))
    }

    async fn retrieve(
        &self,
        vector: &[f32],
        top_k: usize,
        fields: &[&str],
    ) -> Result<Vec<RetrievedDoc>> {
        self.ensure_open()?;
        check_dimension(self.dimension, vector)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let records = self.records.read().await;
        let mut scored: Vec<(f32, &Record)> = records
            .iter()
            .map(|record| (cosine_similarity(vector, &record.vector), record))
            .collect();

        // Stable sort keeps insertion order among ties
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(score, record)| RetrievedDoc {
                id: Some(record.id.clone()),
                text: record.text.clone(),
                metadata: project_metadata(record.metadata.clone(), fields),
                vector: record.vector.clone(),
                score: Some(score),
            })
            .collect())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.records.write().await.clear();
        Ok(())
    }

    fn embedder(&self) -> Arc<dyn Embedder> {
        self.embedder.clone()
    }

    fn descriptor(&self) -> StoreDescriptor {
        StoreDescriptor {
            backend: "memory".to_string(),
            collection: self.collection.clone(),
            dimension: self.dimension,
            embedder: self.embedder.descriptor(),
        }
    }
}
