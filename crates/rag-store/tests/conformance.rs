//! Behaviour every store must share, run against each backend that works
//! without a network.

use std::sync::Arc;

use rag_core::{make_docs_from_texts, Document, Embedder, Metadata, RagError};
use rag_embed::{MockEmbedder, StubEmbedder};
use rag_store::{DuplicatePolicy, MemoryStore, SqliteStore, VectorStore};
use serde_json::json;
use tempfile::tempdir;

const MOCK_DIM: usize = 32;

fn abc() -> Arc<dyn Embedder> {
    Arc::new(
        StubEmbedder::new([
            ("A", vec![1.0, 0.0, 0.0]),
            ("B", vec![0.0, 1.0, 0.0]),
            ("C", vec![0.0, 0.0, 1.0]),
        ])
        .unwrap(),
    )
}

fn mock() -> Arc<dyn Embedder> {
    Arc::new(MockEmbedder::new(MOCK_DIM))
}

/// One fresh instance of every offline backend.
fn stores_with(
    embedder: Arc<dyn Embedder>,
    dimension: usize,
    duplicates: DuplicatePolicy,
) -> Vec<Box<dyn VectorStore>> {
    vec![
        Box::new(
            MemoryStore::new("docs", dimension, embedder.clone())
                .unwrap()
                .with_duplicate_policy(duplicates),
        ),
        Box::new(
            SqliteStore::open_memory("docs", dimension, embedder)
                .unwrap()
                .with_duplicate_policy(duplicates),
        ),
    ]
}

fn stores(embedder: Arc<dyn Embedder>, dimension: usize) -> Vec<Box<dyn VectorStore>> {
    stores_with(embedder, dimension, DuplicatePolicy::Overwrite)
}

fn texts(docs: &[rag_core::RetrievedDoc]) -> Vec<&str> {
    docs.iter().map(|doc| doc.text.as_str()).collect()
}

#[tokio::test]
async fn test_abc_scenario() {
    for store in stores(abc(), 3) {
        let name = store.descriptor().backend;
        store
            .index(make_docs_from_texts(&["A", "B", "C"], &Metadata::new()))
            .await
            .unwrap();

        let top = store.retrieve(&[1.0, 0.0, 0.0], 1, &[]).await.unwrap();
        assert_eq!(texts(&top), vec!["A"], "{}", name);

        let top = store.retrieve(&[0.9, 0.1, 0.0], 2, &[]).await.unwrap();
        assert_eq!(texts(&top), vec!["A", "B"], "{}", name);
        assert!(top[0].score.unwrap() > top[1].score.unwrap(), "{}", name);

        let all = store.retrieve(&[0.0, 0.0, 1.0], 10, &[]).await.unwrap();
        assert_eq!(all.len(), 3, "{}", name);
        assert_eq!(all[0].text, "C", "{}", name);
    }
}

#[tokio::test]
async fn test_exists_after_index_and_delete() {
    for store in stores(mock(), MOCK_DIM) {
        let name = store.descriptor().backend;
        let ids = store
            .index(vec![Document::new("hello", Metadata::new())])
            .await
            .unwrap();
        assert!(store.exists(&ids[0]).await.unwrap(), "{}", name);
        assert!(!store.exists("not-there").await.unwrap(), "{}", name);

        store.delete(&ids[0]).await.unwrap();
        assert!(!store.exists(&ids[0]).await.unwrap(), "{}", name);

        // Deleting again is a no-op
        store.delete(&ids[0]).await.unwrap();
    }
}

#[tokio::test]
async fn test_self_retrieval() {
    let corpus = ["alpha", "beta", "gamma", "delta", "epsilon"];
    let embedder = mock();
    for store in stores(embedder.clone(), MOCK_DIM) {
        let name = store.descriptor().backend;
        let ids = store
            .index(make_docs_from_texts(&corpus, &Metadata::new()))
            .await
            .unwrap();

        for (text, id) in corpus.iter().zip(&ids) {
            let vector = embedder.embed_text(text).await.unwrap();
            let top = store.retrieve(&vector, 1, &[]).await.unwrap();
            assert_eq!(top[0].id.as_deref(), Some(id.as_str()), "{}", name);
            assert_eq!(top[0].text, *text, "{}", name);
            assert!((top[0].score.unwrap() - 1.0).abs() < 1e-4, "{}", name);
        }
    }
}

#[tokio::test]
async fn test_retrieve_text_matches_retrieve() {
    let embedder = mock();
    for store in stores(embedder.clone(), MOCK_DIM) {
        let name = store.descriptor().backend;
        store
            .index(make_docs_from_texts(&["one", "two", "three"], &Metadata::new()))
            .await
            .unwrap();

        let by_text = store.retrieve_text("two", 3, &[]).await.unwrap();
        let vector = embedder.embed_text("two").await.unwrap();
        let by_vector = store.retrieve(&vector, 3, &[]).await.unwrap();
        assert_eq!(by_text, by_vector, "{}", name);
    }
}

#[tokio::test]
async fn test_supplied_vector_is_not_re_embedded() {
    let embedder = Arc::new(StubEmbedder::new([("A", vec![1.0, 0.0, 0.0])]).unwrap());
    for store in stores(embedder.clone(), 3) {
        let before = embedder.calls();
        store
            .index(vec![Document::new("no stub entry", Metadata::new()).with_vector(vec![0.0, 1.0, 0.0])])
            .await
            .unwrap();
        assert_eq!(embedder.calls(), before);
    }
}

#[tokio::test]
async fn test_reindex_overwrites() {
    for store in stores(mock(), MOCK_DIM) {
        let name = store.descriptor().backend;
        let mut meta = Metadata::new();
        meta.insert("lang".to_string(), json!("en"));

        let first = store
            .index(vec![Document::new("same", meta.clone())])
            .await
            .unwrap();
        let second = store
            .index(vec![Document::new("same", meta.clone())])
            .await
            .unwrap();
        assert_eq!(first, second, "{}", name);

        let vector = store.embedder().embed_text("same").await.unwrap();
        let hits = store.retrieve(&vector, 10, &[]).await.unwrap();
        assert_eq!(hits.len(), 1, "{}", name);
    }
}

#[tokio::test]
async fn test_reindex_rejected() {
    for store in stores_with(mock(), MOCK_DIM, DuplicatePolicy::Reject) {
        let name = store.descriptor().backend;
        let docs = make_docs_from_texts(&["same", "other"], &Metadata::new());
        store.index(vec![docs[0].clone()]).await.unwrap();

        // Duplicate first: the error surfaces unchanged
        let err = store.index(vec![docs[0].clone()]).await.unwrap_err();
        assert!(matches!(err, RagError::DuplicateId { .. }), "{}: {}", name, err);

        // Duplicate after a persisted prefix: partial write
        let err = store
            .index(vec![docs[1].clone(), docs[0].clone()])
            .await
            .unwrap_err();
        assert_eq!(err.indexed_ids(), &[docs[1].id.clone()], "{}", name);
    }
}

#[tokio::test]
async fn test_partial_write_reports_prefix() {
    for store in stores(abc(), 3) {
        let name = store.descriptor().backend;
        let docs = make_docs_from_texts(&["A", "unknown", "C"], &Metadata::new());
        let err = store.index(docs.clone()).await.unwrap_err();

        match &err {
            RagError::PartialWrite { indexed, source } => {
                assert_eq!(indexed, &vec![docs[0].id.clone()], "{}", name);
                assert_eq!(source.error_code(), "EMBEDDING_ERROR", "{}", name);
            }
            other => panic!("{}: expected partial write, got {}", name, other),
        }
        assert!(store.exists(&docs[0].id).await.unwrap(), "{}", name);
        assert!(!store.exists(&docs[2].id).await.unwrap(), "{}", name);
    }
}

#[tokio::test]
async fn test_first_failure_is_not_partial() {
    for store in stores(abc(), 3) {
        let err = store
            .index(make_docs_from_texts(&["unknown", "A"], &Metadata::new()))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "EMBEDDING_ERROR");
        assert!(err.indexed_ids().is_empty());
    }
}

#[tokio::test]
async fn test_top_k_zero() {
    for store in stores(abc(), 3) {
        store
            .index(make_docs_from_texts(&["A"], &Metadata::new()))
            .await
            .unwrap();
        assert!(store.retrieve(&[1.0, 0.0, 0.0], 0, &[]).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_field_projection() {
    for store in stores(abc(), 3) {
        let name = store.descriptor().backend;
        let mut meta = Metadata::new();
        meta.insert("lang".to_string(), json!("en"));
        meta.insert("page".to_string(), json!(7));
        meta.insert("tags".to_string(), json!(["a", "b"]));
        store
            .index(vec![Document::new("A", meta.clone())])
            .await
            .unwrap();

        let all = store.retrieve(&[1.0, 0.0, 0.0], 1, &[]).await.unwrap();
        assert_eq!(all[0].metadata, meta, "{}", name);

        let some = store
            .retrieve(&[1.0, 0.0, 0.0], 1, &["lang", "missing"])
            .await
            .unwrap();
        assert_eq!(some[0].metadata.len(), 1, "{}", name);
        assert_eq!(some[0].metadata["lang"], json!("en"), "{}", name);
    }
}

#[tokio::test]
async fn test_dimension_mismatch() {
    for store in stores(abc(), 3) {
        let err = store
            .index(vec![Document::new("A", Metadata::new()).with_vector(vec![1.0, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RagError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));

        let err = store.retrieve(&[1.0; 4], 1, &[]).await.unwrap_err();
        assert_eq!(err.error_code(), "DIMENSION_MISMATCH");
    }
}

#[tokio::test]
async fn test_embedder_dimension_checked_at_construction() {
    let err = MemoryStore::new("docs", 4, abc()).err().unwrap();
    assert_eq!(err.error_code(), "CONFIG_ERROR");
    let err = SqliteStore::open_memory("docs", 4, abc()).err().unwrap();
    assert_eq!(err.error_code(), "CONFIG_ERROR");
}

#[tokio::test]
async fn test_close_keeps_embedder() {
    let embedder = abc();
    for store in stores(embedder.clone(), 3) {
        let name = store.descriptor().backend;
        store.close().await.unwrap();

        assert!(matches!(store.exists("x").await, Err(RagError::Closed)), "{}", name);
        assert!(
            matches!(store.retrieve(&[1.0, 0.0, 0.0], 1, &[]).await, Err(RagError::Closed)),
            "{}",
            name
        );
        assert!(embedder.embed_text("A").await.is_ok(), "{}", name);
    }
}

#[tokio::test]
async fn test_sqlite_persists_across_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("rag.db");

    let ids = {
        let store = SqliteStore::open(&path, "docs", 3, abc()).unwrap();
        let ids = store
            .index(make_docs_from_texts(&["A", "B"], &Metadata::new()))
            .await
            .unwrap();
        store.close().await.unwrap();
        ids
    };

    let store = SqliteStore::open(&path, "docs", 3, abc()).unwrap();
    assert_eq!(store.count().await.unwrap(), 2);
    assert!(store.exists(&ids[1]).await.unwrap());
    let top = store.retrieve_text("B", 1, &[]).await.unwrap();
    assert_eq!(top[0].id.as_deref(), Some(ids[1].as_str()));
}
