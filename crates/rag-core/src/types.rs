//! Core domain types for the RAG system.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::identity::generate_id;

/// User-provided document metadata. Key order carries no meaning.
pub type Metadata = HashMap<String, serde_json::Value>;

/// The unit of indexing and retrieval.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Content-addressed identifier. Empty until assigned.
    #[serde(default)]
    pub id: String,

    /// Document text.
    pub text: String,

    /// User-provided metadata.
    #[serde(default)]
    pub metadata: Metadata,

    /// Precomputed embedding. When present the store never re-embeds `text`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
}

impl Document {
    /// Create a document with its content-addressed id already assigned.
    pub fn new(text: impl Into<String>, metadata: Metadata) -> Self {
        let text = text.into();
        Self {
            id: generate_id(&text, &metadata),
            text,
            metadata,
            vector: None,
        }
    }

    /// Attach a precomputed embedding.
    pub fn with_vector(mut self, vector: Vec<f32>) -> Self {
        self.vector = Some(vector);
        self
    }

    /// Attach an explicit id, bypassing content addressing.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Assign the content-addressed id if none is set, and return it.
    pub fn ensure_id(&mut self) -> &str {
        if self.id.is_empty() {
            self.id = generate_id(&self.text, &self.metadata);
        }
        &self.id
    }
}

/// Build one document per text, all sharing `metadata`, with ids assigned.
pub fn make_docs_from_texts<S: AsRef<str>>(texts: &[S], metadata: &Metadata) -> Vec<Document> {
    texts
        .iter()
        .map(|text| Document::new(text.as_ref(), metadata.clone()))
        .collect()
}

/// A ranked retrieval hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDoc {
    /// Stored id, when the backend reports it.
    pub id: Option<String>,

    /// Stored text.
    pub text: String,

    /// Metadata, projected onto the requested fields.
    #[serde(default)]
    pub metadata: Metadata,

    /// Stored vector, or the query vector for backends that do not return
    /// stored vectors.
    pub vector: Vec<f32>,

    /// Similarity (higher is better), when the backend reports it.
    pub score: Option<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_new_assigns_id() {
        let doc = Document::new("hello", Metadata::new());
        assert_eq!(doc.id, generate_id("hello", &Metadata::new()));
        assert!(doc.vector.is_none());
    }

    #[test]
    fn test_ensure_id_keeps_explicit_id() {
        let mut doc = Document::new("hello", Metadata::new()).with_id("custom");
        assert_eq!(doc.ensure_id(), "custom");

        let mut blank = Document {
            text: "hello".to_string(),
            ..Default::default()
        };
        assert_eq!(blank.ensure_id(), generate_id("hello", &Metadata::new()));
    }

    #[test]
    fn test_make_docs_from_texts() {
        let mut metadata = Metadata::new();
        metadata.insert("source".to_string(), json!("wiki"));

        let docs = make_docs_from_texts(&["a", "b", "a"], &metadata);
        assert_eq!(docs.len(), 3);
        assert_eq!(docs[0].id, docs[2].id);
        assert_ne!(docs[0].id, docs[1].id);
        assert_eq!(docs[1].metadata["source"], json!("wiki"));
    }

    #[test]
    fn test_document_serde_skips_missing_vector() {
        let doc = Document::new("x", Metadata::new());
        let encoded = serde_json::to_value(&doc).unwrap();
        assert!(encoded.get("vector").is_none());

        let decoded: Document = serde_json::from_value(json!({"text": "x"})).unwrap();
        assert!(decoded.id.is_empty());
        assert!(decoded.metadata.is_empty());
    }
}
