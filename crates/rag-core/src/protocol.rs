//! Shared steps of the index/retrieve protocol.
//!
//! Store implementations compose these so that id assignment, vector
//! resolution, dimension checks and metadata projection behave the same on
//! every backend.

use tracing::{debug, warn};

use crate::error::{RagError, Result};
use crate::traits::Embedder;
use crate::types::{Document, Metadata};

/// A document ready for persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
    pub vector: Vec<f32>,
}

/// Assign the id, resolve the vector and check its length.
///
/// A supplied vector is used as is; otherwise the text is embedded with a
/// single-element batch.
pub async fn resolve_record(
    mut doc: Document,
    embedder: &dyn Embedder,
    dimension: usize,
) -> Result<Record> {
    doc.ensure_id();

    let vector = match doc.vector.take() {
        Some(vector) => vector,
        None => embedder
            .embed_texts(&[doc.text.as_str()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::embedding("No embedding returned"))?,
    };
    check_dimension(dimension, &vector)?;

    Ok(Record {
        id: doc.id,
        text: doc.text,
        metadata: doc.metadata,
        vector,
    })
}

/// Fail unless `vector` has exactly `expected` components.
pub fn check_dimension(expected: usize, vector: &[f32]) -> Result<()> {
    if vector.len() != expected {
        return Err(RagError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// Fail when the embedder declares a dimension other than the store's.
pub fn check_embedder_dimension(embedder: &dyn Embedder, dimension: usize) -> Result<()> {
    if dimension == 0 {
        return Err(RagError::config("store dimension must be positive"));
    }
    match embedder.dimension() {
        Some(dim) if dim != dimension => Err(RagError::config(format!(
            "embedder {} produces {}-dimensional vectors, store expects {}",
            embedder.descriptor(),
            dim,
            dimension
        ))),
        _ => Ok(()),
    }
}

/// Reject an empty embedding batch.
pub fn ensure_non_empty(texts: &[&str]) -> Result<()> {
    if texts.is_empty() {
        return Err(RagError::invalid_argument("texts must not be empty"));
    }
    Ok(())
}

/// Reduce per-input candidate lists to one vector per input.
///
/// Keeps the first candidate of each input; an input with no candidate or a
/// count mismatch fails the whole batch.
pub fn first_candidates(expected: usize, candidates: Vec<Vec<Vec<f32>>>) -> Result<Vec<Vec<f32>>> {
    if candidates.len() != expected {
        return Err(RagError::embedding(format!(
            "expected {} embeddings, got {}",
            expected,
            candidates.len()
        )));
    }

    candidates
        .into_iter()
        .enumerate()
        .map(|(i, per_input)| {
            if per_input.len() > 1 {
                warn!(
                    "Provider returned {} candidates for input {}, keeping the first",
                    per_input.len(),
                    i
                );
            }
            per_input
                .into_iter()
                .next()
                .ok_or_else(|| RagError::embedding(format!("no embedding for input {}", i)))
        })
        .collect()
}

/// Keep only the requested metadata keys. Empty `fields` keeps everything.
pub fn project_metadata(mut metadata: Metadata, fields: &[&str]) -> Metadata {
    if fields.is_empty() {
        return metadata;
    }
    let projected: Metadata = fields
        .iter()
        .filter_map(|field| metadata.remove_entry(*field))
        .collect();
    debug!("Projected metadata onto {} of {} fields", projected.len(), fields.len());
    projected
}

/// Cosine similarity, 0.0 for zero-length or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}
