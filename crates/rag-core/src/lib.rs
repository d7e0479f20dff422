//! rag-core - Core types and traits for rag-kit
//!
//! This crate provides the document model, the content-addressed identity
//! generator, the [`Embedder`] and [`VectorStore`] capability traits and the
//! indexing/retrieval protocol every store implementation follows.

pub mod config;
pub mod error;
pub mod identity;
pub mod protocol;
pub mod traits;
pub mod types;

pub use config::*;
pub use error::{RagError, Result};
pub use identity::generate_id;
pub use traits::*;
pub use types::*;
