//! rag-store - Vector store backends
//!
//! Every store implements [`VectorStore`] on top of one shared
//! [`Embedder`](rag_core::Embedder):
//!
//! - [`MemoryStore`]: brute-force cosine search over in-process records.
//! - [`SqliteStore`]: SQLite with the sqlite-vec extension.
//! - `WeaviateStore` (feature `weaviate`): Weaviate over REST and GraphQL.
//!
//! Duplicate ids follow the store's [`DuplicatePolicy`]; no backend keeps
//! two records under one id.

mod memory;
mod schema;
mod sqlite;
#[cfg(feature = "weaviate")]
mod weaviate;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
#[cfg(feature = "weaviate")]
pub use weaviate::{to_class_name, WeaviateStore};

// Re-export schema for testing/migrations
pub use schema::{validate_table_name, SCHEMA_VERSION};

pub use rag_core::{DuplicatePolicy, VectorStore};
