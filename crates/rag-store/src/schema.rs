//! Database schema definitions.
//!
//! Table names are interpolated into SQL, so they are restricted to plain
//! identifiers by [`validate_table_name`].

use rag_core::{RagError, Result};

/// Schema version for migrations.
pub const SCHEMA_VERSION: u32 = 1;

/// Registry of collections and their fixed vector dimension.
pub const REGISTRY_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS rag_collections (
    name TEXT PRIMARY KEY,
    dimension INTEGER NOT NULL,
    schema_version INTEGER NOT NULL
);
"#;

/// Check that `name` is a plain SQL identifier (`[A-Za-z_][A-Za-z0-9_]*`).
pub fn validate_table_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(RagError::config(format!("invalid table name: {:?}", name)));
    }
    if name.starts_with("rag_collections") || name.starts_with("sqlite_") {
        return Err(RagError::config(format!("reserved table name: {:?}", name)));
    }
    Ok(())
}

/// Documents table for a collection.
pub fn documents_schema(table: &str) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {table} (
    id TEXT PRIMARY KEY,
    text TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{{}}',
    created_at INTEGER NOT NULL
);
"#
    )
}

/// sqlite-vec table holding the embeddings of a collection.
pub fn vec_schema(table: &str, dimension: usize) -> String {
    format!(
        r#"
CREATE VIRTUAL TABLE IF NOT EXISTS {table}_vec USING vec0(
    id TEXT PRIMARY KEY,
    embedding float[{dimension}] distance_metric=cosine
);
"#
    )
}
