//! Error types for the RAG system.

use thiserror::Error;

/// Result type alias using RagError.
pub type Result<T> = std::result::Result<T, RagError>;

/// Errors that can occur in the RAG system.
///
/// A missing document is never an error: `exists` reports `false` and
/// `delete` treats an absent id as success.
#[derive(Error, Debug)]
pub enum RagError {
    /// Cannot reach the embedding or storage backend.
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Upstream embedding call failed. No partial vectors are returned.
    #[error("Embedding error: {message}")]
    Embedding { message: String },

    /// Backend bootstrap (schema, collection or index creation) failed.
    #[error("Schema error: {message}")]
    Schema { message: String },

    /// Storage backend failure after bootstrap.
    #[error("Database error: {message}")]
    Database { message: String },

    /// A batch index failed after some documents were already persisted.
    #[error("Partial write: {} document(s) indexed before failure: {source}", indexed.len())]
    PartialWrite {
        /// Ids persisted before the failure, in input order.
        indexed: Vec<String>,
        #[source]
        source: Box<RagError>,
    },

    /// The id is already present and the store rejects duplicates.
    #[error("Document already exists: {id}")]
    DuplicateId { id: String },

    /// Vector length differs from the store's declared dimension.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Invalid argument provided.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// The store was closed.
    #[error("Store is closed")]
    Closed,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Internal error (unexpected).
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl RagError {
    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create an embedding error.
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding {
            message: message.into(),
        }
    }

    /// Create a schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Wrap a batch failure, keeping the ids that were persisted first.
    ///
    /// With nothing persisted the original error is returned unchanged, so a
    /// total failure stays distinguishable from a partial one.
    pub fn after_partial_write(indexed: Vec<String>, err: RagError) -> Self {
        if indexed.is_empty() {
            err
        } else {
            Self::PartialWrite {
                indexed,
                source: Box::new(err),
            }
        }
    }

    /// Ids persisted before a partial batch failure.
    pub fn indexed_ids(&self) -> &[String] {
        match self {
            Self::PartialWrite { indexed, .. } => indexed,
            _ => &[],
        }
    }

    /// Get a stable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "CONNECTION_ERROR",
            Self::Embedding { .. } => "EMBEDDING_ERROR",
            Self::Schema { .. } => "SCHEMA_ERROR",
            Self::Database { .. } => "DATABASE_ERROR",
            Self::PartialWrite { .. } => "PARTIAL_WRITE",
            Self::DuplicateId { .. } => "DUPLICATE_ID",
            Self::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::Closed => "CLOSED",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RagError::DuplicateId {
            id: "abc123".to_string(),
        };
        assert!(err.to_string().contains("abc123"));

        let err = RagError::DimensionMismatch {
            expected: 3,
            actual: 4,
        };
        assert_eq!(err.to_string(), "Dimension mismatch: expected 3, got 4");
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(RagError::database("test").error_code(), "DATABASE_ERROR");
        assert_eq!(RagError::schema("test").error_code(), "SCHEMA_ERROR");
        assert_eq!(RagError::Closed.error_code(), "CLOSED");
    }

    #[test]
    fn test_partial_write_only_when_prefix_persisted() {
        let total = RagError::after_partial_write(Vec::new(), RagError::embedding("down"));
        assert_eq!(total.error_code(), "EMBEDDING_ERROR");
        assert!(total.indexed_ids().is_empty());

        let partial = RagError::after_partial_write(
            vec!["a".to_string(), "b".to_string()],
            RagError::embedding("down"),
        );
        assert_eq!(partial.error_code(), "PARTIAL_WRITE");
        assert_eq!(partial.indexed_ids(), ["a", "b"]);
        assert!(partial.to_string().contains("2 document(s)"));
        assert!(std::error::Error::source(&partial).is_some());
    }
}
