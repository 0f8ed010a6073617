//! Error types for the retrieval engine

use brief_ai_embed::EmbedError;
use std::path::PathBuf;

/// Result type for retrieval operations.
pub type Result<T> = std::result::Result<T, RetrievalError>;

/// Error type for ingestion, querying and index persistence.
///
/// Every failure surfaces as one of these variants. Nothing is retried inside
/// the engine, and a failed call never leaves the vector index and the
/// metadata store out of step with each other.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    /// The embedding provider failed, timed out or produced malformed output
    #[error("Embedding provider unavailable: {message}")]
    EmbeddingUnavailable { message: String },

    /// The durable commit for an ingest failed; nothing was appended
    #[error("Ingest of {document} failed, nothing was committed: {message}")]
    IngestFailed { document: String, message: String },

    /// A slot id returned by the vector index has no metadata record
    #[error("Slot {slot} has no metadata record (metadata holds {count} chunks)")]
    OutOfRange { slot: usize, count: usize },

    /// Persisted index data could not be read back
    #[error("Persisted index is corrupt: {message}")]
    CorruptPersistedIndex { message: String },

    /// A vector does not have the index dimension
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid query: {message}")]
    InvalidQuery { message: String },

    /// The store on disk was built by a different embedding model
    #[error("Index at {} was built with {stored}, but the configured provider is {configured}", .path.display())]
    IncompatibleIndex {
        path: PathBuf,
        stored: String,
        configured: String,
    },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// I/O or SQLite failure outside an ingest commit
    #[error("Storage error: {source}")]
    Storage {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl RetrievalError {
    pub fn embedding_unavailable(message: impl Into<String>) -> Self {
        Self::EmbeddingUnavailable {
            message: message.into(),
        }
    }

    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::CorruptPersistedIndex {
            message: message.into(),
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    pub fn storage<E>(source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Storage {
            source: source.into(),
        }
    }
}

impl From<sqlx::Error> for RetrievalError {
    fn from(err: sqlx::Error) -> Self {
        Self::storage(err)
    }
}

impl From<std::io::Error> for RetrievalError {
    fn from(err: std::io::Error) -> Self {
        Self::storage(err)
    }
}

impl From<EmbedError> for RetrievalError {
    fn from(err: EmbedError) -> Self {
        match err {
            EmbedError::InvalidConfig { message } => Self::InvalidConfig { message },
            EmbedError::DimensionMismatch { expected, actual } => {
                Self::DimensionMismatch { expected, actual }
            }
            other => Self::EmbeddingUnavailable {
                message: other.to_string(),
            },
        }
    }
}
