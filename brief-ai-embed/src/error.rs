//! Error types for the embedding system

/// Result type for embedding operations.
///
/// This is a convenience type alias that uses [`EmbedError`] as the error type.
pub type Result<T> = std::result::Result<T, EmbedError>;

/// Error type for all embedding operations.
///
/// Covers configuration problems, backend initialization failures, and runtime
/// failures while generating embeddings. Callers that only care whether an
/// embedding could be produced can treat every variant as "provider
/// unavailable"; the variants exist so logs and CLI output can say why.
///
/// # Error Categories
///
/// - **Configuration Errors**: invalid settings, unknown model names
/// - **Initialization Errors**: a backend could not be brought up
/// - **Runtime Errors**: generation failures, HTTP failures, wrong dimensions
/// - **IO Errors**: file system access issues
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// Error when model configuration is invalid
    #[error("Invalid embedding configuration: {message}")]
    InvalidConfig { message: String },

    /// Error during model initialization
    #[error("Model initialization failed: {source}")]
    ModelInitialization {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Error during embedding generation
    #[error("Embedding generation failed: {source}")]
    EmbeddingGeneration {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Remote embedding endpoint returned an error or could not be reached
    #[error("Embedding endpoint error{}: {message}", status_suffix(.status))]
    Http {
        status: Option<u16>,
        message: String,
    },

    /// A backend produced vectors of an unexpected length
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Every backend in the configured fallback order failed to initialize
    #[error("No embedding backend available (tried: {tried})")]
    NoBackendAvailable { tried: String },

    /// IO errors when preparing the model cache directory
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Async task join errors
    #[error("Async task failed: {source}")]
    AsyncTask {
        #[from]
        source: tokio::task::JoinError,
    },
}

impl EmbedError {
    /// Create an embedding generation error from any error type.
    pub fn embedding_gen<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::EmbeddingGeneration {
            source: Box::new(source),
        }
    }

    /// Create an invalid configuration error with a custom message.
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create an HTTP error without a status code (connection, timeout, decoding).
    pub fn http<S: Into<String>>(message: S) -> Self {
        Self::Http {
            status: None,
            message: message.into(),
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl From<reqwest::Error> for EmbedError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}
