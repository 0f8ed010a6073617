//! Configuration for embedding backends

use crate::error::{EmbedError, Result};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// The embedding backends this crate knows how to bring up.
///
/// Backends are listed in [`EmbedConfig::backends`] in fallback order and
/// resolved exactly once at startup by [`crate::resolve_provider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Local ONNX model through fastembed
    #[serde(rename = "fastembed")]
    FastEmbed,
    /// OpenAI-compatible `/embeddings` HTTP endpoint
    Http,
    /// Deterministic feature hashing, no model files required
    Hashing,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::FastEmbed => "fastembed",
            BackendKind::Http => "http",
            BackendKind::Hashing => "hashing",
        };
        f.write_str(name)
    }
}

/// Settings for the HTTP backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpBackendConfig {
    /// Full URL of the embeddings endpoint, e.g. `http://localhost:11434/v1/embeddings`
    pub endpoint: String,
    /// Model name sent in the request body
    pub model: String,
    /// Expected embedding dimension; every response is checked against it
    pub dimension: usize,
    /// Name of the environment variable holding a bearer token, if any
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Per-request timeout in seconds
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_http_timeout_secs() -> u64 {
    30
}

impl HttpBackendConfig {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            dimension,
            api_key_env: None,
            timeout_secs: default_http_timeout_secs(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Configuration for embedding providers
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[builder(setter(into))]
#[serde(default)]
pub struct EmbedConfig {
    /// Backends to try, in order, when resolving the provider
    #[builder(default = "vec![BackendKind::FastEmbed]")]
    pub backends: Vec<BackendKind>,
    /// Name of the fastembed model to use
    #[builder(default = r#""all-MiniLM-L6-v2".to_string()"#)]
    pub model_name: String,
    /// Directory where fastembed caches downloaded model files
    #[builder(default = r#"PathBuf::from("models")"#)]
    pub cache_dir: PathBuf,
    /// Maximum batch size for embedding generation
    #[builder(default = "32")]
    pub batch_size: usize,
    /// Whether to L2-normalize embeddings
    #[builder(default = "true")]
    pub normalize: bool,
    /// Dimension of the hashing backend's vectors
    #[builder(default = "384")]
    pub hashing_dimension: usize,
    /// Print download progress while fastembed fetches a model
    #[builder(default = "false")]
    pub show_download_progress: bool,
    /// Settings for the HTTP backend; required when `backends` contains `http`
    #[builder(default)]
    pub http: Option<HttpBackendConfig>,
}

impl EmbedConfig {
    /// Create a new embedding configuration using the builder
    pub fn builder() -> EmbedConfigBuilder {
        EmbedConfigBuilder::default()
    }

    /// Configuration for a single fastembed model
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            ..Self::default()
        }
    }

    /// Configuration that only uses the hashing backend
    pub fn hashing(dimension: usize) -> Self {
        Self {
            backends: vec![BackendKind::Hashing],
            hashing_dimension: dimension,
            ..Self::default()
        }
    }

    /// Set the backend fallback order (builder style)
    pub fn with_backends(self, backends: Vec<BackendKind>) -> Self {
        Self { backends, ..self }
    }

    /// Set the batch size for embedding generation (builder style)
    pub fn with_batch_size(self, batch_size: usize) -> Self {
        Self { batch_size, ..self }
    }

    /// Set whether to normalize embeddings (builder style)
    pub fn with_normalize(self, normalize: bool) -> Self {
        Self { normalize, ..self }
    }

    /// Attach HTTP backend settings (builder style)
    pub fn with_http(self, http: HttpBackendConfig) -> Self {
        Self {
            http: Some(http),
            ..self
        }
    }

    /// Get the name of the configured fastembed model
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Check the configuration for values no backend can work with
    pub fn validate(&self) -> Result<()> {
        if self.backends.is_empty() {
            return Err(EmbedError::invalid_config(
                "at least one embedding backend must be configured",
            ));
        }
        if self.batch_size == 0 {
            return Err(EmbedError::invalid_config("batch_size must be at least 1"));
        }
        if self.backends.contains(&BackendKind::Hashing) && self.hashing_dimension == 0 {
            return Err(EmbedError::invalid_config(
                "hashing_dimension must be at least 1",
            ));
        }
        if self.backends.contains(&BackendKind::Http) {
            match &self.http {
                None => {
                    return Err(EmbedError::invalid_config(
                        "backend `http` is listed but no [http] settings were given",
                    ));
                }
                Some(http) if http.dimension == 0 => {
                    return Err(EmbedError::invalid_config(
                        "http.dimension must be at least 1",
                    ));
                }
                Some(_) => {}
            }
        }

        tracing::debug!("Embedding configuration valid: {:?}", self.backends);
        Ok(())
    }
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            backends: vec![BackendKind::FastEmbed],
            model_name: "all-MiniLM-L6-v2".to_string(),
            cache_dir: PathBuf::from("models"),
            batch_size: 32,
            normalize: true,
            hashing_dimension: 384,
            show_download_progress: false,
            http: None,
        }
    }
}
