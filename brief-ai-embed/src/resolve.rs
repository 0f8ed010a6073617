//! One-shot backend resolution.
//!
//! The configured backends are tried in their listed order when the process
//! starts. The first one that initializes wins, and the caller keeps the
//! returned provider for the rest of the process lifetime. Nothing is probed
//! again per request.

use crate::config::{BackendKind, EmbedConfig};
use crate::error::{EmbedError, Result};
use crate::hashing::HashingProvider;
use crate::http::HttpEmbedProvider;
use crate::provider::{EmbeddingProvider, FastEmbedProvider};
use serde::Serialize;
use std::sync::Arc;

/// Outcome of trying one backend during resolution
#[derive(Debug, Clone, Serialize)]
pub struct BackendAttempt {
    pub backend: BackendKind,
    /// `None` when the backend came up
    pub error: Option<String>,
}

/// Which backend was selected and why the earlier ones were skipped
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedBackend {
    pub chosen: BackendKind,
    pub model_id: String,
    pub dimension: usize,
    pub attempts: Vec<BackendAttempt>,
}

/// Resolve the embedding provider from the configured fallback order.
///
/// # Errors
/// [`EmbedError::InvalidConfig`] if the configuration is unusable, and
/// [`EmbedError::NoBackendAvailable`] if every listed backend failed.
pub async fn resolve_provider(
    config: &EmbedConfig,
) -> Result<(Arc<dyn EmbeddingProvider>, ResolvedBackend)> {
    config.validate()?;

    let mut attempts = Vec::with_capacity(config.backends.len());
    for &backend in &config.backends {
        match create_backend(backend, config).await {
            Ok(provider) => {
                tracing::info!(
                    "Embedding backend resolved: {} ({})",
                    backend,
                    provider.model_id()
                );
                attempts.push(BackendAttempt {
                    backend,
                    error: None,
                });
                let resolved = ResolvedBackend {
                    chosen: backend,
                    model_id: provider.model_id(),
                    dimension: provider.embedding_dimension(),
                    attempts,
                };
                return Ok((provider, resolved));
            }
            Err(e) => {
                tracing::warn!("Embedding backend {} unavailable: {}", backend, e);
                attempts.push(BackendAttempt {
                    backend,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    let tried = attempts
        .iter()
        .map(|a| format!("{}: {}", a.backend, a.error.as_deref().unwrap_or("ok")))
        .collect::<Vec<_>>()
        .join("; ");
    Err(EmbedError::NoBackendAvailable { tried })
}

async fn create_backend(
    backend: BackendKind,
    config: &EmbedConfig,
) -> Result<Arc<dyn EmbeddingProvider>> {
    match backend {
        BackendKind::FastEmbed => {
            let provider = FastEmbedProvider::create(config.clone()).await?;
            Ok(Arc::new(provider))
        }
        BackendKind::Http => {
            let http = config.http.clone().ok_or_else(|| {
                EmbedError::invalid_config("backend `http` requires [http] settings")
            })?;
            let provider = HttpEmbedProvider::create(http, config.batch_size, config.normalize).await?;
            Ok(Arc::new(provider))
        }
        BackendKind::Hashing => Ok(Arc::new(HashingProvider::new(
            config.hashing_dimension,
            config.normalize,
        ))),
    }
}
