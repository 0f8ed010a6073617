//! # brief-ai-embed
//!
//! Text embedding providers for the brief-ai retrieval engine.
//!
//! ## Features
//!
//! - **Local ONNX Models**: fastembed models such as all-MiniLM-L6-v2, no external API calls
//! - **Remote Endpoints**: any OpenAI-compatible `/embeddings` API, with request timeouts
//! - **Offline Fallback**: a deterministic feature-hashing embedder
//! - **One-shot Resolution**: backends are tried once, in configured order, at startup
//!
//! ## Quick Start
//!
//! ```no_run
//! use brief_ai_embed::{EmbedConfig, resolve_provider};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let (provider, resolved) = resolve_provider(&EmbedConfig::default()).await?;
//! println!("using {} ({} dims)", resolved.model_id, resolved.dimension);
//!
//! let vector = provider.embed_text("limitation of liability").await?;
//! assert_eq!(vector.len(), provider.embedding_dimension());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`config`]: backend list and per-backend settings
//! - [`provider`]: the [`EmbeddingProvider`] trait and the fastembed backend
//! - [`hashing`]: feature-hashing backend
//! - [`http`]: HTTP backend
//! - [`resolve`]: fallback-order resolution
//! - [`error`]: error types and result handling

pub mod config;
pub mod error;
pub mod hashing;
pub mod http;
pub mod provider;
pub mod resolve;

pub use config::{BackendKind, EmbedConfig, HttpBackendConfig};
pub use error::{EmbedError, Result};
pub use hashing::HashingProvider;
pub use http::HttpEmbedProvider;
pub use provider::{EmbeddingProvider, EmbeddingResult, FastEmbedProvider};
pub use resolve::{BackendAttempt, ResolvedBackend, resolve_provider};
