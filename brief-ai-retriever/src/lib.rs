//! brief-ai-retriever: persistent chunk retrieval for document Q&A
//!
//! This crate ingests plain-text documents, splits them into fixed-size
//! chunks, embeds each chunk and answers queries with the nearest chunks by
//! squared Euclidean distance. Vectors and chunk records are persisted
//! together in one SQLite file so they stay aligned across restarts.
//!
//! ## Key Modules
//!
//! - **[`retrieval`]**: Chunking, vector index, metadata store and the engine
//! - **[`storage`]**: Durable slot storage with a SQLite implementation
//! - **[`config`]**: Engine configuration loaded from TOML
//! - **[`error`]**: Error types
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use brief_ai_retriever::{EngineConfig, RetrievalEngine};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let engine = RetrievalEngine::open(EngineConfig::new("./data")).await?;
//! engine.ingest("contract.txt", "The term of this agreement is two years.").await?;
//!
//! for hit in engine.query("how long does the agreement last?", 3).await? {
//!     println!("{} {} @{}: {}", hit.rank, hit.chunk.source, hit.chunk.offset, hit.chunk.text);
//! }
//! engine.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ingest: text → ChunkingStrategy → EmbeddingProvider → SlotStore → FlatIndex + MetadataStore
//! query:  text → EmbeddingProvider → FlatIndex → MetadataStore → ranked results
//! ```

pub mod config;
pub mod error;
pub mod retrieval;
pub mod storage;

pub use config::EngineConfig;
pub use error::{Result, RetrievalError};
pub use retrieval::chunking_strategy::Chunk;
pub use retrieval::engine::{EngineStats, RetrievalEngine, RetrievalResult};
pub use storage::{DocumentRecord, LoadOutcome};
