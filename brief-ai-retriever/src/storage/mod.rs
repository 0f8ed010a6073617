//! Durable storage for index slots.
//!
//! A slot store persists, per slot, both the embedding and the chunk record
//! that describes it, plus one record per ingested document. The engine
//! rebuilds its in-memory vector index and metadata store from a
//! [`Snapshot`] on open and hands every ingest to [`SlotStore::commit`]
//! before touching memory.
//!
//! ## Key Components
//!
//! - **SlotStore**: async trait the engine writes through
//! - **SlotBatch**: one ingest's worth of slots and its document record
//! - **Snapshot**: everything needed to rebuild the in-memory state
//! - **LoadOutcome**: how the persisted state was obtained on open
//!
//! ## Architecture
//!
//! ```text
//! RetrievalEngine ── SlotStore ── SqliteSlotStore (brief-ai.db)
//!        │
//!        ├── FlatIndex      (rebuilt from Snapshot::embeddings)
//!        └── MetadataStore  (rebuilt from Snapshot::chunks)
//! ```

use crate::error::{Result, RetrievalError};
use crate::retrieval::chunking_strategy::Chunk;
use crate::retrieval::vector_index::SlotId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

pub mod sqlite_store;

/// Blake3 hash of a document's raw text (32 bytes).
pub type ContentHash = [u8; 32];

/// Distance metric recorded in the manifest.
pub const METRIC_SQUARED_L2: &str = "squared_l2";

/// Properties of the store that must match the embedding provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexManifest {
    pub dimension: usize,
    pub metric: String,
    pub model_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One successful ingest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentRecord {
    pub id: i64,
    pub source: String,
    /// Hex-encoded blake3 hash of the raw text
    pub content_hash: String,
    pub first_slot: SlotId,
    pub chunk_count: usize,
    pub ingested_at: DateTime<Utc>,
}

/// Slots for a single document, written in one transaction.
#[derive(Debug, Clone, Copy)]
pub struct SlotBatch<'a> {
    pub source: &'a str,
    pub content_hash: ContentHash,
    /// Slot id of `chunks[0]`; must equal the number of slots already stored
    pub first_slot: SlotId,
    pub chunks: &'a [Chunk],
    pub embeddings: &'a [Vec<f32>],
}

/// Persisted state read back on open, in slot order.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub manifest: IndexManifest,
    pub chunks: Vec<Chunk>,
    pub embeddings: Vec<Vec<f32>>,
}

/// How the persisted index was obtained when the engine started.
#[derive(Debug)]
pub enum LoadOutcome {
    /// No usable store existed; a new empty one was created
    Fresh,
    /// An existing store was read back
    Restored { slots: usize },
    /// The store was unreadable; it was moved aside and an empty one created
    Recovered {
        error: RetrievalError,
        quarantined: PathBuf,
    },
}

impl LoadOutcome {
    pub fn is_recovered(&self) -> bool {
        matches!(self, Self::Recovered { .. })
    }
}

/// Durable slot storage used by the retrieval engine.
#[async_trait]
pub trait SlotStore: Send + Sync {
    /// Persist a batch of slots and its document record atomically.
    ///
    /// When this returns an error nothing from the batch is stored.
    async fn commit(&self, batch: SlotBatch<'_>) -> Result<DocumentRecord>;

    /// All document records in ingest order
    async fn documents(&self) -> Result<Vec<DocumentRecord>>;

    /// Release the underlying resources
    async fn close(&self);
}
