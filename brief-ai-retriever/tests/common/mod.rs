//! Test doubles shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use brief_ai_embed::{EmbedError, EmbeddingProvider, EmbeddingResult};
use brief_ai_retriever::storage::sqlite_store::SqliteSlotStore;
use brief_ai_retriever::storage::{
    DocumentRecord, IndexManifest, LoadOutcome, METRIC_SQUARED_L2, SlotBatch, SlotStore, Snapshot,
};
use brief_ai_retriever::{EngineConfig, RetrievalEngine, RetrievalError};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Embeds a text as `[char count, 0, 0]`
pub struct LengthEmbedder;

#[async_trait]
impl EmbeddingProvider for LengthEmbedder {
    async fn embed_texts(&self, texts: &[String]) -> brief_ai_embed::Result<EmbeddingResult> {
        Ok(EmbeddingResult::new(
            texts
                .iter()
                .map(|t| vec![t.chars().count() as f32, 0.0, 0.0])
                .collect(),
        ))
    }

    fn embedding_dimension(&self) -> usize {
        3
    }

    fn provider_name(&self) -> &str {
        "length"
    }

    fn model_id(&self) -> String {
        "length:chars:3:raw".to_string()
    }
}

/// Always fails, like an unreachable endpoint
pub struct FailingEmbedder;

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    async fn embed_texts(&self, _texts: &[String]) -> brief_ai_embed::Result<EmbeddingResult> {
        Err(EmbedError::http("connection refused"))
    }

    fn embedding_dimension(&self) -> usize {
        3
    }

    fn provider_name(&self) -> &str {
        "failing"
    }

    fn model_id(&self) -> String {
        "length:chars:3:raw".to_string()
    }
}

/// Answers like [`LengthEmbedder`] after a fixed delay
pub struct SlowEmbedder(pub Duration);

#[async_trait]
impl EmbeddingProvider for SlowEmbedder {
    async fn embed_texts(&self, texts: &[String]) -> brief_ai_embed::Result<EmbeddingResult> {
        tokio::time::sleep(self.0).await;
        LengthEmbedder.embed_texts(texts).await
    }

    fn embedding_dimension(&self) -> usize {
        3
    }

    fn provider_name(&self) -> &str {
        "slow"
    }

    fn model_id(&self) -> String {
        "length:chars:3:raw".to_string()
    }
}

/// Slot store whose commits always fail
pub struct FailingStore;

#[async_trait]
impl SlotStore for FailingStore {
    async fn commit(&self, _batch: SlotBatch<'_>) -> brief_ai_retriever::Result<DocumentRecord> {
        Err(RetrievalError::storage("disk I/O error"))
    }

    async fn documents(&self) -> brief_ai_retriever::Result<Vec<DocumentRecord>> {
        Ok(Vec::new())
    }

    async fn close(&self) {}
}

/// SQLite store that lingers for `delay` after each successful commit
pub struct SlowCommitStore {
    pub inner: SqliteSlotStore,
    pub delay: Duration,
}

#[async_trait]
impl SlotStore for SlowCommitStore {
    async fn commit(&self, batch: SlotBatch<'_>) -> brief_ai_retriever::Result<DocumentRecord> {
        let record = self.inner.commit(batch).await?;
        tokio::time::sleep(self.delay).await;
        Ok(record)
    }

    async fn documents(&self) -> brief_ai_retriever::Result<Vec<DocumentRecord>> {
        self.inner.documents().await
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}

pub fn empty_snapshot(dimension: usize, model_id: &str) -> Snapshot {
    let now = chrono::Utc::now();
    Snapshot {
        manifest: IndexManifest {
            dimension,
            metric: METRIC_SQUARED_L2.to_string(),
            model_id: model_id.to_string(),
            created_at: now,
            updated_at: now,
        },
        chunks: Vec::new(),
        embeddings: Vec::new(),
    }
}

pub fn config(dir: &Path, chunk_size: usize) -> EngineConfig {
    EngineConfig::new(dir).with_chunk_size(chunk_size)
}

pub async fn open_length_engine(dir: &Path, chunk_size: usize) -> anyhow::Result<RetrievalEngine> {
    let engine =
        RetrievalEngine::open_with_provider(config(dir, chunk_size), Arc::new(LengthEmbedder))
            .await?;
    Ok(engine)
}

pub async fn open_slow_commit_engine(
    dir: &Path,
    chunk_size: usize,
    delay: Duration,
) -> anyhow::Result<RetrievalEngine> {
    let opened =
        SqliteSlotStore::open(&dir.join("brief-ai.db"), 3, "length:chars:3:raw").await?;
    let engine = RetrievalEngine::with_store(
        config(dir, chunk_size),
        Arc::new(LengthEmbedder),
        Arc::new(SlowCommitStore {
            inner: opened.store,
            delay,
        }),
        opened.snapshot,
        opened.outcome,
    )?;
    Ok(engine)
}

pub fn engine_over_failing_store(chunk_size: usize) -> anyhow::Result<RetrievalEngine> {
    let engine = RetrievalEngine::with_store(
        config(Path::new("unused"), chunk_size),
        Arc::new(LengthEmbedder),
        Arc::new(FailingStore),
        empty_snapshot(3, "length:chars:3:raw"),
        LoadOutcome::Fresh,
    )?;
    Ok(engine)
}
