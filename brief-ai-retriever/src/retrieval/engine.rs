//! Retrieval engine: ingest documents and answer nearest-chunk queries.
//!
//! The engine owns the vector index, the metadata store and the durable slot
//! store. A single [`RwLock`] guards the two in-memory structures so they are
//! always observed at the same length:
//!
//! - **ingest** embeds outside the lock, then under the write lock commits the
//!   batch durably and appends to both structures. The commit and the append
//!   run in a spawned task holding an owned guard, so dropping the `ingest`
//!   future cannot leave memory behind the database
//! - **query** embeds outside the lock, then under the read lock searches and
//!   dereferences slots
//!
//! ## Pipeline Flow
//!
//! ```text
//! raw text → ChunkingStrategy → EmbeddingProvider → SlotStore::commit
//!                                                        ↓
//!                                   FlatIndex + MetadataStore (append)
//!
//! query text → EmbeddingProvider → FlatIndex::search → MetadataStore::get
//! ```

use super::chunking_strategy::{Chunk, ChunkingStrategy};
use super::metadata_store::MetadataStore;
use super::vector_index::{FlatIndex, VectorIndex};
use crate::config::EngineConfig;
use crate::error::{Result, RetrievalError};
use crate::storage::sqlite_store::{OpenedStore, SqliteSlotStore};
use crate::storage::{
    ContentHash, DocumentRecord, LoadOutcome, SlotBatch, SlotStore, Snapshot,
};
use brief_ai_embed::{EmbeddingProvider, ResolvedBackend, resolve_provider};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, error, info};

/// One ranked query hit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub chunk: Chunk,
    /// 1 for the closest chunk
    pub rank: usize,
    /// Squared Euclidean distance to the query embedding
    pub distance: f32,
}

/// Point-in-time view of the engine's contents
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub vector_count: usize,
    pub metadata_count: usize,
    pub document_count: usize,
    pub dimension: usize,
    pub model_id: String,
    pub chunk_size: usize,
    pub database_path: PathBuf,
}

#[derive(Debug)]
struct IndexState {
    index: Box<dyn VectorIndex>,
    metadata: MetadataStore,
}

pub struct RetrievalEngine {
    config: EngineConfig,
    chunking_strategy: ChunkingStrategy,
    provider: Arc<dyn EmbeddingProvider>,
    backend: Option<ResolvedBackend>,
    store: Arc<dyn SlotStore>,
    state: Arc<RwLock<IndexState>>,
    load_outcome: LoadOutcome,
}

impl std::fmt::Debug for RetrievalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalEngine")
            .field("config", &self.config)
            .field("model_id", &self.provider.model_id())
            .field("load_outcome", &self.load_outcome)
            .finish_non_exhaustive()
    }
}

impl RetrievalEngine {
    /// Resolve the embedding provider from `config.embed` and open the store in `config.data_dir`.
    ///
    /// Backends are tried once, in configured order. The chosen provider is
    /// kept for the lifetime of the engine.
    ///
    /// # Errors
    /// - [`RetrievalError::InvalidConfig`] for unusable settings
    /// - [`RetrievalError::EmbeddingUnavailable`] if no backend initializes
    /// - [`RetrievalError::IncompatibleIndex`] if the store was built by another model
    /// - [`RetrievalError::Storage`] for I/O failures
    pub async fn open(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let (provider, backend) = resolve_provider(&config.embed).await?;
        let mut engine = Self::open_with_provider(config, provider).await?;
        engine.backend = Some(backend);
        Ok(engine)
    }

    /// Open the store in `config.data_dir` using an already constructed provider
    pub async fn open_with_provider(
        config: EngineConfig,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let OpenedStore {
            store,
            snapshot,
            outcome,
        } = SqliteSlotStore::open(
            &config.database_path(),
            provider.embedding_dimension(),
            &provider.model_id(),
        )
        .await?;

        Self::with_store(config, provider, Arc::new(store), snapshot, outcome)
    }

    /// Assemble an engine over an arbitrary slot store and the snapshot read from it
    pub fn with_store(
        config: EngineConfig,
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn SlotStore>,
        snapshot: Snapshot,
        load_outcome: LoadOutcome,
    ) -> Result<Self> {
        let chunking_strategy = ChunkingStrategy::new(config.chunk_size)?;

        if snapshot.chunks.len() != snapshot.embeddings.len() {
            return Err(RetrievalError::corrupt(format!(
                "snapshot holds {} chunk records but {} vectors",
                snapshot.chunks.len(),
                snapshot.embeddings.len()
            )));
        }
        let index = FlatIndex::from_vectors(provider.embedding_dimension(), snapshot.embeddings)?;
        let metadata = MetadataStore::from_chunks(snapshot.chunks);

        info!(
            "Retrieval engine ready: {} slots, model {}",
            index.len(),
            provider.model_id()
        );

        Ok(Self {
            config,
            chunking_strategy,
            provider,
            backend: None,
            store,
            state: Arc::new(RwLock::new(IndexState {
                index: Box::new(index),
                metadata,
            })),
            load_outcome,
        })
    }

    /// Chunk, embed and durably store a document, returning the number of chunks added.
    ///
    /// Empty text adds nothing and returns 0. On any error the index and the
    /// metadata store are left exactly as they were.
    pub async fn ingest(&self, document_id: &str, raw_text: &str) -> Result<usize> {
        let chunks = self.chunking_strategy.chunk_content(document_id, raw_text);
        if chunks.is_empty() {
            debug!("Nothing to ingest for {}", document_id);
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embed(&texts).await?;
        let content_hash = *blake3::hash(raw_text.as_bytes()).as_bytes();

        let state = self.state.clone().write_owned().await;
        let store = self.store.clone();
        let document = document_id.to_string();
        tokio::spawn(commit_and_append(
            state,
            store,
            document,
            content_hash,
            chunks,
            embeddings,
        ))
        .await
        .map_err(|e| RetrievalError::IngestFailed {
            document: document_id.to_string(),
            message: format!("ingest task failed: {e}"),
        })?
    }

    /// Return the `k` chunks nearest to `query_text`, ranked from 1.
    pub async fn query(&self, query_text: &str, k: usize) -> Result<Vec<RetrievalResult>> {
        if k == 0 {
            return Err(RetrievalError::InvalidQuery {
                message: "k must be at least 1".to_string(),
            });
        }

        let embedding = self
            .embed(&[query_text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| RetrievalError::embedding_unavailable("provider returned no vector"))?;

        let state = self.state.read().await;
        let hits = state.index.search(&embedding, k)?;

        let mut results = Vec::with_capacity(hits.len());
        for (position, (slot, distance)) in hits.into_iter().enumerate() {
            let chunk = state.metadata.get(slot).map_err(|e| {
                error!("Index integrity failure: {}", e);
                e
            })?;
            results.push(RetrievalResult {
                chunk: chunk.clone(),
                rank: position + 1,
                distance,
            });
        }

        debug!("Query returned {} of {} requested results", results.len(), k);
        Ok(results)
    }

    /// Embed `texts` under the configured timeout and check the output shape
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let timeout = self.config.embed_timeout();
        let result = tokio::time::timeout(timeout, self.provider.embed_texts(texts))
            .await
            .map_err(|_| {
                RetrievalError::embedding_unavailable(format!(
                    "embedding {} texts timed out after {:?}",
                    texts.len(),
                    timeout
                ))
            })??;

        if result.embeddings.len() != texts.len() {
            return Err(RetrievalError::embedding_unavailable(format!(
                "provider returned {} vectors for {} texts",
                result.embeddings.len(),
                texts.len()
            )));
        }

        let dimension = self.provider.embedding_dimension();
        for vector in &result.embeddings {
            if vector.len() != dimension {
                return Err(RetrievalError::DimensionMismatch {
                    expected: dimension,
                    actual: vector.len(),
                });
            }
            if vector.iter().any(|v| !v.is_finite()) {
                return Err(RetrievalError::embedding_unavailable(
                    "provider returned a non-finite value",
                ));
            }
        }
        Ok(result.embeddings)
    }

    /// Counts taken under one read lock, so they agree with each other
    pub async fn stats(&self) -> Result<EngineStats> {
        let state = self.state.read().await;
        let document_count = self.store.documents().await?.len();
        Ok(EngineStats {
            vector_count: state.index.len(),
            metadata_count: state.metadata.count(),
            document_count,
            dimension: state.index.dimension(),
            model_id: self.provider.model_id(),
            chunk_size: self.chunking_strategy.chunk_size(),
            database_path: self.config.database_path(),
        })
    }

    /// Document records in ingest order
    pub async fn documents(&self) -> Result<Vec<DocumentRecord>> {
        self.store.documents().await
    }

    /// How the persisted index was obtained when the engine opened
    pub fn load_outcome(&self) -> &LoadOutcome {
        &self.load_outcome
    }

    /// The backend resolution report, when the engine resolved its own provider
    pub fn backend(&self) -> Option<&ResolvedBackend> {
        self.backend.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shut down, closing the durable store
    pub async fn close(self) {
        self.store.close().await;
        info!("Retrieval engine closed");
    }
}

/// Commit `chunks` durably, then append them to the in-memory index.
///
/// Runs to completion once started, whether or not the caller still waits.
async fn commit_and_append(
    mut state: OwnedRwLockWriteGuard<IndexState>,
    store: Arc<dyn SlotStore>,
    document_id: String,
    content_hash: ContentHash,
    chunks: Vec<Chunk>,
    embeddings: Vec<Vec<f32>>,
) -> Result<usize> {
    let first_slot = state.index.len();
    let batch = SlotBatch {
        source: &document_id,
        content_hash,
        first_slot,
        chunks: &chunks,
        embeddings: &embeddings,
    };
    let record = store.commit(batch).await.map_err(|e| {
        error!("Durable commit for {} failed: {}", document_id, e);
        RetrievalError::IngestFailed {
            document: document_id.clone(),
            message: e.to_string(),
        }
    })?;

    let count = chunks.len();
    state.index.add(embeddings)?;
    state.metadata.append(chunks);

    info!(
        "Ingested {} as {} chunks at slots {}..{} (document {})",
        document_id,
        count,
        first_slot,
        first_slot + count,
        record.id
    );
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use brief_ai_embed::EmbeddingResult;
    use tempfile::tempdir;
    use tracing_test::traced_test;

    /// Embeds a text as `[char count, 0, 0]`
    struct LengthEmbedder;

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

    /// Returns vectors of the wrong length
    struct SkewedEmbedder;

    #[async_trait]
    impl EmbeddingProvider for SkewedEmbedder {
        async fn embed_texts(&self, texts: &[String]) -> brief_ai_embed::Result<EmbeddingResult> {
            Ok(EmbeddingResult::new(vec![vec![1.0; 4]; texts.len()]))
        }

        fn embedding_dimension(&self) -> usize {
            3
        }

        fn provider_name(&self) -> &str {
            "skewed"
        }

        fn model_id(&self) -> String {
            "skewed:3".to_string()
        }
    }

    async fn open_engine(dir: &std::path::Path, provider: Arc<dyn EmbeddingProvider>) -> RetrievalEngine {
        let config = EngineConfig::new(dir).with_chunk_size(5);
        RetrievalEngine::open_with_provider(config, provider)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_ingest_and_query() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let engine = open_engine(dir.path(), Arc::new(LengthEmbedder)).await;
        assert!(matches!(engine.load_outcome(), LoadOutcome::Fresh));

        assert_eq!(engine.ingest("alpha", "AAAA BBBB CCCC").await?, 3);

        let results = engine.query("ZZZZZ", 2).await?;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.text, "AAAA ");
        assert_eq!(results[0].rank, 1);
        assert_eq!(results[1].chunk.text, "BBBB ");
        assert_eq!(results[1].rank, 2);
        assert!(results.iter().all(|r| r.distance == 0.0));

        let stats = engine.stats().await?;
        assert_eq!(stats.vector_count, 3);
        assert_eq!(stats.metadata_count, 3);
        assert_eq!(stats.document_count, 1);
        assert_eq!(stats.model_id, "length:chars:3:raw");
        Ok(())
    }

    #[tokio::test]
    async fn test_zero_k_rejected() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let engine = open_engine(dir.path(), Arc::new(LengthEmbedder)).await;
        assert!(matches!(
            engine.query("anything", 0).await,
            Err(RetrievalError::InvalidQuery { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_text_ingests_nothing() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let engine = open_engine(dir.path(), Arc::new(LengthEmbedder)).await;
        assert_eq!(engine.ingest("empty", "").await?, 0);
        assert!(engine.documents().await?.is_empty());
        assert_eq!(engine.stats().await?.vector_count, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_wrong_dimension_leaves_state_untouched() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let engine = open_engine(dir.path(), Arc::new(SkewedEmbedder)).await;

        assert!(matches!(
            engine.ingest("doc", "some text").await,
            Err(RetrievalError::DimensionMismatch {
                expected: 3,
                actual: 4
            })
        ));
        let stats = engine.stats().await?;
        assert_eq!(stats.vector_count, 0);
        assert_eq!(stats.metadata_count, 0);
        assert_eq!(stats.document_count, 0);
        Ok(())
    }

    #[traced_test]
    #[tokio::test]
    async fn test_missing_metadata_is_reported_not_masked() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let engine = open_engine(dir.path(), Arc::new(LengthEmbedder)).await;
        engine.ingest("alpha", "AAAA ").await?;

        // Break alignment behind the engine's back
        engine
            .state
            .write()
            .await
            .index
            .add(vec![vec![5.0, 0.0, 0.0]])?;

        let result = engine.query("ZZZZZ", 2).await;
        assert!(matches!(
            result,
            Err(RetrievalError::OutOfRange { slot: 1, count: 1 })
        ));
        assert!(logs_contain("Index integrity failure"));
        Ok(())
    }
}
