//! Integration tests for ingest and query through the retrieval engine
//!
//! These tests verify that:
//! - Chunks come back ranked by distance with correct provenance
//! - The index survives close and reopen unchanged
//! - Failed ingests leave vectors and chunk records untouched
//! - Stores built with another model are refused
//! - Concurrent queries never observe a half-applied ingest

mod common;

use anyhow::Result;
use brief_ai_embed::{BackendKind, EmbedConfig, HashingProvider, HttpBackendConfig};
use brief_ai_retriever::storage::sqlite_store::SqliteSlotStore;
use brief_ai_retriever::storage::SlotStore;
use brief_ai_retriever::{LoadOutcome, RetrievalEngine, RetrievalError};
use common::*;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::tempdir;

/// The worked example: three 5-char windows, query of length 5
#[tokio::test]
async fn test_nearest_chunks_for_worked_example() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_length_engine(dir.path(), 5).await?;

    assert_eq!(engine.ingest("alpha", "AAAA BBBB CCCC").await?, 3);

    let results = engine.query("ZZZZZ", 2).await?;
    assert_eq!(results.len(), 2);

    assert_eq!(results[0].rank, 1);
    assert_eq!(results[0].chunk.source, "alpha");
    assert_eq!(results[0].chunk.offset, 0);
    assert_eq!(results[0].chunk.text, "AAAA ");
    assert_eq!(results[0].distance, 0.0);

    assert_eq!(results[1].rank, 2);
    assert_eq!(results[1].chunk.offset, 5);
    assert_eq!(results[1].chunk.text, "BBBB ");
    assert_eq!(results[1].distance, 0.0);

    // The 4-char chunk only appears once the two exact matches are exhausted
    let all = engine.query("ZZZZZ", 3).await?;
    assert_eq!(all[2].chunk.text, "CCCC");
    assert_eq!(all[2].chunk.offset, 10);
    assert_eq!(all[2].distance, 1.0);
    Ok(())
}

#[tokio::test]
async fn test_empty_corpus_returns_no_results() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_length_engine(dir.path(), 5).await?;

    assert!(engine.query("anything at all", 10).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_results_sorted_and_bounded_by_k() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_length_engine(dir.path(), 7).await?;

    engine
        .ingest("one", "The parties agree that this contract renews automatically.")
        .await?;
    engine.ingest("two", "Short.").await?;
    engine
        .ingest("three", "Liability is limited to fees paid in the prior twelve months.")
        .await?;
    let total = engine.stats().await?.vector_count;

    for k in [1, 3, total, total + 10] {
        let results = engine.query("abc", k).await?;
        assert_eq!(results.len(), k.min(total));
        assert!(results.windows(2).all(|w| w[0].distance <= w[1].distance));
        let ranks: Vec<usize> = results.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, (1..=results.len()).collect::<Vec<_>>());
    }
    Ok(())
}

#[tokio::test]
async fn test_ingest_reports_chunk_count_and_records_document() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_length_engine(dir.path(), 4).await?;
    let text = "0123456789";

    assert_eq!(engine.ingest("digits", text).await?, 3);
    assert_eq!(engine.ingest("empty", "").await?, 0);
    assert_eq!(engine.ingest("more", "abcd").await?, 1);

    let documents = engine.documents().await?;
    assert_eq!(documents.len(), 2);
    assert_eq!(documents[0].source, "digits");
    assert_eq!(documents[0].first_slot, 0);
    assert_eq!(documents[0].chunk_count, 3);
    assert_eq!(
        documents[0].content_hash,
        blake3::hash(text.as_bytes()).to_hex().to_string()
    );
    assert_eq!(documents[1].first_slot, 3);

    let stats = engine.stats().await?;
    assert_eq!(stats.vector_count, 4);
    assert_eq!(stats.metadata_count, 4);
    assert_eq!(stats.document_count, 2);
    Ok(())
}

#[tokio::test]
async fn test_index_survives_reopen() -> Result<()> {
    let dir = tempdir()?;

    let engine = open_length_engine(dir.path(), 5).await?;
    engine.ingest("alpha", "AAAA BBBB CCCC").await?;
    engine.ingest("beta", "a bb ccc dddd eeeee ffffff").await?;
    let before = engine.query("xyz", 6).await?;
    let documents_before = engine.documents().await?;
    engine.close().await;

    let engine = open_length_engine(dir.path(), 5).await?;
    assert!(matches!(
        engine.load_outcome(),
        LoadOutcome::Restored { slots: 9 }
    ));
    assert_eq!(engine.query("xyz", 6).await?, before);
    assert_eq!(engine.documents().await?, documents_before);

    // New slots continue after the restored ones
    engine.ingest("gamma", "ZZ").await?;
    let stats = engine.stats().await?;
    assert_eq!(stats.vector_count, 10);
    assert_eq!(stats.metadata_count, 10);
    Ok(())
}

#[tokio::test]
async fn test_failed_commit_leaves_state_unchanged() -> Result<()> {
    let engine = engine_over_failing_store(5)?;

    let err = engine.ingest("alpha", "AAAA BBBB CCCC").await.unwrap_err();
    assert!(matches!(err, RetrievalError::IngestFailed { .. }));
    assert!(err.to_string().contains("disk I/O error"));

    let stats = engine.stats().await?;
    assert_eq!(stats.vector_count, 0);
    assert_eq!(stats.metadata_count, 0);
    assert!(engine.query("ZZZZZ", 3).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_commit_on_closed_store_fails_cleanly() -> Result<()> {
    let dir = tempdir()?;
    let opened = SqliteSlotStore::open(
        &dir.path().join("brief-ai.db"),
        3,
        "length:chars:3:raw",
    )
    .await?;
    let store = Arc::new(opened.store);

    let engine = RetrievalEngine::with_store(
        config(dir.path(), 5),
        Arc::new(LengthEmbedder),
        store.clone(),
        opened.snapshot,
        opened.outcome,
    )?;
    engine.ingest("alpha", "AAAA BBBB").await?;

    store.close().await;
    assert!(matches!(
        engine.ingest("beta", "CCCC DDDD").await,
        Err(RetrievalError::IngestFailed { .. })
    ));

    let results = engine.query("ZZZZZ", 10).await?;
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.chunk.source == "alpha"));
    Ok(())
}

#[tokio::test]
async fn test_ingest_dropped_after_commit_keeps_engine_usable() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_slow_commit_engine(dir.path(), 5, Duration::from_millis(300)).await?;

    // The caller gives up while the committed batch is still being applied
    let abandoned =
        tokio::time::timeout(Duration::from_millis(100), engine.ingest("alpha", "AAAA BBBB")).await;
    assert!(abandoned.is_err());

    assert_eq!(engine.ingest("beta", "CCCC").await?, 1);

    let stats = engine.stats().await?;
    assert_eq!(stats.vector_count, 3);
    assert_eq!(stats.metadata_count, 3);
    assert_eq!(stats.document_count, 2);

    let documents = engine.documents().await?;
    assert_eq!(documents[0].source, "alpha");
    assert_eq!(documents[1].source, "beta");
    assert_eq!(documents[1].first_slot, 2);

    let results = engine.query("ZZZZZ", 3).await?;
    assert_eq!(
        results
            .iter()
            .filter(|r| r.chunk.source == "alpha")
            .count(),
        2
    );
    Ok(())
}

#[tokio::test]
async fn test_stats_agree_during_ingest() -> Result<()> {
    let dir = tempdir()?;
    let engine =
        Arc::new(open_slow_commit_engine(dir.path(), 5, Duration::from_millis(300)).await?);

    let writer = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.ingest("alpha", "AAAA BBBB").await })
    };
    // Let the batch reach the database before asking
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stats = engine.stats().await?;
    assert_eq!(stats.document_count, 1);
    assert_eq!(stats.vector_count, 2);
    assert_eq!(stats.metadata_count, 2);

    assert_eq!(writer.await??, 2);
    Ok(())
}

#[tokio::test]
async fn test_embedding_failure_is_reported() -> Result<()> {
    let dir = tempdir()?;
    let engine =
        RetrievalEngine::open_with_provider(config(dir.path(), 5), Arc::new(FailingEmbedder))
            .await?;

    assert!(matches!(
        engine.ingest("alpha", "AAAA BBBB").await,
        Err(RetrievalError::EmbeddingUnavailable { .. })
    ));
    assert!(matches!(
        engine.query("AAAA", 1).await,
        Err(RetrievalError::EmbeddingUnavailable { .. })
    ));
    assert_eq!(engine.stats().await?.vector_count, 0);
    Ok(())
}

#[tokio::test]
async fn test_embedding_timeout_fails_the_call() -> Result<()> {
    let dir = tempdir()?;
    let config = config(dir.path(), 5).with_embed_timeout(Duration::from_secs(1));
    let engine = RetrievalEngine::open_with_provider(
        config,
        Arc::new(SlowEmbedder(Duration::from_secs(5))),
    )
    .await?;

    let started = Instant::now();
    let err = engine.query("AAAA", 1).await.unwrap_err();
    assert!(matches!(err, RetrievalError::EmbeddingUnavailable { .. }));
    assert!(err.to_string().contains("timed out"));
    assert!(started.elapsed() < Duration::from_secs(4));
    Ok(())
}

#[tokio::test]
async fn test_store_from_other_model_refused() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_length_engine(dir.path(), 5).await?;
    engine.ingest("alpha", "AAAA BBBB CCCC").await?;
    engine.close().await;

    let result = RetrievalEngine::open_with_provider(
        config(dir.path(), 5),
        Arc::new(HashingProvider::new(3, false)),
    )
    .await;
    assert!(matches!(
        result,
        Err(RetrievalError::IncompatibleIndex { .. })
    ));

    // The original store is intact
    let engine = open_length_engine(dir.path(), 5).await?;
    assert_eq!(engine.stats().await?.vector_count, 3);
    Ok(())
}

#[tokio::test]
async fn test_unreadable_store_recovered_empty() -> Result<()> {
    let dir = tempdir()?;
    tokio::fs::write(dir.path().join("brief-ai.db"), vec![0x5A_u8; 8192]).await?;

    let engine = open_length_engine(dir.path(), 5).await?;
    match engine.load_outcome() {
        LoadOutcome::Recovered { error, quarantined } => {
            assert!(matches!(error, RetrievalError::CorruptPersistedIndex { .. }));
            assert!(quarantined.exists());
        }
        other => panic!("expected recovery, got {other:?}"),
    }

    assert!(engine.query("ZZZZZ", 3).await?.is_empty());
    assert_eq!(engine.ingest("alpha", "AAAA BBBB CCCC").await?, 3);
    Ok(())
}

#[tokio::test]
async fn test_open_resolves_backend_in_configured_order() -> Result<()> {
    let dir = tempdir()?;
    let mut http = HttpBackendConfig::new("http://127.0.0.1:9/v1/embeddings", "remote", 256);
    http.timeout_secs = 2;
    let embed = EmbedConfig::hashing(256)
        .with_backends(vec![BackendKind::Http, BackendKind::Hashing])
        .with_http(http);

    let engine = RetrievalEngine::open(config(dir.path(), 40).with_embed_config(embed)).await?;

    let backend = engine.backend().expect("open resolves a backend");
    assert_eq!(backend.chosen, BackendKind::Hashing);
    assert!(backend.attempts[0].error.is_some());

    engine
        .ingest("contract", "This agreement renews automatically each year unless cancelled.")
        .await?;
    engine
        .ingest("invoice", "Payment is due within thirty days of the invoice date.")
        .await?;

    let results = engine.query("agreement renews automatically", 1).await?;
    assert_eq!(results[0].chunk.source, "contract");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_queries_during_ingest_stay_aligned() -> Result<()> {
    let dir = tempdir()?;
    let engine = Arc::new(open_length_engine(dir.path(), 6).await?);

    let writer = {
        let engine = engine.clone();
        tokio::spawn(async move {
            let mut total = 0;
            for i in 0..20 {
                let text = "x".repeat(3 + i * 2);
                total += engine.ingest(&format!("doc-{i}"), &text).await?;
            }
            Ok::<usize, RetrievalError>(total)
        })
    };

    let readers = (0..8).map(|_| {
        let engine = engine.clone();
        tokio::spawn(async move {
            for _ in 0..25 {
                let results = engine.query("yyyyy", 4).await?;
                assert!(results.len() <= 4);
                for result in &results {
                    // Each vector must still describe the chunk it is paired with
                    let length = result.chunk.text.chars().count() as f32;
                    assert_eq!(result.distance, (length - 5.0) * (length - 5.0));
                }
                assert!(results.windows(2).all(|w| w[0].distance <= w[1].distance));
                tokio::task::yield_now().await;
            }
            Ok::<(), RetrievalError>(())
        })
    });

    for reader in futures::future::join_all(readers).await {
        reader??;
    }
    let total = writer.await??;

    let stats = engine.stats().await?;
    assert_eq!(stats.vector_count, total);
    assert_eq!(stats.metadata_count, total);
    Ok(())
}
