//! SQLite implementation of [`SlotStore`].
//!
//! Vectors and their chunk records live in the same row, so a slot is either
//! fully persisted or absent. Each ingest is one transaction that also writes
//! the document record and bumps the manifest timestamp.
//!
//! ## Database Schema
//!
//! ```sql
//! CREATE TABLE index_manifest (
//!     id INTEGER PRIMARY KEY CHECK (id = 0),
//!     dimension INTEGER NOT NULL,
//!     metric TEXT NOT NULL,            -- always 'squared_l2'
//!     model_id TEXT NOT NULL,          -- provider:model:dimension:norm|raw
//!     created_at TEXT NOT NULL,
//!     updated_at TEXT NOT NULL
//! );
//!
//! CREATE TABLE slots (
//!     slot INTEGER PRIMARY KEY,        -- 0-based, contiguous
//!     source TEXT NOT NULL,
//!     byte_offset INTEGER NOT NULL,
//!     content TEXT NOT NULL,
//!     embedding BLOB NOT NULL          -- dimension x f32, little-endian
//! );
//!
//! CREATE TABLE documents (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     source TEXT NOT NULL,
//!     content_hash TEXT NOT NULL,      -- hex blake3 of the raw text
//!     first_slot INTEGER NOT NULL,
//!     chunk_count INTEGER NOT NULL,
//!     ingested_at TEXT NOT NULL
//! );
//! ```
//!
//! ## Durability
//!
//! - **WAL mode** with `synchronous = FULL`: a commit survives power loss
//! - **Busy timeout**: readers from another process wait instead of failing
//!
//! ## Recovery
//!
//! A file that is not a SQLite database, lacks a manifest while holding
//! slots, has gaps in its slot ids or holds embeddings of the wrong length is
//! moved to `<name>.corrupt-<unix-ts>` together with its WAL sidecars, and an
//! empty store is created in its place.

use super::{
    DocumentRecord, IndexManifest, LoadOutcome, METRIC_SQUARED_L2, SlotBatch, SlotStore, Snapshot,
};
use crate::error::{Result, RetrievalError};
use crate::retrieval::chunking_strategy::Chunk;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqliteRow, SqliteSynchronous,
};
use sqlx::Row;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SQLITE_CORRUPT: i32 = 11;
const SQLITE_NOTADB: i32 = 26;

/// A store opened by [`SqliteSlotStore::open`] together with its contents
#[derive(Debug)]
pub struct OpenedStore {
    pub store: SqliteSlotStore,
    pub snapshot: Snapshot,
    pub outcome: LoadOutcome,
}

#[derive(Debug, Clone)]
pub struct SqliteSlotStore {
    path: PathBuf,
    pool: SqlitePool,
}

impl SqliteSlotStore {
    /// Open or create the store at `path` for vectors of `dimension` produced by `model_id`.
    ///
    /// # Errors
    /// - [`RetrievalError::IncompatibleIndex`] if the store was built by another model
    /// - [`RetrievalError::Storage`] for I/O failures, including failure to quarantine
    ///
    /// Corrupt data is not an error here: it is quarantined and reported
    /// through [`LoadOutcome::Recovered`].
    pub async fn open(path: &Path, dimension: usize, model_id: &str) -> Result<OpenedStore> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        match Self::try_open(path, dimension, model_id).await {
            Ok((store, snapshot, created)) => {
                let outcome = if created {
                    tracing::info!("Created index store at {}", path.display());
                    LoadOutcome::Fresh
                } else {
                    tracing::info!(
                        "Opened index store at {} with {} slots",
                        path.display(),
                        snapshot.chunks.len()
                    );
                    LoadOutcome::Restored {
                        slots: snapshot.chunks.len(),
                    }
                };
                Ok(OpenedStore {
                    store,
                    snapshot,
                    outcome,
                })
            }
            Err(error @ RetrievalError::CorruptPersistedIndex { .. }) => {
                let quarantined = quarantine(path).await?;
                tracing::error!(
                    "Index store {} is unreadable ({}); quarantined to {} and starting empty",
                    path.display(),
                    error,
                    quarantined.display()
                );
                let (store, snapshot, _) = Self::try_open(path, dimension, model_id).await?;
                Ok(OpenedStore {
                    store,
                    snapshot,
                    outcome: LoadOutcome::Recovered { error, quarantined },
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn try_open(
        path: &Path,
        dimension: usize,
        model_id: &str,
    ) -> Result<(Self, Snapshot, bool)> {
        let pool = SqlitePool::connect_with(
            SqliteConnectOptions::new()
                .filename(path)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Full)
                .busy_timeout(Duration::from_secs(5))
                .create_if_missing(true)
                .page_size(1 << 16)
                .optimize_on_close(true, 1 << 10),
        )
        .await
        .map_err(classify)?;

        let store = Self {
            path: path.to_path_buf(),
            pool,
        };
        match store.load(dimension, model_id).await {
            Ok((snapshot, created)) => Ok((store, snapshot, created)),
            Err(e) => {
                store.pool.close().await;
                Err(e)
            }
        }
    }

    async fn create_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS index_manifest (
                id INTEGER PRIMARY KEY CHECK (id = 0),
                dimension INTEGER NOT NULL,
                metric TEXT NOT NULL,
                model_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS slots (
                slot INTEGER PRIMARY KEY,
                source TEXT NOT NULL,
                byte_offset INTEGER NOT NULL,
                content TEXT NOT NULL,
                embedding BLOB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                first_slot INTEGER NOT NULL,
                chunk_count INTEGER NOT NULL,
                ingested_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_source ON documents(source)")
            .execute(&self.pool)
            .await
            .map_err(classify)?;

        Ok(())
    }

    /// Read the manifest and every slot; the flag is true when the manifest was just written
    async fn load(&self, dimension: usize, model_id: &str) -> Result<(Snapshot, bool)> {
        self.create_tables().await?;

        let manifest_row = sqlx::query(
            "SELECT dimension, metric, model_id, created_at, updated_at FROM index_manifest WHERE id = 0",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?;
        let slot_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM slots")
            .fetch_one(&self.pool)
            .await
            .map_err(classify)?;

        let (manifest, created) = match manifest_row {
            Some(row) => (decode_manifest(&row)?, false),
            None if slot_count == 0 => (self.write_manifest(dimension, model_id).await?, true),
            None => {
                return Err(RetrievalError::corrupt(format!(
                    "{slot_count} slots stored without an index manifest"
                )));
            }
        };

        if manifest.dimension != dimension || manifest.model_id != model_id {
            return Err(RetrievalError::IncompatibleIndex {
                path: self.path.clone(),
                stored: format!("{} ({} dims)", manifest.model_id, manifest.dimension),
                configured: format!("{model_id} ({dimension} dims)"),
            });
        }

        let rows = sqlx::query(
            "SELECT slot, source, byte_offset, content, embedding FROM slots ORDER BY slot",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        let mut chunks = Vec::with_capacity(rows.len());
        let mut embeddings = Vec::with_capacity(rows.len());
        for (expected, row) in rows.iter().enumerate() {
            let slot: i64 = row.try_get("slot").map_err(classify)?;
            if slot != expected as i64 {
                return Err(RetrievalError::corrupt(format!(
                    "slot ids are not contiguous: expected {expected}, found {slot}"
                )));
            }

            let bytes: Vec<u8> = row.try_get("embedding").map_err(classify)?;
            embeddings.push(decode_embedding(slot, &bytes, manifest.dimension)?);

            let offset: i64 = row.try_get("byte_offset").map_err(classify)?;
            let offset = usize::try_from(offset).map_err(|_| {
                RetrievalError::corrupt(format!("slot {slot} has negative offset {offset}"))
            })?;
            chunks.push(Chunk {
                source: row.try_get("source").map_err(classify)?,
                offset,
                text: row.try_get("content").map_err(classify)?,
            });
        }

        Ok((
            Snapshot {
                manifest,
                chunks,
                embeddings,
            },
            created,
        ))
    }

    async fn write_manifest(&self, dimension: usize, model_id: &str) -> Result<IndexManifest> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO index_manifest (id, dimension, metric, model_id, created_at, updated_at)
            VALUES (0, ?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(dimension as i64)
        .bind(METRIC_SQUARED_L2)
        .bind(model_id)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(IndexManifest {
            dimension,
            metric: METRIC_SQUARED_L2.to_string(),
            model_id: model_id.to_string(),
            created_at: now,
            updated_at: now,
        })
    }
}

#[async_trait]
impl SlotStore for SqliteSlotStore {
    async fn commit(&self, batch: SlotBatch<'_>) -> Result<DocumentRecord> {
        if batch.chunks.len() != batch.embeddings.len() {
            return Err(RetrievalError::storage(format!(
                "batch has {} chunks but {} embeddings",
                batch.chunks.len(),
                batch.embeddings.len()
            )));
        }

        let ingested_at = Utc::now();
        let mut tx = self.pool.begin().await?;

        let stored: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM slots")
            .fetch_one(&mut *tx)
            .await?;
        if stored != batch.first_slot as i64 {
            return Err(RetrievalError::storage(format!(
                "batch starts at slot {} but the store holds {stored} slots",
                batch.first_slot
            )));
        }

        for (i, (chunk, embedding)) in batch.chunks.iter().zip(batch.embeddings).enumerate() {
            sqlx::query(
                r#"
                INSERT INTO slots (slot, source, byte_offset, content, embedding)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )
            .bind((batch.first_slot + i) as i64)
            .bind(&chunk.source)
            .bind(chunk.offset as i64)
            .bind(&chunk.text)
            .bind(bytemuck::cast_slice::<f32, u8>(embedding))
            .execute(&mut *tx)
            .await?;
        }

        let content_hash = hex::encode(batch.content_hash);
        let id = sqlx::query(
            r#"
            INSERT INTO documents (source, content_hash, first_slot, chunk_count, ingested_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(batch.source)
        .bind(&content_hash)
        .bind(batch.first_slot as i64)
        .bind(batch.chunks.len() as i64)
        .bind(ingested_at)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        sqlx::query("UPDATE index_manifest SET updated_at = ?1 WHERE id = 0")
            .bind(ingested_at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::debug!(
            "Committed {} slots for {} starting at slot {}",
            batch.chunks.len(),
            batch.source,
            batch.first_slot
        );

        Ok(DocumentRecord {
            id,
            source: batch.source.to_string(),
            content_hash,
            first_slot: batch.first_slot,
            chunk_count: batch.chunks.len(),
            ingested_at,
        })
    }

    async fn documents(&self) -> Result<Vec<DocumentRecord>> {
        let rows = sqlx::query(
            "SELECT id, source, content_hash, first_slot, chunk_count, ingested_at FROM documents ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut documents = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get("id")?;
            let first_slot: i64 = row.try_get("first_slot")?;
            let chunk_count: i64 = row.try_get("chunk_count")?;
            documents.push(DocumentRecord {
                id,
                source: row.try_get("source")?,
                content_hash: row.try_get("content_hash")?,
                first_slot: usize::try_from(first_slot).map_err(|_| {
                    RetrievalError::corrupt(format!(
                        "document {id} has negative first slot {first_slot}"
                    ))
                })?,
                chunk_count: usize::try_from(chunk_count).map_err(|_| {
                    RetrievalError::corrupt(format!(
                        "document {id} has negative chunk count {chunk_count}"
                    ))
                })?,
                ingested_at: row.try_get("ingested_at")?,
            });
        }
        Ok(documents)
    }

    async fn close(&self) {
        self.pool.close().await;
        tracing::debug!("Closed index store at {}", self.path.display());
    }
}

fn decode_manifest(row: &SqliteRow) -> Result<IndexManifest> {
    let dimension: i64 = row.try_get("dimension").map_err(classify)?;
    let metric: String = row.try_get("metric").map_err(classify)?;
    if dimension <= 0 {
        return Err(RetrievalError::corrupt(format!(
            "manifest records invalid dimension {dimension}"
        )));
    }
    if metric != METRIC_SQUARED_L2 {
        return Err(RetrievalError::corrupt(format!(
            "manifest records unsupported metric {metric:?}"
        )));
    }

    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(classify)?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(classify)?;
    Ok(IndexManifest {
        dimension: dimension as usize,
        metric,
        model_id: row.try_get("model_id").map_err(classify)?,
        created_at,
        updated_at,
    })
}

fn decode_embedding(slot: i64, bytes: &[u8], dimension: usize) -> Result<Vec<f32>> {
    let expected = dimension * std::mem::size_of::<f32>();
    if bytes.len() != expected {
        return Err(RetrievalError::corrupt(format!(
            "slot {slot} embedding is {} bytes, expected {expected}",
            bytes.len()
        )));
    }
    Ok(bytemuck::pod_collect_to_vec::<u8, f32>(bytes))
}

/// Map errors raised while reading persisted data, separating unreadable data from I/O trouble.
///
/// Only `SQLITE_CORRUPT`, `SQLITE_NOTADB`, a schema that lacks our columns and
/// undecodable values count as corruption. Other SQL errors leave the file alone.
fn classify(err: sqlx::Error) -> RetrievalError {
    let corrupt = match &err {
        sqlx::Error::Database(db) => {
            let primary = db
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .map(|code| code & 0xff);
            matches!(primary, Some(SQLITE_CORRUPT | SQLITE_NOTADB))
                || db.message().contains("not a database")
                || db.message().starts_with("no such column")
        }
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::TypeNotFound { .. } => true,
        _ => false,
    };

    if corrupt {
        RetrievalError::corrupt(err.to_string())
    } else {
        RetrievalError::from(err)
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Move the database file and its WAL sidecars aside, returning the new database path
async fn quarantine(path: &Path) -> Result<PathBuf> {
    let suffix = format!(".corrupt-{}", Utc::now().timestamp());
    let target = with_suffix(path, &suffix);
    tokio::fs::rename(path, &target).await?;

    for sidecar in ["-wal", "-shm"] {
        let sidecar_path = with_suffix(path, sidecar);
        if tokio::fs::try_exists(&sidecar_path).await? {
            tokio::fs::rename(&sidecar_path, with_suffix(&sidecar_path, &suffix)).await?;
        }
    }
    Ok(target)
}
