//! Persistent vector store keyed by chunk id.
//!
//! The [`VectorStore`] trait is the capability set the orchestrators depend
//! on; concrete backends are instantiated from settings at initialization.
//! The default backend keeps vectors in a dedicated SQLite file under
//! `<root>/vectors/`, one logical collection per scope, and ranks queries by
//! cosine similarity over the stored blobs.
//!
//! The store does not fix a dimension: the embedding backend determines it,
//! and the first vector written to a collection pins it. A later add with a
//! different dimension fails so a scope can never mix dimensions.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::VectorConfig;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::RagError;

/// Minimal payload duplicated beside each vector for filtering and
/// attribution without a metadata-store round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorPayload {
    pub doc_id: String,
    pub chunk_id: String,
    pub filename: String,
    pub filetype: String,
    pub chunk_index: i64,
    pub scope: String,
}

/// One ranked match from [`VectorStore::query`].
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub score: f32,
    pub payload: VectorPayload,
}

/// Capability set the ingest and retrieval orchestrators rely on.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Idempotent collection registration.
    async fn ensure_collection(&self, name: &str) -> Result<(), RagError>;

    /// Atomically insert a batch of vectors with their payloads.
    async fn add(
        &self,
        collection: &str,
        ids: &[String],
        vectors: &[Vec<f32>],
        payloads: &[VectorPayload],
    ) -> Result<(), RagError>;

    /// Top-k matches in non-increasing score order; deterministic tie-break
    /// by `(doc_id, chunk_index)`.
    async fn query(
        &self,
        collection: &str,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<VectorHit>, RagError>;

    /// Remove every vector whose payload matches `doc_id`.
    async fn delete_by_doc(&self, collection: &str, doc_id: &str) -> Result<(), RagError>;

    /// Drop every collection. Maintenance path only.
    async fn clear_all(&self) -> Result<(), RagError>;

    /// Release the backing storage handles.
    async fn close(&self);
}

/// Instantiate the configured vector store inside `dir`.
pub async fn create_vector_store(
    config: &VectorConfig,
    dir: &Path,
) -> Result<Arc<dyn VectorStore>> {
    match config.backend.as_str() {
        "sqlite" => Ok(Arc::new(SqliteVectorStore::open(dir).await?)),
        other => bail!("Unknown vector backend: {}", other),
    }
}

// ============ SQLite backend ============

/// Vector store backed by a single SQLite file (`vectors.db`).
///
/// Queries are a brute-force cosine scan over the collection. That is
/// adequate for corpora in the tens of thousands of chunks; an ANN-backed
/// implementation can slot in behind the trait via `vector.backend`.
pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub async fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join("vectors.db");

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS collections (
                name TEXT PRIMARY KEY
            )
            "#,
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS vectors (
                collection TEXT NOT NULL,
                chunk_id TEXT NOT NULL,
                doc_id TEXT NOT NULL,
                filename TEXT NOT NULL,
                filetype TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                scope TEXT NOT NULL,
                dims INTEGER NOT NULL,
                embedding BLOB NOT NULL,
                PRIMARY KEY (collection, chunk_id)
            )
            "#,
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_vectors_doc ON vectors(collection, doc_id)",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    async fn collection_dims(&self, collection: &str) -> Result<Option<usize>, RagError> {
        let dims: Option<i64> =
            sqlx::query_scalar("SELECT dims FROM vectors WHERE collection = ? LIMIT 1")
                .bind(collection)
                .fetch_optional(&self.pool)
                .await
                .map_err(store_err)?;
        Ok(dims.map(|d| d as usize))
    }
}

fn store_err(e: sqlx::Error) -> RagError {
    RagError::VectorStore(e.to_string())
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn ensure_collection(&self, name: &str) -> Result<(), RagError> {
        sqlx::query("INSERT OR IGNORE INTO collections (name) VALUES (?)")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn add(
        &self,
        collection: &str,
        ids: &[String],
        vectors: &[Vec<f32>],
        payloads: &[VectorPayload],
    ) -> Result<(), RagError> {
        if ids.len() != vectors.len() || ids.len() != payloads.len() {
            return Err(RagError::VectorStore(format!(
                "mismatched batch: {} ids, {} vectors, {} payloads",
                ids.len(),
                vectors.len(),
                payloads.len()
            )));
        }
        let Some(first) = vectors.first() else {
            return Ok(());
        };

        if let Some(existing) = self.collection_dims(collection).await? {
            if existing != first.len() {
                return Err(RagError::EmbeddingDimensionMismatch {
                    existing,
                    got: first.len(),
                });
            }
        }

        let mut tx = self.pool.begin().await.map_err(store_err)?;
        for ((id, vector), payload) in ids.iter().zip(vectors).zip(payloads) {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO vectors
                    (collection, chunk_id, doc_id, filename, filetype, chunk_index, scope, dims, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(collection)
            .bind(id)
            .bind(&payload.doc_id)
            .bind(&payload.filename)
            .bind(&payload.filetype)
            .bind(payload.chunk_index)
            .bind(&payload.scope)
            .bind(vector.len() as i64)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        }
        tx.commit().await.map_err(store_err)?;
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<VectorHit>, RagError> {
        let rows = sqlx::query(
            "SELECT chunk_id, doc_id, filename, filetype, chunk_index, scope, embedding \
             FROM vectors WHERE collection = ?",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        let mut hits: Vec<VectorHit> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vector = blob_to_vec(&blob);
                let chunk_id: String = row.get("chunk_id");
                VectorHit {
                    id: chunk_id.clone(),
                    score: cosine_similarity(query, &vector),
                    payload: VectorPayload {
                        doc_id: row.get("doc_id"),
                        chunk_id,
                        filename: row.get("filename"),
                        filetype: row.get("filetype"),
                        chunk_index: row.get("chunk_index"),
                        scope: row.get("scope"),
                    },
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.payload.doc_id.cmp(&b.payload.doc_id))
                .then_with(|| a.payload.chunk_index.cmp(&b.payload.chunk_index))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete_by_doc(&self, collection: &str, doc_id: &str) -> Result<(), RagError> {
        sqlx::query("DELETE FROM vectors WHERE collection = ? AND doc_id = ?")
            .bind(collection)
            .bind(doc_id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn clear_all(&self) -> Result<(), RagError> {
        sqlx::query("DELETE FROM vectors")
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
