//! Ingest pipeline: dedup → extract → chunk → embed → persist.
//!
//! All mutations of the two stores flow through here. A document's metadata
//! writes happen in a single transaction that stays open across the embedding
//! batches; the transaction commits only after every vector batch landed, so
//! a failure anywhere rolls the metadata back and scrubs the vectors already
//! written for that document. Search never observes a partially-ingested
//! document.
//!
//! Peak memory is the dominant risk on large manuals, not throughput:
//! extraction text is dropped once chunks exist, and each embedding batch's
//! vectors go out of scope before the next batch starts.

use sha2::{Digest, Sha256};
use sqlx::Row;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::chunk::{chunk_text, ChunkOptions};
use crate::engine::RagEngine;
use crate::error::RagError;
use crate::extract;
use crate::models::{Chunk, Document, FileType, IndexReport, Scope};
use crate::paths::normalize_path;
use crate::vector::VectorPayload;

/// Cooperative cancellation handle for an in-flight ingest. Checked at every
/// batch boundary; cancelling mid-batch takes effect at the next boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

impl RagEngine {
    /// Index one document into `scope`. See [`RagEngine::index_document_with_cancel`].
    pub async fn index_document(&self, path: &Path, scope: Scope) -> Result<IndexReport, RagError> {
        self.index_document_with_cancel(path, scope, &CancelFlag::default())
            .await
    }

    /// Index one document, checking `cancel` at each batch boundary.
    ///
    /// Byte-identical re-ingests short-circuit on the content checksum and
    /// only refresh `last_indexed`. At most one ingest runs at a time.
    pub async fn index_document_with_cancel(
        &self,
        path: &Path,
        scope: Scope,
        cancel: &CancelFlag,
    ) -> Result<IndexReport, RagError> {
        let _guard = self.write_lock.lock().await;

        let path = normalize_path(path);
        let filetype = extract::file_type_of(&path)?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let stat = std::fs::metadata(&path)
            .map_err(|e| RagError::CorruptSource(format!("{}: {e}", path.display())))?;
        let limit_mib = self.config.rag.max_file_size_mib;
        if stat.len() > limit_mib * 1024 * 1024 {
            return Err(RagError::OversizedSource {
                actual_mib: stat.len().div_ceil(1024 * 1024),
                limit_mib,
            });
        }

        let checksum = file_checksum(&path)?;
        let doc_id = derive_doc_id(&path, &checksum);

        // Checksum dedup: same bytes in the same scope are already indexed.
        if let Some(existing_id) = self.document_id_by_checksum(&checksum, scope).await? {
            let now = chrono::Utc::now().timestamp();
            sqlx::query("UPDATE documents SET last_indexed = ? WHERE id = ?")
                .bind(now)
                .bind(&existing_id)
                .execute(&self.pool)
                .await?;
            let chunk_count: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE doc_id = ?")
                    .bind(&existing_id)
                    .fetch_one(&self.pool)
                    .await?;
            info!(doc_id = %existing_id, "document already indexed; refreshed last_indexed");
            return Ok(IndexReport {
                doc_id: existing_id,
                chunk_count: chunk_count as usize,
                deduplicated: true,
                message: "Document already indexed.".to_string(),
            });
        }

        let extracted = extract::extract(&path, limit_mib)?;
        debug!(
            stage = "post_extract",
            chars = extracted.text.len(),
            words = extracted.meta.word_count,
            "extraction complete"
        );
        if extracted.text.trim().is_empty() {
            return Err(RagError::NoExtractableText(filename));
        }

        let opts = ChunkOptions {
            size: self.config.rag.chunk_size,
            overlap: self.config.rag.chunk_overlap,
        };
        let chunks = chunk_text(&doc_id, &extracted.text, opts);
        if chunks.is_empty() {
            return Err(RagError::NoExtractableText(filename));
        }
        let metadata_json =
            serde_json::to_string(&extracted.meta).unwrap_or_else(|_| "{}".to_string());
        // The full text is no longer needed once chunks exist.
        drop(extracted);
        debug!(stage = "post_chunk", chunks = chunks.len(), "chunking complete");

        let now = chrono::Utc::now().timestamp();
        let collection = scope.as_str();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO documents
                (id, filename, filepath, filetype, filesize, scope, uploaded_at, last_indexed, checksum, metadata_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc_id)
        .bind(&filename)
        .bind(path.to_string_lossy().as_ref())
        .bind(filetype.as_str())
        .bind(stat.len() as i64)
        .bind(collection)
        .bind(now)
        .bind(now)
        .bind(&checksum)
        .bind(&metadata_json)
        .execute(&mut *tx)
        .await?;

        for chunk in &chunks {
            sqlx::query(
                "INSERT INTO chunks (chunk_id, doc_id, chunk_index, text, tokens) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(&chunk.doc_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(chunk.tokens)
            .execute(&mut *tx)
            .await?;
        }

        // Stream chunks to the embedding backend and vector store in batches,
        // ascending chunk_index, so failure-time cleanup by doc id removes
        // exactly what was inserted.
        let batch_size = self.config.embedding.batch_size;
        for (batch_number, batch) in chunks.chunks(batch_size).enumerate() {
            if cancel.is_cancelled() {
                return Err(self
                    .fail_ingest(tx, collection, &doc_id, RagError::Cancelled)
                    .await);
            }

            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = match self.embedder.embed(&texts).await {
                Ok(vectors) => vectors,
                Err(RagError::EmbeddingBackend { offset, message }) => {
                    let err = RagError::EmbeddingBackend {
                        offset: batch_number * batch_size + offset,
                        message,
                    };
                    return Err(self.fail_ingest(tx, collection, &doc_id, err).await);
                }
                Err(err) => return Err(self.fail_ingest(tx, collection, &doc_id, err).await),
            };

            let ids: Vec<String> = batch.iter().map(|c| c.id.clone()).collect();
            let payloads: Vec<VectorPayload> = batch
                .iter()
                .map(|c| VectorPayload {
                    doc_id: doc_id.clone(),
                    chunk_id: c.id.clone(),
                    filename: filename.clone(),
                    filetype: filetype.as_str().to_string(),
                    chunk_index: c.chunk_index,
                    scope: collection.to_string(),
                })
                .collect();

            if let Err(err) = self.vectors.add(collection, &ids, &vectors, &payloads).await {
                return Err(self.fail_ingest(tx, collection, &doc_id, err).await);
            }

            debug!(
                stage = "post_batch",
                batch = batch_number,
                batch_chunks = batch.len(),
                "embedding batch persisted"
            );
            // ids, vectors, and payloads are reclaimed here before the next
            // batch begins.
        }

        if let Err(e) = tx.commit().await {
            let err = RagError::MetadataStore(e);
            if let Err(cleanup) = self.vectors.delete_by_doc(collection, &doc_id).await {
                warn!(%doc_id, "vector cleanup after failed commit also failed: {cleanup}");
            }
            return Err(err);
        }

        info!(%doc_id, chunks = chunks.len(), scope = collection, "document indexed");
        Ok(IndexReport {
            doc_id,
            chunk_count: chunks.len(),
            deduplicated: false,
            message: format!(
                "Document indexed successfully. Created {} chunks.",
                chunks.len()
            ),
        })
    }

    /// Roll back the metadata transaction and scrub any vectors already
    /// written for the document, then hand the original error back.
    async fn fail_ingest(
        &self,
        tx: sqlx::Transaction<'_, sqlx::Sqlite>,
        collection: &str,
        doc_id: &str,
        err: RagError,
    ) -> RagError {
        if let Err(e) = tx.rollback().await {
            warn!(doc_id, "metadata rollback failed: {e}");
        }
        if let Err(e) = self.vectors.delete_by_doc(collection, doc_id).await {
            warn!(doc_id, "best-effort vector cleanup failed: {e}");
        }
        err
    }

    /// Remove a document and all its chunks from both stores. Metadata goes
    /// first so no caller can observe a document row pointing at missing
    /// vectors. Returns whether a document row existed.
    pub async fn delete_document(&self, doc_id: &str) -> Result<bool, RagError> {
        let _guard = self.write_lock.lock().await;

        let scope: Option<String> =
            sqlx::query_scalar("SELECT scope FROM documents WHERE id = ?")
                .bind(doc_id)
                .fetch_optional(&self.pool)
                .await?;

        let deleted = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(doc_id)
            .execute(&self.pool)
            .await?
            .rows_affected()
            > 0;

        // Scrub vectors even when the metadata row was already gone, in case
        // an earlier cleanup was interrupted.
        match scope.as_deref().and_then(Scope::parse) {
            Some(scope) => {
                self.vectors.delete_by_doc(scope.as_str(), doc_id).await?;
            }
            None => {
                for scope in Scope::all() {
                    self.vectors.delete_by_doc(scope.as_str(), doc_id).await?;
                }
            }
        }

        if deleted {
            info!(doc_id, "document deleted");
        }
        Ok(deleted)
    }

    /// Purge both stores. Used when the embedding dimension changes or on
    /// explicit user request. Search history is diagnostic and survives.
    pub async fn clear_all(&self) -> Result<(), RagError> {
        let _guard = self.write_lock.lock().await;
        sqlx::query("DELETE FROM documents").execute(&self.pool).await?;
        self.vectors.clear_all().await?;
        info!("all documents and embeddings cleared");
        Ok(())
    }

    /// Whether a document at `path` is present in the metadata store. Works
    /// for paths that no longer exist on disk.
    pub async fn is_document_indexed(&self, path: &Path) -> Result<bool, RagError> {
        let normalized = normalize_path(path);
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE filepath = ?")
            .bind(normalized.to_string_lossy().as_ref())
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    /// Document id for a path previously ingested, if any. The watcher's
    /// delete path resolves ids this way after the file is gone.
    pub async fn document_id_by_path(&self, path: &Path) -> Result<Option<String>, RagError> {
        let normalized = normalize_path(path);
        let id: Option<String> = sqlx::query_scalar("SELECT id FROM documents WHERE filepath = ?")
            .bind(normalized.to_string_lossy().as_ref())
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    async fn document_id_by_checksum(
        &self,
        checksum: &str,
        scope: Scope,
    ) -> Result<Option<String>, RagError> {
        let id: Option<String> =
            sqlx::query_scalar("SELECT id FROM documents WHERE checksum = ? AND scope = ?")
                .bind(checksum)
                .bind(scope.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(id)
    }

    /// All documents, newest first, optionally filtered by scope.
    pub async fn documents_by_scope(
        &self,
        scope: Option<Scope>,
    ) -> Result<Vec<Document>, RagError> {
        let rows = match scope {
            Some(scope) => {
                sqlx::query(
                    "SELECT id, filename, filepath, filetype, filesize, scope, uploaded_at, \
                     last_indexed, checksum, metadata_json FROM documents WHERE scope = ? \
                     ORDER BY uploaded_at DESC, id ASC",
                )
                .bind(scope.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT id, filename, filepath, filetype, filesize, scope, uploaded_at, \
                     last_indexed, checksum, metadata_json FROM documents \
                     ORDER BY uploaded_at DESC, id ASC",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        let documents = rows
            .iter()
            .filter_map(|row| {
                let filetype: String = row.get("filetype");
                let scope: String = row.get("scope");
                let metadata_json: String = row.get("metadata_json");
                Some(Document {
                    id: row.get("id"),
                    filename: row.get("filename"),
                    filepath: row.get("filepath"),
                    filetype: FileType::from_extension(&filetype).ok()?,
                    filesize: row.get("filesize"),
                    scope: Scope::parse(&scope)?,
                    uploaded_at: row.get("uploaded_at"),
                    last_indexed: row.get("last_indexed"),
                    checksum: row.get("checksum"),
                    metadata: serde_json::from_str(&metadata_json)
                        .unwrap_or(serde_json::json!({})),
                })
            })
            .collect();
        Ok(documents)
    }

    /// Chunks of one document in index order. Diagnostic accessor.
    pub async fn chunks_for_document(&self, doc_id: &str) -> Result<Vec<Chunk>, RagError> {
        let rows = sqlx::query(
            "SELECT chunk_id, doc_id, chunk_index, text, tokens FROM chunks \
             WHERE doc_id = ? ORDER BY chunk_index ASC",
        )
        .bind(doc_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| Chunk {
                id: row.get("chunk_id"),
                doc_id: row.get("doc_id"),
                chunk_index: row.get("chunk_index"),
                text: row.get("text"),
                tokens: row.get("tokens"),
            })
            .collect())
    }
}

/// Streaming SHA-256 of the file contents; the file is never buffered whole.
fn file_checksum(path: &Path) -> Result<String, RagError> {
    let mut file = std::fs::File::open(path)
        .map_err(|e| RagError::CorruptSource(format!("{}: {e}", path.display())))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)
        .map_err(|e| RagError::CorruptSource(format!("{}: {e}", path.display())))?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Stable document identity from the normalized path and content checksum.
fn derive_doc_id(path: &Path, checksum: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    hasher.update([0u8]);
    hasher.update(checksum.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..32].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doc_id_is_stable_and_input_sensitive() {
        let a = derive_doc_id(Path::new("/docs/a.txt"), "abc");
        assert_eq!(a, derive_doc_id(Path::new("/docs/a.txt"), "abc"));
        assert_eq!(a.len(), 32);
        assert_ne!(a, derive_doc_id(Path::new("/docs/b.txt"), "abc"));
        assert_ne!(a, derive_doc_id(Path::new("/docs/a.txt"), "abd"));
    }

    #[test]
    fn checksum_matches_content_not_name() {
        let tmp = tempfile::tempdir().unwrap();
        let p1 = tmp.path().join("one.txt");
        let p2 = tmp.path().join("two.txt");
        std::fs::write(&p1, "same bytes").unwrap();
        std::fs::write(&p2, "same bytes").unwrap();
        assert_eq!(file_checksum(&p1).unwrap(), file_checksum(&p2).unwrap());

        std::fs::write(&p2, "different").unwrap();
        assert_ne!(file_checksum(&p1).unwrap(), file_checksum(&p2).unwrap());
    }
}
