//! Retrieval pipeline: embed query → vector search → metadata join →
//! context pack.
//!
//! `search` never surfaces an error to the chat layer. Anything that fails
//! after validation is logged and collapses to an empty [`ContextPack`]; the
//! subsystem stays initialized.

use sqlx::Row;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, warn};

use crate::engine::RagEngine;
use crate::error::RagError;
use crate::models::{Attribution, ContextPack, SearchScope};
use crate::vector::VectorHit;

impl RagEngine {
    /// Run a retrieval query over one or both scopes.
    ///
    /// `limit` defaults to the configured search limit and is capped by it.
    /// Attribution scores are non-increasing, and every attribution's chunk
    /// text appears in `answer_context` in the same order.
    pub async fn search(
        &self,
        query: &str,
        scope: SearchScope,
        limit: Option<usize>,
    ) -> ContextPack {
        let started = Instant::now();
        match self.search_inner(query, scope, limit, &started).await {
            Ok(pack) => pack,
            Err(e) => {
                warn!(scope = scope.as_str(), "search failed, returning empty pack: {e}");
                ContextPack {
                    response_time_ms: started.elapsed().as_millis() as u64,
                    ..ContextPack::default()
                }
            }
        }
    }

    async fn search_inner(
        &self,
        query: &str,
        scope: SearchScope,
        limit: Option<usize>,
        started: &Instant,
    ) -> Result<ContextPack, RagError> {
        if query.trim().is_empty() {
            return Ok(ContextPack {
                response_time_ms: started.elapsed().as_millis() as u64,
                ..ContextPack::default()
            });
        }

        let cap = self.config.rag.search_limit;
        let limit = limit.unwrap_or(cap).clamp(1, cap);

        let query_vec = self
            .embedder
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::EmbeddingBackend {
                offset: 0,
                message: "empty embedding response for query".to_string(),
            })?;

        // Collect per-scope candidates, then merge and resort. Ties break
        // deterministically by (doc_id, chunk_index).
        let mut hits: Vec<VectorHit> = Vec::new();
        for s in scope.scopes() {
            let scope_hits = self.vectors.query(s.as_str(), &query_vec, limit).await?;
            hits.extend(scope_hits);
        }
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.payload.doc_id.cmp(&b.payload.doc_id))
                .then_with(|| a.payload.chunk_index.cmp(&b.payload.chunk_index))
        });
        hits.truncate(limit);
        debug!(candidates = hits.len(), "vector search complete");

        let pack = self.assemble_pack(&hits, started).await?;
        self.record_search(query, scope, &pack).await?;
        Ok(pack)
    }

    /// Join the surviving hits against the metadata store in one round-trip
    /// and assemble the context pack.
    async fn assemble_pack(
        &self,
        hits: &[VectorHit],
        started: &Instant,
    ) -> Result<ContextPack, RagError> {
        if hits.is_empty() {
            return Ok(ContextPack {
                response_time_ms: started.elapsed().as_millis() as u64,
                ..ContextPack::default()
            });
        }

        let mut builder: sqlx::QueryBuilder<sqlx::Sqlite> = sqlx::QueryBuilder::new(
            "SELECT c.chunk_id, c.text, c.chunk_index, d.id AS doc_id, d.filename \
             FROM chunks c JOIN documents d ON d.id = c.doc_id WHERE c.chunk_id IN (",
        );
        let mut separated = builder.separated(", ");
        for hit in hits {
            separated.push_bind(hit.id.clone());
        }
        builder.push(")");
        let rows = builder.build().fetch_all(&self.pool).await?;

        struct JoinedChunk {
            text: String,
            chunk_index: i64,
            doc_id: String,
            filename: String,
        }
        let by_id: HashMap<String, JoinedChunk> = rows
            .iter()
            .map(|row| {
                (
                    row.get::<String, _>("chunk_id"),
                    JoinedChunk {
                        text: row.get("text"),
                        chunk_index: row.get("chunk_index"),
                        doc_id: row.get("doc_id"),
                        filename: row.get("filename"),
                    },
                )
            })
            .collect();

        let char_cap = self.config.rag.context_char_cap;
        let mut answer_context = String::new();
        let mut attributions: Vec<Attribution> = Vec::new();

        for hit in hits {
            // A hit without a metadata row belongs to an uncommitted or
            // half-deleted document; it stays invisible.
            let Some(joined) = by_id.get(&hit.id) else {
                continue;
            };

            if answer_context.is_empty() {
                if joined.text.len() > char_cap {
                    answer_context.push_str(truncate_at_boundary(&joined.text, char_cap));
                } else {
                    answer_context.push_str(&joined.text);
                }
            } else {
                if answer_context.len() + 2 + joined.text.len() > char_cap {
                    break;
                }
                answer_context.push_str("\n\n");
                answer_context.push_str(&joined.text);
            }

            attributions.push(Attribution {
                doc_id: joined.doc_id.clone(),
                chunk_id: hit.id.clone(),
                filename: joined.filename.clone(),
                range_hint: format!("Chunk {}", joined.chunk_index + 1),
                score: hit.score,
            });
        }

        Ok(ContextPack {
            answer_context,
            total_results: attributions.len(),
            attributions,
            response_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Append one row to the diagnostic search history.
    async fn record_search(
        &self,
        query: &str,
        scope: SearchScope,
        pack: &ContextPack,
    ) -> Result<(), RagError> {
        sqlx::query(
            "INSERT INTO search_history (query, collection, timestamp, result_count, response_time_ms) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(query)
        .bind(scope.as_str())
        .bind(chrono::Utc::now().timestamp())
        .bind(pack.total_results as i64)
        .bind(pack.response_time_ms as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Longest prefix of `text` at most `cap` bytes, ending on a char boundary.
fn truncate_at_boundary(text: &str, cap: usize) -> &str {
    if text.len() <= cap {
        return text;
    }
    let mut end = cap;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "héllo wörld";
        let cut = truncate_at_boundary(text, 2);
        assert!(cut.len() <= 2);
        assert!(text.starts_with(cut));

        assert_eq!(truncate_at_boundary("short", 100), "short");
    }
}
