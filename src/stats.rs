//! Corpus statistics.
//!
//! Gives the UI (and `docrag stats`) a quick read on what is indexed:
//! per-filetype document counts and sizes, chunk totals, and the average
//! token estimate.

use serde::Serialize;
use sqlx::Row;

use crate::engine::RagEngine;
use crate::error::RagError;

/// Per-filetype document breakdown.
#[derive(Debug, Clone, Serialize)]
pub struct TypeStat {
    pub filetype: String,
    pub type_count: i64,
    pub total_size: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkStats {
    pub total_chunks: i64,
    pub avg_tokens: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub documents: Vec<TypeStat>,
    pub chunks: ChunkStats,
    pub total_documents: i64,
    pub total_size: i64,
}

impl RagEngine {
    pub async fn stats(&self) -> Result<StatsReport, RagError> {
        let type_rows = sqlx::query(
            "SELECT filetype, COUNT(*) AS type_count, COALESCE(SUM(filesize), 0) AS total_size \
             FROM documents GROUP BY filetype ORDER BY type_count DESC, filetype ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let documents: Vec<TypeStat> = type_rows
            .iter()
            .map(|row| TypeStat {
                filetype: row.get("filetype"),
                type_count: row.get("type_count"),
                total_size: row.get("total_size"),
            })
            .collect();

        let total_documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        let total_size: i64 =
            sqlx::query_scalar("SELECT COALESCE(SUM(filesize), 0) FROM documents")
                .fetch_one(&self.pool)
                .await?;
        let total_chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        let avg_tokens: f64 =
            sqlx::query_scalar("SELECT COALESCE(AVG(tokens), 0.0) FROM chunks")
                .fetch_one(&self.pool)
                .await?;

        Ok(StatsReport {
            documents,
            chunks: ChunkStats {
                total_chunks,
                avg_tokens,
            },
            total_documents,
            total_size,
        })
    }
}
