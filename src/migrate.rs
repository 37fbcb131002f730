//! Metadata store schema migrations.
//!
//! Creates the documents, chunks, policy_sections, and search_history tables
//! plus their indexes. Idempotent; runs at every initialization.

use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            filename TEXT NOT NULL,
            filepath TEXT NOT NULL,
            filetype TEXT NOT NULL,
            filesize INTEGER NOT NULL,
            scope TEXT NOT NULL,
            uploaded_at INTEGER NOT NULL,
            last_indexed INTEGER NOT NULL,
            checksum TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            UNIQUE(checksum, scope)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            chunk_id TEXT PRIMARY KEY,
            doc_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            tokens INTEGER NOT NULL,
            UNIQUE(doc_id, chunk_index),
            FOREIGN KEY (doc_id) REFERENCES documents(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Hierarchical heading index for policy manuals. Only the data model
    // exists; no extractor populates it yet.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS policy_sections (
            section_id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            level INTEGER NOT NULL,
            parent_id TEXT,
            doc_id TEXT NOT NULL,
            page_number INTEGER,
            chunk_ids_json TEXT NOT NULL DEFAULT '[]',
            FOREIGN KEY (parent_id) REFERENCES policy_sections(section_id),
            FOREIGN KEY (doc_id) REFERENCES documents(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Append-only; no referential ties.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS search_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            query TEXT NOT NULL,
            collection TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            result_count INTEGER NOT NULL,
            response_time_ms INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_filetype ON documents(filetype)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_uploaded_at ON documents(uploaded_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_doc_id ON chunks(doc_id)")
        .execute(pool)
        .await?;

    Ok(())
}
