//! Error taxonomy for the indexing and retrieval pipeline.
//!
//! Every failure a caller can observe maps onto one of these kinds. The
//! user-visible entry points (`index_document`, `search`, `clear_all`) never
//! propagate a [`RagError`] across the RPC boundary; the server and CLI
//! convert them into `{success, message}` responses or an empty result set.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    /// Unknown or legacy file extension.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Source file exceeds the configured size limit.
    #[error("file is {actual_mib} MiB, over the {limit_mib} MiB limit")]
    OversizedSource { actual_mib: u64, limit_mib: u64 },

    /// Extraction produced an empty string (or nothing chunkable).
    #[error("no extractable text in {0}")]
    NoExtractableText(String),

    /// The parser rejected the source.
    #[error("corrupt source: {0}")]
    CorruptSource(String),

    /// Network, auth, or response failure while embedding. `offset` is the
    /// index of the first text in the failing sub-batch.
    #[error("embedding backend failed at batch offset {offset}: {message}")]
    EmbeddingBackend { offset: usize, message: String },

    /// The target collection already holds vectors of a different dimension.
    /// Recoverable only by clearing the stores.
    #[error(
        "embedding dimension mismatch: collection holds {existing}-dim vectors but the backend produced {got}-dim; clear all embeddings before re-indexing"
    )]
    EmbeddingDimensionMismatch { existing: usize, got: usize },

    /// Add/query/delete failure in the vector store.
    #[error("vector store error: {0}")]
    VectorStore(String),

    /// Transaction or query failure in the metadata store.
    #[error("metadata store error: {0}")]
    MetadataStore(#[from] sqlx::Error),

    /// The caller cancelled an in-flight ingest at a batch boundary.
    #[error("operation cancelled")]
    Cancelled,
}
