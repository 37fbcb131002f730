//! # docrag
//!
//! **Document indexing and retrieval engine for editor-embedded RAG.**
//!
//! docrag ingests user-supplied documents (policy manuals and workspace
//! files) into a durable dual-store corpus — structured metadata in SQLite,
//! embeddings in a vector store — and serves ranked, attributed text
//! snippets to a chat/agent layer on demand.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────────────────┐   ┌──────────────┐
//! │  Sources   │──▶│  Ingest pipeline          │──▶│  Dual store   │
//! │ pdf/docx/ │   │ extract → chunk → embed  │   │ metadata.db  │
//! │ txt/md    │   │ (batched, transactional) │   │ + vectors/   │
//! └───────────┘   └──────────────────────────┘   └──────┬───────┘
//!                                                       │
//!                                    ┌──────────────────┤
//!                                    ▼                  ▼
//!                               ┌─────────┐       ┌──────────┐
//!                               │   CLI    │       │ RPC/HTTP │
//!                               │ (docrag)│       │ (editor) │
//!                               └─────────┘       └──────────┘
//! ```
//!
//! ## Data flow
//!
//! 1. A document enters through the RPC surface, the CLI, or the policy
//!    folder [`watcher`].
//! 2. The ingest pipeline ([`ingest`]) dedups by content checksum, extracts
//!    text ([`extract`]), chunks it ([`chunk`]), and persists document and
//!    chunk rows in one metadata transaction.
//! 3. Chunks stream through the embedding backend ([`embedding`]) in fixed
//!    batches; each batch lands atomically in the vector store ([`vector`]).
//! 4. A query embeds the search text, ranks vectors per scope, joins the
//!    metadata store once, and assembles an attributed [`models::ContextPack`]
//!    ([`search`]).
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Error taxonomy for every observable failure |
//! | [`models`] | Core types: `Scope`, `Document`, `Chunk`, `ContextPack` |
//! | [`paths`] | Durable on-disk locations per scope/workspace |
//! | [`extract`] | Format-dispatched text extraction (pdf, docx, txt, md) |
//! | [`chunk`] | Deterministic sentence-accumulating chunker |
//! | [`embedding`] | Embedding backend trait, remote + local backends |
//! | [`db`] | Metadata store connection (WAL, foreign keys) |
//! | [`migrate`] | Idempotent schema migrations |
//! | [`vector`] | Vector store trait + SQLite-file backend |
//! | [`engine`] | `RagEngine` handle: construction and teardown |
//! | [`ingest`] | Index, delete, clear, and membership operations |
//! | [`search`] | Query pipeline and context pack assembly |
//! | [`stats`] | Corpus statistics |
//! | [`watcher`] | Debounced policy-folder watcher |
//! | [`server`] | Axum JSON RPC surface for the UI process |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod paths;
pub mod search;
pub mod server;
pub mod stats;
pub mod vector;
pub mod watcher;

pub use config::{load_config, Config};
pub use engine::RagEngine;
pub use error::RagError;
pub use ingest::CancelFlag;
pub use models::{Attribution, ContextPack, Document, IndexReport, Scope, SearchScope};
