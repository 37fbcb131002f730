//! Engine handle construction and teardown.
//!
//! There are no process-wide singletons: [`RagEngine::initialize`] builds the
//! stores and the embedding backend from configuration and returns a handle
//! the RPC layer (or CLI) owns. Dropping the handle after [`RagEngine::close`]
//! releases the metadata connection and the vector-store client.

use anyhow::{bail, Result};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::config::{Config, StorageScope};
use crate::db;
use crate::embedding::{self, EmbeddingBackend};
use crate::migrate;
use crate::models::Scope;
use crate::paths::StoragePaths;
use crate::vector::{self, VectorStore};

/// Handle over the initialized subsystem. Ingest and retrieval methods live
/// in the `ingest`, `search`, and `stats` modules.
pub struct RagEngine {
    pub(crate) config: Config,
    pub(crate) pool: SqlitePool,
    pub(crate) vectors: Arc<dyn VectorStore>,
    pub(crate) embedder: Arc<dyn EmbeddingBackend>,
    /// Serializes ingest and delete bodies: at most one mutation pipeline
    /// runs at a time, which keeps the two stores easy to reason about.
    pub(crate) write_lock: tokio::sync::Mutex<()>,
}

/// Resolved on-disk locations for one engine instance.
struct EngineLayout {
    metadata_path: PathBuf,
    vector_dir: PathBuf,
    models_dir: PathBuf,
}

impl EngineLayout {
    /// Pick the root the engine binds to. `workspace` storage requires a
    /// workspace identity; `both` prefers the workspace root when one is
    /// supplied and falls back to the global root otherwise.
    fn resolve(config: &Config, workspace: Option<&str>) -> Result<Self> {
        let paths = StoragePaths::new(&config.storage.root);

        let layout = match (config.storage.scope, workspace) {
            (StorageScope::Global, _) | (StorageScope::Both, None) => {
                paths.ensure_directories()?;
                Self {
                    metadata_path: paths.global_metadata_path(),
                    vector_dir: paths.global_vector_dir(),
                    models_dir: paths.global_models_dir(),
                }
            }
            (StorageScope::Workspace, None) => {
                bail!("storage.scope = \"workspace\" requires a workspace identity")
            }
            (StorageScope::Workspace, Some(ws)) | (StorageScope::Both, Some(ws)) => {
                paths.ensure_workspace_directories(ws)?;
                let root = paths.workspace_root(ws)?;
                Self {
                    metadata_path: root.join("metadata.db"),
                    vector_dir: root.join("vectors"),
                    models_dir: root.join("models"),
                }
            }
        };
        Ok(layout)
    }
}

impl RagEngine {
    /// Build the engine from configuration: ensure directories, open both
    /// stores, run migrations, and instantiate the embedding backend.
    /// Idempotent; safe to call again after [`RagEngine::close`].
    ///
    /// `credential` feeds the remote embedding backend and is held in memory
    /// only; when `None`, the `DOCRAG_EMBEDDING_API_KEY` environment variable
    /// is consulted.
    pub async fn initialize(
        config: Config,
        credential: Option<String>,
        workspace: Option<&str>,
    ) -> Result<Self> {
        crate::config::validate(&config)?;
        if !config.rag.enabled {
            bail!("rag subsystem is disabled (rag.enabled = false)");
        }

        let layout = EngineLayout::resolve(&config, workspace)?;
        let embedder =
            embedding::create_backend(&config.embedding, credential, &layout.models_dir)?;
        Self::build(config, layout, embedder).await
    }

    /// Like [`RagEngine::initialize`] with a caller-supplied embedding
    /// backend. The seam for alternative deployments and hermetic tests.
    pub async fn with_embedding_backend(
        config: Config,
        embedder: Arc<dyn EmbeddingBackend>,
        workspace: Option<&str>,
    ) -> Result<Self> {
        if !config.rag.enabled {
            bail!("rag subsystem is disabled (rag.enabled = false)");
        }
        let layout = EngineLayout::resolve(&config, workspace)?;
        Self::build(config, layout, embedder).await
    }

    async fn build(
        config: Config,
        layout: EngineLayout,
        embedder: Arc<dyn EmbeddingBackend>,
    ) -> Result<Self> {
        let pool = db::connect(&layout.metadata_path).await?;
        migrate::run_migrations(&pool).await?;

        let vectors = vector::create_vector_store(&config.vector, &layout.vector_dir).await?;
        for scope in Scope::all() {
            vectors.ensure_collection(scope.as_str()).await?;
        }

        info!(
            metadata = %layout.metadata_path.display(),
            vectors = %layout.vector_dir.display(),
            backend = embedder.id(),
            dims = embedder.dims(),
            "engine initialized"
        );

        Ok(Self {
            config,
            pool,
            vectors,
            embedder,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Release both stores. The handle is unusable afterwards.
    pub async fn close(&self) {
        self.pool.close().await;
        self.vectors.close().await;
        info!("engine closed");
    }
}
