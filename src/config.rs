//! Configuration parsing and validation.
//!
//! The engine is configured via a TOML file (default: `config/docrag.toml`).
//! The config gates the subsystem, sets chunking and retrieval parameters,
//! selects the embedding and vector backends, and configures the policy
//! folder watcher and the RPC server bind address.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable consulted for the remote embedding credential when
/// none is supplied at initialization. The credential is never persisted.
pub const EMBEDDING_API_KEY_ENV: &str = "DOCRAG_EMBEDDING_API_KEY";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub rag: RagConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RagConfig {
    /// Gates the entire subsystem. A disabled config refuses to initialize.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Target chunk length in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Word-count overlap between adjacent chunks.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    /// Default and maximum `top_k` for search.
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
    /// Hard reject threshold for source files.
    #[serde(default = "default_max_file_size_mib")]
    pub max_file_size_mib: u64,
    /// Character cap on `answer_context`.
    #[serde(default = "default_context_char_cap")]
    pub context_char_cap: usize,
}

fn default_true() -> bool {
    true
}
fn default_chunk_size() -> usize {
    500
}
fn default_chunk_overlap() -> usize {
    50
}
fn default_search_limit() -> usize {
    5
}
fn default_max_file_size_mib() -> u64 {
    100
}
fn default_context_char_cap() -> usize {
    4000
}

/// Which path-resolver root the engine binds to.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageScope {
    Global,
    Workspace,
    /// Workspace root when a workspace identity is supplied, global otherwise.
    Both,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Global scope root. Stores live at `<root>/vectors/` and
    /// `<root>/metadata.db`; workspace roots nest under `<root>/workspaces/`.
    pub root: PathBuf,
    #[serde(default = "default_storage_scope")]
    pub scope: StorageScope,
}

fn default_storage_scope() -> StorageScope {
    StorageScope::Global
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `remote` or `local`.
    #[serde(default = "default_embedding_backend")]
    pub backend: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL of the remote embedding API.
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Orchestrator-level embedding batch (chunks per vector-store add).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Adapter-level sub-batch bounding peak memory per request.
    #[serde(default = "default_sub_batch")]
    pub sub_batch: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: default_embedding_backend(),
            model: None,
            dims: None,
            api_base: default_api_base(),
            batch_size: default_batch_size(),
            sub_batch: default_sub_batch(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_embedding_backend() -> String {
    "remote".to_string()
}
fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_batch_size() -> usize {
    50
}
fn default_sub_batch() -> usize {
    32
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorConfig {
    /// Concrete vector store implementation. Currently `sqlite`.
    #[serde(default = "default_vector_backend")]
    pub backend: String,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            backend: default_vector_backend(),
        }
    }
}

fn default_vector_backend() -> String {
    "sqlite".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct WatcherConfig {
    /// Folder (relative to the workspace folder passed to `watch`, or
    /// absolute) observed for policy documents.
    #[serde(default = "default_policy_folder")]
    pub policy_folder: PathBuf,
    /// Enables the file watcher.
    #[serde(default)]
    pub watch: bool,
    /// Enumerate and index existing files when watching starts.
    #[serde(default)]
    pub auto_index: bool,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            policy_folder: default_policy_folder(),
            watch: false,
            auto_index: false,
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_policy_folder() -> PathBuf {
    PathBuf::from("policy-manuals")
}
fn default_debounce_ms() -> u64 {
    750
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7433".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Reject configurations the pipeline cannot run with.
pub fn validate(config: &Config) -> Result<()> {
    if config.rag.chunk_size == 0 {
        anyhow::bail!("rag.chunk_size must be > 0");
    }
    if config.rag.search_limit == 0 {
        anyhow::bail!("rag.search_limit must be >= 1");
    }
    if config.rag.max_file_size_mib == 0 {
        anyhow::bail!("rag.max_file_size_mib must be > 0");
    }
    if config.embedding.batch_size == 0 || config.embedding.sub_batch == 0 {
        anyhow::bail!("embedding.batch_size and embedding.sub_batch must be > 0");
    }

    match config.embedding.backend.as_str() {
        "remote" => {
            if config.embedding.model.is_none() {
                anyhow::bail!("embedding.model must be set for the remote backend");
            }
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                anyhow::bail!("embedding.dims must be > 0 for the remote backend");
            }
        }
        "local" => {}
        other => anyhow::bail!(
            "Unknown embedding backend: '{}'. Must be remote or local.",
            other
        ),
    }

    match config.vector.backend.as_str() {
        "sqlite" => {}
        other => anyhow::bail!("Unknown vector backend: '{}'. Must be sqlite.", other),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let config = parse(
            r#"
            [rag]
            [storage]
            root = "./data"
            [embedding]
            backend = "remote"
            model = "text-embedding-3-small"
            dims = 1536
            "#,
        )
        .unwrap();
        assert!(config.rag.enabled);
        assert_eq!(config.rag.chunk_size, 500);
        assert_eq!(config.rag.chunk_overlap, 50);
        assert_eq!(config.rag.search_limit, 5);
        assert_eq!(config.rag.max_file_size_mib, 100);
        assert_eq!(config.embedding.batch_size, 50);
        assert_eq!(config.vector.backend, "sqlite");
        assert_eq!(
            config.watcher.policy_folder,
            PathBuf::from("policy-manuals")
        );
    }

    #[test]
    fn remote_backend_requires_model_and_dims() {
        let err = parse(
            r#"
            [rag]
            [storage]
            root = "./data"
            [embedding]
            backend = "remote"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("embedding.model"));
    }

    #[test]
    fn unknown_backends_are_rejected() {
        assert!(parse(
            r#"
            [rag]
            [storage]
            root = "./data"
            [embedding]
            backend = "quantum"
            "#,
        )
        .is_err());
        assert!(parse(
            r#"
            [rag]
            [storage]
            root = "./data"
            [embedding]
            backend = "local"
            [vector]
            backend = "faiss"
            "#,
        )
        .is_err());
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let err = parse(
            r#"
            [rag]
            chunk_size = 0
            [storage]
            root = "./data"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("chunk_size"));
    }
}
