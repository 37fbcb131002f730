//! `docrag` — document indexing and retrieval engine for editor-embedded RAG.
//!
//! The binary hosts the privileged background process: CLI maintenance
//! commands, the JSON RPC surface for the editor UI, and the policy-folder
//! watcher. All commands construct the same [`docrag::RagEngine`] handle the
//! server uses; there are no process-wide singletons.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use docrag::models::{Scope, SearchScope};
use docrag::{load_config, Config, RagEngine};

#[derive(Parser)]
#[command(
    name = "docrag",
    about = "docrag — document indexing and retrieval engine for editor-embedded RAG",
    version
)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./config/docrag.toml")]
    config: PathBuf,

    /// Workspace identity for workspace-scoped storage
    #[arg(long, global = true)]
    workspace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create directories and the store schemas
    Init,

    /// Index a document
    Index {
        /// Path to a pdf, docx, txt, or md file
        path: PathBuf,

        /// Target scope: policy_manual or workspace_docs
        #[arg(long, default_value = "workspace_docs")]
        scope: String,
    },

    /// Search the corpus and print the context pack
    Search {
        /// Search query
        query: String,

        /// Scope: policy_manual, workspace_docs, or both
        #[arg(long, default_value = "both")]
        scope: String,

        /// Maximum number of results
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show corpus statistics
    Stats,

    /// Delete a document from both stores
    Delete {
        /// Document id
        doc_id: String,
    },

    /// Check whether a path is indexed
    Indexed {
        path: PathBuf,
    },

    /// List indexed documents
    Docs {
        /// Filter by scope
        #[arg(long)]
        scope: Option<String>,
    },

    /// Purge all documents and embeddings
    Clear,

    /// Watch the policy folder and keep the index in sync
    Watch {
        /// Folder to watch; defaults to the configured policy folder
        folder: Option<PathBuf>,
    },

    /// Start the RPC server for the editor UI
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    let workspace = cli.workspace.as_deref();

    match cli.command {
        Commands::Init => {
            let engine = init_engine(config, workspace).await?;
            engine.close().await;
            println!("Stores initialized successfully.");
        }
        Commands::Index { path, scope } => {
            let scope = parse_scope(&scope)?;
            let engine = init_engine(config, workspace).await?;
            match engine.index_document(&path, scope).await {
                Ok(report) => println!("{}", report.message),
                Err(e) => println!("Indexing failed: {e}"),
            }
            engine.close().await;
        }
        Commands::Search {
            query,
            scope,
            limit,
        } => {
            let scope = SearchScope::parse(&scope)
                .ok_or_else(|| anyhow::anyhow!("unknown scope: {scope}"))?;
            let engine = init_engine(config, workspace).await?;
            let pack = engine.search(&query, scope, limit).await;

            if pack.attributions.is_empty() {
                println!("No results.");
            } else {
                for (i, attribution) in pack.attributions.iter().enumerate() {
                    println!(
                        "{}. [{:.3}] {} ({})",
                        i + 1,
                        attribution.score,
                        attribution.filename,
                        attribution.range_hint
                    );
                }
                println!();
                println!("--- Context ({} chars) ---", pack.answer_context.len());
                println!("{}", pack.answer_context);
            }
            println!();
            println!(
                "{} results in {} ms",
                pack.total_results, pack.response_time_ms
            );
            engine.close().await;
        }
        Commands::Stats => {
            let engine = init_engine(config, workspace).await?;
            let stats = engine.stats().await?;

            println!("docrag — corpus stats");
            println!("=====================");
            println!();
            println!("  Documents:  {}", stats.total_documents);
            println!("  Total size: {}", format_bytes(stats.total_size as u64));
            println!(
                "  Chunks:     {} (avg {:.1} tokens)",
                stats.chunks.total_chunks, stats.chunks.avg_tokens
            );
            if !stats.documents.is_empty() {
                println!();
                println!("  {:<8} {:>6} {:>12}", "TYPE", "DOCS", "SIZE");
                for t in &stats.documents {
                    println!(
                        "  {:<8} {:>6} {:>12}",
                        t.filetype,
                        t.type_count,
                        format_bytes(t.total_size as u64)
                    );
                }
            }
            engine.close().await;
        }
        Commands::Delete { doc_id } => {
            let engine = init_engine(config, workspace).await?;
            match engine.delete_document(&doc_id).await {
                Ok(true) => println!("Document deleted."),
                Ok(false) => println!("No document with id {doc_id}."),
                Err(e) => println!("Delete failed: {e}"),
            }
            engine.close().await;
        }
        Commands::Indexed { path } => {
            let engine = init_engine(config, workspace).await?;
            let indexed = engine.is_document_indexed(&path).await?;
            println!("{indexed}");
            engine.close().await;
        }
        Commands::Docs { scope } => {
            let scope = match scope.as_deref() {
                None => None,
                Some(raw) => Some(parse_scope(raw)?),
            };
            let engine = init_engine(config, workspace).await?;
            let documents = engine.documents_by_scope(scope).await?;

            if documents.is_empty() {
                println!("No documents.");
            }
            for doc in &documents {
                println!(
                    "{}  {:<5} {:<15} {}",
                    doc.id,
                    doc.filetype.as_str(),
                    doc.scope.as_str(),
                    doc.filename
                );
            }
            engine.close().await;
        }
        Commands::Clear => {
            let engine = init_engine(config, workspace).await?;
            match engine.clear_all().await {
                Ok(()) => println!("All documents and embeddings cleared."),
                Err(e) => println!("Clear failed: {e}"),
            }
            engine.close().await;
        }
        Commands::Watch { folder } => {
            let folder = folder.unwrap_or_else(|| config.watcher.policy_folder.clone());
            let mut config = config;
            // An explicit watch command implies the subscription even when
            // the config leaves it off.
            config.watcher.watch = true;

            let engine = Arc::new(init_engine(config, workspace).await?);
            let watcher = docrag::watcher::PolicyWatcher::start(engine.clone(), &folder).await?;

            println!("Watching {} — press Ctrl-C to stop.", folder.display());
            tokio::signal::ctrl_c().await?;

            watcher.stop().await;
            engine.close().await;
        }
        Commands::Serve => {
            let bind = config.server.bind.clone();
            let engine = Arc::new(init_engine(config, workspace).await?);
            docrag::server::run_server(engine, &bind).await?;
        }
    }

    Ok(())
}

async fn init_engine(config: Config, workspace: Option<&str>) -> anyhow::Result<RagEngine> {
    RagEngine::initialize(config, None, workspace).await
}

fn parse_scope(raw: &str) -> anyhow::Result<Scope> {
    Scope::parse(raw).ok_or_else(|| {
        anyhow::anyhow!("unknown scope '{raw}'; use policy_manual or workspace_docs")
    })
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
