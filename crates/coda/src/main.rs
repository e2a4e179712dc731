//! Coda - local-first coding-agent server.
//!
//! Main entry point for the Coda CLI.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use coda_index::{FileIndexer, KnowledgeIndexer, WorkspaceWatcher};
use coda_server::{AppState, ServerConfig};
use coda_store::Store;
use coda_types::{ModelConfig, Provider};
use coda_vector::{
    MemoryVectorStore, OllamaEmbedder, QdrantStore, SharedEmbedder, SharedVectorStore,
};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Coda - local-first coding-agent server
#[derive(Parser)]
#[command(name = "coda")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Coda server
    Serve(ServeArgs),

    /// Index a workspace once, optionally watching for changes
    Index(IndexArgs),
}

#[derive(clap::Args)]
struct ServeArgs {
    /// Listen address
    #[arg(long, env = "CODA_BIND", default_value = "127.0.0.1:8321")]
    bind: SocketAddr,

    /// Default model provider (ollama, vllm, llamacpp)
    #[arg(long, env = "CODA_MODEL_PROVIDER", default_value = "ollama")]
    provider: String,

    /// Default model name
    #[arg(long, env = "CODA_MODEL_NAME", default_value = "qwen3-coder")]
    model: String,

    /// Default model base URL
    #[arg(long, env = "CODA_MODEL_URL", default_value = "http://localhost:11434")]
    model_url: String,

    /// Qdrant base URL
    #[arg(long, env = "CODA_QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Use the in-process vector store instead of Qdrant
    #[arg(long)]
    memory_vectors: bool,

    /// Embedding model served by Ollama
    #[arg(long, env = "CODA_EMBEDDING_MODEL", default_value = "nomic-embed-text")]
    embedding_model: String,

    /// Embedding dimensionality
    #[arg(long, env = "CODA_EMBEDDING_DIMENSIONS", default_value_t = 768)]
    embedding_dimensions: usize,

    /// Data directory (defaults to the platform data dir)
    #[arg(long, env = "CODA_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Default module id for sessions
    #[arg(long, env = "CODA_MODULE", default_value = "vscode")]
    module: String,

    /// Disable the post-turn learning loop
    #[arg(long)]
    no_learning: bool,
}

#[derive(clap::Args)]
struct IndexArgs {
    /// Workspace directory to index
    workspace: PathBuf,

    /// Workspace id for collection and row scoping
    #[arg(long, default_value = "default")]
    workspace_id: String,

    /// Module id
    #[arg(long, default_value = "vscode")]
    module: String,

    /// Qdrant base URL
    #[arg(long, env = "CODA_QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Embedding model served by Ollama
    #[arg(long, env = "CODA_EMBEDDING_MODEL", default_value = "nomic-embed-text")]
    embedding_model: String,

    /// Ollama base URL for embeddings
    #[arg(long, env = "CODA_MODEL_URL", default_value = "http://localhost:11434")]
    model_url: String,

    /// Embedding dimensionality
    #[arg(long, default_value_t = 768)]
    embedding_dimensions: usize,

    /// Data directory (defaults to the platform data dir)
    #[arg(long, env = "CODA_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Keep watching the workspace after the initial pass
    #[arg(long)]
    watch: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing — console (human-readable) + rotating JSON file
    let filter = if cli.verbose {
        "coda=debug,coda_agent=debug,coda_llm=debug,coda_server=debug,coda_index=debug,info"
    } else {
        "coda=info,coda_agent=info,coda_llm=info,coda_server=info,coda_index=info,warn"
    };

    let log_dir = dirs::data_dir()
        .map(|d| d.join("coda").join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"));
    let file_appender = tracing_appender::rolling::daily(&log_dir, "coda.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "coda=debug,coda_agent=debug,coda_llm=debug,coda_server=debug,coda_index=debug,info",
                )),
        )
        .init();

    match cli.command {
        Commands::Serve(args) => serve(args).await,
        Commands::Index(args) => index(args).await,
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let provider =
        Provider::parse(&args.provider).with_context(|| format!("unknown provider: {}", args.provider))?;

    let config = ServerConfig {
        bind_addr: args.bind,
        default_model: ModelConfig::new(provider, args.model, args.model_url),
        qdrant_url: if args.memory_vectors {
            None
        } else {
            Some(args.qdrant_url)
        },
        embedding_model: args.embedding_model,
        embedding_dimensions: args.embedding_dimensions,
        data_dir: args
            .data_dir
            .unwrap_or_else(|| ServerConfig::default().data_dir),
        module_id: args.module,
        ace_learning: !args.no_learning,
        ..ServerConfig::default()
    };

    let state = AppState::from_config(config).context("failed to assemble server state")?;

    // Shared docs are authoritative on disk; their collection is rebuilt
    // from scratch on every start.
    let shared_docs = state.config.data_dir.join("shared_docs");
    if shared_docs.is_dir() {
        let _ = state.vector_store.delete_collection("rag_shared").await;
        let indexer = KnowledgeIndexer::new(
            "shared",
            state.embedder.clone(),
            state.vector_store.clone(),
        );
        match indexer.index_documentation(&shared_docs).await {
            Ok(stats) => tracing::info!(indexed = stats.indexed, "Shared docs rebuilt"),
            Err(e) => tracing::warn!(error = %e, "Shared docs rebuild failed"),
        }
    }

    coda_server::serve(state).await.context("server failed")?;
    Ok(())
}

async fn index(args: IndexArgs) -> Result<()> {
    let data_dir = args
        .data_dir
        .unwrap_or_else(|| ServerConfig::default().data_dir);
    std::fs::create_dir_all(&data_dir)?;
    let store = Store::open(data_dir.join("coda.db"))?;

    let vector_store: SharedVectorStore = if args.qdrant_url.is_empty() {
        Arc::new(MemoryVectorStore::new())
    } else {
        Arc::new(QdrantStore::new(args.qdrant_url)?)
    };
    let embedder: SharedEmbedder = Arc::new(OllamaEmbedder::new(
        args.model_url,
        args.embedding_model,
        args.embedding_dimensions,
    )?);

    let indexer = Arc::new(FileIndexer::new(
        args.workspace_id,
        args.module,
        args.workspace.clone(),
        embedder,
        vector_store,
        store,
    ));

    let stats = indexer.index_workspace().await?;
    println!(
        "indexed {} files ({} skipped, {} failed) in {}",
        stats.indexed,
        stats.skipped,
        stats.failed,
        args.workspace.display()
    );

    if args.watch {
        let mut watcher = WorkspaceWatcher::new(indexer);
        watcher.start().await?;
        tracing::info!("Watching for changes; press Ctrl-C to stop");
        tokio::signal::ctrl_c().await?;
        watcher.stop().await;
    }
    Ok(())
}
