//! # Hybrid RAG CLI (`hrag`)
//!
//! ## Usage
//!
//! ```bash
//! hrag --config ./config/hrag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `hrag init` | Create the SQLite database and run schema migrations |
//! | `hrag index <chunks.json> --collection NAME` | Embed and index a chunk file |
//! | `hrag search "<query>" --collection NAME` | Hybrid search with late-interaction re-rank |
//! | `hrag chat --collection NAME "<message>"` | Answer a message (or summarize) with Ollama |
//! | `hrag summarize --collection NAME` | Summarize the whole collection |
//! | `hrag stats` | Collections, point counts and aliases |
//! | `hrag drop --collection NAME` | Delete a collection or alias |
//!
//! Logs go to stderr and are filtered with `RUST_LOG`
//! (default `hybrid_rag=info,hybrid_rag_core=info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use hybrid_rag::{chat, config, index_cmd, migrate, search, stats};

/// Hybrid RAG CLI: dense + sparse prefetch with late-interaction re-ranking.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/hrag.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "hrag",
    about = "Hybrid RAG: dense + sparse retrieval with late-interaction re-ranking",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/hrag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Embed and index a chunk file.
    ///
    /// The file is a JSON array of objects with `text` (or `content`),
    /// optional `id` and `metadata`. The collection is recreated unless
    /// `--swap` is given.
    Index {
        /// Path to the chunk JSON file.
        path: PathBuf,

        /// Target collection.
        #[arg(long)]
        collection: String,

        /// Treat the collection name as an alias: build a fresh collection
        /// and re-point the alias only when every batch succeeded.
        #[arg(long)]
        swap: bool,
    },

    /// Hybrid search over a collection.
    Search {
        query: String,

        #[arg(long)]
        collection: String,

        /// Results to return (default: `retrieval.final_limit`).
        #[arg(long)]
        limit: Option<usize>,

        /// Candidates per prefetch (default: `retrieval.prefetch_limit`).
        #[arg(long)]
        prefetch: Option<usize>,
    },

    /// Answer one chat message against a collection.
    Chat {
        #[arg(long)]
        collection: String,

        message: String,
    },

    /// Summarize the whole collection.
    Summarize {
        #[arg(long)]
        collection: String,

        /// Print the collected document text instead of calling the model.
        #[arg(long)]
        context_only: bool,
    },

    /// Show collections, point counts and aliases.
    Stats {
        #[arg(long)]
        collection: Option<String>,
    },

    /// Delete a collection (or remove an alias).
    Drop {
        #[arg(long)]
        collection: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("hybrid_rag=info,hybrid_rag_core=info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Index {
            path,
            collection,
            swap,
        } => {
            index_cmd::run_index(&cfg, &path, &collection, swap).await?;
        }
        Commands::Search {
            query,
            collection,
            limit,
            prefetch,
        } => {
            search::run_search(&cfg, &query, &collection, limit, prefetch).await?;
        }
        Commands::Chat {
            collection,
            message,
        } => {
            chat::run_chat(&cfg, &collection, &message).await?;
        }
        Commands::Summarize {
            collection,
            context_only,
        } => {
            chat::run_summarize(&cfg, &collection, context_only).await?;
        }
        Commands::Stats { collection } => {
            stats::run_stats(&cfg, collection.as_deref()).await?;
        }
        Commands::Drop { collection } => {
            index_cmd::run_drop(&cfg, &collection).await?;
        }
    }

    Ok(())
}
