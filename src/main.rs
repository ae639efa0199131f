//! # searchr CLI
//!
//! The `searchr` binary initializes the index, runs the HTTP server with
//! its notification-driven indexing pipeline, and offers one-shot commands
//! for backfill, search, retrieval and upload.
//!
//! ## Usage
//!
//! ```bash
//! searchr --config ./config/searchr.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `searchr init` | Create the full-text index (idempotent) |
//! | `searchr serve` | Start the HTTP API, watcher and pipeline |
//! | `searchr sync` | Index every object already in the bucket |
//! | `searchr search "<term>"` | Search document bodies |
//! | `searchr get <id>` | Print one indexed document version |
//! | `searchr upload <path>` | Upload a local file to the bucket |
//!
//! Log verbosity follows `RUST_LOG`; `--verbose` lowers the default to
//! `debug`.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use searchr::search::SearchArgs;
use searchr::{config, get, ingest, migrate, search, server, upload};

/// searchr: full-text search over an S3-compatible bucket.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/searchr.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "searchr",
    about = "Full-text search over documents stored in an S3-compatible bucket",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/searchr.toml")]
    config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the full-text index.
    ///
    /// Running it against an existing index is a no-op.
    Init,

    /// Start the HTTP server.
    ///
    /// Also subscribes to bucket notifications and indexes new objects
    /// until interrupted.
    Serve,

    /// Index every object currently in the bucket.
    Sync,

    /// Search document bodies.
    Search {
        /// Words that must all appear in the body.
        term: String,

        /// Number of hits to skip.
        #[arg(long, default_value_t = 0)]
        offset: usize,

        /// Maximum number of hits to print.
        #[arg(long, default_value_t = 10)]
        limit: usize,

        /// Fields to show, comma separated (key, url, size, created_at, body).
        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,

        /// Order by a sortable field: `size`, `size:asc` or `size:desc`.
        #[arg(long)]
        sort: Option<String>,
    },

    /// Print an indexed document version by id.
    Get {
        /// Version id (ETag).
        id: String,
    },

    /// Upload a local file into the bucket.
    Upload {
        /// File to upload.
        path: PathBuf,

        /// Object key. Defaults to the file name.
        #[arg(long)]
        key: Option<String>,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "searchr=debug" } else { "searchr=info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_init(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Sync => {
            ingest::run_sync(&cfg).await?;
        }
        Commands::Search {
            term,
            offset,
            limit,
            fields,
            sort,
        } => {
            let args = SearchArgs {
                term,
                offset,
                limit,
                fields,
                sort,
            };
            search::run_search(&cfg, args).await?;
        }
        Commands::Get { id } => {
            get::run_get(&cfg, &id).await?;
        }
        Commands::Upload { path, key } => {
            upload::run_upload(&cfg, &path, key).await?;
        }
    }

    Ok(())
}
