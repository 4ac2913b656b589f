//! # Knowledge Harness CLI (`kb`)
//!
//! The `kb` binary manages a local knowledge base: it ingests text into
//! slots, retrieves abbreviation-aware prompt context, and serves the same
//! operations over HTTP.
//!
//! ## Usage
//!
//! ```bash
//! kb --config ./config/kb.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kb init` | Create the `docs/` and `index/` directories |
//! | `kb add "<text>"` | Chunk, embed, and store text |
//! | `kb import <path>` | Import a `.txt`/`.json`/`.md` file or a directory |
//! | `kb context "<query>"` | Print retrieved context for a query |
//! | `kb list` | List stored chunks with their ordinals |
//! | `kb delete <ordinal>...` | Delete chunks and rebuild the index |
//! | `kb clear` | Clear one slot or everything |
//! | `kb stats` | Document counts and index state |
//! | `kb serve` | Start the HTTP server |
//!
//! Logs go to stderr and honor `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use knowledge_harness::{commands, config, server};

/// Knowledge Harness: a local knowledge base that retrieves prompt context
/// with abbreviation-aware reranking.
#[derive(Parser)]
#[command(name = "kb", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/kb.toml`. A missing file means all defaults.
    #[arg(long, global = true, default_value = "./config/kb.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the storage directories. Idempotent.
    Init,

    /// Ingest a piece of text.
    Add {
        /// The text to ingest.
        text: String,

        /// Target slot (default `general`).
        #[arg(long)]
        slot: Option<String>,

        /// Metadata as `key=value`; repeatable.
        #[arg(long = "meta", value_parser = parse_key_val)]
        meta: Vec<(String, String)>,
    },

    /// Import a file or every matching file under a directory.
    ///
    /// `.json` files hold `{content, metadata}` or an array of them; other
    /// files are ingested whole.
    Import {
        path: PathBuf,

        #[arg(long)]
        slot: Option<String>,
    },

    /// Retrieve context for a query.
    Context {
        query: String,

        /// Restrict to one slot.
        #[arg(long)]
        slot: Option<String>,

        /// Maximum number of chunks.
        #[arg(long)]
        k: Option<usize>,

        /// Minimum similarity in [-1, 1].
        #[arg(long)]
        threshold: Option<f32>,

        /// Print the accepted items as JSON instead of the context string.
        #[arg(long)]
        json: bool,
    },

    /// List stored chunks.
    List {
        #[arg(long)]
        slot: Option<String>,
    },

    /// Delete chunks by ordinal (see `kb list`).
    Delete {
        #[arg(required = true)]
        ordinals: Vec<usize>,
    },

    /// Clear one slot, or everything when no slot is given.
    Clear {
        #[arg(long)]
        slot: Option<String>,
    },

    /// Show document counts and index state.
    Stats,

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

/// Parse a `key=value` pair for `--meta` arguments.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config_or_default(&cli.config)?;

    match cli.command {
        Commands::Init => commands::run_init(&cfg)?,
        Commands::Add { text, slot, meta } => {
            commands::run_add(&cfg, &text, slot.as_deref(), meta)?
        }
        Commands::Import { path, slot } => commands::run_import(&cfg, &path, slot.as_deref())?,
        Commands::Context {
            query,
            slot,
            k,
            threshold,
            json,
        } => commands::run_context(&cfg, &query, slot, k, threshold, json)?,
        Commands::List { slot } => commands::run_list(&cfg, slot.as_deref())?,
        Commands::Delete { ordinals } => commands::run_delete(&cfg, &ordinals)?,
        Commands::Clear { slot } => commands::run_clear(&cfg, slot.as_deref())?,
        Commands::Stats => commands::run_stats(&cfg)?,
        Commands::Serve => {
            // The engine's HTTP providers block, so only the server gets a runtime.
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(server::run_server(&cfg))?;
        }
    }

    Ok(())
}
