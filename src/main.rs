//! # relindex CLI
//!
//! ## Usage
//!
//! ```bash
//! relindex --config ./config/relindex.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `relindex index <bundle>` | Index a bundle, newest entities first |
//! | `relindex index-item <bundle> <id>` | Index or refresh one entity |
//! | `relindex remove-item <bundle> <id>` | Remove one document |
//! | `relindex remove-index <bundle>` | Delete the bundle's physical index |
//! | `relindex alias <bundle>` | Point the bundle alias at its index |
//! | `relindex bundles` | List configured bundles |
//! | `relindex completions <shell>` | Print shell completions |
//!
//! ## Examples
//!
//! ```bash
//! # Rebuild under a new tag, then swap the alias
//! relindex index report --chunk-size 200
//! relindex alias report
//!
//! # Resume an interrupted run from the last logged cursor
//! relindex index report --offset 18342
//!
//! # Only published reports about two countries
//! relindex index report --filter "status:1+country:12,45"
//! ```

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use relindex::commands;
use relindex::config;
use relindex::progress::ProgressMode;
use relindex::IndexOptions;

/// relindex: incremental exporter from a relational content store into a
/// search engine.
#[derive(Parser)]
#[command(name = "relindex", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/relindex.toml")]
    config: PathBuf,

    /// Log at debug level (overridden by `RUST_LOG`).
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Progress output on stderr. Defaults to `human` on a terminal.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Index a bundle from its most recent entity downwards.
    ///
    /// Each chunk logs the cursor it stopped at; pass it back with
    /// `--offset` to resume an interrupted run.
    Index {
        bundle: String,

        /// Start at this id instead of the most recent one.
        #[arg(long)]
        offset: Option<i64>,

        /// Maximum number of documents to index.
        #[arg(long)]
        limit: Option<u64>,

        /// Documents per bulk request (defaults to `index.chunk_size`).
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Filter expression: `field:v1,v2+field2:v3`, `*` for "present".
        #[arg(long)]
        filter: Option<String>,

        /// Resolve cursor and document count without indexing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Index or refresh a single entity.
    IndexItem { bundle: String, id: i64 },

    /// Remove a single document from the bundle's index.
    RemoveItem { bundle: String, id: i64 },

    /// Delete the bundle's physical index.
    RemoveIndex { bundle: String },

    /// Point the bundle alias at its physical index.
    Alias {
        bundle: String,

        /// Detach the alias instead.
        #[arg(long)]
        remove: bool,
    },

    /// List configured bundles and their reference dependencies.
    Bundles,

    /// Print shell completions to stdout.
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("relindex={}", default_level)));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Completions { shell } = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "relindex", &mut std::io::stdout());
        return Ok(());
    }

    init_tracing(cli.verbose);
    let cfg = config::load_config(&cli.config)?;
    let progress = cli
        .progress
        .map(ProgressMode::from)
        .unwrap_or_else(ProgressMode::default_for_tty);

    match cli.command {
        Commands::Index {
            bundle,
            offset,
            limit,
            chunk_size,
            filter,
            dry_run,
        } => {
            let options = IndexOptions {
                offset,
                limit,
                chunk_size,
                filter,
                dry_run,
            };
            commands::run_index(&cfg, &bundle, options, progress).await?;
        }
        Commands::IndexItem { bundle, id } => {
            commands::run_index_item(&cfg, &bundle, id).await?;
        }
        Commands::RemoveItem { bundle, id } => {
            commands::run_remove_item(&cfg, &bundle, id).await?;
        }
        Commands::RemoveIndex { bundle } => {
            commands::run_remove_index(&cfg, &bundle).await?;
        }
        Commands::Alias { bundle, remove } => {
            commands::run_alias(&cfg, &bundle, remove).await?;
        }
        Commands::Bundles => {
            commands::run_bundles(&cfg)?;
        }
        Commands::Completions { .. } => unreachable!(),
    }

    Ok(())
}
