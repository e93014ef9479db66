//! # Asset Pipeline CLI (`apx`)
//!
//! Runs the IT-asset transform stages against an Elasticsearch-compatible
//! store.
//!
//! ## Usage
//!
//! ```bash
//! apx --config ./config/apx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `apx ping` | Check that the store is reachable |
//! | `apx collections` | List collections with document counts |
//! | `apx transform` | Reindex, update fields, delete invalid, in that order |
//! | `apx reindex` | Migrate enriched documents into the target collection |
//! | `apx update-fields` | Patch derived fields into the source in place |
//! | `apx delete-invalid` | Delete source documents without a usable hostname |
//!
//! ## Examples
//!
//! ```bash
//! # Full workflow with the collections from the config file
//! apx transform --config ./config/apx.toml
//!
//! # Migrate into a differently named collection
//! apx reindex --source it_asset --target it_asset_2026
//!
//! # Machine-readable progress for a CI log
//! apx --progress json update-fields
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::warn;

use asset_pipeline::collections;
use asset_pipeline::config::{self, Config};
use asset_pipeline::logging::{self, Verbosity};
use asset_pipeline::progress::ProgressMode;
use asset_pipeline::store::elastic::ElasticStore;
use asset_pipeline::store::DocumentStore;
use asset_pipeline::workflow::{self, Stage, WorkflowOptions};

/// Batch transforms for the IT-asset inventory.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/apx.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "apx",
    about = "Enrich, migrate and clean IT-asset documents in an Elasticsearch-compatible store",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/apx.toml")]
    config: PathBuf,

    /// Progress output on stderr: `off`, `human` or `json`.
    ///
    /// Defaults to `human` when stderr is a terminal, otherwise `off`.
    #[arg(long, global = true, value_parser = parse_progress)]
    progress: Option<ProgressMode>,

    /// Debug-level logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Errors only.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the store is reachable.
    Ping,

    /// List collections and their document counts.
    Collections,

    /// Run reindex, update-fields and delete-invalid in sequence.
    ///
    /// A failing stage is reported and the next one still runs. An
    /// unreachable store stops the run before any stage.
    Transform {
        #[command(flatten)]
        collections: CollectionArgs,
    },

    /// Copy valid, enriched documents into the target collection.
    ///
    /// The target is created if missing. Running this twice writes every
    /// document twice.
    Reindex {
        #[command(flatten)]
        collections: CollectionArgs,
    },

    /// Patch `risk_level`, `system_age_years` and `last_updated_timestamp`
    /// into every source document.
    UpdateFields {
        /// Source collection (overrides `transform.source_collection`).
        #[arg(long)]
        source: Option<String>,
    },

    /// Delete source documents whose hostname is missing, empty or "Unknown".
    DeleteInvalid {
        /// Source collection (overrides `transform.source_collection`).
        #[arg(long)]
        source: Option<String>,
    },
}

#[derive(clap::Args)]
struct CollectionArgs {
    /// Source collection (overrides `transform.source_collection`).
    #[arg(long)]
    source: Option<String>,

    /// Target collection (overrides `transform.target_collection`).
    #[arg(long)]
    target: Option<String>,
}

fn parse_progress(s: &str) -> Result<ProgressMode, String> {
    ProgressMode::parse(s).ok_or_else(|| format!("invalid progress mode '{}' (off, human, json)", s))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_subscriber(Verbosity::from_flags(cli.verbose, cli.quiet));

    let mut cfg = config::load_config(&cli.config)?;
    let stages = match &cli.command {
        Commands::Ping | Commands::Collections => Vec::new(),
        Commands::Transform { collections } => {
            apply_overrides(&mut cfg, collections.source.as_ref(), collections.target.as_ref());
            Stage::ALL.to_vec()
        }
        Commands::Reindex { collections } => {
            apply_overrides(&mut cfg, collections.source.as_ref(), collections.target.as_ref());
            vec![Stage::Reindex]
        }
        Commands::UpdateFields { source } => {
            apply_overrides(&mut cfg, source.as_ref(), None);
            vec![Stage::UpdateFields]
        }
        Commands::DeleteInvalid { source } => {
            apply_overrides(&mut cfg, source.as_ref(), None);
            vec![Stage::DeleteInvalid]
        }
    };
    config::validate(&cfg).context("Invalid collection override")?;
    if stages.contains(&Stage::Reindex) {
        config::validate_migration(&cfg.transform).context("Invalid collection override")?;
    }

    let store = ElasticStore::open(&cfg.store)?;
    let result = run(&cli, &cfg, &store, &stages).await;
    if let Err(e) = store.close().await {
        warn!(error = %e, "failed to release store resources");
    }
    result
}

async fn run(
    cli: &Cli,
    cfg: &Config,
    store: &ElasticStore,
    stages: &[Stage],
) -> anyhow::Result<()> {
    match cli.command {
        Commands::Ping => {
            store.ping().await?;
            println!("{}: ok", store.describe());
        }
        Commands::Collections => {
            store.ping().await?;
            collections::list_collections(store).await?;
        }
        _ => {
            if stages.is_empty() {
                bail!("no stage selected");
            }
            let progress = cli
                .progress
                .unwrap_or_else(ProgressMode::default_for_tty)
                .reporter();
            let options = WorkflowOptions::from_config(&cfg.transform);
            let summary = workflow::run_stages(store, &options, stages, progress.as_ref()).await?;
            print!("{}", workflow::render_summary(&options, &summary));
        }
    }
    Ok(())
}

fn apply_overrides(cfg: &mut Config, source: Option<&String>, target: Option<&String>) {
    if let Some(source) = source {
        cfg.transform.source_collection = source.clone();
    }
    if let Some(target) = target {
        cfg.transform.target_collection = target.clone();
    }
}
