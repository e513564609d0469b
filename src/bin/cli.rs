//! Nutrition Harvester CLI
//!
//! Local execution entry point.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use harvester::{
    error::{AppError, Result},
    models::Config,
    pipeline::{self, RunOptions},
};
use tokio_util::sync::CancellationToken;

/// Restaurant nutrition harvester
#[derive(Parser, Debug)]
#[command(
    name = "harvester",
    version,
    about = "Resumable restaurant nutrition harvester"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "harvester.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl, normalize, validate and upload
    Run {
        /// Run identifier; completed units of the same run are skipped
        #[arg(long)]
        run_id: Option<String>,

        /// Only harvest this brand (repeatable, case-insensitive)
        #[arg(long = "brand")]
        brands: Vec<String>,

        /// Stop after this many brands
        #[arg(long)]
        max_restaurants: Option<usize>,

        /// Stop after this many items per brand
        #[arg(long)]
        max_items: Option<usize>,

        /// Keep entities and checkpoints in memory
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate the configuration file
    Validate,

    /// Show checkpoint counts for a run
    Status {
        /// Run identifier (default: current month)
        #[arg(long)]
        run_id: Option<String>,
    },
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool, configured: Option<&str>) {
    let level = if verbose {
        "debug"
    } else {
        configured.unwrap_or("info")
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Cancel the run on the first Ctrl-C. In-flight units finish or abort;
/// no new units start.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupt received, stopping after in-flight units");
            child.cancel();
        }
    });
    token
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let loaded = Config::load(&cli.config);
    init_logging(
        cli.verbose,
        loaded.as_ref().ok().map(|c| c.logging.level.as_str()),
    );

    match cli.command {
        Command::Validate => {
            log::info!("Validating {}...", cli.config.display());
            if let Err(e) = pipeline::run_validate(&cli.config) {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!("All validations passed!");
        }

        Command::Status { run_id } => {
            let config = config_or_default(loaded, &cli.config);
            let run_id = run_id.unwrap_or_else(pipeline::default_run_id);
            let status = pipeline::run_status(&config, &run_id).await?;
            if status.total() == 0 {
                log::info!("No checkpoints recorded for run {}", run_id);
            }
        }

        Command::Run {
            run_id,
            brands,
            max_restaurants,
            max_items,
            dry_run,
        } => {
            let mut config = config_or_default(loaded, &cli.config);
            if !brands.is_empty() {
                config.limits.brands = brands;
            }
            if max_restaurants.is_some() {
                config.limits.max_restaurants = max_restaurants;
            }
            if max_items.is_some() {
                config.limits.max_items_per_restaurant = max_items;
            }

            let config = Arc::new(config);
            let cancel = cancel_on_ctrl_c();
            let summary =
                pipeline::run_pipeline(config, RunOptions { run_id, dry_run }, cancel).await?;

            if summary.cancelled {
                return Err(AppError::Cancelled);
            }
            if !summary.is_complete() {
                log::warn!(
                    "Run {} finished with failed units; run again to resume",
                    summary.run_id
                );
            }
        }
    }

    log::info!("Done!");

    Ok(())
}

fn config_or_default(loaded: Result<Config>, path: &Path) -> Config {
    loaded.unwrap_or_else(|e| {
        log::warn!(
            "Config load failed from {}: {}. Using defaults.",
            path.display(),
            e
        );
        Config::default()
    })
}
