// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # OIC - Connection Optimization Engine CLI
//!
//! The `oic` binary decides which registered modules should be linked, and
//! with what parameters.
//!
//! ## Commands
//!
//! - `oic config show|validate|generate` - Configuration management
//! - `oic optimize --catalog FILE` - One-shot genetic search, prints the best graph and diff
//! - `oic run --catalog FILE` - Long-running orchestration loop until Ctrl-C

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::path::PathBuf;
use tracing::info;

use oic_cli::commands::{self, ConfigCommand, OptimizeArgs, RunArgs};
use oic_core::domain::engine_config::EngineConfigManifest;

/// OIC - Optimize module interconnections
#[derive(Parser)]
#[command(name = "oic")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "OIC_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "OIC_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Run the optimizer once against a catalog file
    #[command(name = "optimize")]
    Optimize(OptimizeArgs),

    /// Run the orchestration loop until interrupted
    #[command(name = "run")]
    Run(RunArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    match cli.command {
        Some(Commands::Config { command }) => commands::config::handle_command(command, cli.config).await,
        Some(Commands::Optimize(args)) => commands::optimize::execute(args, cli.config).await,
        Some(Commands::Run(args)) => {
            init_metrics(cli.config.clone())?;
            commands::run::execute(args, cli.config).await
        }
        None => {
            // No command provided - show help
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}

/// Install the Prometheus exporter when the configuration enables it
fn init_metrics(config_path: Option<PathBuf>) -> Result<()> {
    let config = EngineConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;
    let Some(metrics_config) = config
        .spec
        .observability
        .as_ref()
        .and_then(|o| o.metrics.as_ref())
        .filter(|m| m.enabled)
    else {
        return Ok(());
    };

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], metrics_config.port))
        .install()
        .context("Failed to install Prometheus exporter")?;

    metrics::describe_counter!("oic_optimizer_runs_total", "Completed genetic searches");
    metrics::describe_counter!("oic_diffs_applied_total", "Connection diffs accepted by the deployment layer");
    metrics::describe_counter!("oic_apply_rejections_total", "Diff entries rejected by the deployment layer");
    metrics::describe_counter!("oic_rollbacks_total", "Applied diffs rolled back after a regression");
    metrics::describe_gauge!("oic_optimizer_best_fitness", "Best fitness of the last search");
    metrics::describe_histogram!("oic_optimizer_run_duration_seconds", "Wall-clock duration of a search");

    info!(port = metrics_config.port, "Prometheus exporter listening");
    Ok(())
}
