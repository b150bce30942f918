// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! One-shot optimization against a catalog file

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use oic_core::application::{GeneticOptimizer, OptimizationResult, SearchInput};
use oic_core::domain::catalog::CatalogSnapshot;
use oic_core::domain::connection::{ConnectionGraph, GraphDiff};
use oic_core::infrastructure::{CatalogFile, HeuristicPredictor};

use crate::embedded::{load_config, load_graph};

#[derive(Args)]
pub struct OptimizeArgs {
    /// Module catalog file (YAML with a `modules` list)
    #[arg(long, value_name = "FILE")]
    pub catalog: PathBuf,

    /// Currently deployed graph (YAML list of connections)
    #[arg(long, value_name = "FILE")]
    pub deployed: Option<PathBuf>,

    /// Random seed (overrides config and OIC_RANDOM_SEED)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Write the best graph to this file
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Yaml,
    Json,
}

#[derive(Serialize)]
struct OptimizeReport<'a> {
    result: &'a OptimizationResult,
    diff: &'a GraphDiff,
    excluded_modules: Vec<String>,
}

pub async fn execute(args: OptimizeArgs, config_path: Option<PathBuf>) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(seed) = args.seed {
        config.spec.optimizer.random_seed = Some(seed);
    }

    let catalog = CatalogFile::from_yaml_file(&args.catalog)?;
    let deployed = match &args.deployed {
        Some(path) => load_graph(path)?,
        None => ConnectionGraph::new(),
    };

    let snapshot = Arc::new(CatalogSnapshot::build(catalog.modules));
    let excluded_modules: Vec<String> = snapshot
        .excluded()
        .iter()
        .map(|e| format!("{}: {}", e.module_id, e.reason))
        .collect();

    let input = SearchInput::new(snapshot, Arc::new(HeuristicPredictor::default())).with_deployed(deployed.clone());
    let optimizer = GeneticOptimizer::from_spec(&config.spec);
    let result = tokio::task::spawn_blocking(move || optimizer.run(input))
        .await
        .context("Optimizer task failed")?;
    let diff = deployed.diff(&result.best);

    if let Some(path) = &args.output {
        let yaml = serde_yaml::to_string(&result.best).context("Failed to render graph")?;
        std::fs::write(path, yaml).with_context(|| format!("Failed to write graph to {:?}", path))?;
    }

    let report = OptimizeReport {
        result: &result,
        diff: &diff,
        excluded_modules,
    };
    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&report)?),
        OutputFormat::Text => print_text(&report),
    }

    Ok(())
}

fn print_text(report: &OptimizeReport<'_>) {
    let result = report.result;

    for excluded in &report.excluded_modules {
        println!("{} {}", "excluded".yellow(), excluded);
    }

    println!("{}", "Best connection graph:".bold());
    if result.best.is_empty() {
        println!("  {}", "(no connections)".dimmed());
    }
    for (key, params) in result.best.iter() {
        println!(
            "  {} via {} (rate limit {}, priority {:.2})",
            key.to_string().cyan(),
            params.protocol,
            params.rate_limit,
            params.priority
        );
    }
    println!();

    println!("  Fitness: {:.4} (deployed {:.4})", result.best_fitness, result.seed_fitness);
    println!(
        "  Found in generation {} of {} ({:?}), seed {}",
        result.generation_found, result.generations_run, result.termination, result.seed
    );
    if result.pruned_from_seed > 0 {
        println!("  Pruned from deployed graph: {}", result.pruned_from_seed);
    }
    println!();

    println!("{}", "Diff against deployed graph:".bold());
    if report.diff.is_empty() {
        println!("  {}", "(no changes)".dimmed());
    }
    for conn in &report.diff.additions {
        println!("  {} {}", "+".green(), conn.key);
    }
    for conn in &report.diff.removals {
        println!("  {} {}", "-".red(), conn.key);
    }
    for change in &report.diff.parameter_changes {
        println!("  {} {}", "~".yellow(), change.key);
    }
}
