// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use oic_core::domain::engine_config::EngineConfigManifest;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,

        /// Print the effective configuration as YAML
        #[arg(long)]
        yaml: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./oic-config.yaml)
        #[arg(short, long, default_value = "./oic-config.yaml")]
        output: PathBuf,

        /// Include examples and comments
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths, yaml } => show(config_override, paths, yaml).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, examples } => generate(output, examples).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool, as_yaml: bool) -> Result<()> {
    let config = EngineConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. OIC_CONFIG_PATH: {}",
            std::env::var("OIC_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./oic-config.yaml");
        println!("  4. ~/.oic/config.yaml");
        println!("  5. /etc/oic/config.yaml");
        println!();
    }

    if as_yaml {
        print!("{}", serde_yaml::to_string(&config).context("Failed to render configuration")?);
        return Ok(());
    }

    println!("{}", "Current configuration:".bold());
    println!("  Name: {}", config.metadata.name);
    println!();

    let spec = &config.spec;
    println!("{}", "Optimizer:".bold());
    println!("  Population: {}", spec.optimizer.population_size);
    println!("  Generations: {}", spec.optimizer.generations);
    println!(
        "  Mutation / crossover: {} / {}",
        spec.optimizer.mutation_rate, spec.optimizer.crossover_rate
    );
    println!("  Tournament size: {}", spec.optimizer.tournament_size);
    println!(
        "  Stall window: {} generations (epsilon {})",
        spec.optimizer.stall_generations, spec.optimizer.convergence_epsilon
    );
    match spec.optimizer.random_seed {
        Some(seed) => println!("  Seed: {}", seed),
        None => println!("  Seed: {}", "(random)".dimmed()),
    }
    println!("  Run budget: {:?}", spec.optimizer.run_budget);
    println!();

    println!("{}", "Encoding:".bold());
    println!(
        "  Max connections per module: {}",
        spec.encoding.max_connections_per_module
    );
    println!("  Initial edge density: {}", spec.encoding.initial_edge_density);
    println!();

    println!("{}", "Fitness:".bold());
    match spec.fitness.target_edge_budget {
        Some(budget) => println!("  Edge budget: {}", budget),
        None => println!("  Edge budget: {}", "min(modules, valid slots)".dimmed()),
    }
    println!("  Budget penalty: {}", spec.fitness.edge_budget_penalty);
    println!("  Redundancy penalty: {}", spec.fitness.redundancy_penalty);
    println!();

    println!("{}", "Orchestration:".bold());
    println!("  Debounce: {:?}", spec.orchestration.debounce_window);
    println!("  Periodic interval: {:?}", spec.orchestration.periodic_interval);
    println!("  Min improvement: {}", spec.orchestration.min_improvement);
    println!("  Observation window: {:?}", spec.orchestration.observation_window);
    println!("  Poison cooldown: {:?}", spec.orchestration.poison_cooldown);
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    EngineConfigManifest::load_or_default(config_path).context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf, with_examples: bool) -> Result<()> {
    let sample = if with_examples {
        include_str!("../../templates/config-with-examples.yaml")
    } else {
        include_str!("../../templates/config-minimal.yaml")
    };

    std::fs::write(&output, sample).with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_templates_parse_and_validate() {
        for template in [
            include_str!("../../templates/config-minimal.yaml"),
            include_str!("../../templates/config-with-examples.yaml"),
        ] {
            let config = EngineConfigManifest::from_yaml_str(template).unwrap();
            config.validate().unwrap();
        }
    }
}
