// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Long-running orchestration loop

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use tracing::{info, warn};

use oic_core::domain::events::{DeploymentEvent, OptimizationEvent};
use oic_core::infrastructure::event_bus::{DomainEvent, EventBusError};

use crate::embedded::{load_config, EmbeddedEngine};

#[derive(Args)]
pub struct RunArgs {
    /// Module catalog file (YAML with a `modules` list)
    #[arg(long, value_name = "FILE")]
    pub catalog: PathBuf,

    /// Graph already live in the deployment layer
    #[arg(long, value_name = "FILE")]
    pub deployed: Option<PathBuf>,
}

pub async fn execute(args: RunArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    let engine = EmbeddedEngine::new(config, &args.catalog, args.deployed.as_deref())?;
    info!(
        name = %engine.config.metadata.name,
        modules = engine.catalog.len(),
        "Starting connection optimization engine"
    );

    let mut events = engine.event_bus.subscribe();
    let reporter = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => report(&event),
                Err(EventBusError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
    });

    let token = engine.orchestrator.shutdown_token();
    let handle = engine.orchestrator.clone().start();

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    info!("Interrupt received, shutting down");
    token.cancel();
    handle.await.context("Orchestration loop panicked")?;
    reporter.abort();

    let live = engine.gateway.live_graph();
    info!(edges = live.len(), "Final deployed graph");
    Ok(())
}

fn report(event: &DomainEvent) {
    match event {
        DomainEvent::Optimization(OptimizationEvent::RunCompleted {
            run_id,
            best_fitness,
            deployed_fitness,
            termination,
            ..
        }) => info!(%run_id, best_fitness, deployed_fitness, ?termination, "Run completed"),
        DomainEvent::Deployment(DeploymentEvent::DiffApplied {
            run_id,
            additions,
            removals,
            parameter_changes,
            ..
        }) => info!(%run_id, additions, removals, parameter_changes, "Diff applied"),
        DomainEvent::Deployment(DeploymentEvent::RolledBack { run_id, poisoned, .. }) => {
            warn!(%run_id, poisoned = poisoned.len(), "Diff rolled back")
        }
        _ => {}
    }
}
