// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-process engine wiring
//!
//! Builds the catalog, sample store, deployment gateway, model registry and
//! orchestration loop from a configuration file and a catalog file.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use oic_core::{
    application::{ModelRegistry, OrchestrationLoop},
    domain::{connection::ConnectionGraph, engine_config::EngineConfigManifest},
    infrastructure::{
        event_bus::EventBus, CatalogFile, HeuristicPredictor, InMemoryDeploymentGateway, InMemoryModuleCatalog,
        InMemorySampleStore, LinearTrainer,
    },
};

/// Discover the engine configuration; overrides and validation are applied
/// by the loader.
pub fn load_config(config_path: Option<PathBuf>) -> Result<EngineConfigManifest> {
    EngineConfigManifest::load_or_default(config_path).context("Failed to load configuration")
}

/// A deployed graph file is a YAML list of connections.
pub fn load_graph(path: &Path) -> Result<ConnectionGraph> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read graph file {:?}", path))?;
    serde_yaml::from_str(&content).with_context(|| format!("Failed to parse graph file {:?}", path))
}

pub struct EmbeddedEngine {
    pub config: EngineConfigManifest,
    pub catalog: Arc<InMemoryModuleCatalog>,
    pub gateway: Arc<InMemoryDeploymentGateway>,
    pub samples: Arc<InMemorySampleStore>,
    pub registry: Arc<ModelRegistry>,
    pub event_bus: Arc<EventBus>,
    pub orchestrator: Arc<OrchestrationLoop>,
}

impl EmbeddedEngine {
    pub fn new(config: EngineConfigManifest, catalog_path: &Path, deployed_path: Option<&Path>) -> Result<Self> {
        let catalog_file = CatalogFile::from_yaml_file(catalog_path)?;
        let deployed = match deployed_path {
            Some(path) => load_graph(path)?,
            None => ConnectionGraph::new(),
        };

        let event_bus = Arc::new(EventBus::with_default_capacity());
        let catalog = Arc::new(InMemoryModuleCatalog::with_modules(catalog_file.modules));
        let gateway = Arc::new(InMemoryDeploymentGateway::with_graph(deployed.clone()));
        let samples = Arc::new(InMemorySampleStore::new(config.spec.predictor.sample_capacity));
        let registry = Arc::new(
            ModelRegistry::new(Arc::new(HeuristicPredictor::default())).with_event_bus(event_bus.clone()),
        );

        let orchestrator = OrchestrationLoop::new(
            &config.spec,
            catalog.clone(),
            gateway.clone(),
            samples.clone(),
            registry.clone(),
            event_bus.clone(),
        )
        .with_trainer(Arc::new(LinearTrainer::from_config(&config.spec.predictor)))
        .with_deployed(deployed);

        Ok(Self {
            config,
            catalog,
            gateway,
            samples,
            registry,
            event_bus,
            orchestrator: Arc::new(orchestrator),
        })
    }
}
