// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod catalog;
pub mod deployment;
pub mod event_bus;
pub mod predictors;
pub mod sample_store;

pub use catalog::{CatalogFile, InMemoryModuleCatalog};
pub use deployment::InMemoryDeploymentGateway;
pub use predictors::{ConstantPredictor, HeuristicPredictor, LinearPredictor, LinearTrainer};
pub use sample_store::InMemorySampleStore;
