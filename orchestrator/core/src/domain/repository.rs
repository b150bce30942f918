// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # External Collaborator Interfaces
//!
//! Contracts for everything the engine talks to but does not own, defined in
//! the domain layer and implemented in `crate::infrastructure`.
//!
//! | Trait | Collaborator | Implementations |
//! |-------|--------------|----------------|
//! | `ModuleCatalog` | registration subsystem (read side) | `InMemoryModuleCatalog` |
//! | `SampleStore` | compatibility sample persistence | `InMemorySampleStore` |
//! | `DeploymentGateway` | deployment layer applying diffs | `InMemoryDeploymentGateway` |
//!
//! Document-store backed implementations plug in behind the same traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::domain::connection::{EdgeKey, GraphDiff};
use crate::domain::events::CatalogEvent;
use crate::domain::module::{Module, ModuleId};
use crate::domain::sample::{CompatibilitySample, SampleWindow};

/// Read side of the module registry.
#[async_trait]
pub trait ModuleCatalog: Send + Sync {
    /// List every registered module
    async fn list_modules(&self) -> Result<Vec<Module>, CatalogError>;

    /// Find module by ID
    async fn get_module(&self, id: &ModuleId) -> Result<Option<Module>, CatalogError>;

    /// Receive change notifications; used to trigger reruns
    fn subscribe_to_changes(&self) -> broadcast::Receiver<CatalogEvent>;
}

/// Rolling store of compatibility samples used for retraining and for
/// regression detection.
#[async_trait]
pub trait SampleStore: Send + Sync {
    async fn record_sample(&self, sample: CompatibilitySample) -> Result<(), SampleStoreError>;

    async fn query_samples(&self, window: SampleWindow) -> Result<Vec<CompatibilitySample>, SampleStoreError>;

    /// Number of samples recorded at or after `since`
    async fn count_since(&self, since: DateTime<Utc>) -> Result<usize, SampleStoreError>;
}

/// Deployment layer that applies incremental graph changes.
#[async_trait]
pub trait DeploymentGateway: Send + Sync {
    /// Apply a diff atomically. Rejections name each offending edge so the
    /// caller can retry the rest and target rollbacks precisely.
    async fn apply_diff(&self, diff: &GraphDiff) -> Result<(), ApplyError>;
}

/// One edge the deployment layer refused, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRejection {
    pub key: EdgeKey,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApplyError {
    #[error("deployment rejected {} edge(s)", .0.len())]
    Rejected(Vec<EdgeRejection>),

    #[error("deployment layer unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CatalogError {
    #[error("Module not found: {0}")]
    NotFound(ModuleId),

    #[error("Invalid registration: {0}")]
    InvalidRegistration(String),

    #[error("Catalog unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SampleStoreError {
    #[error("Sample store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for SampleStoreError {
    fn from(err: serde_json::Error) -> Self {
        SampleStoreError::Serialization(err.to_string())
    }
}
