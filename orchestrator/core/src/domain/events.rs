// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::connection::EdgeKey;
use crate::domain::module::{ModuleId, ModuleStatus};
use crate::domain::predictor::ModelVersion;
use crate::domain::repository::EdgeRejection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Why an optimizer run was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    CatalogChange,
    Periodic,
    Manual,
}

/// Terminal state of the genetic search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// Best fitness stalled for the configured number of generations
    Converged,
    /// Generation budget reached
    BudgetExhausted,
    /// Wall-clock budget exceeded; best-so-far is returned
    TimedOut,
}

/// Published by the module catalog whenever its contents change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CatalogEvent {
    ModuleRegistered {
        module_id: ModuleId,
        registered_at: DateTime<Utc>,
    },
    ModuleUpdated {
        module_id: ModuleId,
        updated_at: DateTime<Utc>,
    },
    ModuleRemoved {
        module_id: ModuleId,
        removed_at: DateTime<Utc>,
    },
    StatusChanged {
        module_id: ModuleId,
        from: ModuleStatus,
        to: ModuleStatus,
        changed_at: DateTime<Utc>,
    },
}

impl CatalogEvent {
    pub fn module_id(&self) -> &ModuleId {
        match self {
            CatalogEvent::ModuleRegistered { module_id, .. }
            | CatalogEvent::ModuleUpdated { module_id, .. }
            | CatalogEvent::ModuleRemoved { module_id, .. }
            | CatalogEvent::StatusChanged { module_id, .. } => module_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OptimizationEvent {
    RunStarted {
        run_id: RunId,
        trigger: RunTrigger,
        module_count: usize,
        model_version: ModelVersion,
        started_at: DateTime<Utc>,
    },
    ModuleExcluded {
        run_id: RunId,
        module_id: ModuleId,
        reason: String,
        excluded_at: DateTime<Utc>,
    },
    RunCompleted {
        run_id: RunId,
        best_fitness: f64,
        deployed_fitness: f64,
        generation_found: usize,
        generations_run: usize,
        termination: TerminationReason,
        completed_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeploymentEvent {
    DiffApplied {
        run_id: RunId,
        additions: usize,
        removals: usize,
        parameter_changes: usize,
        fitness: f64,
        applied_at: DateTime<Utc>,
    },
    DiffSkipped {
        run_id: RunId,
        reason: String,
        skipped_at: DateTime<Utc>,
    },
    EdgesRejected {
        run_id: RunId,
        rejections: Vec<EdgeRejection>,
        rejected_at: DateTime<Utc>,
    },
    RolledBack {
        run_id: RunId,
        baseline_outcome: f64,
        realized_outcome: f64,
        poisoned: Vec<EdgeKey>,
        rolled_back_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModelEvent {
    ModelSwapped {
        from: ModelVersion,
        to: ModelVersion,
        family: String,
        trained_on: usize,
        swapped_at: DateTime<Utc>,
    },
    ModelRolledBack {
        from: ModelVersion,
        to: ModelVersion,
        rolled_back_at: DateTime<Utc>,
    },
}

impl OptimizationEvent {
    pub fn run_id(&self) -> RunId {
        match self {
            OptimizationEvent::RunStarted { run_id, .. }
            | OptimizationEvent::ModuleExcluded { run_id, .. }
            | OptimizationEvent::RunCompleted { run_id, .. } => *run_id,
        }
    }
}

impl DeploymentEvent {
    pub fn run_id(&self) -> RunId {
        match self {
            DeploymentEvent::DiffApplied { run_id, .. }
            | DeploymentEvent::DiffSkipped { run_id, .. }
            | DeploymentEvent::EdgesRejected { run_id, .. }
            | DeploymentEvent::RolledBack { run_id, .. } => *run_id,
        }
    }
}
