// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Orchestration Loop - decides when to re-optimize and applies results safely
//!
//! Runs the genetic optimizer on catalog changes (debounced) or on a periodic
//! tick, diffs the best candidate against the deployed graph and hands the
//! diff to the deployment layer only when it beats the deployed graph by more
//! than the minimum-improvement threshold.
//!
//! After an apply the changed edges are observed: if their realized samples
//! regress past the tolerance, the inverse diff is applied and the edges are
//! poisoned for a cooldown. Every applied diff keeps its own observation
//! window; a later diff only takes over the edges it touches again.
//!
//! One run-level lock serializes optimize-and-apply and rollback, so at most
//! one optimizer run and one diff apply are ever in flight.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Trigger, diff, apply, rollback

use crate::application::model_registry::{ModelRegistry, RetrainPolicy};
use crate::application::optimizer::{GeneticOptimizer, SearchInput};
use crate::domain::catalog::{CatalogSnapshot, ExcludedModule};
use crate::domain::connection::{ConnectionGraph, DiffError, EdgeKey, GraphDiff};
use crate::domain::engine_config::{EngineConfigSpec, OrchestrationConfig, PredictorConfig};
use crate::domain::events::{DeploymentEvent, OptimizationEvent, RunId, RunTrigger, TerminationReason};
use crate::domain::predictor::{score, CompatibilityPredictor, ModelTrainer, ModelVersion, PairFeatures, PredictionContext};
use crate::domain::repository::{
    ApplyError, CatalogError, DeploymentGateway, EdgeRejection, ModuleCatalog, SampleStore, SampleStoreError,
};
use crate::domain::sample::{CompatibilitySample, OutcomeMetrics, SampleId, SampleWindow};
use crate::infrastructure::event_bus::EventBus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Apply attempts per run; each retry drops the entries rejected so far.
const MAX_APPLY_ATTEMPTS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    SampleStore(#[from] SampleStoreError),

    #[error(transparent)]
    Deployment(#[from] ApplyError),

    #[error("rollback failed: {0}")]
    Rollback(ApplyError),

    #[error("deployed graph drifted from the accepted diffs: {0}")]
    StateDrift(#[from] DiffError),

    #[error("optimizer task failed: {0}")]
    OptimizerTask(String),
}

/// Edges temporarily excluded from random initialization and mutation.
#[derive(Debug, Clone, Default)]
pub struct PoisonList {
    entries: BTreeMap<EdgeKey, DateTime<Utc>>,
}

impl PoisonList {
    /// Poison `key` until `until`, extending an existing entry if later.
    pub fn poison(&mut self, key: EdgeKey, until: DateTime<Utc>) {
        let entry = self.entries.entry(key).or_insert(until);
        if *entry < until {
            *entry = until;
        }
    }

    pub fn is_poisoned_at(&self, key: &EdgeKey, now: DateTime<Utc>) -> bool {
        self.entries.get(key).is_some_and(|until| *until > now)
    }

    pub fn active_at(&self, now: DateTime<Utc>) -> BTreeSet<EdgeKey> {
        self.entries
            .iter()
            .filter(|(_, until)| **until > now)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn purge(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, until| *until > now);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// An applied diff under observation for regressions.
#[derive(Debug, Clone)]
struct Observation {
    run_id: RunId,
    applied: GraphDiff,
    applied_at: DateTime<Utc>,
    window_end: DateTime<Utc>,
    baseline: f64,
}

impl Observation {
    fn watched_edges(&self) -> BTreeSet<EdgeKey> {
        self.applied
            .additions
            .iter()
            .map(|c| c.key.clone())
            .chain(self.applied.parameter_changes.iter().map(|c| c.key.clone()))
            .collect()
    }

    /// Drop the entries `later` touches again. Returns `false` once no
    /// added or changed edge is left to watch.
    fn release(&mut self, later: &GraphDiff) -> bool {
        self.applied = self.applied.without(&later.touched_keys());
        !self.watched_edges().is_empty()
    }
}

#[derive(Debug, Default)]
struct DeploymentState {
    deployed: ConnectionGraph,
    poisoned: PoisonList,
    /// Entries the deployment layer refused in the last run
    pending: Vec<EdgeRejection>,
    /// Target state of the refused entries, offered to the next run
    pending_edges: ConnectionGraph,
    /// Open observation windows, oldest first
    observations: Vec<Observation>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum CycleDecision {
    /// The improved graph was (at least partly) deployed
    Applied,
    /// No improvement, but edges to departed modules were removed
    Pruned,
    Skipped { reason: String },
}

/// What one optimize-and-apply cycle did.
#[derive(Debug, Clone, Serialize)]
pub struct CycleOutcome {
    pub run_id: RunId,
    pub trigger: RunTrigger,
    pub model_version: ModelVersion,
    pub best_fitness: f64,
    pub deployed_fitness: f64,
    pub generation_found: usize,
    pub generations_run: usize,
    pub termination: TerminationReason,
    /// Plan computed against the deployed graph
    pub diff: GraphDiff,
    /// Portion the deployment layer accepted
    pub applied: GraphDiff,
    pub decision: CycleDecision,
    pub rejections: Vec<EdgeRejection>,
    pub excluded_modules: Vec<ExcludedModule>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollbackReport {
    pub run_id: RunId,
    pub baseline_outcome: f64,
    pub realized_outcome: f64,
    pub poisoned: Vec<EdgeKey>,
}

pub struct OrchestrationLoop {
    catalog: Arc<dyn ModuleCatalog>,
    gateway: Arc<dyn DeploymentGateway>,
    samples: Arc<dyn SampleStore>,
    registry: Arc<ModelRegistry>,
    trainer: Option<Arc<dyn ModelTrainer>>,
    optimizer: GeneticOptimizer,
    config: OrchestrationConfig,
    predictor_config: PredictorConfig,
    event_bus: Arc<EventBus>,
    state: Mutex<DeploymentState>,
    shutdown_token: CancellationToken,
}

impl OrchestrationLoop {
    pub fn new(
        spec: &EngineConfigSpec,
        catalog: Arc<dyn ModuleCatalog>,
        gateway: Arc<dyn DeploymentGateway>,
        samples: Arc<dyn SampleStore>,
        registry: Arc<ModelRegistry>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            catalog,
            gateway,
            samples,
            registry,
            trainer: None,
            optimizer: GeneticOptimizer::from_spec(spec),
            config: spec.orchestration.clone(),
            predictor_config: spec.predictor.clone(),
            event_bus,
            state: Mutex::new(DeploymentState::default()),
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Enable periodic retraining between runs.
    pub fn with_trainer(mut self, trainer: Arc<dyn ModelTrainer>) -> Self {
        self.trainer = Some(trainer);
        self
    }

    /// Start from a graph that is already live.
    pub fn with_deployed(mut self, deployed: ConnectionGraph) -> Self {
        self.state.get_mut().deployed = deployed;
        self
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub async fn deployed_graph(&self) -> ConnectionGraph {
        self.state.lock().await.deployed.clone()
    }

    pub async fn pending(&self) -> Vec<EdgeRejection> {
        self.state.lock().await.pending.clone()
    }

    pub async fn poisoned_at(&self, now: DateTime<Utc>) -> BTreeSet<EdgeKey> {
        self.state.lock().await.poisoned.active_at(now)
    }

    /// Record telemetry observed on a deployed edge as a compatibility
    /// sample. Returns `None` when the pair can no longer be described
    /// (module gone or missing fields).
    pub async fn record_outcome(
        &self,
        edge: &EdgeKey,
        outcome: OutcomeMetrics,
        at: DateTime<Utc>,
    ) -> Result<Option<SampleId>, OrchestrationError> {
        let context = {
            let state = self.state.lock().await;
            match state.deployed.get(edge) {
                Some(params) => PredictionContext::for_params(params),
                None => {
                    debug!(edge = %edge, "Ignoring outcome for an edge that is not deployed");
                    return Ok(None);
                }
            }
        };

        let source = self.catalog.get_module(&edge.source).await?;
        let target = self.catalog.get_module(&edge.target).await?;
        let (Some(source), Some(target)) = (source, target) else {
            return Ok(None);
        };
        let Some(features) = PairFeatures::extract(&source, &target, &context) else {
            return Ok(None);
        };

        let sample = CompatibilitySample::new(features, outcome, at);
        let sample_id = sample.sample_id;
        self.samples.record_sample(sample).await?;
        Ok(Some(sample_id))
    }

    /// Run the optimizer once and apply its result if it is worth it.
    pub async fn run_once(&self, trigger: RunTrigger) -> Result<CycleOutcome, OrchestrationError> {
        let mut state = self.state.lock().await;
        let run_id = RunId::new();
        let now = Utc::now();
        state.poisoned.purge(now);

        let snapshot = Arc::new(CatalogSnapshot::build(self.catalog.list_modules().await?));
        let active = self.registry.current();

        self.event_bus.publish_optimization_event(OptimizationEvent::RunStarted {
            run_id,
            trigger,
            module_count: snapshot.len(),
            model_version: active.version,
            started_at: now,
        });
        for excluded in snapshot.excluded() {
            metrics::counter!("oic_modules_excluded_total").increment(1);
            warn!(run_id = %run_id, module_id = %excluded.module_id, reason = %excluded.reason, "Module excluded from run");
            self.event_bus.publish_optimization_event(OptimizationEvent::ModuleExcluded {
                run_id,
                module_id: excluded.module_id.clone(),
                reason: excluded.reason.clone(),
                excluded_at: now,
            });
        }

        let mut input = SearchInput::new(snapshot.clone(), active.model.clone())
            .with_deployed(state.deployed.clone())
            .with_poisoned(state.poisoned.active_at(now));
        if !state.pending_edges.is_empty() {
            let mut hint = state.deployed.clone();
            for (key, params) in state.pending_edges.iter() {
                hint.insert(key.clone(), params.clone());
            }
            input = input.with_hint(hint);
        }
        let optimizer = self.optimizer.clone();
        let result = tokio::task::spawn_blocking(move || optimizer.run(input))
            .await
            .map_err(|e| OrchestrationError::OptimizerTask(e.to_string()))?;

        self.event_bus.publish_optimization_event(OptimizationEvent::RunCompleted {
            run_id,
            best_fitness: result.best_fitness,
            deployed_fitness: result.seed_fitness,
            generation_found: result.generation_found,
            generations_run: result.generations_run,
            termination: result.termination,
            completed_at: Utc::now(),
        });

        let improvement = result.best_fitness - result.seed_fitness;
        let (plan, decision) = if improvement > self.config.min_improvement {
            (state.deployed.diff(&result.best), CycleDecision::Applied)
        } else {
            // The seed graph is the deployed graph minus what this catalog
            // no longer supports; that part is applied regardless.
            let prune = state.deployed.diff(&result.seed_graph);
            if prune.is_empty() {
                let reason = if result.is_status_quo() {
                    "no candidate improved on the deployed graph".to_string()
                } else {
                    format!(
                        "improvement {:.4} does not exceed threshold {:.4}",
                        improvement, self.config.min_improvement
                    )
                };
                (prune, CycleDecision::Skipped { reason })
            } else {
                (prune, CycleDecision::Pruned)
            }
        };

        let mut outcome = CycleOutcome {
            run_id,
            trigger,
            model_version: active.version,
            best_fitness: result.best_fitness,
            deployed_fitness: result.seed_fitness,
            generation_found: result.generation_found,
            generations_run: result.generations_run,
            termination: result.termination,
            diff: plan.clone(),
            applied: GraphDiff::default(),
            decision,
            rejections: Vec::new(),
            excluded_modules: snapshot.excluded().to_vec(),
        };

        if let CycleDecision::Skipped { reason } = &outcome.decision {
            info!(run_id = %run_id, best_fitness = result.best_fitness, deployed_fitness = result.seed_fitness, "Skipping apply: {}", reason);
            state.pending.clear();
            state.pending_edges = ConnectionGraph::new();
            self.event_bus.publish_deployment_event(DeploymentEvent::DiffSkipped {
                run_id,
                reason: reason.clone(),
                skipped_at: Utc::now(),
            });
            return Ok(outcome);
        }

        let (applied, rejections) = self.apply_with_retry(&plan).await?;
        let applied_at = Utc::now();

        if !rejections.is_empty() {
            metrics::counter!("oic_apply_rejections_total").increment(rejections.len() as u64);
            let until = applied_at + cooldown(self.config.poison_cooldown);
            for rejection in &rejections {
                warn!(run_id = %run_id, edge = %rejection.key, reason = %rejection.reason, "Deployment rejected edge; left pending");
                state.poisoned.poison(rejection.key.clone(), until);
            }
            self.event_bus.publish_deployment_event(DeploymentEvent::EdgesRejected {
                run_id,
                rejections: rejections.clone(),
                rejected_at: applied_at,
            });
        }
        let rejected: BTreeSet<&EdgeKey> = rejections.iter().map(|r| &r.key).collect();
        state.pending_edges = plan
            .additions
            .iter()
            .map(|c| (c.key.clone(), c.params.clone()))
            .chain(plan.parameter_changes.iter().map(|c| (c.key.clone(), c.to.clone())))
            .filter(|(key, _)| rejected.contains(key))
            .collect();
        state.pending = rejections.clone();
        outcome.rejections = rejections;

        if applied.is_empty() {
            let reason = "deployment rejected every entry of the diff".to_string();
            self.event_bus.publish_deployment_event(DeploymentEvent::DiffSkipped {
                run_id,
                reason: reason.clone(),
                skipped_at: applied_at,
            });
            outcome.decision = CycleDecision::Skipped { reason };
            return Ok(outcome);
        }

        let previous = state.deployed.clone();
        state.deployed.apply(&applied)?;
        state.observations.retain_mut(|open| open.release(&applied));

        let baseline = self
            .baseline_outcome(&previous, &applied, &snapshot, &active.model, applied_at)
            .await?;
        let observation = Observation {
            run_id,
            applied: applied.clone(),
            applied_at,
            window_end: applied_at + cooldown(self.config.observation_window),
            baseline,
        };
        if !observation.watched_edges().is_empty() {
            state.observations.push(observation);
        }

        metrics::counter!("oic_diffs_applied_total").increment(1);
        info!(
            run_id = %run_id,
            additions = applied.additions.len(),
            removals = applied.removals.len(),
            parameter_changes = applied.parameter_changes.len(),
            fitness = result.best_fitness,
            "Applied connection diff"
        );
        self.event_bus.publish_deployment_event(DeploymentEvent::DiffApplied {
            run_id,
            additions: applied.additions.len(),
            removals: applied.removals.len(),
            parameter_changes: applied.parameter_changes.len(),
            fitness: result.best_fitness,
            applied_at,
        });

        outcome.applied = applied;
        Ok(outcome)
    }

    /// Apply `plan`, retrying the unaffected portion after rejections.
    /// Returns the accepted portion and every rejection seen.
    async fn apply_with_retry(
        &self,
        plan: &GraphDiff,
    ) -> Result<(GraphDiff, Vec<EdgeRejection>), OrchestrationError> {
        let mut rejected: BTreeSet<EdgeKey> = BTreeSet::new();
        let mut rejections = Vec::new();
        let mut attempt = plan.clone();

        for _ in 0..MAX_APPLY_ATTEMPTS {
            if attempt.is_empty() {
                break;
            }
            match self.gateway.apply_diff(&attempt).await {
                Ok(()) => return Ok((attempt, rejections)),
                Err(ApplyError::Rejected(batch)) => {
                    for rejection in batch {
                        if rejected.insert(rejection.key.clone()) {
                            rejections.push(rejection);
                        }
                    }
                    attempt = plan.without(&rejected);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok((GraphDiff::default(), rejections))
    }

    /// Realized outcome of the previous graph before the apply, or the
    /// model's expectation for the changed edges when no samples exist.
    async fn baseline_outcome(
        &self,
        previous: &ConnectionGraph,
        applied: &GraphDiff,
        snapshot: &CatalogSnapshot,
        model: &Arc<dyn CompatibilityPredictor>,
        applied_at: DateTime<Utc>,
    ) -> Result<f64, OrchestrationError> {
        let window = SampleWindow::between(applied_at - cooldown(self.config.observation_window), applied_at);
        let before: Vec<f64> = self
            .samples
            .query_samples(window)
            .await?
            .iter()
            .filter(|s| previous.contains(&s.edge))
            .map(|s| self.predictor_config.normalization.realized(&s.outcome))
            .collect();
        if let Some(mean) = mean(&before) {
            return Ok(mean);
        }

        let expected: Vec<f64> = applied
            .additions
            .iter()
            .map(|c| (&c.key, &c.params))
            .chain(applied.parameter_changes.iter().map(|c| (&c.key, &c.to)))
            .filter_map(|(key, params)| {
                let source = snapshot.get(&key.source)?;
                let target = snapshot.get(&key.target)?;
                Some(score(model.as_ref(), source, target, &PredictionContext::for_params(params)).score)
            })
            .collect();
        Ok(mean(&expected).unwrap_or(0.0))
    }

    pub async fn check_regression(&self) -> Result<Vec<RollbackReport>, OrchestrationError> {
        self.check_regression_at(Utc::now()).await
    }

    /// Close every observation window that has ended by `now`, rolling back
    /// each diff whose realized outcome fell below its baseline by more than
    /// the tolerance. Windows still open are left untouched.
    pub async fn check_regression_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<RollbackReport>, OrchestrationError> {
        let mut state = self.state.lock().await;
        let (due, open): (Vec<Observation>, Vec<Observation>) = std::mem::take(&mut state.observations)
            .into_iter()
            .partition(|o| o.window_end <= now);
        state.observations = open;

        let mut reports = Vec::new();
        let mut due = due.into_iter();
        while let Some(observation) = due.next() {
            match self.close_observation(&mut *state, &observation, now).await {
                Ok(Some(report)) => reports.push(report),
                Ok(None) => {}
                Err(e) => {
                    // Keep the unresolved windows for the next tick
                    state.observations.push(observation);
                    state.observations.extend(due);
                    return Err(e);
                }
            }
        }
        Ok(reports)
    }

    async fn close_observation(
        &self,
        state: &mut DeploymentState,
        observation: &Observation,
        now: DateTime<Utc>,
    ) -> Result<Option<RollbackReport>, OrchestrationError> {
        let watched = observation.watched_edges();
        let realized: Vec<f64> = self
            .samples
            .query_samples(SampleWindow::between(observation.applied_at, observation.window_end))
            .await?
            .iter()
            .filter(|s| watched.contains(&s.edge))
            .map(|s| self.predictor_config.normalization.realized(&s.outcome))
            .collect();

        let Some(realized) = mean(&realized) else {
            debug!(run_id = %observation.run_id, "No samples in observation window; accepting change");
            return Ok(None);
        };

        if realized + self.config.regression_tolerance >= observation.baseline {
            debug!(run_id = %observation.run_id, realized, baseline = observation.baseline, "Applied change held up");
            return Ok(None);
        }

        warn!(
            run_id = %observation.run_id,
            realized,
            baseline = observation.baseline,
            "Realized outcome regressed; rolling back"
        );
        let rollback = self.rollback_diff(observation).await?;
        let mut restored = state.deployed.clone();
        restored.apply(&rollback)?;
        self.gateway
            .apply_diff(&rollback)
            .await
            .map_err(OrchestrationError::Rollback)?;
        state.deployed = restored;

        let until = now + cooldown(self.config.poison_cooldown);
        for key in &watched {
            state.poisoned.poison(key.clone(), until);
        }

        let poisoned: Vec<EdgeKey> = watched.into_iter().collect();
        metrics::counter!("oic_rollbacks_total").increment(1);
        self.event_bus.publish_deployment_event(DeploymentEvent::RolledBack {
            run_id: observation.run_id,
            baseline_outcome: observation.baseline,
            realized_outcome: realized,
            poisoned: poisoned.clone(),
            rolled_back_at: now,
        });

        Ok(Some(RollbackReport {
            run_id: observation.run_id,
            baseline_outcome: observation.baseline,
            realized_outcome: realized,
            poisoned,
        }))
    }

    /// Inverse of the observed diff. Removed edges are only restored while
    /// both endpoints are still in the catalog.
    async fn rollback_diff(&self, observation: &Observation) -> Result<GraphDiff, OrchestrationError> {
        let mut rollback = observation.applied.inverse();
        let known = CatalogSnapshot::build(self.catalog.list_modules().await?).ids();
        let mut restored = ConnectionGraph::from(std::mem::take(&mut rollback.additions));
        restored.retain_modules(&known);
        rollback.additions = restored.connections();
        Ok(rollback)
    }

    /// Retrain between runs when a trainer is configured.
    async fn maybe_retrain(&self) {
        let Some(trainer) = &self.trainer else {
            return;
        };
        let policy = RetrainPolicy::from_config(&self.predictor_config);
        match self
            .registry
            .retrain_if_due(self.samples.as_ref(), trainer.clone(), &policy, Utc::now())
            .await
        {
            Ok(Some(version)) => info!(version = %version, "Compatibility model retrained"),
            Ok(None) => {}
            Err(e) => warn!("Model retraining failed: {}", e),
        }
    }

    async fn cycle(&self, trigger: RunTrigger) {
        self.maybe_retrain().await;
        match self.run_once(trigger).await {
            Ok(outcome) => debug!(run_id = %outcome.run_id, decision = ?outcome.decision, "Cycle finished"),
            Err(e) => warn!(?trigger, "Optimization cycle failed: {}", e),
        }
    }

    /// Start the loop as a background task
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run the loop until the shutdown token is cancelled
    pub async fn run(&self) {
        info!(
            debounce_ms = self.config.debounce_window.as_millis() as u64,
            periodic_secs = self.config.periodic_interval.as_secs(),
            "Starting orchestration loop"
        );

        let mut changes = self.catalog.subscribe_to_changes();
        let mut catalog_open = true;
        let mut debounce: Option<Instant> = None;

        let mut periodic = interval(self.config.periodic_interval);
        periodic.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut regression = interval(self.config.regression_check_interval);
        regression.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the immediate first regression tick
        regression.reset();

        loop {
            tokio::select! {
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received, stopping orchestration loop");
                    break;
                }
                received = changes.recv(), if catalog_open => {
                    match received {
                        Ok(event) => {
                            debug!(module_id = %event.module_id(), "Catalog change received");
                            debounce.get_or_insert_with(|| Instant::now() + self.config.debounce_window);
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Catalog change receiver lagged by {} events", n);
                            debounce.get_or_insert_with(|| Instant::now() + self.config.debounce_window);
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            warn!("Catalog change stream closed; relying on periodic runs");
                            catalog_open = false;
                        }
                    }
                }
                _ = sleep_until(debounce.unwrap_or_else(Instant::now)), if debounce.is_some() => {
                    debounce = None;
                    self.cycle(RunTrigger::CatalogChange).await;
                    periodic.reset();
                }
                _ = periodic.tick() => {
                    self.cycle(RunTrigger::Periodic).await;
                }
                _ = regression.tick() => {
                    if let Err(e) = self.check_regression().await {
                        warn!("Regression check failed: {}", e);
                    }
                }
            }
        }

        info!("Orchestration loop stopped");
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn cooldown(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(3650))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::connection::ConnectionParams;

    #[test]
    fn test_poison_list_expiry() {
        let now = Utc::now();
        let mut list = PoisonList::default();
        list.poison(EdgeKey::new("a", "b"), now + chrono::Duration::minutes(5));
        list.poison(EdgeKey::new("b", "a"), now - chrono::Duration::minutes(1));

        assert!(list.is_poisoned_at(&EdgeKey::new("a", "b"), now));
        assert!(!list.is_poisoned_at(&EdgeKey::new("b", "a"), now));
        assert_eq!(list.active_at(now).len(), 1);
        assert_eq!(list.purge(now), 1);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_poison_keeps_latest_expiry() {
        let now = Utc::now();
        let mut list = PoisonList::default();
        let key = EdgeKey::new("a", "b");
        list.poison(key.clone(), now + chrono::Duration::minutes(10));
        list.poison(key.clone(), now + chrono::Duration::minutes(1));
        assert!(list.is_poisoned_at(&key, now + chrono::Duration::minutes(5)));
    }

    fn http(priority: f64) -> ConnectionParams {
        ConnectionParams {
            protocol: "http".to_string(),
            rate_limit: 10,
            priority,
        }
    }

    fn observed(diff: GraphDiff) -> Observation {
        let now = Utc::now();
        Observation {
            run_id: RunId::new(),
            applied: diff,
            applied_at: now,
            window_end: now + chrono::Duration::minutes(10),
            baseline: 0.5,
        }
    }

    #[test]
    fn test_later_diff_takes_over_only_the_edges_it_touches() {
        let before: ConnectionGraph = [(EdgeKey::new("u", "v"), http(0.5))].into_iter().collect();
        let after: ConnectionGraph = [
            (EdgeKey::new("u", "v"), http(0.5)),
            (EdgeKey::new("x", "y"), http(0.5)),
            (EdgeKey::new("y", "x"), http(0.5)),
        ]
        .into_iter()
        .collect();
        let mut observation = observed(before.diff(&after));

        // Pruning an unrelated edge leaves the watch intact
        let mut pruned = after.clone();
        pruned.remove(&EdgeKey::new("u", "v"));
        assert!(observation.release(&after.diff(&pruned)));
        assert_eq!(observation.watched_edges().len(), 2);

        // Retuning one watched edge hands it to the later observation
        let mut retuned = pruned.clone();
        retuned.insert(EdgeKey::new("x", "y"), http(0.9));
        assert!(observation.release(&pruned.diff(&retuned)));
        assert_eq!(
            observation.watched_edges().into_iter().collect::<Vec<_>>(),
            vec![EdgeKey::new("y", "x")]
        );

        let mut removed = retuned.clone();
        removed.remove(&EdgeKey::new("y", "x"));
        assert!(!observation.release(&retuned.diff(&removed)));
    }

    #[test]
    fn test_mean_of_empty_is_none() {
        assert_eq!(mean(&[]), None);
        assert_eq!(mean(&[0.2, 0.4]), Some(0.30000000000000004));
    }
}
