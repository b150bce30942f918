// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Model Registry
//!
//! Keeps the most recent trained compatibility models under a monotonically
//! increasing [`ModelVersion`] and an active pointer. Optimizer runs take a
//! [`ActiveModel`] snapshot at start, so a swap only affects the next run
//! and never a generation in flight.
//!
//! Retraining is triggered by [`RetrainPolicy`]: a sample-count threshold or
//! an elapsed interval, whichever comes first.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Versioned model swap-in, rollback and retraining

use crate::domain::engine_config::PredictorConfig;
use crate::domain::events::ModelEvent;
use crate::domain::predictor::{CompatibilityPredictor, ModelTrainer, ModelVersion, PredictorError};
use crate::domain::repository::{SampleStore, SampleStoreError};
use crate::domain::sample::SampleWindow;
use crate::infrastructure::event_bus::EventBus;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Versions kept for rollback. The active version is never evicted.
const RETAINED_MODELS: usize = 8;

/// The model a run scores with, pinned for the whole run.
#[derive(Clone)]
pub struct ActiveModel {
    pub version: ModelVersion,
    pub model: Arc<dyn CompatibilityPredictor>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelSummary {
    pub version: ModelVersion,
    pub family: String,
    pub trained_on: usize,
    pub registered_at: DateTime<Utc>,
    pub active: bool,
}

struct ModelRecord {
    version: ModelVersion,
    model: Arc<dyn CompatibilityPredictor>,
    trained_on: usize,
    registered_at: DateTime<Utc>,
}

struct RegistryState {
    /// Ordered by version
    models: Vec<ModelRecord>,
    active: ModelVersion,
    last_trained_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RetrainPolicy {
    pub sample_threshold: usize,
    pub interval: Duration,
    /// Trailing window of samples handed to the trainer
    pub window: Duration,
}

impl RetrainPolicy {
    pub fn from_config(config: &PredictorConfig) -> Self {
        Self {
            sample_threshold: config.retrain_sample_threshold,
            interval: config.retrain_interval,
            window: config.sample_window,
        }
    }

    /// Retrain when enough new samples arrived or enough time passed.
    pub fn is_due(&self, new_samples: usize, since_last: Duration) -> bool {
        new_samples >= self.sample_threshold || since_last >= self.interval
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ModelRegistryError {
    #[error("model version {0} is not registered")]
    UnknownVersion(ModelVersion),

    #[error("no model version precedes {0}")]
    NoPreviousVersion(ModelVersion),

    #[error(transparent)]
    Training(#[from] PredictorError),

    #[error(transparent)]
    SampleStore(#[from] SampleStoreError),

    #[error("training task failed: {0}")]
    TrainingTask(String),
}

pub struct ModelRegistry {
    state: RwLock<RegistryState>,
    event_bus: Option<Arc<EventBus>>,
}

impl ModelRegistry {
    /// Start with `initial` active as version 1.
    pub fn new(initial: Arc<dyn CompatibilityPredictor>) -> Self {
        let now = Utc::now();
        let version = ModelVersion(1);
        Self {
            state: RwLock::new(RegistryState {
                models: vec![ModelRecord {
                    version,
                    model: initial,
                    trained_on: 0,
                    registered_at: now,
                }],
                active: version,
                last_trained_at: now,
            }),
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn current(&self) -> ActiveModel {
        let state = self.state.read();
        let model = state
            .models
            .iter()
            .find(|r| r.version == state.active)
            .map(|r| r.model.clone())
            // The active version is always one of the registered records
            .unwrap_or_else(|| state.models[state.models.len() - 1].model.clone());
        ActiveModel {
            version: state.active,
            model,
        }
    }

    pub fn active_version(&self) -> ModelVersion {
        self.state.read().active
    }

    pub fn last_trained_at(&self) -> DateTime<Utc> {
        self.state.read().last_trained_at
    }

    /// Register a model without activating it.
    pub fn register(&self, model: Arc<dyn CompatibilityPredictor>, trained_on: usize) -> ModelVersion {
        let mut state = self.state.write();
        let version = state
            .models
            .last()
            .map(|r| r.version.next())
            .unwrap_or(ModelVersion(1));
        state.models.push(ModelRecord {
            version,
            model,
            trained_on,
            registered_at: Utc::now(),
        });

        while state.models.len() > RETAINED_MODELS {
            let active = state.active;
            let Some(oldest) = state.models.iter().position(|r| r.version != active) else {
                break;
            };
            let evicted = state.models.remove(oldest);
            debug!(version = %evicted.version, "Evicted compatibility model from history");
        }
        version
    }

    /// Register and activate a model. Takes effect from the next run.
    pub fn swap_in(&self, model: Arc<dyn CompatibilityPredictor>, trained_on: usize) -> ModelVersion {
        let family = model.family().to_string();
        let version = self.register(model, trained_on);
        let previous = {
            let mut state = self.state.write();
            std::mem::replace(&mut state.active, version)
        };

        metrics::counter!("oic_model_swaps_total").increment(1);
        info!(from = %previous, to = %version, family = %family, trained_on, "Swapped in compatibility model");

        if let Some(bus) = &self.event_bus {
            bus.publish_model_event(ModelEvent::ModelSwapped {
                from: previous,
                to: version,
                family,
                trained_on,
                swapped_at: Utc::now(),
            });
        }
        version
    }

    pub fn rollback_to(&self, version: ModelVersion) -> Result<(), ModelRegistryError> {
        let previous = {
            let mut state = self.state.write();
            if !state.models.iter().any(|r| r.version == version) {
                return Err(ModelRegistryError::UnknownVersion(version));
            }
            std::mem::replace(&mut state.active, version)
        };

        warn!(from = %previous, to = %version, "Rolled back compatibility model");
        if let Some(bus) = &self.event_bus {
            bus.publish_model_event(ModelEvent::ModelRolledBack {
                from: previous,
                to: version,
                rolled_back_at: Utc::now(),
            });
        }
        Ok(())
    }

    /// Activate the newest version older than the active one.
    pub fn rollback_previous(&self) -> Result<ModelVersion, ModelRegistryError> {
        let target = {
            let state = self.state.read();
            state
                .models
                .iter()
                .rev()
                .map(|r| r.version)
                .find(|v| *v < state.active)
                .ok_or(ModelRegistryError::NoPreviousVersion(state.active))?
        };
        self.rollback_to(target)?;
        Ok(target)
    }

    pub fn history(&self) -> Vec<ModelSummary> {
        let state = self.state.read();
        state
            .models
            .iter()
            .map(|r| ModelSummary {
                version: r.version,
                family: r.model.family().to_string(),
                trained_on: r.trained_on,
                registered_at: r.registered_at,
                active: r.version == state.active,
            })
            .collect()
    }

    /// Train and swap in a new model when the policy says so. Returns the
    /// new version, or `None` when no retrain was due or there was nothing
    /// to train on.
    pub async fn retrain_if_due(
        &self,
        store: &dyn SampleStore,
        trainer: Arc<dyn ModelTrainer>,
        policy: &RetrainPolicy,
        now: DateTime<Utc>,
    ) -> Result<Option<ModelVersion>, ModelRegistryError> {
        let last = self.last_trained_at();
        let new_samples = store.count_since(last).await?;
        let since_last = (now - last).to_std().unwrap_or(Duration::ZERO);

        if !policy.is_due(new_samples, since_last) {
            debug!(new_samples, since_last_secs = since_last.as_secs(), "Retrain not due");
            return Ok(None);
        }

        let window_start = now
            - chrono::Duration::from_std(policy.window).unwrap_or_else(|_| chrono::Duration::days(7));
        let samples = store.query_samples(SampleWindow::since(window_start)).await?;
        if samples.is_empty() {
            debug!("Retrain due but the sample window is empty");
            return Ok(None);
        }

        let trained_on = samples.len();
        let model = tokio::task::spawn_blocking(move || trainer.train(&samples))
            .await
            .map_err(|e| ModelRegistryError::TrainingTask(e.to_string()))??;

        self.state.write().last_trained_at = now;
        Ok(Some(self.swap_in(model, trained_on)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::module::Module;
    use crate::domain::predictor::{Compatibility, PredictionContext};

    struct Named(&'static str);

    impl CompatibilityPredictor for Named {
        fn predict(&self, _: &Module, _: &Module, _: &PredictionContext) -> Result<Compatibility, PredictorError> {
            Ok(Compatibility::ZERO)
        }

        fn family(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn test_swap_and_rollback() {
        let registry = ModelRegistry::new(Arc::new(Named("constant")));
        assert_eq!(registry.active_version(), ModelVersion(1));

        let v2 = registry.swap_in(Arc::new(Named("linear")), 100);
        assert_eq!(v2, ModelVersion(2));
        assert_eq!(registry.current().model.family(), "linear");

        assert_eq!(registry.rollback_previous().unwrap(), ModelVersion(1));
        assert_eq!(registry.current().model.family(), "constant");
        assert!(matches!(
            registry.rollback_previous(),
            Err(ModelRegistryError::NoPreviousVersion(ModelVersion(1)))
        ));

        registry.rollback_to(v2).unwrap();
        assert_eq!(registry.current().version, v2);
        assert!(registry.rollback_to(ModelVersion(9)).is_err());
    }

    #[test]
    fn test_register_does_not_activate() {
        let registry = ModelRegistry::new(Arc::new(Named("constant")));
        let v2 = registry.register(Arc::new(Named("heuristic")), 0);
        assert_eq!(registry.active_version(), ModelVersion(1));

        let history = registry.history();
        assert_eq!(history.len(), 2);
        assert!(history[0].active);
        assert_eq!(history[1].version, v2);
        assert!(!history[1].active);
    }

    #[test]
    fn test_history_is_capped_but_keeps_active_version() {
        let registry = ModelRegistry::new(Arc::new(Named("constant")));
        for _ in 0..RETAINED_MODELS + 4 {
            registry.register(Arc::new(Named("linear")), 10);
        }

        let history = registry.history();
        assert_eq!(history.len(), RETAINED_MODELS);
        assert_eq!(history[0].version, ModelVersion(1));
        assert!(history[0].active);
        assert_eq!(history.last().unwrap().version, ModelVersion(RETAINED_MODELS as u64 + 5));
        assert!(matches!(
            registry.rollback_to(ModelVersion(2)),
            Err(ModelRegistryError::UnknownVersion(_))
        ));

        let newest = registry.swap_in(Arc::new(Named("linear")), 20);
        assert_eq!(registry.history().len(), RETAINED_MODELS);
        assert_eq!(registry.rollback_previous().unwrap().0, newest.0 - 1);
    }

    #[test]
    fn test_retrain_policy_whichever_first() {
        let policy = RetrainPolicy {
            sample_threshold: 10,
            interval: Duration::from_secs(60),
            window: Duration::from_secs(3600),
        };
        assert!(!policy.is_due(9, Duration::from_secs(59)));
        assert!(policy.is_due(10, Duration::from_secs(0)));
        assert!(policy.is_due(0, Duration::from_secs(60)));
    }
}
