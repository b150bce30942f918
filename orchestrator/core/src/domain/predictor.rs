// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Compatibility Predictor Contract
//!
//! The optimizer only ever sees a predictor through
//! [`CompatibilityPredictor`]: an ordered module pair plus edge context in,
//! `(compatibility, confidence)` out. Model families (heuristic, linear
//! regression, constant) live in `crate::infrastructure::predictors`.
//!
//! ## Fail-closed scoring
//!
//! Callers go through [`score`], never `predict` directly. It returns
//! [`Compatibility::ZERO`] when either module lacks the minimum fields or the
//! model errors, so a candidate graph can always be ranked.
//!
//! Implementations must be safe to call from many evaluator threads at
//! once; training happens out-of-band and produces a new model value.

use crate::domain::connection::ConnectionParams;
use crate::domain::module::{Module, ModuleId, ModuleStatus, Observed};
use crate::domain::sample::CompatibilitySample;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Monotonically increasing model version tracked by the model registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModelVersion(pub u64);

impl ModelVersion {
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Scalar compatibility and the model's confidence in it, both in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Compatibility {
    pub score: f64,
    pub confidence: f64,
}

impl Compatibility {
    pub const ZERO: Compatibility = Compatibility {
        score: 0.0,
        confidence: 0.0,
    };

    /// Clamp into [0, 1]; non-finite inputs collapse to zero.
    pub fn new(score: f64, confidence: f64) -> Self {
        fn unit(v: f64) -> f64 {
            if v.is_finite() {
                v.clamp(0.0, 1.0)
            } else {
                0.0
            }
        }
        Self {
            score: unit(score),
            confidence: unit(confidence),
        }
    }

    /// Contribution of one edge to graph fitness.
    pub fn weighted(&self) -> f64 {
        self.score * self.confidence
    }
}

/// Edge-level context the score is conditioned on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionContext {
    pub protocol: String,
    pub rate_limit: u32,
}

impl PredictionContext {
    pub fn for_params(params: &ConnectionParams) -> Self {
        Self {
            protocol: params.protocol.clone(),
            rate_limit: params.rate_limit,
        }
    }
}

/// Numeric description of an ordered module pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairFeatures {
    pub source: ModuleId,
    pub target: ModuleId,
    /// Jaccard overlap of capability names
    pub capability_overlap: f64,
    /// 1.0 when the source lists the target as a dependency
    pub dependency_declared: f64,
    pub source_success_rate: Observed<f64>,
    pub target_success_rate: Observed<f64>,
    /// Target latency mapped into [0, 1], higher is faster
    pub latency_score: f64,
    /// Whether the target answers inside the source timeout
    pub timeout_feasibility: f64,
    /// Whether the edge rate limit fits the target's declared limit
    pub rate_limit_feasibility: f64,
    pub auth_match: f64,
    pub health: f64,
    /// Fraction of performance metrics that are known on both sides
    pub metric_coverage: f64,
}

/// Prior used in feature vectors for unknown success rates.
const UNKNOWN_SUCCESS_PRIOR: f64 = 0.5;
const REFERENCE_LATENCY_MS: f64 = 100.0;

impl PairFeatures {
    pub const DIMENSIONS: usize = 10;

    /// Extract features, or `None` when either side lacks the minimum
    /// fields or the context protocol is not shared by the pair.
    pub fn extract(source: &Module, target: &Module, context: &PredictionContext) -> Option<Self> {
        if !source.has_minimum_fields() || !target.has_minimum_fields() {
            return None;
        }
        let outbound = source.outbound_interface(&context.protocol)?;
        let inbound = target.inbound_interface(&context.protocol)?;

        let source_caps = source.capability_names();
        let target_caps = target.capability_names();
        let union = source_caps.union(&target_caps).count();
        let capability_overlap = if union == 0 {
            0.0
        } else {
            source_caps.intersection(&target_caps).count() as f64 / union as f64
        };

        let dependency_declared = if source.dependencies.contains(&target.module_id) {
            1.0
        } else {
            0.0
        };

        let latency_score = match target.metrics.latency_ms {
            Observed::Known(ms) => 1.0 / (1.0 + ms / REFERENCE_LATENCY_MS),
            Observed::Unknown => 0.5,
        };

        let budget_ms = f64::from(outbound.timeout_seconds) * 1000.0;
        let timeout_feasibility = match target.metrics.latency_ms {
            Observed::Known(ms) if budget_ms > 0.0 => (1.0 - ms / budget_ms).clamp(0.0, 1.0),
            Observed::Known(_) => 0.0,
            Observed::Unknown => 0.5,
        };

        let requested = f64::from(context.rate_limit.max(1));
        let target_fit = match inbound.rate_limit {
            Observed::Known(cap) => (f64::from(cap) / requested).min(1.0),
            Observed::Unknown => 1.0,
        };
        let source_fit = match source.metrics.throughput {
            Observed::Known(t) if t > 0.0 => (requested / t).min(1.0),
            _ => 1.0,
        };
        let rate_limit_feasibility = target_fit.min(source_fit);

        let auth_match = if inbound.authentication_required && !outbound.authentication_required {
            0.5
        } else {
            1.0
        };

        let health = status_health(source.status).min(status_health(target.status));

        let known = [
            source.metrics.latency_ms.is_known(),
            source.metrics.success_rate.is_known(),
            source.metrics.throughput.is_known(),
            target.metrics.latency_ms.is_known(),
            target.metrics.success_rate.is_known(),
            target.metrics.throughput.is_known(),
        ];
        let metric_coverage = known.iter().filter(|k| **k).count() as f64 / known.len() as f64;

        Some(Self {
            source: source.module_id.clone(),
            target: target.module_id.clone(),
            capability_overlap,
            dependency_declared,
            source_success_rate: source.metrics.success_rate,
            target_success_rate: target.metrics.success_rate,
            latency_score,
            timeout_feasibility,
            rate_limit_feasibility,
            auth_match,
            health,
            metric_coverage,
        })
    }

    /// Dense vector for regression models. Unknown success rates use a
    /// neutral prior.
    pub fn vector(&self) -> [f64; Self::DIMENSIONS] {
        [
            self.capability_overlap,
            self.dependency_declared,
            self.source_success_rate.unwrap_or(UNKNOWN_SUCCESS_PRIOR),
            self.target_success_rate.unwrap_or(UNKNOWN_SUCCESS_PRIOR),
            self.latency_score,
            self.timeout_feasibility,
            self.rate_limit_feasibility,
            self.auth_match,
            self.health,
            self.metric_coverage,
        ]
    }
}

fn status_health(status: ModuleStatus) -> f64 {
    match status {
        ModuleStatus::Active => 1.0,
        ModuleStatus::Degraded => 0.5,
        ModuleStatus::Inactive | ModuleStatus::Error => 0.0,
    }
}

/// Narrow scoring interface every model family implements.
pub trait CompatibilityPredictor: Send + Sync {
    fn predict(
        &self,
        source: &Module,
        target: &Module,
        context: &PredictionContext,
    ) -> Result<Compatibility, PredictorError>;

    /// Model family name for logs and the registry.
    fn family(&self) -> &str;
}

/// Produces a fresh model from training samples.
pub trait ModelTrainer: Send + Sync {
    fn train(
        &self,
        samples: &[CompatibilitySample],
    ) -> Result<Arc<dyn CompatibilityPredictor>, PredictorError>;
}

/// Fail-closed scoring entry point used by fitness evaluation.
pub fn score(
    predictor: &dyn CompatibilityPredictor,
    source: &Module,
    target: &Module,
    context: &PredictionContext,
) -> Compatibility {
    if !source.has_minimum_fields() || !target.has_minimum_fields() {
        return Compatibility::ZERO;
    }
    match predictor.predict(source, target, context) {
        Ok(c) => Compatibility::new(c.score, c.confidence),
        Err(e) => {
            warn!(
                source = %source.module_id,
                target = %target.module_id,
                model = predictor.family(),
                "Predictor failed, scoring pair as zero: {}",
                e
            );
            Compatibility::ZERO
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PredictorError {
    #[error("inference failed: {0}")]
    Inference(String),

    #[error("insufficient features for pair {source_id} -> {target_id}")]
    InsufficientFeatures {
        source_id: ModuleId,
        target_id: ModuleId,
    },

    #[error("training failed: {0}")]
    Training(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::module::{Capability, Interface, ModuleType, PerformanceMetrics};

    struct Failing;

    impl CompatibilityPredictor for Failing {
        fn predict(&self, _: &Module, _: &Module, _: &PredictionContext) -> Result<Compatibility, PredictorError> {
            Err(PredictorError::Inference("boom".to_string()))
        }

        fn family(&self) -> &str {
            "failing"
        }
    }

    struct Overconfident;

    impl CompatibilityPredictor for Overconfident {
        fn predict(&self, _: &Module, _: &Module, _: &PredictionContext) -> Result<Compatibility, PredictorError> {
            Ok(Compatibility {
                score: 3.0,
                confidence: f64::NAN,
            })
        }

        fn family(&self) -> &str {
            "overconfident"
        }
    }

    fn module(id: &str) -> Module {
        Module::new(id, id, ModuleType::Analytics)
            .with_capability(Capability::new("ingest"))
            .with_interface(Interface::new("http", "http://localhost").with_rate_limit(100))
            .with_metrics(PerformanceMetrics {
                latency_ms: Observed::Known(50.0),
                success_rate: Observed::Known(0.95),
                throughput: Observed::Unknown,
            })
    }

    fn ctx() -> PredictionContext {
        PredictionContext {
            protocol: "http".to_string(),
            rate_limit: 200,
        }
    }

    #[test]
    fn test_score_fails_closed_on_error() {
        assert_eq!(score(&Failing, &module("a"), &module("b"), &ctx()), Compatibility::ZERO);
    }

    #[test]
    fn test_score_fails_closed_on_missing_fields() {
        let bare = Module::new("c", "c", ModuleType::Custom);
        assert_eq!(score(&Overconfident, &module("a"), &bare, &ctx()), Compatibility::ZERO);
    }

    #[test]
    fn test_score_clamps_out_of_range_output() {
        let c = score(&Overconfident, &module("a"), &module("b"), &ctx());
        assert_eq!(c.score, 1.0);
        assert_eq!(c.confidence, 0.0);
    }

    #[test]
    fn test_extract_features() {
        let f = PairFeatures::extract(&module("a"), &module("b"), &ctx()).unwrap();
        assert_eq!(f.capability_overlap, 1.0);
        // 200 rps requested against a 100 rps inbound limit
        assert!((f.rate_limit_feasibility - 0.5).abs() < 1e-9);
        assert!((f.latency_score - 1.0 / 1.5).abs() < 1e-9);
        assert!((f.metric_coverage - 4.0 / 6.0).abs() < 1e-9);

        let other = PredictionContext {
            protocol: "grpc".to_string(),
            rate_limit: 10,
        };
        assert!(PairFeatures::extract(&module("a"), &module("b"), &other).is_none());
    }
}
