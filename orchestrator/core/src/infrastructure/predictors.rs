// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Compatibility Model Families
//!
//! | Family | Training | Use |
//! |--------|----------|-----|
//! | [`ConstantPredictor`] | none | cold start, tests |
//! | [`HeuristicPredictor`] | none | sensible scores before any samples exist |
//! | [`LinearPredictor`] | [`LinearTrainer`], mini-batch gradient descent | learned from compatibility samples |
//!
//! Every family is immutable after construction, so inference is safe from
//! any number of evaluator threads. Retraining produces a new value that the
//! model registry swaps in between runs.

use crate::domain::engine_config::PredictorConfig;
use crate::domain::module::Module;
use crate::domain::predictor::{
    Compatibility, CompatibilityPredictor, ModelTrainer, PairFeatures, PredictionContext, PredictorError,
};
use crate::domain::sample::{CompatibilitySample, OutcomeNormalization};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use tracing::debug;

const DIMENSIONS: usize = PairFeatures::DIMENSIONS;

fn extract(
    source: &Module,
    target: &Module,
    context: &PredictionContext,
) -> Result<PairFeatures, PredictorError> {
    PairFeatures::extract(source, target, context).ok_or_else(|| PredictorError::InsufficientFeatures {
        source_id: source.module_id.clone(),
        target_id: target.module_id.clone(),
    })
}

/// Returns the same `(score, confidence)` for every pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantPredictor {
    pub compatibility: Compatibility,
}

impl ConstantPredictor {
    pub fn new(score: f64, confidence: f64) -> Self {
        Self {
            compatibility: Compatibility::new(score, confidence),
        }
    }

    /// An uninitialized model: everything scores zero with zero confidence.
    pub fn cold_start() -> Self {
        Self {
            compatibility: Compatibility::ZERO,
        }
    }
}

impl CompatibilityPredictor for ConstantPredictor {
    fn predict(&self, _: &Module, _: &Module, _: &PredictionContext) -> Result<Compatibility, PredictorError> {
        Ok(self.compatibility)
    }

    fn family(&self) -> &str {
        "constant"
    }
}

/// Hand-weighted combination of pair features.
///
/// Confidence tracks how many performance metrics are actually known on
/// both sides and never exceeds 0.8, since nothing here has been learned.
#[derive(Debug, Clone, PartialEq)]
pub struct HeuristicPredictor {
    weights: [f64; DIMENSIONS],
}

impl Default for HeuristicPredictor {
    fn default() -> Self {
        Self {
            // overlap, dependency, src success, tgt success, latency,
            // timeout, rate limit, auth, health, coverage
            weights: [0.25, 0.15, 0.1, 0.15, 0.1, 0.05, 0.1, 0.05, 0.05, 0.0],
        }
    }
}

impl CompatibilityPredictor for HeuristicPredictor {
    fn predict(
        &self,
        source: &Module,
        target: &Module,
        context: &PredictionContext,
    ) -> Result<Compatibility, PredictorError> {
        let features = extract(source, target, context)?;
        let x = features.vector();
        let total: f64 = self.weights.iter().sum();
        if total <= 0.0 {
            return Err(PredictorError::Inference("heuristic weights sum to zero".to_string()));
        }
        let score = dot(&self.weights, &x) / total;
        let confidence = 0.4 + 0.4 * features.metric_coverage;
        Ok(Compatibility::new(score, confidence))
    }

    fn family(&self) -> &str {
        "heuristic"
    }
}

/// Linear regression from pair features to realized outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearPredictor {
    weights: [f64; DIMENSIONS],
    bias: f64,
    trained_on: usize,
    /// Root mean squared error on the training set
    training_rmse: f64,
}

/// Sample count at which confidence reaches half of its ceiling.
const CONFIDENCE_HALF_SAMPLES: f64 = 50.0;

impl LinearPredictor {
    pub fn new(weights: [f64; DIMENSIONS], bias: f64, trained_on: usize, training_rmse: f64) -> Self {
        Self {
            weights,
            bias,
            trained_on,
            training_rmse,
        }
    }

    pub fn trained_on(&self) -> usize {
        self.trained_on
    }

    pub fn training_rmse(&self) -> f64 {
        self.training_rmse
    }

    fn raw(&self, x: &[f64; DIMENSIONS]) -> f64 {
        self.bias + dot(&self.weights, x)
    }

    fn confidence(&self) -> f64 {
        let n = self.trained_on as f64;
        let volume = n / (n + CONFIDENCE_HALF_SAMPLES);
        volume * (1.0 - self.training_rmse).clamp(0.0, 1.0)
    }
}

impl CompatibilityPredictor for LinearPredictor {
    fn predict(
        &self,
        source: &Module,
        target: &Module,
        context: &PredictionContext,
    ) -> Result<Compatibility, PredictorError> {
        let features = extract(source, target, context)?;
        let score = self.raw(&features.vector());
        if !score.is_finite() {
            return Err(PredictorError::Inference(format!("non-finite score {}", score)));
        }
        Ok(Compatibility::new(score, self.confidence()))
    }

    fn family(&self) -> &str {
        "linear"
    }
}

/// Mini-batch gradient descent on squared error.
#[derive(Debug, Clone)]
pub struct LinearTrainer {
    pub learning_rate: f64,
    pub epochs: usize,
    pub batch_size: usize,
    pub normalization: OutcomeNormalization,
    /// Seed for the per-epoch shuffle
    pub seed: u64,
}

impl LinearTrainer {
    pub fn from_config(config: &PredictorConfig) -> Self {
        Self {
            learning_rate: config.learning_rate,
            epochs: config.epochs,
            batch_size: 32,
            normalization: config.normalization,
            seed: 0,
        }
    }

    pub fn fit(&self, samples: &[CompatibilitySample]) -> Result<LinearPredictor, PredictorError> {
        if samples.is_empty() {
            return Err(PredictorError::Training("no samples to train on".to_string()));
        }

        let data: Vec<([f64; DIMENSIONS], f64)> = samples
            .iter()
            .map(|s| (s.features.vector(), self.normalization.realized(&s.outcome)))
            .collect();

        let mut model = LinearPredictor::new([0.0; DIMENSIONS], 0.5, data.len(), 1.0);
        let mut order: Vec<usize> = (0..data.len()).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let batch_size = self.batch_size.max(1);

        for _ in 0..self.epochs {
            order.shuffle(&mut rng);
            for batch in order.chunks(batch_size) {
                let mut grad_w = [0.0; DIMENSIONS];
                let mut grad_b = 0.0;
                for &i in batch {
                    let (x, y) = &data[i];
                    let err = model.raw(x) - y;
                    for (g, xi) in grad_w.iter_mut().zip(x.iter()) {
                        *g += err * xi;
                    }
                    grad_b += err;
                }
                let scale = self.learning_rate / batch.len() as f64;
                for (w, g) in model.weights.iter_mut().zip(grad_w.iter()) {
                    *w -= scale * g;
                }
                model.bias -= scale * grad_b;
            }
        }

        let mse = data
            .iter()
            .map(|(x, y)| {
                let e = model.raw(x).clamp(0.0, 1.0) - y;
                e * e
            })
            .sum::<f64>()
            / data.len() as f64;
        if !mse.is_finite() {
            return Err(PredictorError::Training(
                "training diverged; lower the learning rate".to_string(),
            ));
        }
        model.training_rmse = mse.sqrt();

        debug!(
            samples = data.len(),
            epochs = self.epochs,
            rmse = model.training_rmse,
            "Trained linear compatibility model"
        );
        Ok(model)
    }
}

impl ModelTrainer for LinearTrainer {
    fn train(&self, samples: &[CompatibilitySample]) -> Result<Arc<dyn CompatibilityPredictor>, PredictorError> {
        Ok(Arc::new(self.fit(samples)?))
    }
}

fn dot(a: &[f64; DIMENSIONS], b: &[f64; DIMENSIONS]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
