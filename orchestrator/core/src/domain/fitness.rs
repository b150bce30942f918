// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Graph fitness.
//!
//! ```text
//! fitness = mean(score * confidence over edges)
//!         - edge_budget_penalty * (edges - budget)^2
//!         - redundancy_penalty  * redundant_edges / edges
//! ```
//!
//! floored at 0. The empty graph scores exactly 0. Evaluation is read-only
//! over an immutable snapshot and a shared predictor, so many evaluators can
//! run concurrently.

use crate::domain::catalog::CatalogSnapshot;
use crate::domain::connection::{ConnectionGraph, ConnectionParams, EdgeKey};
use crate::domain::encoding::GraphEncoder;
use crate::domain::engine_config::FitnessConfig;
use crate::domain::module::ModuleId;
use crate::domain::predictor::{score, Compatibility, CompatibilityPredictor, PredictionContext};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FitnessBreakdown {
    pub edge_count: usize,
    pub target_edge_budget: usize,
    pub mean_compatibility: f64,
    pub budget_penalty: f64,
    pub redundant_edges: usize,
    pub redundancy_penalty: f64,
    pub fitness: f64,
}

#[derive(Clone)]
pub struct FitnessEvaluator {
    snapshot: Arc<CatalogSnapshot>,
    predictor: Arc<dyn CompatibilityPredictor>,
    config: FitnessConfig,
    target_edge_budget: usize,
}

impl FitnessEvaluator {
    /// The edge budget defaults to `min(module count, valid slot count)`.
    pub fn new(
        encoder: &GraphEncoder,
        predictor: Arc<dyn CompatibilityPredictor>,
        config: FitnessConfig,
    ) -> Self {
        let snapshot = encoder.snapshot().clone();
        let target_edge_budget = config
            .target_edge_budget
            .unwrap_or_else(|| snapshot.len().min(encoder.slot_count()));
        Self {
            snapshot,
            predictor,
            config,
            target_edge_budget,
        }
    }

    pub fn target_edge_budget(&self) -> usize {
        self.target_edge_budget
    }

    pub fn evaluate(&self, graph: &ConnectionGraph) -> f64 {
        self.breakdown(graph).fitness
    }

    pub fn edge_compatibility(&self, key: &EdgeKey, params: &ConnectionParams) -> Compatibility {
        match (self.snapshot.get(&key.source), self.snapshot.get(&key.target)) {
            (Some(source), Some(target)) => score(
                self.predictor.as_ref(),
                source,
                target,
                &PredictionContext::for_params(params),
            ),
            _ => Compatibility::ZERO,
        }
    }

    pub fn breakdown(&self, graph: &ConnectionGraph) -> FitnessBreakdown {
        let edge_count = graph.len();
        if edge_count == 0 {
            return FitnessBreakdown {
                target_edge_budget: self.target_edge_budget,
                ..Default::default()
            };
        }

        let total: f64 = graph
            .iter()
            .map(|(key, params)| self.edge_compatibility(key, params).weighted())
            .sum();
        let mean_compatibility = total / edge_count as f64;

        let gap = edge_count as f64 - self.target_edge_budget as f64;
        let budget_penalty = self.config.edge_budget_penalty * gap * gap;

        let redundant_edges = self.redundant_edges(graph);
        let redundancy_penalty =
            self.config.redundancy_penalty * redundant_edges as f64 / edge_count as f64;

        let raw = mean_compatibility - budget_penalty - redundancy_penalty;
        let fitness = if raw.is_finite() { raw.max(0.0) } else { 0.0 };

        FitnessBreakdown {
            edge_count,
            target_edge_budget: self.target_edge_budget,
            mean_compatibility,
            budget_penalty,
            redundant_edges,
            redundancy_penalty,
            fitness,
        }
    }

    /// An outgoing edge is redundant when every capability of its target is
    /// already provided by a higher-priority target of the same source.
    fn redundant_edges(&self, graph: &ConnectionGraph) -> usize {
        let mut by_source: BTreeMap<&ModuleId, Vec<(&EdgeKey, f64)>> = BTreeMap::new();
        for (key, params) in graph.iter() {
            by_source
                .entry(&key.source)
                .or_default()
                .push((key, params.priority));
        }

        let mut redundant = 0;
        for mut edges in by_source.into_values() {
            edges.sort_by(|(ka, pa), (kb, pb)| pb.total_cmp(pa).then_with(|| ka.cmp(kb)));
            let mut covered: BTreeSet<&str> = BTreeSet::new();
            for (key, _) in edges {
                let Some(target) = self.snapshot.get(&key.target) else {
                    continue;
                };
                let caps = target.capability_names();
                if !caps.is_empty() && caps.is_subset(&covered) {
                    redundant += 1;
                }
                covered.extend(caps);
            }
        }
        redundant
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::engine_config::EncodingConfig;
    use crate::domain::module::{Capability, Interface, Module, ModuleType};
    use crate::domain::predictor::PredictorError;

    struct Fixed(f64, f64);

    impl CompatibilityPredictor for Fixed {
        fn predict(&self, _: &Module, _: &Module, _: &PredictionContext) -> Result<Compatibility, PredictorError> {
            Ok(Compatibility::new(self.0, self.1))
        }

        fn family(&self) -> &str {
            "fixed"
        }
    }

    fn module(id: &str, capability: &str) -> Module {
        Module::new(id, id, ModuleType::DataProcessor)
            .with_capability(Capability::new(capability))
            .with_interface(Interface::new("http", format!("http://{id}")))
    }

    fn edge(priority: f64) -> ConnectionParams {
        ConnectionParams {
            protocol: "http".to_string(),
            rate_limit: 10,
            priority,
        }
    }

    fn evaluator(modules: Vec<Module>, predictor: Fixed, config: FitnessConfig) -> FitnessEvaluator {
        let snapshot = Arc::new(CatalogSnapshot::build(modules));
        let encoder = GraphEncoder::new(snapshot, EncodingConfig::default());
        FitnessEvaluator::new(&encoder, Arc::new(predictor), config)
    }

    #[test]
    fn test_empty_graph_is_exactly_zero() {
        let eval = evaluator(
            vec![module("a", "x"), module("b", "y")],
            Fixed(1.0, 1.0),
            FitnessConfig::default(),
        );
        assert_eq!(eval.evaluate(&ConnectionGraph::new()), 0.0);
    }

    #[test]
    fn test_budget_penalty_is_quadratic() {
        let eval = evaluator(
            vec![module("a", "x"), module("b", "y"), module("c", "z")],
            Fixed(0.8, 1.0),
            FitnessConfig {
                target_edge_budget: Some(3),
                edge_budget_penalty: 0.01,
                redundancy_penalty: 0.0,
            },
        );
        let g: ConnectionGraph = [(EdgeKey::new("a", "b"), edge(0.5))].into_iter().collect();
        let b = eval.breakdown(&g);
        assert!((b.budget_penalty - 0.04).abs() < 1e-12);
        assert!((b.fitness - 0.76).abs() < 1e-12);
    }

    #[test]
    fn test_redundant_capability_paths_are_penalized() {
        let eval = evaluator(
            vec![module("a", "x"), module("b", "store"), module("c", "store")],
            Fixed(1.0, 1.0),
            FitnessConfig {
                target_edge_budget: Some(2),
                edge_budget_penalty: 0.0,
                redundancy_penalty: 0.5,
            },
        );
        let g: ConnectionGraph = [
            (EdgeKey::new("a", "b"), edge(0.9)),
            (EdgeKey::new("a", "c"), edge(0.1)),
        ]
        .into_iter()
        .collect();
        let b = eval.breakdown(&g);
        assert_eq!(b.redundant_edges, 1);
        assert!((b.fitness - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_fitness_never_negative() {
        let eval = evaluator(
            vec![module("a", "x"), module("b", "y")],
            Fixed(0.0, 0.0),
            FitnessConfig::default(),
        );
        let g: ConnectionGraph = [
            (EdgeKey::new("a", "b"), edge(0.5)),
            (EdgeKey::new("b", "a"), edge(0.5)),
        ]
        .into_iter()
        .collect();
        assert_eq!(eval.evaluate(&g), 0.0);
    }
}
