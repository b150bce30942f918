// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use oic_core::application::optimizer::{GeneticOptimizer, SearchInput};
use oic_core::domain::catalog::CatalogSnapshot;
use oic_core::domain::connection::{ConnectionGraph, ConnectionParams, EdgeKey};
use oic_core::domain::encoding::GraphEncoder;
use oic_core::domain::engine_config::{EncodingConfig, FitnessConfig, OptimizerConfig};
use oic_core::domain::events::TerminationReason;
use oic_core::domain::module::{
    protocol_intersection, Capability, Interface, InterfaceDirection, Module, ModuleId, ModuleType,
};
use oic_core::domain::predictor::{Compatibility, CompatibilityPredictor, PredictionContext, PredictorError};
use oic_core::infrastructure::predictors::{ConstantPredictor, HeuristicPredictor};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// Scores X<->Y highly and everything else at zero.
struct PairTable;

impl CompatibilityPredictor for PairTable {
    fn predict(
        &self,
        source: &Module,
        target: &Module,
        _context: &PredictionContext,
    ) -> Result<Compatibility, PredictorError> {
        let pair = (source.module_id.as_str(), target.module_id.as_str());
        let score = match pair {
            ("x", "y") | ("y", "x") => 0.9,
            _ => 0.0,
        };
        Ok(Compatibility::new(score, 1.0))
    }

    fn family(&self) -> &str {
        "pair-table"
    }
}

fn module(id: &str, capability: &str, protocol: &str) -> Module {
    Module::new(id, id, ModuleType::DataProcessor)
        .with_capability(Capability::new(capability))
        .with_interface(Interface::new(protocol, format!("{protocol}://{id}")))
}

fn xyz() -> Vec<Module> {
    vec![
        module("x", "transform", "http"),
        module("y", "transform", "http"),
        module("z", "archive", "grpc"),
    ]
}

/// A mixed catalog: several protocols, one-way interfaces and a rate limit.
fn mixed_catalog() -> Vec<Module> {
    vec![
        module("a", "ingest", "http"),
        module("b", "ingest", "http").with_interface(Interface::new("grpc", "grpc://b")),
        module("c", "score", "grpc"),
        Module::new("d", "d", ModuleType::Storage)
            .with_capability(Capability::new("persist"))
            .with_interface(
                Interface::new("http", "http://d")
                    .with_direction(InterfaceDirection::Inbound)
                    .with_rate_limit(20),
            ),
        Module::new("e", "e", ModuleType::ApiGateway)
            .with_capability(Capability::new("route"))
            .with_interface(Interface::new("http", "http://e").with_direction(InterfaceDirection::Outbound)),
        module("f", "score", "http"),
        module("g", "report", "amqp"),
    ]
}

fn optimizer(population_size: usize, generations: usize, stall: usize, seed: u64) -> GeneticOptimizer {
    let config = OptimizerConfig {
        population_size,
        generations,
        stall_generations: stall,
        run_budget: Duration::from_secs(120),
        ..Default::default()
    };
    GeneticOptimizer::new(config, EncodingConfig::default(), FitnessConfig::default()).with_seed(seed)
}

fn assert_valid(encoder: &GraphEncoder, graph: &ConnectionGraph) {
    let snapshot = encoder.snapshot();
    let cap = encoder.config().max_connections_per_module;
    for (key, params) in graph.iter() {
        let source = snapshot.get(&key.source).expect("source in snapshot");
        let target = snapshot.get(&key.target).expect("target in snapshot");
        assert!(
            protocol_intersection(source, target).contains(&params.protocol),
            "{} uses {} outside the protocol intersection",
            key,
            params.protocol
        );
    }
    for module in snapshot.modules() {
        assert!(graph.out_degree(&module.module_id) <= cap);
        assert!(graph.in_degree(&module.module_id) <= cap);
    }
    assert!(encoder.is_structurally_valid(graph));
}

#[test]
fn test_operators_preserve_structural_validity_and_degree_caps() {
    let snapshot = Arc::new(CatalogSnapshot::build(mixed_catalog()));
    let encoding = EncodingConfig {
        max_connections_per_module: 2,
        initial_edge_density: 0.9,
        ..Default::default()
    };
    let encoder = GraphEncoder::new(snapshot, encoding);
    let mut rng = ChaCha8Rng::seed_from_u64(11);

    let mut population: Vec<ConnectionGraph> = (0..30).map(|_| encoder.random_individual(&mut rng)).collect();
    for graph in &population {
        assert_valid(&encoder, graph);
    }

    for _ in 0..20 {
        let mut next = Vec::with_capacity(population.len());
        for pair in population.chunks(2) {
            let (a, b) = (&pair[0], pair.get(1).unwrap_or(&pair[0]));
            let mut child = encoder.crossover(a, b, &mut rng);
            assert_valid(&encoder, &child);
            encoder.mutate(&mut child, 0.5, &mut rng);
            assert_valid(&encoder, &child);
            next.push(child.clone());
            next.push(child);
        }
        population = next;
    }
}

#[test]
fn test_best_fitness_trace_never_decreases() {
    let input = SearchInput::new(
        Arc::new(CatalogSnapshot::build(mixed_catalog())),
        Arc::new(HeuristicPredictor::default()),
    );
    let result = optimizer(20, 60, 60, 3).run(input);

    assert!(!result.fitness_trace.is_empty());
    for window in result.fitness_trace.windows(2) {
        assert!(window[1] >= window[0], "trace decreased: {:?}", window);
    }
    assert_eq!(result.fitness_trace.last().copied(), Some(result.best_fitness));
}

#[test]
fn test_same_seed_reproduces_trace_and_best() {
    let run = |seed: u64| {
        let input = SearchInput::new(
            Arc::new(CatalogSnapshot::build(mixed_catalog())),
            Arc::new(HeuristicPredictor::default()),
        );
        optimizer(24, 40, 40, seed).run(input)
    };

    let first = run(99);
    let second = run(99);
    assert_eq!(first.fitness_trace, second.fitness_trace);
    assert_eq!(first.best, second.best);
    assert_eq!(first.generation_found, second.generation_found);
    assert_eq!(first.seed, 99);
}

#[test]
fn test_catalog_order_does_not_change_the_result() {
    let mut reversed = mixed_catalog();
    reversed.reverse();

    let run = |modules: Vec<Module>| {
        let input = SearchInput::new(
            Arc::new(CatalogSnapshot::build(modules)),
            Arc::new(HeuristicPredictor::default()),
        );
        optimizer(16, 25, 25, 7).run(input)
    };
    assert_eq!(run(mixed_catalog()).best, run(reversed).best);
}

#[test]
fn test_incompatible_module_never_receives_edges() {
    let snapshot = Arc::new(CatalogSnapshot::build(xyz()));
    let encoder = GraphEncoder::new(snapshot, EncodingConfig::default());
    assert_eq!(encoder.slot_count(), 2);

    let mut rng = ChaCha8Rng::seed_from_u64(1);
    let z = ModuleId::new("z");
    for _ in 0..500 {
        let graph = encoder.random_individual(&mut rng);
        assert!(graph.keys().all(|k| !k.touches(&z)));
    }
}

#[test]
fn test_converges_to_the_compatible_pair() {
    let input = SearchInput::new(Arc::new(CatalogSnapshot::build(xyz())), Arc::new(PairTable));
    let result = optimizer(40, 1000, 50, 2024).run(input);

    let edges: BTreeSet<EdgeKey> = result.best.keys().cloned().collect();
    let expected: BTreeSet<EdgeKey> = [EdgeKey::new("x", "y"), EdgeKey::new("y", "x")].into_iter().collect();
    assert_eq!(edges, expected);
    assert!(result.best_fitness >= 0.85, "fitness {}", result.best_fitness);
    assert!(result.generations_run <= 1000);
}

#[test]
fn test_cold_start_model_scores_everything_zero() {
    let input = SearchInput::new(
        Arc::new(CatalogSnapshot::build(mixed_catalog())),
        Arc::new(ConstantPredictor::cold_start()),
    );
    let result = optimizer(20, 300, 10, 5).run(input);

    assert_eq!(result.best_fitness, 0.0);
    assert!(result.fitness_trace.iter().all(|f| *f == 0.0));
    assert!(result.generations_run <= 300);
    assert_eq!(result.termination, TerminationReason::Converged);
}

#[test]
fn test_removed_module_disappears_from_next_run() {
    let before = SearchInput::new(Arc::new(CatalogSnapshot::build(xyz())), Arc::new(PairTable));
    let first = optimizer(20, 200, 30, 8).run(before);
    assert!(first.best.keys().any(|k| k.touches(&ModuleId::new("y"))));

    let remaining: Vec<Module> = xyz().into_iter().filter(|m| m.module_id.as_str() != "y").collect();
    let after = SearchInput::new(Arc::new(CatalogSnapshot::build(remaining)), Arc::new(PairTable))
        .with_deployed(first.best.clone());
    let second = optimizer(20, 200, 30, 8).run(after);

    let y = ModuleId::new("y");
    assert!(second.seed_graph.keys().all(|k| !k.touches(&y)));
    assert!(second.best.keys().all(|k| !k.touches(&y)));
    assert_eq!(second.pruned_from_seed, first.best.len());
}

#[test]
fn test_diff_round_trip_between_search_results() {
    let snapshot = Arc::new(CatalogSnapshot::build(mixed_catalog()));
    let a = optimizer(12, 10, 10, 1)
        .run(SearchInput::new(snapshot.clone(), Arc::new(HeuristicPredictor::default())))
        .best;
    let mut b = optimizer(12, 10, 10, 2)
        .run(SearchInput::new(snapshot, Arc::new(HeuristicPredictor::default())))
        .best;
    b.insert(
        EdgeKey::new("b", "c"),
        ConnectionParams {
            protocol: "grpc".to_string(),
            rate_limit: 7,
            priority: 0.25,
        },
    );

    let mut rebuilt = a.clone();
    rebuilt.apply(&a.diff(&b)).unwrap();
    assert_eq!(rebuilt, b);

    rebuilt.apply(&a.diff(&b).inverse()).unwrap();
    assert_eq!(rebuilt, a);
}
