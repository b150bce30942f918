// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Genetic Optimizer
//!
//! Evolves a population of candidate connection graphs against a fitness
//! oracle built on the compatibility predictor.
//!
//! ```text
//! INIT -> EVALUATE -> SELECT -> REPRODUCE -> EVALUATE -> ... -> TERMINATED
//! ```
//!
//! - INIT seeds the population with the (sanitized) deployed graph so the
//!   search never returns something worse than the status quo.
//! - EVALUATE scores every individual in parallel and joins before moving on.
//! - SELECT runs one tournament per parent, contestants drawn without
//!   replacement.
//! - REPRODUCE carries the generation's best over unchanged (elitism of
//!   size 1), so best-seen fitness is non-decreasing.
//! - On termination, edges the best graph shares with the deployed graph
//!   take back their deployed parameters when that costs no fitness.
//!
//! A run is a pure function of its [`SearchInput`] and seed: the result is
//! returned as a value, never stored globally.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Genetic search over connection graphs

use crate::domain::catalog::CatalogSnapshot;
use crate::domain::connection::{ConnectionGraph, EdgeKey};
use crate::domain::encoding::{probability, GraphEncoder};
use crate::domain::engine_config::{EncodingConfig, EngineConfigSpec, FitnessConfig, OptimizerConfig};
use crate::domain::events::TerminationReason;
use crate::domain::fitness::FitnessEvaluator;
use crate::domain::predictor::CompatibilityPredictor;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Everything a single run reads. Immutable for the duration of the run.
#[derive(Clone)]
pub struct SearchInput {
    pub snapshot: Arc<CatalogSnapshot>,
    pub predictor: Arc<dyn CompatibilityPredictor>,
    /// Currently deployed graph, used as the elitist seed
    pub deployed: ConnectionGraph,
    /// Edges excluded from random initialization and mutation additions
    pub poisoned: BTreeSet<EdgeKey>,
    /// Extra initial individuals, e.g. the deployed graph plus edges the
    /// deployment layer left pending
    pub hints: Vec<ConnectionGraph>,
}

impl SearchInput {
    pub fn new(snapshot: Arc<CatalogSnapshot>, predictor: Arc<dyn CompatibilityPredictor>) -> Self {
        Self {
            snapshot,
            predictor,
            deployed: ConnectionGraph::new(),
            poisoned: BTreeSet::new(),
            hints: Vec::new(),
        }
    }

    pub fn with_deployed(mut self, deployed: ConnectionGraph) -> Self {
        self.deployed = deployed;
        self
    }

    pub fn with_poisoned(mut self, poisoned: BTreeSet<EdgeKey>) -> Self {
        self.poisoned = poisoned;
        self
    }

    pub fn with_hint(mut self, hint: ConnectionGraph) -> Self {
        self.hints.push(hint);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizationResult {
    pub best: ConnectionGraph,
    pub best_fitness: f64,
    /// Generation (0 = initial population) in which `best` first appeared
    pub generation_found: usize,
    pub generations_run: usize,
    pub termination: TerminationReason,
    /// Best-seen fitness after each generation
    pub fitness_trace: Vec<f64>,
    pub seed: u64,
    /// Deployed graph after pruning edges this catalog no longer supports
    pub seed_graph: ConnectionGraph,
    pub seed_fitness: f64,
    pub pruned_from_seed: usize,
}

impl OptimizationResult {
    /// Whether the search found nothing better than the seeded graph.
    pub fn is_status_quo(&self) -> bool {
        self.best == self.seed_graph
    }
}

#[derive(Debug)]
enum SearchState {
    Init,
    Evaluate,
    Select,
    Reproduce(Vec<(usize, usize)>),
    Terminated(TerminationReason),
}

/// Mutable bookkeeping of one run.
struct Search {
    population: Vec<ConnectionGraph>,
    fitness: Vec<f64>,
    generation: usize,
    best: ConnectionGraph,
    best_fitness: f64,
    generation_found: usize,
    stalled_for: usize,
    trace: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct GeneticOptimizer {
    optimizer: OptimizerConfig,
    encoding: EncodingConfig,
    fitness: FitnessConfig,
}

impl GeneticOptimizer {
    pub fn new(optimizer: OptimizerConfig, encoding: EncodingConfig, fitness: FitnessConfig) -> Self {
        Self {
            optimizer,
            encoding,
            fitness,
        }
    }

    pub fn from_spec(spec: &EngineConfigSpec) -> Self {
        Self::new(spec.optimizer.clone(), spec.encoding.clone(), spec.fitness.clone())
    }

    /// Pin the random seed, overriding the configured one.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.optimizer.random_seed = Some(seed);
        self
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.optimizer
    }

    /// Fitness of `graph` under the same encoding, predictor and penalties a
    /// run over `input` would use.
    pub fn fitness_of(&self, input: &SearchInput, graph: &ConnectionGraph) -> f64 {
        let encoder = GraphEncoder::new(input.snapshot.clone(), self.encoding.clone());
        FitnessEvaluator::new(&encoder, input.predictor.clone(), self.fitness.clone()).evaluate(graph)
    }

    /// Run the search to termination. Never fails: predictor errors score
    /// zero and an exhausted wall-clock budget returns the best so far.
    pub fn run(&self, input: SearchInput) -> OptimizationResult {
        let started = Instant::now();
        let deadline = started + self.optimizer.run_budget;
        let seed = self.optimizer.random_seed.unwrap_or_else(rand::random);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let encoder = GraphEncoder::new(input.snapshot.clone(), self.encoding.clone())
            .with_poisoned(input.poisoned.clone());
        let evaluator = FitnessEvaluator::new(&encoder, input.predictor.clone(), self.fitness.clone());

        let mut seed_graph = input.deployed.clone();
        let pruned_from_seed = encoder.sanitize(&mut seed_graph);
        let seed_fitness = evaluator.evaluate(&seed_graph);

        info!(
            seed,
            modules = input.snapshot.len(),
            slots = encoder.slot_count(),
            edge_budget = evaluator.target_edge_budget(),
            population = self.optimizer.population_size,
            model = input.predictor.family(),
            "Starting genetic search"
        );

        let mut search = Search {
            population: Vec::with_capacity(self.optimizer.population_size),
            fitness: Vec::new(),
            generation: 0,
            best: seed_graph.clone(),
            best_fitness: seed_fitness,
            generation_found: 0,
            stalled_for: 0,
            trace: Vec::new(),
        };

        let mut state = SearchState::Init;
        let termination = loop {
            state = match state {
                SearchState::Init => {
                    search.population.push(seed_graph.clone());
                    for hint in &input.hints {
                        let mut hint = hint.clone();
                        encoder.sanitize(&mut hint);
                        search.population.push(hint);
                    }
                    search.population.truncate(self.optimizer.population_size.max(1));
                    while search.population.len() < self.optimizer.population_size.max(1) {
                        search.population.push(encoder.random_individual(&mut rng));
                    }
                    SearchState::Evaluate
                }
                SearchState::Evaluate => {
                    self.evaluate(&evaluator, &mut search);
                    self.check_termination(&search, deadline, encoder.slot_count())
                        .map(SearchState::Terminated)
                        .unwrap_or(SearchState::Select)
                }
                SearchState::Select => {
                    let offspring = search.population.len().saturating_sub(1);
                    let pairs = (0..offspring)
                        .map(|_| {
                            (
                                self.tournament(&search.fitness, &mut rng),
                                self.tournament(&search.fitness, &mut rng),
                            )
                        })
                        .collect();
                    SearchState::Reproduce(pairs)
                }
                SearchState::Reproduce(pairs) => {
                    self.reproduce(&encoder, &mut search, pairs, &mut rng);
                    search.generation += 1;
                    SearchState::Evaluate
                }
                SearchState::Terminated(reason) => break reason,
            };
        };

        let settled = keep_seed_params(&evaluator, &seed_graph, &mut search.best, &mut search.best_fitness);
        if settled > 0 {
            debug!(settled, "Kept deployed parameters on unchanged edges");
        }

        let elapsed = started.elapsed();
        metrics::counter!("oic_optimizer_runs_total").increment(1);
        metrics::counter!("oic_optimizer_generations_total").increment(search.trace.len() as u64);
        metrics::gauge!("oic_optimizer_best_fitness").set(search.best_fitness);
        metrics::histogram!("oic_optimizer_run_duration_seconds").record(elapsed.as_secs_f64());

        info!(
            best_fitness = search.best_fitness,
            seed_fitness,
            generation_found = search.generation_found,
            generations_run = search.trace.len(),
            termination = ?termination,
            elapsed_ms = elapsed.as_millis() as u64,
            "Genetic search finished"
        );

        OptimizationResult {
            best: search.best,
            best_fitness: search.best_fitness,
            generation_found: search.generation_found,
            generations_run: search.trace.len(),
            termination,
            fitness_trace: search.trace,
            seed,
            seed_graph,
            seed_fitness,
            pruned_from_seed,
        }
    }

    fn evaluate(&self, evaluator: &FitnessEvaluator, search: &mut Search) {
        search.fitness = search
            .population
            .par_iter()
            .map(|graph| evaluator.evaluate(graph))
            .collect();

        let (best_index, generation_best) = argmax(&search.fitness);
        let improvement = generation_best - search.best_fitness;

        // The seed graph is already the best-so-far at generation 0, so only
        // strict improvements replace it.
        if improvement > 0.0 {
            search.best = search.population[best_index].clone();
            search.best_fitness = generation_best;
            search.generation_found = search.generation;
        }
        if improvement > self.optimizer.convergence_epsilon {
            search.stalled_for = 0;
        } else if search.generation > 0 {
            search.stalled_for += 1;
        }
        search.trace.push(search.best_fitness);

        debug!(
            generation = search.generation,
            generation_best,
            best_fitness = search.best_fitness,
            stalled_for = search.stalled_for,
            "Generation evaluated"
        );
    }

    fn check_termination(
        &self,
        search: &Search,
        deadline: Instant,
        slot_count: usize,
    ) -> Option<TerminationReason> {
        if Instant::now() >= deadline {
            return Some(TerminationReason::TimedOut);
        }
        if search.generation + 1 >= self.optimizer.generations {
            return Some(TerminationReason::BudgetExhausted);
        }
        // No valid slot means every individual is the empty graph.
        if slot_count == 0 || search.stalled_for >= self.optimizer.stall_generations {
            return Some(TerminationReason::Converged);
        }
        None
    }

    /// Index of the fittest of `tournament_size` distinct contestants.
    fn tournament<R: Rng + ?Sized>(&self, fitness: &[f64], rng: &mut R) -> usize {
        let size = self.optimizer.tournament_size.clamp(1, fitness.len());
        rand::seq::index::sample(rng, fitness.len(), size)
            .into_iter()
            .fold(None, |winner: Option<usize>, i| match winner {
                Some(w) if fitness[w] > fitness[i] || (fitness[w] == fitness[i] && w < i) => Some(w),
                _ => Some(i),
            })
            .unwrap_or(0)
    }

    fn reproduce<R: Rng + ?Sized>(
        &self,
        encoder: &GraphEncoder,
        search: &mut Search,
        pairs: Vec<(usize, usize)>,
        rng: &mut R,
    ) {
        let (elite, _) = argmax(&search.fitness);
        let mut next = Vec::with_capacity(search.population.len());
        next.push(search.population[elite].clone());

        for (a, b) in pairs {
            let mut child = if rng.random_bool(probability(self.optimizer.crossover_rate)) {
                encoder.crossover(&search.population[a], &search.population[b], rng)
            } else {
                search.population[a].clone()
            };
            if rng.random_bool(probability(self.optimizer.mutation_rate)) {
                encoder.mutate(&mut child, self.encoding.slot_mutation_rate, rng);
            }
            next.push(child);
        }

        search.population = next;
    }
}

/// Put the seed's parameters back on edges `best` shares with it wherever
/// that costs no fitness, so the resulting diff only carries changes that
/// pay for themselves. Returns how many edges were reverted.
fn keep_seed_params(
    evaluator: &FitnessEvaluator,
    seed: &ConnectionGraph,
    best: &mut ConnectionGraph,
    best_fitness: &mut f64,
) -> usize {
    let mut reverted = 0;
    for (key, params) in seed.iter() {
        match best.get(key) {
            Some(current) if current != params => {}
            _ => continue,
        }
        let mut candidate = best.clone();
        candidate.insert(key.clone(), params.clone());
        let fitness = evaluator.evaluate(&candidate);
        if fitness >= *best_fitness {
            *best = candidate;
            *best_fitness = fitness;
            reverted += 1;
        }
    }
    reverted
}

/// First index of the maximum; ties resolve to the lowest index.
fn argmax(values: &[f64]) -> (usize, f64) {
    values
        .iter()
        .copied()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(bi, bv), (i, v)| if v > bv { (i, v) } else { (bi, bv) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::connection::ConnectionParams;
    use crate::domain::module::{Capability, Interface, Module, ModuleType};
    use crate::domain::predictor::{Compatibility, PredictionContext, PredictorError};

    struct Uniform(f64);

    impl CompatibilityPredictor for Uniform {
        fn predict(&self, _: &Module, _: &Module, _: &PredictionContext) -> Result<Compatibility, PredictorError> {
            Ok(Compatibility::new(self.0, 1.0))
        }

        fn family(&self) -> &str {
            "uniform"
        }
    }

    fn modules(n: usize) -> Vec<Module> {
        (0..n)
            .map(|i| {
                Module::new(format!("m{i}"), format!("m{i}"), ModuleType::Analytics)
                    .with_capability(Capability::new(format!("cap{i}")))
                    .with_interface(Interface::new("http", format!("http://m{i}")))
            })
            .collect()
    }

    fn optimizer(generations: usize) -> GeneticOptimizer {
        let config = OptimizerConfig {
            population_size: 12,
            generations,
            stall_generations: generations,
            ..Default::default()
        };
        GeneticOptimizer::new(config, EncodingConfig::default(), FitnessConfig::default()).with_seed(5)
    }

    #[test]
    fn test_argmax_prefers_first_maximum() {
        assert_eq!(argmax(&[0.1, 0.7, 0.7, 0.2]), (1, 0.7));
    }

    #[test]
    fn test_generation_budget_is_respected() {
        let input = SearchInput::new(Arc::new(CatalogSnapshot::build(modules(5))), Arc::new(Uniform(0.6)));
        let result = optimizer(15).run(input);

        assert_eq!(result.generations_run, 15);
        assert_eq!(result.fitness_trace.len(), 15);
        assert_eq!(result.termination, TerminationReason::BudgetExhausted);
    }

    #[test]
    fn test_no_valid_slots_converges_immediately() {
        let input = SearchInput::new(Arc::new(CatalogSnapshot::build(modules(1))), Arc::new(Uniform(1.0)));
        let result = optimizer(100).run(input);

        assert_eq!(result.termination, TerminationReason::Converged);
        assert_eq!(result.generations_run, 1);
        assert!(result.best.is_empty());
        assert_eq!(result.best_fitness, 0.0);
    }

    #[test]
    fn test_out_of_range_rates_do_not_panic() {
        let mut opt = optimizer(10);
        opt.optimizer.crossover_rate = 1.7;
        opt.optimizer.mutation_rate = -0.2;
        opt.encoding.initial_edge_density = f64::NAN;
        let input = SearchInput::new(Arc::new(CatalogSnapshot::build(modules(4))), Arc::new(Uniform(0.5)));
        let result = opt.run(input);

        assert_eq!(result.generations_run, 10);
    }

    #[test]
    fn test_shared_edges_keep_deployed_parameters() {
        let snapshot = Arc::new(CatalogSnapshot::build(modules(4)));
        let mut deployed = ConnectionGraph::new();
        deployed.insert(
            EdgeKey::new("m0", "m1"),
            ConnectionParams {
                protocol: "http".to_string(),
                rate_limit: 7,
                priority: 0.25,
            },
        );
        let input = SearchInput::new(snapshot, Arc::new(Uniform(0.8))).with_deployed(deployed.clone());
        let result = optimizer(60).run(input);

        let diff = deployed.diff(&result.best);
        assert!(diff.parameter_changes.is_empty());
        if let Some(params) = result.best.get(&EdgeKey::new("m0", "m1")) {
            assert_eq!(params, deployed.get(&EdgeKey::new("m0", "m1")).unwrap());
        }
    }

    #[test]
    fn test_zero_run_budget_times_out_with_best_so_far() {
        let mut opt = optimizer(1000);
        opt.optimizer.run_budget = std::time::Duration::ZERO;
        let input = SearchInput::new(Arc::new(CatalogSnapshot::build(modules(4))), Arc::new(Uniform(0.5)));
        let result = opt.run(input);

        assert_eq!(result.termination, TerminationReason::TimedOut);
        assert_eq!(result.generations_run, 1);
    }
}
