// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Graph Encoding
//!
//! Translates a [`CatalogSnapshot`] into the space of valid chromosomes and
//! provides the genetic operators over it.
//!
//! The encoder precomputes every *edge slot*: an ordered pair of distinct
//! modules whose protocol intersection is non-empty. Operators only ever
//! place edges on slots, so self-loops and protocol-less edges cannot be
//! produced. Degree caps are enforced by construction in
//! [`GraphEncoder::random_individual`] and [`GraphEncoder::mutate`], and by
//! [`GraphEncoder::repair`] after crossover.
//!
//! All randomness comes from the caller's RNG and every iteration is over
//! sorted collections, so a seeded RNG yields a reproducible sequence.

use crate::domain::catalog::CatalogSnapshot;
use crate::domain::connection::{ConnectionGraph, ConnectionParams, EdgeKey};
use crate::domain::engine_config::EncodingConfig;
use crate::domain::module::{protocol_intersection, ModuleId, Observed};
use rand::seq::{IndexedRandom, SliceRandom};
use rand::Rng;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// A structurally valid position for a directed edge.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeSlot {
    pub key: EdgeKey,
    /// Sorted, never empty
    pub protocols: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct GraphEncoder {
    snapshot: Arc<CatalogSnapshot>,
    config: EncodingConfig,
    slots: Vec<EdgeSlot>,
    slot_index: BTreeMap<EdgeKey, usize>,
    poisoned: BTreeSet<EdgeKey>,
}

impl GraphEncoder {
    pub fn new(snapshot: Arc<CatalogSnapshot>, config: EncodingConfig) -> Self {
        let mut slots = Vec::new();
        for source in snapshot.modules() {
            for target in snapshot.modules() {
                if source.module_id == target.module_id {
                    continue;
                }
                let protocols = protocol_intersection(source, target);
                if protocols.is_empty() {
                    continue;
                }
                slots.push(EdgeSlot {
                    key: EdgeKey::new(source.module_id.clone(), target.module_id.clone()),
                    protocols,
                });
            }
        }
        let slot_index = slots
            .iter()
            .enumerate()
            .map(|(i, s)| (s.key.clone(), i))
            .collect();

        Self {
            snapshot,
            config,
            slots,
            slot_index,
            poisoned: BTreeSet::new(),
        }
    }

    /// Edges that random initialization and mutation must not add.
    pub fn with_poisoned(mut self, poisoned: BTreeSet<EdgeKey>) -> Self {
        self.poisoned = poisoned;
        self
    }

    pub fn snapshot(&self) -> &Arc<CatalogSnapshot> {
        &self.snapshot
    }

    pub fn config(&self) -> &EncodingConfig {
        &self.config
    }

    pub fn slots(&self) -> &[EdgeSlot] {
        &self.slots
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, key: &EdgeKey) -> Option<&EdgeSlot> {
        self.slot_index.get(key).map(|&i| &self.slots[i])
    }

    pub fn is_poisoned(&self, key: &EdgeKey) -> bool {
        self.poisoned.contains(key)
    }

    /// Highest rate limit an edge may carry: the tighter of the two declared
    /// interface limits, or the configured default when neither is known.
    pub fn rate_cap(&self, key: &EdgeKey, protocol: &str) -> u32 {
        let source_limit = self
            .snapshot
            .get(&key.source)
            .and_then(|m| m.outbound_interface(protocol))
            .map(|i| i.rate_limit)
            .unwrap_or(Observed::Unknown);
        let target_limit = self
            .snapshot
            .get(&key.target)
            .and_then(|m| m.inbound_interface(protocol))
            .map(|i| i.rate_limit)
            .unwrap_or(Observed::Unknown);

        let cap = match (source_limit, target_limit) {
            (Observed::Known(a), Observed::Known(b)) => a.min(b),
            (Observed::Known(a), Observed::Unknown) | (Observed::Unknown, Observed::Known(a)) => a,
            (Observed::Unknown, Observed::Unknown) => self.config.default_rate_limit,
        };
        cap.max(1)
    }

    /// Whether an edge sits on a slot with a shared protocol and in-range
    /// parameters. Degree caps are a graph-level property, see
    /// [`GraphEncoder::is_structurally_valid`].
    pub fn is_valid_edge(&self, key: &EdgeKey, params: &ConnectionParams) -> bool {
        let Some(slot) = self.slot(key) else {
            return false;
        };
        slot.protocols.iter().any(|p| p == &params.protocol)
            && params.rate_limit >= 1
            && params.rate_limit <= self.rate_cap(key, &params.protocol)
            && (0.0..=1.0).contains(&params.priority)
    }

    pub fn is_structurally_valid(&self, graph: &ConnectionGraph) -> bool {
        if !graph.iter().all(|(k, p)| self.is_valid_edge(k, p)) {
            return false;
        }
        let degrees = Degrees::of(graph);
        let max = self.config.max_connections_per_module;
        degrees.out.values().all(|&d| d <= max) && degrees.inbound.values().all(|&d| d <= max)
    }

    pub fn random_params<R: Rng + ?Sized>(&self, slot: &EdgeSlot, rng: &mut R) -> ConnectionParams {
        let protocol = slot
            .protocols
            .choose(rng)
            .cloned()
            .unwrap_or_default();
        let cap = self.rate_cap(&slot.key, &protocol);
        ConnectionParams {
            rate_limit: rng.random_range(1..=cap),
            priority: rng.random::<f64>(),
            protocol,
        }
    }

    /// A fresh individual: each slot is visited in random order and filled
    /// with probability `initial_edge_density` while both endpoints are
    /// under the degree cap.
    pub fn random_individual<R: Rng + ?Sized>(&self, rng: &mut R) -> ConnectionGraph {
        let mut order: Vec<usize> = (0..self.slots.len()).collect();
        order.shuffle(rng);

        let max = self.config.max_connections_per_module;
        let density = probability(self.config.initial_edge_density);
        let mut degrees = Degrees::default();
        let mut graph = ConnectionGraph::new();

        for i in order {
            let slot = &self.slots[i];
            if self.poisoned.contains(&slot.key) {
                continue;
            }
            if !rng.random_bool(density) {
                continue;
            }
            if !degrees.has_room(&slot.key, max) {
                continue;
            }
            let params = self.random_params(slot, rng);
            degrees.add(&slot.key);
            graph.insert(slot.key.clone(), params);
        }
        graph
    }

    /// Uniform per-module crossover: each module's outgoing edge set comes
    /// from one parent, then the child is repaired.
    pub fn crossover<R: Rng + ?Sized>(
        &self,
        parent_a: &ConnectionGraph,
        parent_b: &ConnectionGraph,
        rng: &mut R,
    ) -> ConnectionGraph {
        let mut child = ConnectionGraph::new();
        for module in self.snapshot.modules() {
            let parent = if rng.random_bool(0.5) { parent_a } else { parent_b };
            for (key, params) in parent.outgoing(&module.module_id) {
                child.insert(key.clone(), params.clone());
            }
        }
        child.retain(|key, params| self.is_valid_edge(key, params));
        self.repair(&mut child);
        child
    }

    /// Enforce degree caps by dropping the lowest-priority excess edges,
    /// out-degree first, then in-degree. Returns the number of edges dropped.
    pub fn repair(&self, graph: &mut ConnectionGraph) -> usize {
        let max = self.config.max_connections_per_module;
        let mut dropped = 0;

        let mut by_source: BTreeMap<&ModuleId, Vec<(EdgeKey, f64)>> = BTreeMap::new();
        for (key, params) in graph.iter() {
            by_source
                .entry(&key.source)
                .or_default()
                .push((key.clone(), params.priority));
        }
        let excess = lowest_priority_excess(by_source.into_values(), max);
        for key in &excess {
            graph.remove(key);
            dropped += 1;
        }

        let mut by_target: BTreeMap<&ModuleId, Vec<(EdgeKey, f64)>> = BTreeMap::new();
        for (key, params) in graph.iter() {
            by_target
                .entry(&key.target)
                .or_default()
                .push((key.clone(), params.priority));
        }
        let excess = lowest_priority_excess(by_target.into_values(), max);
        for key in &excess {
            graph.remove(key);
            dropped += 1;
        }

        dropped
    }

    /// Per-slot mutation. Each slot is hit with probability `rate`: an
    /// absent edge is added when valid and under the cap, a present edge is
    /// either removed or has one parameter nudged by a bounded delta.
    pub fn mutate<R: Rng + ?Sized>(&self, graph: &mut ConnectionGraph, rate: f64, rng: &mut R) {
        let rate = probability(rate);
        let max = self.config.max_connections_per_module;
        let mut degrees = Degrees::of(graph);

        for slot in &self.slots {
            if !rng.random_bool(rate) {
                continue;
            }

            if graph.contains(&slot.key) {
                match rng.random_range(0..4u8) {
                    0 | 1 => {
                        graph.remove(&slot.key);
                        degrees.remove(&slot.key);
                    }
                    2 => self.perturb_rate_limit(graph, &slot.key, rng),
                    _ => self.perturb_priority(graph, &slot.key, rng),
                }
            } else if !self.poisoned.contains(&slot.key) && degrees.has_room(&slot.key, max) {
                let params = self.random_params(slot, rng);
                graph.insert(slot.key.clone(), params);
                degrees.add(&slot.key);
            }
        }
    }

    fn perturb_rate_limit<R: Rng + ?Sized>(&self, graph: &mut ConnectionGraph, key: &EdgeKey, rng: &mut R) {
        let Some(protocol) = graph.get(key).map(|p| p.protocol.clone()) else {
            return;
        };
        let cap = self.rate_cap(key, &protocol);
        if let Some(params) = graph.get_mut(key) {
            let step = (f64::from(params.rate_limit) * self.config.rate_limit_step).max(1.0);
            let delta = rng.random_range(-step..=step).round();
            let next = (f64::from(params.rate_limit) + delta).clamp(1.0, f64::from(cap));
            params.rate_limit = next as u32;
        }
    }

    fn perturb_priority<R: Rng + ?Sized>(&self, graph: &mut ConnectionGraph, key: &EdgeKey, rng: &mut R) {
        let step = self.config.priority_step;
        if let Some(params) = graph.get_mut(key) {
            let delta = rng.random_range(-step..=step);
            params.priority = (params.priority + delta).clamp(0.0, 1.0);
        }
    }

    /// Bring a graph built against another catalog (typically the deployed
    /// graph) into this encoding: edges touching unknown modules or using a
    /// protocol the pair no longer shares are pruned, parameters are clamped
    /// into range and degree caps are repaired. Returns the number of pruned
    /// edges.
    pub fn sanitize(&self, graph: &mut ConnectionGraph) -> usize {
        let pruned = graph.retain(|key, params| {
            self.slot(key)
                .map(|slot| slot.protocols.iter().any(|p| p == &params.protocol))
                .unwrap_or(false)
        });

        let keys: Vec<EdgeKey> = graph.keys().cloned().collect();
        for key in keys {
            let cap = match graph.get(&key) {
                Some(params) => self.rate_cap(&key, &params.protocol),
                None => continue,
            };
            if let Some(params) = graph.get_mut(&key) {
                params.rate_limit = params.rate_limit.clamp(1, cap);
                params.priority = if params.priority.is_finite() {
                    params.priority.clamp(0.0, 1.0)
                } else {
                    0.0
                };
            }
        }

        pruned + self.repair(graph)
    }
}

/// Keys to drop from each group so that no group exceeds `max`. Lowest
/// priority goes first; ties drop the larger key so results are stable.
/// Clamp a configured rate into [0, 1]; non-finite rates never fire.
pub(crate) fn probability(rate: f64) -> f64 {
    if rate.is_finite() {
        rate.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn lowest_priority_excess(
    groups: impl Iterator<Item = Vec<(EdgeKey, f64)>>,
    max: usize,
) -> Vec<EdgeKey> {
    let mut excess = Vec::new();
    for mut group in groups {
        if group.len() <= max {
            continue;
        }
        group.sort_by(|(ka, pa), (kb, pb)| pa.total_cmp(pb).then_with(|| kb.cmp(ka)));
        let overflow = group.len() - max;
        excess.extend(group.into_iter().take(overflow).map(|(k, _)| k));
    }
    excess
}

#[derive(Debug, Default)]
struct Degrees {
    out: HashMap<ModuleId, usize>,
    inbound: HashMap<ModuleId, usize>,
}

impl Degrees {
    fn of(graph: &ConnectionGraph) -> Self {
        let mut degrees = Self::default();
        for key in graph.keys() {
            degrees.add(key);
        }
        degrees
    }

    fn has_room(&self, key: &EdgeKey, max: usize) -> bool {
        self.out.get(&key.source).copied().unwrap_or(0) < max
            && self.inbound.get(&key.target).copied().unwrap_or(0) < max
    }

    fn add(&mut self, key: &EdgeKey) {
        *self.out.entry(key.source.clone()).or_insert(0) += 1;
        *self.inbound.entry(key.target.clone()).or_insert(0) += 1;
    }

    fn remove(&mut self, key: &EdgeKey) {
        if let Some(d) = self.out.get_mut(&key.source) {
            *d = d.saturating_sub(1);
        }
        if let Some(d) = self.inbound.get_mut(&key.target) {
            *d = d.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::module::{Capability, Interface, InterfaceDirection, Module, ModuleType};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn http(id: &str) -> Module {
        Module::new(id, id, ModuleType::DataProcessor)
            .with_capability(Capability::new("transform"))
            .with_interface(Interface::new("http", format!("http://{id}")))
    }

    fn encoder(modules: Vec<Module>, max: usize) -> GraphEncoder {
        let config = EncodingConfig {
            max_connections_per_module: max,
            initial_edge_density: 1.0,
            ..Default::default()
        };
        GraphEncoder::new(Arc::new(CatalogSnapshot::build(modules)), config)
    }

    #[test]
    fn test_slots_skip_self_loops_and_disjoint_protocols() {
        let z = Module::new("z", "z", ModuleType::Storage)
            .with_capability(Capability::new("store"))
            .with_interface(Interface::new("amqp", "amqp://z"));
        let enc = encoder(vec![http("x"), http("y"), z], 4);

        let keys: Vec<String> = enc.slots().iter().map(|s| s.key.to_string()).collect();
        assert_eq!(keys, vec!["x -> y", "y -> x"]);
    }

    #[test]
    fn test_slots_respect_interface_direction() {
        let sink = Module::new("s", "s", ModuleType::Storage)
            .with_capability(Capability::new("store"))
            .with_interface(Interface::new("http", "http://s").with_direction(InterfaceDirection::Inbound));
        let enc = encoder(vec![http("x"), sink], 4);

        let keys: Vec<String> = enc.slots().iter().map(|s| s.key.to_string()).collect();
        assert_eq!(keys, vec!["x -> s"]);
    }

    #[test]
    fn test_random_individual_respects_degree_cap() {
        let modules = (0..8).map(|i| http(&format!("m{i}"))).collect();
        let enc = encoder(modules, 2);
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        for _ in 0..50 {
            let g = enc.random_individual(&mut rng);
            assert!(enc.is_structurally_valid(&g));
            assert!(!g.is_empty());
        }
    }

    #[test]
    fn test_poisoned_edges_never_initialized() {
        let enc = encoder(vec![http("x"), http("y")], 4)
            .with_poisoned([EdgeKey::new("x", "y")].into_iter().collect());
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        for _ in 0..20 {
            let mut g = enc.random_individual(&mut rng);
            assert!(!g.contains(&EdgeKey::new("x", "y")));
            enc.mutate(&mut g, 1.0, &mut rng);
            assert!(!g.contains(&EdgeKey::new("x", "y")));
        }
    }

    #[test]
    fn test_repair_drops_lowest_priority() {
        let enc = encoder(vec![http("a"), http("b"), http("c")], 1);
        let params = |priority| ConnectionParams {
            protocol: "http".to_string(),
            rate_limit: 10,
            priority,
        };
        let mut g: ConnectionGraph = [
            (EdgeKey::new("a", "b"), params(0.9)),
            (EdgeKey::new("a", "c"), params(0.1)),
        ]
        .into_iter()
        .collect();

        assert_eq!(enc.repair(&mut g), 1);
        assert!(g.contains(&EdgeKey::new("a", "b")));
    }

    #[test]
    fn test_crossover_and_mutation_keep_structure() {
        let modules = (0..6).map(|i| http(&format!("m{i}"))).collect();
        let enc = encoder(modules, 2);
        let mut rng = ChaCha8Rng::seed_from_u64(99);

        let a = enc.random_individual(&mut rng);
        let b = enc.random_individual(&mut rng);
        for _ in 0..100 {
            let mut child = enc.crossover(&a, &b, &mut rng);
            enc.mutate(&mut child, 0.5, &mut rng);
            assert!(enc.is_structurally_valid(&child));
        }
    }

    #[test]
    fn test_sanitize_prunes_unknown_modules_and_clamps() {
        let limited = Module::new("y", "y", ModuleType::Storage)
            .with_capability(Capability::new("store"))
            .with_interface(Interface::new("http", "http://y").with_rate_limit(5));
        let enc = encoder(vec![http("x"), limited], 4);
        let mut g: ConnectionGraph = [
            (
                EdgeKey::new("x", "y"),
                ConnectionParams {
                    protocol: "http".to_string(),
                    rate_limit: 500,
                    priority: 2.0,
                },
            ),
            (
                EdgeKey::new("x", "gone"),
                ConnectionParams {
                    protocol: "http".to_string(),
                    rate_limit: 1,
                    priority: 0.5,
                },
            ),
        ]
        .into_iter()
        .collect();

        assert_eq!(enc.sanitize(&mut g), 1);
        let kept = g.get(&EdgeKey::new("x", "y")).unwrap();
        assert_eq!(kept.rate_limit, 5);
        assert_eq!(kept.priority, 1.0);
        assert!(enc.is_structurally_valid(&g));
    }
}
