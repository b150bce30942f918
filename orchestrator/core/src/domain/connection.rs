// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Connection Graphs
//!
//! A [`ConnectionGraph`] is one complete proposal of directed, attributed
//! links between modules. The optimizer treats it as a chromosome; the
//! orchestration loop treats it as the deployed topology. Edges are kept in
//! a `BTreeMap` so every iteration order is deterministic.
//!
//! [`GraphDiff`] is the incremental plan between two graphs. Applying
//! `a.diff(&b)` to `a` reconstructs `b` exactly.

use crate::domain::module::ModuleId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

/// Ordered (source, target) pair identifying a directed edge.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeKey {
    pub source: ModuleId,
    pub target: ModuleId,
}

impl EdgeKey {
    pub fn new(source: impl Into<ModuleId>, target: impl Into<ModuleId>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }

    pub fn touches(&self, module_id: &ModuleId) -> bool {
        &self.source == module_id || &self.target == module_id
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.target)
    }
}

/// Tunable parameters carried by an edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Drawn from the source-outbound / target-inbound protocol intersection
    pub protocol: String,

    /// Requests per second allowed over this link
    pub rate_limit: u32,

    /// Relative weight in [0, 1]; repair drops the lowest first
    pub priority: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    #[serde(flatten)]
    pub key: EdgeKey,

    #[serde(flatten)]
    pub params: ConnectionParams,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Connection>", into = "Vec<Connection>")]
pub struct ConnectionGraph {
    edges: BTreeMap<EdgeKey, ConnectionParams>,
}

impl ConnectionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn contains(&self, key: &EdgeKey) -> bool {
        self.edges.contains_key(key)
    }

    pub fn get(&self, key: &EdgeKey) -> Option<&ConnectionParams> {
        self.edges.get(key)
    }

    pub fn get_mut(&mut self, key: &EdgeKey) -> Option<&mut ConnectionParams> {
        self.edges.get_mut(key)
    }

    pub fn insert(&mut self, key: EdgeKey, params: ConnectionParams) -> Option<ConnectionParams> {
        self.edges.insert(key, params)
    }

    pub fn remove(&mut self, key: &EdgeKey) -> Option<ConnectionParams> {
        self.edges.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EdgeKey, &ConnectionParams)> {
        self.edges.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &EdgeKey> {
        self.edges.keys()
    }

    pub fn connections(&self) -> Vec<Connection> {
        self.edges
            .iter()
            .map(|(key, params)| Connection {
                key: key.clone(),
                params: params.clone(),
            })
            .collect()
    }

    pub fn outgoing<'a>(
        &'a self,
        source: &'a ModuleId,
    ) -> impl Iterator<Item = (&'a EdgeKey, &'a ConnectionParams)> + 'a {
        self.edges.iter().filter(move |(k, _)| &k.source == source)
    }

    pub fn out_degree(&self, module_id: &ModuleId) -> usize {
        self.edges.keys().filter(|k| &k.source == module_id).count()
    }

    pub fn in_degree(&self, module_id: &ModuleId) -> usize {
        self.edges.keys().filter(|k| &k.target == module_id).count()
    }

    /// Drop every edge whose endpoints are not both in `known`. Returns the
    /// number of pruned edges.
    pub fn retain_modules(&mut self, known: &BTreeSet<ModuleId>) -> usize {
        let before = self.edges.len();
        self.edges
            .retain(|k, _| known.contains(&k.source) && known.contains(&k.target));
        before - self.edges.len()
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&EdgeKey, &ConnectionParams) -> bool) -> usize {
        let before = self.edges.len();
        self.edges.retain(|k, p| keep(k, p));
        before - self.edges.len()
    }

    /// Edge-level plan turning `self` into `target`.
    pub fn diff(&self, target: &ConnectionGraph) -> GraphDiff {
        let mut diff = GraphDiff::default();

        for (key, params) in &self.edges {
            match target.edges.get(key) {
                None => diff.removals.push(Connection {
                    key: key.clone(),
                    params: params.clone(),
                }),
                Some(next) if next != params => diff.parameter_changes.push(ParameterChange {
                    key: key.clone(),
                    from: params.clone(),
                    to: next.clone(),
                }),
                Some(_) => {}
            }
        }

        for (key, params) in &target.edges {
            if !self.edges.contains_key(key) {
                diff.additions.push(Connection {
                    key: key.clone(),
                    params: params.clone(),
                });
            }
        }

        diff
    }

    /// Apply a diff strictly: nothing is changed unless every entry matches
    /// the current state.
    pub fn apply(&mut self, diff: &GraphDiff) -> Result<(), DiffError> {
        for conn in &diff.additions {
            if self.edges.contains_key(&conn.key) {
                return Err(DiffError::AlreadyPresent(conn.key.clone()));
            }
        }
        for conn in &diff.removals {
            if !self.edges.contains_key(&conn.key) {
                return Err(DiffError::Missing(conn.key.clone()));
            }
        }
        for change in &diff.parameter_changes {
            match self.edges.get(&change.key) {
                None => return Err(DiffError::Missing(change.key.clone())),
                Some(current) if current != &change.from => {
                    return Err(DiffError::ParameterMismatch(change.key.clone()))
                }
                Some(_) => {}
            }
        }

        for conn in &diff.removals {
            self.edges.remove(&conn.key);
        }
        for change in &diff.parameter_changes {
            self.edges.insert(change.key.clone(), change.to.clone());
        }
        for conn in &diff.additions {
            self.edges.insert(conn.key.clone(), conn.params.clone());
        }
        Ok(())
    }
}

impl From<Vec<Connection>> for ConnectionGraph {
    fn from(connections: Vec<Connection>) -> Self {
        Self {
            edges: connections.into_iter().map(|c| (c.key, c.params)).collect(),
        }
    }
}

impl From<ConnectionGraph> for Vec<Connection> {
    fn from(graph: ConnectionGraph) -> Self {
        graph.connections()
    }
}

impl FromIterator<(EdgeKey, ConnectionParams)> for ConnectionGraph {
    fn from_iter<I: IntoIterator<Item = (EdgeKey, ConnectionParams)>>(iter: I) -> Self {
        Self {
            edges: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterChange {
    pub key: EdgeKey,
    pub from: ConnectionParams,
    pub to: ConnectionParams,
}

/// Incremental plan handed to the deployment layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDiff {
    #[serde(default)]
    pub additions: Vec<Connection>,

    /// Removed edges keep their last parameters so the diff can be inverted
    #[serde(default)]
    pub removals: Vec<Connection>,

    #[serde(default)]
    pub parameter_changes: Vec<ParameterChange>,
}

impl GraphDiff {
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.removals.is_empty() && self.parameter_changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.additions.len() + self.removals.len() + self.parameter_changes.len()
    }

    pub fn touched_keys(&self) -> BTreeSet<EdgeKey> {
        self.additions
            .iter()
            .map(|c| c.key.clone())
            .chain(self.removals.iter().map(|c| c.key.clone()))
            .chain(self.parameter_changes.iter().map(|c| c.key.clone()))
            .collect()
    }

    /// The diff that undoes this one.
    pub fn inverse(&self) -> GraphDiff {
        GraphDiff {
            additions: self.removals.clone(),
            removals: self.additions.clone(),
            parameter_changes: self
                .parameter_changes
                .iter()
                .map(|c| ParameterChange {
                    key: c.key.clone(),
                    from: c.to.clone(),
                    to: c.from.clone(),
                })
                .collect(),
        }
    }

    /// This diff with every entry touching `excluded` removed.
    pub fn without(&self, excluded: &BTreeSet<EdgeKey>) -> GraphDiff {
        GraphDiff {
            additions: self
                .additions
                .iter()
                .filter(|c| !excluded.contains(&c.key))
                .cloned()
                .collect(),
            removals: self
                .removals
                .iter()
                .filter(|c| !excluded.contains(&c.key))
                .cloned()
                .collect(),
            parameter_changes: self
                .parameter_changes
                .iter()
                .filter(|c| !excluded.contains(&c.key))
                .cloned()
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiffError {
    #[error("edge {0} already exists")]
    AlreadyPresent(EdgeKey),

    #[error("edge {0} does not exist")]
    Missing(EdgeKey),

    #[error("edge {0} parameters do not match the expected state")]
    ParameterMismatch(EdgeKey),
}

impl DiffError {
    pub fn key(&self) -> &EdgeKey {
        match self {
            DiffError::AlreadyPresent(k) | DiffError::Missing(k) | DiffError::ParameterMismatch(k) => k,
        }
    }
}
