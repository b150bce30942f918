// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-memory deployment gateway.
//!
//! Holds the live graph and applies diffs all-or-nothing. Every offending
//! entry is reported with its edge and a reason so the caller can retry the
//! unaffected portion. A reject list simulates refusals by the real
//! deployment layer.

use crate::domain::connection::{ConnectionGraph, EdgeKey, GraphDiff};
use crate::domain::repository::{ApplyError, DeploymentGateway, EdgeRejection};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone, Default)]
pub struct InMemoryDeploymentGateway {
    live: Arc<RwLock<ConnectionGraph>>,
    reject: Arc<RwLock<BTreeMap<EdgeKey, String>>>,
    history: Arc<RwLock<Vec<GraphDiff>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryDeploymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_graph(graph: ConnectionGraph) -> Self {
        let gateway = Self::default();
        *gateway.live.write() = graph;
        gateway
    }

    pub fn live_graph(&self) -> ConnectionGraph {
        self.live.read().clone()
    }

    /// Refuse any addition or parameter change on `key` until cleared.
    pub fn reject_edge(&self, key: EdgeKey, reason: impl Into<String>) {
        self.reject.write().insert(key, reason.into());
    }

    pub fn clear_rejections(&self) {
        self.reject.write().clear();
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Every diff accepted so far, oldest first.
    pub fn history(&self) -> Vec<GraphDiff> {
        self.history.read().clone()
    }

    fn rejections(&self, live: &ConnectionGraph, diff: &GraphDiff) -> Vec<EdgeRejection> {
        let reject = self.reject.read();
        let mut rejections = Vec::new();
        let mut refuse = |key: &EdgeKey, reason: String| {
            rejections.push(EdgeRejection {
                key: key.clone(),
                reason,
            })
        };

        for conn in &diff.additions {
            if let Some(reason) = reject.get(&conn.key) {
                refuse(&conn.key, reason.clone());
            } else if live.contains(&conn.key) {
                refuse(&conn.key, "edge is already deployed".to_string());
            }
        }
        for conn in &diff.removals {
            if !live.contains(&conn.key) {
                refuse(&conn.key, "edge is not deployed".to_string());
            }
        }
        for change in &diff.parameter_changes {
            if let Some(reason) = reject.get(&change.key) {
                refuse(&change.key, reason.clone());
            } else {
                match live.get(&change.key) {
                    None => refuse(&change.key, "edge is not deployed".to_string()),
                    Some(current) if current != &change.from => {
                        refuse(&change.key, "deployed parameters differ from the expected state".to_string())
                    }
                    Some(_) => {}
                }
            }
        }
        rejections
    }
}

#[async_trait]
impl DeploymentGateway for InMemoryDeploymentGateway {
    async fn apply_diff(&self, diff: &GraphDiff) -> Result<(), ApplyError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ApplyError::Unavailable("deployment layer is offline".to_string()));
        }

        let mut live = self.live.write();
        let rejections = self.rejections(&live, diff);
        if !rejections.is_empty() {
            warn!(rejected = rejections.len(), "Deployment rejected diff entries");
            return Err(ApplyError::Rejected(rejections));
        }

        live.apply(diff).map_err(|e| {
            ApplyError::Rejected(vec![EdgeRejection {
                key: e.key().clone(),
                reason: e.to_string(),
            }])
        })?;

        debug!(entries = diff.len(), edges = live.len(), "Diff applied to live graph");
        self.history.write().push(diff.clone());
        Ok(())
    }
}
