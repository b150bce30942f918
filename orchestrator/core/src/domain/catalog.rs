// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Immutable catalog snapshot taken at the start of an optimizer run.
//!
//! Malformed modules are excluded here (and reported) rather than aborting
//! the run. Inactive and errored modules are excluded too: their edges are
//! pruned exactly like edges to removed modules.

use crate::domain::module::{Module, ModuleId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcludedModule {
    pub module_id: ModuleId,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    /// Participating modules, sorted by id
    modules: Vec<Module>,
    index: BTreeMap<ModuleId, usize>,
    excluded: Vec<ExcludedModule>,
}

impl CatalogSnapshot {
    pub fn build(modules: Vec<Module>) -> Self {
        let mut accepted: BTreeMap<ModuleId, Module> = BTreeMap::new();
        let mut excluded = Vec::new();

        for module in modules {
            if let Err(e) = module.validate() {
                warn!(module_id = %module.module_id, "Excluding malformed module from run: {}", e);
                excluded.push(ExcludedModule {
                    module_id: module.module_id.clone(),
                    reason: e.to_string(),
                });
                continue;
            }
            if !module.status.participates() {
                excluded.push(ExcludedModule {
                    module_id: module.module_id.clone(),
                    reason: format!("status {:?}", module.status),
                });
                continue;
            }
            if accepted.contains_key(&module.module_id) {
                warn!(module_id = %module.module_id, "Duplicate module id in catalog, keeping first");
                excluded.push(ExcludedModule {
                    module_id: module.module_id.clone(),
                    reason: "duplicate module id".to_string(),
                });
                continue;
            }
            accepted.insert(module.module_id.clone(), module);
        }

        let modules: Vec<Module> = accepted.into_values().collect();
        let index = modules
            .iter()
            .enumerate()
            .map(|(i, m)| (m.module_id.clone(), i))
            .collect();

        Self {
            modules,
            index,
            excluded,
        }
    }

    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    pub fn get(&self, id: &ModuleId) -> Option<&Module> {
        self.index.get(id).map(|&i| &self.modules[i])
    }

    pub fn contains(&self, id: &ModuleId) -> bool {
        self.index.contains_key(id)
    }

    pub fn ids(&self) -> BTreeSet<ModuleId> {
        self.index.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn excluded(&self) -> &[ExcludedModule] {
        &self.excluded
    }
}
