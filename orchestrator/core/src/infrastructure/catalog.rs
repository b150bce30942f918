// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-memory module catalog.
//!
//! Stands in for the registration subsystem: it owns the module records,
//! enforces id immutability and broadcasts a [`CatalogEvent`] on every
//! change that should trigger a rerun. Heartbeats refresh metrics silently.

use crate::domain::events::CatalogEvent;
use crate::domain::module::{Module, ModuleId, ModuleStatus, PerformanceMetrics};
use crate::domain::repository::{CatalogError, ModuleCatalog};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// On-disk catalog format: a YAML document with a `modules` list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogFile {
    #[serde(default)]
    pub modules: Vec<Module>,
}

impl CatalogFile {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog file {:?}", path))?;
        serde_yaml::from_str(&content).with_context(|| format!("Failed to parse catalog file {:?}", path))
    }
}

#[derive(Clone)]
pub struct InMemoryModuleCatalog {
    modules: Arc<RwLock<BTreeMap<ModuleId, Module>>>,
    changes: broadcast::Sender<CatalogEvent>,
}

impl InMemoryModuleCatalog {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            modules: Arc::new(RwLock::new(BTreeMap::new())),
            changes,
        }
    }

    /// Seed the catalog without emitting change events.
    pub fn with_modules(modules: Vec<Module>) -> Self {
        let catalog = Self::new();
        {
            let mut map = catalog.modules.write();
            for module in modules {
                map.insert(module.module_id.clone(), module);
            }
        }
        catalog
    }

    /// Register a module, or update an already-known one in place. The
    /// module id and discovery time of an existing record never change.
    /// Registrations without an id are assigned a generated one.
    pub fn register_module(&self, mut module: Module) -> Result<ModuleId, CatalogError> {
        if module.module_id.as_str().trim().is_empty() {
            module.module_id = ModuleId::generate();
        }
        module
            .validate()
            .map_err(|e| CatalogError::InvalidRegistration(e.to_string()))?;

        let module_id = module.module_id.clone();
        let now = Utc::now();
        let event = {
            let mut modules = self.modules.write();
            match modules.get_mut(&module_id) {
                Some(existing) => {
                    let discovered_at = existing.discovered_at;
                    *existing = module;
                    existing.discovered_at = discovered_at;
                    CatalogEvent::ModuleUpdated {
                        module_id: module_id.clone(),
                        updated_at: now,
                    }
                }
                None => {
                    modules.insert(module_id.clone(), module);
                    CatalogEvent::ModuleRegistered {
                        module_id: module_id.clone(),
                        registered_at: now,
                    }
                }
            }
        };

        info!(module_id = %module_id, "Module registered");
        self.notify(event);
        Ok(module_id)
    }

    pub fn deregister_module(&self, module_id: &ModuleId) -> Result<Module, CatalogError> {
        let removed = self
            .modules
            .write()
            .remove(module_id)
            .ok_or_else(|| CatalogError::NotFound(module_id.clone()))?;

        info!(module_id = %module_id, "Module deregistered");
        self.notify(CatalogEvent::ModuleRemoved {
            module_id: module_id.clone(),
            removed_at: Utc::now(),
        });
        Ok(removed)
    }

    pub fn update_status(&self, module_id: &ModuleId, status: ModuleStatus) -> Result<(), CatalogError> {
        let from = {
            let mut modules = self.modules.write();
            let module = modules
                .get_mut(module_id)
                .ok_or_else(|| CatalogError::NotFound(module_id.clone()))?;
            std::mem::replace(&mut module.status, status)
        };

        if from != status {
            info!(module_id = %module_id, ?from, to = ?status, "Module status changed");
            self.notify(CatalogEvent::StatusChanged {
                module_id: module_id.clone(),
                from,
                to: status,
                changed_at: Utc::now(),
            });
        }
        Ok(())
    }

    /// Refresh rolling metrics. Returns `false` for stale heartbeats.
    pub fn record_heartbeat(
        &self,
        module_id: &ModuleId,
        metrics: PerformanceMetrics,
        at: DateTime<Utc>,
    ) -> Result<bool, CatalogError> {
        let mut modules = self.modules.write();
        let module = modules
            .get_mut(module_id)
            .ok_or_else(|| CatalogError::NotFound(module_id.clone()))?;
        let refreshed = module.refresh_metrics(metrics, at);
        if !refreshed {
            debug!(module_id = %module_id, "Ignoring stale heartbeat");
        }
        Ok(refreshed)
    }

    pub fn len(&self) -> usize {
        self.modules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.read().is_empty()
    }

    fn notify(&self, event: CatalogEvent) {
        // No subscribers is fine, nothing is waiting for a rerun
        let _ = self.changes.send(event);
    }
}

impl Default for InMemoryModuleCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModuleCatalog for InMemoryModuleCatalog {
    async fn list_modules(&self) -> Result<Vec<Module>, CatalogError> {
        Ok(self.modules.read().values().cloned().collect())
    }

    async fn get_module(&self, id: &ModuleId) -> Result<Option<Module>, CatalogError> {
        Ok(self.modules.read().get(id).cloned())
    }

    fn subscribe_to_changes(&self) -> broadcast::Receiver<CatalogEvent> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::module::{Capability, Interface, ModuleType, Observed};

    fn module(id: &str) -> Module {
        Module::new(id, id, ModuleType::ApiGateway)
            .with_capability(Capability::new("route"))
            .with_interface(Interface::new("http", format!("http://{id}")))
    }

    #[tokio::test]
    async fn test_register_update_and_remove_emit_events() {
        let catalog = InMemoryModuleCatalog::new();
        let mut changes = catalog.subscribe_to_changes();

        catalog.register_module(module("a")).unwrap();
        let mut renamed = module("a");
        renamed.name = "gateway".to_string();
        catalog.register_module(renamed).unwrap();
        catalog.update_status(&ModuleId::new("a"), ModuleStatus::Degraded).unwrap();
        catalog.deregister_module(&ModuleId::new("a")).unwrap();

        assert!(matches!(changes.recv().await.unwrap(), CatalogEvent::ModuleRegistered { .. }));
        assert!(matches!(changes.recv().await.unwrap(), CatalogEvent::ModuleUpdated { .. }));
        assert!(matches!(
            changes.recv().await.unwrap(),
            CatalogEvent::StatusChanged {
                to: ModuleStatus::Degraded,
                ..
            }
        ));
        assert!(matches!(changes.recv().await.unwrap(), CatalogEvent::ModuleRemoved { .. }));
        assert!(catalog.get_module(&ModuleId::new("a")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_registration_is_rejected() {
        let catalog = InMemoryModuleCatalog::new();
        let bare = Module::new("b", "b", ModuleType::Custom);
        assert!(matches!(
            catalog.register_module(bare),
            Err(CatalogError::InvalidRegistration(_))
        ));
        assert!(catalog.is_empty());
    }

    #[tokio::test]
    async fn test_registration_without_id_gets_generated_id() {
        let catalog = InMemoryModuleCatalog::new();

        let mut anonymous = module("gateway");
        anonymous.module_id = ModuleId::new("");

        let first = catalog.register_module(anonymous.clone()).unwrap();
        let second = catalog.register_module(anonymous).unwrap();

        assert!(!first.as_str().is_empty());
        assert_ne!(first, second);
        assert_eq!(catalog.len(), 2);
        let stored = catalog.get_module(&first).await.unwrap().unwrap();
        assert_eq!(stored.module_id, first);
    }

    #[test]
    fn test_catalog_file_entries_without_id_get_generated_ids() {
        let file: CatalogFile = serde_yaml::from_str(
            "modules:\n  - name: anonymous\n    interfaces:\n      - protocol: http\n        endpoint: http://anon\n",
        )
        .unwrap();
        assert_eq!(file.modules.len(), 1);
        assert!(!file.modules[0].module_id.as_str().is_empty());
    }

    #[tokio::test]
    async fn test_heartbeat_refreshes_metrics_without_event() {
        let catalog = InMemoryModuleCatalog::with_modules(vec![module("a")]);
        let mut changes = catalog.subscribe_to_changes();
        let id = ModuleId::new("a");
        let at = Utc::now() + chrono::Duration::seconds(1);

        let metrics = PerformanceMetrics {
            success_rate: Observed::Known(0.97),
            ..Default::default()
        };
        assert!(catalog.record_heartbeat(&id, metrics, at).unwrap());
        assert!(!catalog.record_heartbeat(&id, metrics, at).unwrap());

        let stored = catalog.get_module(&id).await.unwrap().unwrap();
        assert_eq!(stored.metrics.success_rate, Observed::Known(0.97));
        assert!(changes.try_recv().is_err());
    }
}
