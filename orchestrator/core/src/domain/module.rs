// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Module Catalog Model
//!
//! Strongly-typed records for the modules registered in the ecosystem. The
//! catalog itself lives outside the engine; these types are the read-only
//! snapshot the optimizer works on.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ModuleId`] | Stable identity, immutable once assigned |
//! | [`Module`] | Capabilities, interfaces, status and rolling metrics |
//! | [`Observed`] | `Known(T)` or `Unknown`, used for every optional metric |
//! | [`Interface`] | Protocol endpoint with direction, auth flag and limits |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Stable module identity. Survives restarts and is never reassigned.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(String);

impl ModuleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a fresh id for registrations that did not bring their own.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModuleId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ModuleId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A value that has either been measured/declared or is not known yet.
///
/// Serialized as a plain value or `null`, so catalog files can simply omit
/// fields they do not know.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(
    from = "Option<T>",
    into = "Option<T>",
    bound(serialize = "T: Serialize + Clone", deserialize = "T: Deserialize<'de>")
)]
pub enum Observed<T> {
    Known(T),
    Unknown,
}

impl<T> Observed<T> {
    pub fn is_known(&self) -> bool {
        matches!(self, Observed::Known(_))
    }

    pub fn known(&self) -> Option<&T> {
        match self {
            Observed::Known(v) => Some(v),
            Observed::Unknown => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Observed<U> {
        match self {
            Observed::Known(v) => Observed::Known(f(v)),
            Observed::Unknown => Observed::Unknown,
        }
    }

    pub fn unwrap_or(self, default: T) -> T {
        match self {
            Observed::Known(v) => v,
            Observed::Unknown => default,
        }
    }

    /// Prefer `self` when known, otherwise keep `previous`.
    pub fn or(self, previous: Observed<T>) -> Observed<T> {
        match self {
            Observed::Known(_) => self,
            Observed::Unknown => previous,
        }
    }
}

impl<T> Default for Observed<T> {
    fn default() -> Self {
        Observed::Unknown
    }
}

impl<T> From<Option<T>> for Observed<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Observed::Known(v),
            None => Observed::Unknown,
        }
    }
}

impl<T> From<Observed<T>> for Option<T> {
    fn from(value: Observed<T>) -> Self {
        match value {
            Observed::Known(v) => Some(v),
            Observed::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleStatus {
    Active,
    Inactive,
    Degraded,
    Error,
}

impl ModuleStatus {
    /// Whether a module in this status may be wired into a candidate graph.
    pub fn participates(&self) -> bool {
        matches!(self, ModuleStatus::Active | ModuleStatus::Degraded)
    }
}

impl Default for ModuleStatus {
    fn default() -> Self {
        Self::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleType {
    DataProcessor,
    MlModel,
    ApiGateway,
    Storage,
    Analytics,
    Orchestrator,
    Custom,
}

impl Default for ModuleType {
    fn default() -> Self {
        Self::Custom
    }
}

/// A typed capability a module provides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,

    #[serde(default = "default_capability_version")]
    pub version: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub parameters: HashMap<String, serde_json::Value>,
}

impl Capability {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: default_capability_version(),
            description: String::new(),
            parameters: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceDirection {
    Inbound,
    Outbound,
    Bidirectional,
}

impl InterfaceDirection {
    pub fn accepts_inbound(&self) -> bool {
        matches!(self, Self::Inbound | Self::Bidirectional)
    }

    pub fn offers_outbound(&self) -> bool {
        matches!(self, Self::Outbound | Self::Bidirectional)
    }
}

impl Default for InterfaceDirection {
    fn default() -> Self {
        Self::Bidirectional
    }
}

/// How a module can be talked to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interface {
    /// e.g. "http", "grpc", "websocket"
    pub protocol: String,

    pub endpoint: String,

    #[serde(default)]
    pub direction: InterfaceDirection,

    #[serde(default)]
    pub authentication_required: bool,

    /// Requests per second the interface accepts
    #[serde(default)]
    pub rate_limit: Observed<u32>,

    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u32,
}

impl Interface {
    pub fn new(protocol: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            endpoint: endpoint.into(),
            direction: InterfaceDirection::default(),
            authentication_required: false,
            rate_limit: Observed::Unknown,
            timeout_seconds: default_timeout_seconds(),
        }
    }

    pub fn with_direction(mut self, direction: InterfaceDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: u32) -> Self {
        self.rate_limit = Observed::Known(rate_limit);
        self
    }
}

/// Rolling performance metrics refreshed by heartbeats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    #[serde(default)]
    pub latency_ms: Observed<f64>,

    /// Fraction of successful requests in [0, 1]
    #[serde(default)]
    pub success_rate: Observed<f64>,

    /// Requests per second
    #[serde(default)]
    pub throughput: Observed<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    #[serde(default)]
    pub memory_mb: Observed<u32>,

    #[serde(default)]
    pub cpu_cores: Observed<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    #[serde(default = "ModuleId::generate")]
    pub module_id: ModuleId,

    pub name: String,

    #[serde(default = "default_module_version")]
    pub version: String,

    #[serde(default)]
    pub module_type: ModuleType,

    #[serde(default)]
    pub status: ModuleStatus,

    #[serde(default)]
    pub capabilities: Vec<Capability>,

    #[serde(default)]
    pub interfaces: Vec<Interface>,

    /// Modules this one declares it consumes from
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<ModuleId>,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,

    #[serde(default)]
    pub metrics: PerformanceMetrics,

    #[serde(default)]
    pub resources: ResourceRequirements,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_endpoint: Option<String>,

    #[serde(default = "Utc::now")]
    pub discovered_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub last_heartbeat: DateTime<Utc>,
}

impl Module {
    pub fn new(module_id: impl Into<ModuleId>, name: impl Into<String>, module_type: ModuleType) -> Self {
        let now = Utc::now();
        Self {
            module_id: module_id.into(),
            name: name.into(),
            version: default_module_version(),
            module_type,
            status: ModuleStatus::Active,
            capabilities: Vec::new(),
            interfaces: Vec::new(),
            dependencies: Vec::new(),
            tags: BTreeSet::new(),
            metrics: PerformanceMetrics::default(),
            resources: ResourceRequirements::default(),
            health_check_endpoint: None,
            discovered_at: now,
            last_heartbeat: now,
        }
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    pub fn with_interface(mut self, interface: Interface) -> Self {
        self.interfaces.push(interface);
        self
    }

    pub fn with_metrics(mut self, metrics: PerformanceMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_status(mut self, status: ModuleStatus) -> Self {
        self.status = status;
        self
    }

    pub fn outbound_protocols(&self) -> BTreeSet<&str> {
        self.interfaces
            .iter()
            .filter(|i| i.direction.offers_outbound())
            .map(|i| i.protocol.as_str())
            .collect()
    }

    pub fn inbound_protocols(&self) -> BTreeSet<&str> {
        self.interfaces
            .iter()
            .filter(|i| i.direction.accepts_inbound())
            .map(|i| i.protocol.as_str())
            .collect()
    }

    pub fn outbound_interface(&self, protocol: &str) -> Option<&Interface> {
        self.interfaces
            .iter()
            .find(|i| i.protocol == protocol && i.direction.offers_outbound())
    }

    pub fn inbound_interface(&self, protocol: &str) -> Option<&Interface> {
        self.interfaces
            .iter()
            .find(|i| i.protocol == protocol && i.direction.accepts_inbound())
    }

    pub fn capability_names(&self) -> BTreeSet<&str> {
        self.capabilities.iter().map(|c| c.name.as_str()).collect()
    }

    /// The fields every compatibility score needs. Modules without them
    /// are scored zero with zero confidence.
    pub fn has_minimum_fields(&self) -> bool {
        !self.interfaces.is_empty()
            && !self.capabilities.is_empty()
            && self.status != ModuleStatus::Error
    }

    /// Refresh metrics from a heartbeat. Stale heartbeats are ignored and
    /// unknown values in the heartbeat keep the previous reading.
    pub fn refresh_metrics(&mut self, metrics: PerformanceMetrics, at: DateTime<Utc>) -> bool {
        if at <= self.last_heartbeat {
            return false;
        }
        self.metrics = PerformanceMetrics {
            latency_ms: metrics.latency_ms.or(self.metrics.latency_ms),
            success_rate: metrics.success_rate.or(self.metrics.success_rate),
            throughput: metrics.throughput.or(self.metrics.throughput),
        };
        self.last_heartbeat = at;
        true
    }

    pub fn validate(&self) -> Result<(), ModuleValidationError> {
        if self.module_id.as_str().trim().is_empty() {
            return Err(ModuleValidationError::EmptyId);
        }
        if self.name.trim().is_empty() {
            return Err(ModuleValidationError::EmptyName(self.module_id.clone()));
        }
        if self.interfaces.is_empty() {
            return Err(ModuleValidationError::NoInterfaces(self.module_id.clone()));
        }
        if let Some(interface) = self.interfaces.iter().find(|i| i.protocol.trim().is_empty()) {
            return Err(ModuleValidationError::EmptyProtocol {
                module_id: self.module_id.clone(),
                endpoint: interface.endpoint.clone(),
            });
        }
        if let Observed::Known(rate) = self.metrics.success_rate {
            if !(0.0..=1.0).contains(&rate) {
                return Err(ModuleValidationError::InvalidSuccessRate {
                    module_id: self.module_id.clone(),
                    value: rate,
                });
            }
        }
        for (metric, value) in [
            ("latency_ms", self.metrics.latency_ms),
            ("throughput", self.metrics.throughput),
        ] {
            if let Observed::Known(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(ModuleValidationError::InvalidMetric {
                        module_id: self.module_id.clone(),
                        metric,
                        value: v,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Protocols the source can speak outbound that the target accepts inbound,
/// sorted for deterministic selection.
pub fn protocol_intersection(source: &Module, target: &Module) -> Vec<String> {
    let inbound = target.inbound_protocols();
    source
        .outbound_protocols()
        .into_iter()
        .filter(|p| inbound.contains(p))
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModuleValidationError {
    #[error("module id cannot be empty")]
    EmptyId,

    #[error("module {0} has an empty name")]
    EmptyName(ModuleId),

    #[error("module {0} declares no interfaces")]
    NoInterfaces(ModuleId),

    #[error("module {module_id} has an interface without protocol (endpoint '{endpoint}')")]
    EmptyProtocol { module_id: ModuleId, endpoint: String },

    #[error("module {module_id} reports success rate {value} outside [0, 1]")]
    InvalidSuccessRate { module_id: ModuleId, value: f64 },

    #[error("module {module_id} reports invalid {metric}: {value}")]
    InvalidMetric {
        module_id: ModuleId,
        metric: &'static str,
        value: f64,
    },
}

fn default_capability_version() -> String {
    "1.0.0".to_string()
}

fn default_module_version() -> String {
    "0.1.0".to_string()
}

fn default_timeout_seconds() -> u32 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http_module(id: &str) -> Module {
        Module::new(id, id, ModuleType::DataProcessor)
            .with_capability(Capability::new("transform"))
            .with_interface(Interface::new("http", format!("http://{id}:8080")))
    }

    #[test]
    fn test_protocol_intersection_respects_direction() {
        let source = http_module("a")
            .with_interface(Interface::new("grpc", "a:50051").with_direction(InterfaceDirection::Inbound));
        let target = http_module("b")
            .with_interface(Interface::new("grpc", "b:50051").with_direction(InterfaceDirection::Inbound));

        // grpc is inbound-only on the source, so only http survives
        assert_eq!(protocol_intersection(&source, &target), vec!["http".to_string()]);
    }

    #[test]
    fn test_observed_yaml_accepts_missing_and_null() {
        let yaml = "latency_ms: 12.5\nsuccess_rate: null\n";
        let metrics: PerformanceMetrics = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(metrics.latency_ms, Observed::Known(12.5));
        assert_eq!(metrics.success_rate, Observed::Unknown);
        assert_eq!(metrics.throughput, Observed::Unknown);
    }

    #[test]
    fn test_validate_rejects_malformed_metadata() {
        let mut module = http_module("a");
        assert!(module.validate().is_ok());

        module.metrics.success_rate = Observed::Known(1.5);
        assert!(matches!(
            module.validate(),
            Err(ModuleValidationError::InvalidSuccessRate { .. })
        ));

        let bare = Module::new("b", "b", ModuleType::Storage);
        assert_eq!(
            bare.validate(),
            Err(ModuleValidationError::NoInterfaces(ModuleId::new("b")))
        );
    }

    #[test]
    fn test_refresh_metrics_is_monotonic() {
        let mut module = http_module("a");
        let start = module.last_heartbeat;
        let fresh = PerformanceMetrics {
            latency_ms: Observed::Known(20.0),
            success_rate: Observed::Known(0.99),
            throughput: Observed::Unknown,
        };

        assert!(module.refresh_metrics(fresh, start + chrono::Duration::seconds(5)));
        assert_eq!(module.metrics.success_rate, Observed::Known(0.99));

        let stale = PerformanceMetrics {
            success_rate: Observed::Known(0.1),
            ..Default::default()
        };
        assert!(!module.refresh_metrics(stale, start));
        assert_eq!(module.metrics.success_rate, Observed::Known(0.99));

        let partial = PerformanceMetrics {
            throughput: Observed::Known(250.0),
            ..Default::default()
        };
        assert!(module.refresh_metrics(partial, start + chrono::Duration::seconds(10)));
        assert_eq!(module.metrics.latency_ms, Observed::Known(20.0));
        assert_eq!(module.metrics.throughput, Observed::Known(250.0));
    }
}
