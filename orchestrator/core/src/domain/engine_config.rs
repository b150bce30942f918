// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Engine Configuration Types
//
// Defines the configuration schema for the connection optimization engine:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Genetic optimizer budget and operator rates
// - Graph encoding constraints (degree caps, mutation steps)
// - Fitness penalty weights
// - Predictor retraining policy
// - Orchestration loop timing (debounce, periodic rerun, rollback window)
// - Observability settings
//
// Every numeric field is validated at load time.

use crate::domain::sample::OutcomeNormalization;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_VERSION: &str = "oic.dev/v1";
pub const KIND: &str = "EngineConfig";

/// Top-level Kubernetes-style engine configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfigManifest {
    /// API version (must be "oic.dev/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "EngineConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: EngineConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable ecosystem name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfigSpec {
    #[serde(default)]
    pub optimizer: OptimizerConfig,

    #[serde(default)]
    pub encoding: EncodingConfig,

    #[serde(default)]
    pub fitness: FitnessConfig,

    #[serde(default)]
    pub predictor: PredictorConfig,

    #[serde(default)]
    pub orchestration: OrchestrationConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observability: Option<ObservabilityConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    #[serde(default = "default_population_size")]
    pub population_size: usize,

    /// Generation budget
    #[serde(default = "default_generations")]
    pub generations: usize,

    /// Probability that an offspring is mutated
    #[serde(default = "default_mutation_rate")]
    pub mutation_rate: f64,

    /// Probability that a mating event uses crossover instead of copying
    #[serde(default = "default_crossover_rate")]
    pub crossover_rate: f64,

    #[serde(default = "default_tournament_size")]
    pub tournament_size: usize,

    /// Consecutive generations without improvement before CONVERGED
    #[serde(default = "default_stall_generations")]
    pub stall_generations: usize,

    /// Minimum best-fitness gain that counts as improvement
    #[serde(default = "default_convergence_epsilon")]
    pub convergence_epsilon: f64,

    /// Fixed seed for reproducible runs; random when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub random_seed: Option<u64>,

    /// Wall-clock budget for a single run
    #[serde(default = "default_run_budget", with = "humantime_serde")]
    pub run_budget: Duration,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            population_size: default_population_size(),
            generations: default_generations(),
            mutation_rate: default_mutation_rate(),
            crossover_rate: default_crossover_rate(),
            tournament_size: default_tournament_size(),
            stall_generations: default_stall_generations(),
            convergence_epsilon: default_convergence_epsilon(),
            random_seed: None,
            run_budget: default_run_budget(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodingConfig {
    /// Cap on both out-degree and in-degree of every module
    #[serde(default = "default_max_connections")]
    pub max_connections_per_module: usize,

    /// Probability that a valid slot is filled by `random_individual`
    #[serde(default = "default_initial_edge_density")]
    pub initial_edge_density: f64,

    /// Per-slot probability used by `mutate`
    #[serde(default = "default_slot_mutation_rate")]
    pub slot_mutation_rate: f64,

    /// Rate limit used when neither side declares one
    #[serde(default = "default_rate_limit")]
    pub default_rate_limit: u32,

    /// Maximum relative rate-limit change per mutation
    #[serde(default = "default_rate_limit_step")]
    pub rate_limit_step: f64,

    /// Maximum absolute priority change per mutation
    #[serde(default = "default_priority_step")]
    pub priority_step: f64,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            max_connections_per_module: default_max_connections(),
            initial_edge_density: default_initial_edge_density(),
            slot_mutation_rate: default_slot_mutation_rate(),
            default_rate_limit: default_rate_limit(),
            rate_limit_step: default_rate_limit_step(),
            priority_step: default_priority_step(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitnessConfig {
    /// Desired edge count; defaults to min(module count, valid slot count)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_edge_budget: Option<usize>,

    /// Weight of (edges - budget)^2
    #[serde(default = "default_edge_budget_penalty")]
    pub edge_budget_penalty: f64,

    /// Weight of the redundant-edge fraction
    #[serde(default = "default_redundancy_penalty")]
    pub redundancy_penalty: f64,
}

impl Default for FitnessConfig {
    fn default() -> Self {
        Self {
            target_edge_budget: None,
            edge_budget_penalty: default_edge_budget_penalty(),
            redundancy_penalty: default_redundancy_penalty(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictorConfig {
    /// Retrain after this many new samples...
    #[serde(default = "default_retrain_sample_threshold")]
    pub retrain_sample_threshold: usize,

    /// ...or after this much time, whichever comes first
    #[serde(default = "default_retrain_interval", with = "humantime_serde")]
    pub retrain_interval: Duration,

    /// Trailing window of samples used for training
    #[serde(default = "default_sample_window", with = "humantime_serde")]
    pub sample_window: Duration,

    /// Rolling window capacity of the sample store
    #[serde(default = "default_sample_capacity")]
    pub sample_capacity: usize,

    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    #[serde(default = "default_epochs")]
    pub epochs: usize,

    #[serde(default)]
    pub normalization: OutcomeNormalization,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            retrain_sample_threshold: default_retrain_sample_threshold(),
            retrain_interval: default_retrain_interval(),
            sample_window: default_sample_window(),
            sample_capacity: default_sample_capacity(),
            learning_rate: default_learning_rate(),
            epochs: default_epochs(),
            normalization: OutcomeNormalization::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    /// Catalog changes inside this window coalesce into one run
    #[serde(default = "default_debounce_window", with = "humantime_serde")]
    pub debounce_window: Duration,

    /// Rerun even without catalog changes
    #[serde(default = "default_periodic_interval", with = "humantime_serde")]
    pub periodic_interval: Duration,

    /// Best fitness must beat the deployed graph by more than this
    #[serde(default = "default_min_improvement")]
    pub min_improvement: f64,

    /// Time after an apply during which realised samples are compared
    #[serde(default = "default_observation_window", with = "humantime_serde")]
    pub observation_window: Duration,

    /// Allowed drop of realised outcome before rolling back
    #[serde(default = "default_regression_tolerance")]
    pub regression_tolerance: f64,

    /// How long a poisoned edge stays out of random initialization
    #[serde(default = "default_poison_cooldown", with = "humantime_serde")]
    pub poison_cooldown: Duration,

    #[serde(default = "default_regression_check_interval", with = "humantime_serde")]
    pub regression_check_interval: Duration,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            debounce_window: default_debounce_window(),
            periodic_interval: default_periodic_interval(),
            min_improvement: default_min_improvement(),
            observation_window: default_observation_window(),
            regression_tolerance: default_regression_tolerance(),
            poison_cooldown: default_poison_cooldown(),
            regression_check_interval: default_regression_check_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Prometheus exporter port
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_population_size() -> usize {
    40
}

fn default_generations() -> usize {
    200
}

fn default_mutation_rate() -> f64 {
    0.3
}

fn default_crossover_rate() -> f64 {
    0.8
}

fn default_tournament_size() -> usize {
    3
}

fn default_stall_generations() -> usize {
    50
}

fn default_convergence_epsilon() -> f64 {
    1e-6
}

fn default_run_budget() -> Duration {
    Duration::from_secs(30)
}

fn default_max_connections() -> usize {
    4
}

fn default_initial_edge_density() -> f64 {
    0.5
}

fn default_slot_mutation_rate() -> f64 {
    0.1
}

fn default_rate_limit() -> u32 {
    100
}

fn default_rate_limit_step() -> f64 {
    0.1
}

fn default_priority_step() -> f64 {
    0.1
}

fn default_edge_budget_penalty() -> f64 {
    0.01
}

fn default_redundancy_penalty() -> f64 {
    0.05
}

fn default_retrain_sample_threshold() -> usize {
    500
}

fn default_retrain_interval() -> Duration {
    Duration::from_secs(3600)
}

fn default_sample_window() -> Duration {
    Duration::from_secs(7 * 24 * 3600)
}

fn default_sample_capacity() -> usize {
    10_000
}

fn default_learning_rate() -> f64 {
    0.05
}

fn default_epochs() -> usize {
    200
}

fn default_debounce_window() -> Duration {
    Duration::from_secs(2)
}

fn default_periodic_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_min_improvement() -> f64 {
    0.01
}

fn default_observation_window() -> Duration {
    Duration::from_secs(600)
}

fn default_regression_tolerance() -> f64 {
    0.05
}

fn default_poison_cooldown() -> Duration {
    Duration::from_secs(3600)
}

fn default_regression_check_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for EngineConfigManifest {
    fn default() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "oic-ecosystem".to_string());

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: hostname,
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: EngineConfigSpec::default(),
        }
    }
}

impl EngineConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. OIC_CONFIG_PATH environment variable
    /// 2. ./oic-config.yaml (working directory)
    /// 3. ~/.oic/config.yaml (user home)
    /// 4. /etc/oic/config.yaml (system, Unix) or C:\ProgramData\Oic\config.yaml (Windows)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("OIC_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./oic-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".oic").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        #[cfg(unix)]
        let system_config = PathBuf::from("/etc/oic/config.yaml");
        #[cfg(windows)]
        let system_config = PathBuf::from("C:\\ProgramData\\Oic\\config.yaml");

        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default.
    /// The result is validated before it is returned.
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let mut config = if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?
        } else if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            Self::from_yaml_file(config_path)?
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("OIC_RANDOM_SEED") {
            match val.parse::<u64>() {
                Ok(seed) => {
                    tracing::info!("Environment override: OIC_RANDOM_SEED={}", seed);
                    self.spec.optimizer.random_seed = Some(seed);
                }
                Err(_) => tracing::warn!("Invalid value for OIC_RANDOM_SEED: '{}'. Ignoring.", val),
            }
        }

        if let Ok(val) = std::env::var("OIC_POPULATION_SIZE") {
            match val.parse::<usize>() {
                Ok(size) => {
                    tracing::info!("Environment override: OIC_POPULATION_SIZE={}", size);
                    self.spec.optimizer.population_size = size;
                }
                Err(_) => tracing::warn!("Invalid value for OIC_POPULATION_SIZE: '{}'. Ignoring.", val),
            }
        }

        if let Ok(val) = std::env::var("OIC_GENERATIONS") {
            match val.parse::<usize>() {
                Ok(generations) => {
                    tracing::info!("Environment override: OIC_GENERATIONS={}", generations);
                    self.spec.optimizer.generations = generations;
                }
                Err(_) => tracing::warn!("Invalid value for OIC_GENERATIONS: '{}'. Ignoring.", val),
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let opt = &self.spec.optimizer;
        if opt.population_size == 0 {
            anyhow::bail!("spec.optimizer.population_size must be at least 1");
        }
        if opt.generations == 0 {
            anyhow::bail!("spec.optimizer.generations must be at least 1");
        }
        if opt.tournament_size == 0 {
            anyhow::bail!("spec.optimizer.tournament_size must be at least 1");
        }
        if opt.tournament_size > opt.population_size {
            anyhow::bail!(
                "spec.optimizer.tournament_size ({}) cannot exceed population_size ({})",
                opt.tournament_size,
                opt.population_size
            );
        }
        check_probability("spec.optimizer.mutation_rate", opt.mutation_rate)?;
        check_probability("spec.optimizer.crossover_rate", opt.crossover_rate)?;
        check_non_negative("spec.optimizer.convergence_epsilon", opt.convergence_epsilon)?;
        check_positive_duration("spec.optimizer.run_budget", opt.run_budget)?;

        let enc = &self.spec.encoding;
        if enc.max_connections_per_module == 0 {
            anyhow::bail!("spec.encoding.max_connections_per_module must be at least 1");
        }
        if enc.default_rate_limit == 0 {
            anyhow::bail!("spec.encoding.default_rate_limit must be at least 1");
        }
        check_probability("spec.encoding.initial_edge_density", enc.initial_edge_density)?;
        check_probability("spec.encoding.slot_mutation_rate", enc.slot_mutation_rate)?;
        check_non_negative("spec.encoding.rate_limit_step", enc.rate_limit_step)?;
        check_probability("spec.encoding.priority_step", enc.priority_step)?;

        let fit = &self.spec.fitness;
        check_non_negative("spec.fitness.edge_budget_penalty", fit.edge_budget_penalty)?;
        check_non_negative("spec.fitness.redundancy_penalty", fit.redundancy_penalty)?;

        let pred = &self.spec.predictor;
        if pred.retrain_sample_threshold == 0 {
            anyhow::bail!("spec.predictor.retrain_sample_threshold must be at least 1");
        }
        if pred.sample_capacity == 0 {
            anyhow::bail!("spec.predictor.sample_capacity must be at least 1");
        }
        check_positive_duration("spec.predictor.retrain_interval", pred.retrain_interval)?;
        check_positive_duration("spec.predictor.sample_window", pred.sample_window)?;
        check_non_negative("spec.predictor.learning_rate", pred.learning_rate)?;
        if pred.normalization.reference_latency_ms <= 0.0
            || pred.normalization.reference_throughput <= 0.0
        {
            anyhow::bail!("spec.predictor.normalization references must be positive");
        }

        let orch = &self.spec.orchestration;
        check_positive_duration("spec.orchestration.periodic_interval", orch.periodic_interval)?;
        check_positive_duration("spec.orchestration.observation_window", orch.observation_window)?;
        check_positive_duration(
            "spec.orchestration.regression_check_interval",
            orch.regression_check_interval,
        )?;
        check_non_negative("spec.orchestration.min_improvement", orch.min_improvement)?;
        check_non_negative("spec.orchestration.regression_tolerance", orch.regression_tolerance)?;

        Ok(())
    }
}

fn check_probability(field: &str, value: f64) -> anyhow::Result<()> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        anyhow::bail!("{} must be a probability in [0, 1], got {}", field, value);
    }
    Ok(())
}

fn check_non_negative(field: &str, value: f64) -> anyhow::Result<()> {
    if !value.is_finite() || value < 0.0 {
        anyhow::bail!("{} must be a non-negative number, got {}", field, value);
    }
    Ok(())
}

fn check_positive_duration(field: &str, value: Duration) -> anyhow::Result<()> {
    if value.is_zero() {
        anyhow::bail!("{} must be greater than zero", field);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest() {
        let manifest = EngineConfigManifest::default();
        assert_eq!(manifest.api_version, "oic.dev/v1");
        assert_eq!(manifest.kind, "EngineConfig");
        assert!(!manifest.metadata.name.is_empty());
        assert_eq!(manifest.spec.optimizer.tournament_size, 3);
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_minimal_yaml_uses_defaults() {
        let yaml = r#"
apiVersion: oic.dev/v1
kind: EngineConfig
metadata:
  name: staging
spec:
  optimizer:
    population_size: 12
    run_budget: 5s
  orchestration:
    debounce_window: 500ms
"#;
        let manifest = EngineConfigManifest::from_yaml_str(yaml).unwrap();
        assert_eq!(manifest.spec.optimizer.population_size, 12);
        assert_eq!(manifest.spec.optimizer.generations, 200);
        assert_eq!(manifest.spec.optimizer.run_budget, Duration::from_secs(5));
        assert_eq!(
            manifest.spec.orchestration.debounce_window,
            Duration::from_millis(500)
        );
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_rates() {
        let mut manifest = EngineConfigManifest::default();

        manifest.spec.optimizer.mutation_rate = -0.1;
        assert!(manifest.validate().is_err());
        manifest.spec.optimizer.mutation_rate = 0.3;

        manifest.spec.optimizer.crossover_rate = 1.5;
        assert!(manifest.validate().is_err());
        manifest.spec.optimizer.crossover_rate = 0.8;

        manifest.spec.encoding.slot_mutation_rate = f64::NAN;
        assert!(manifest.validate().is_err());
        manifest.spec.encoding.slot_mutation_rate = 0.1;

        manifest.spec.fitness.edge_budget_penalty = -1.0;
        assert!(manifest.validate().is_err());
        manifest.spec.fitness.edge_budget_penalty = 0.01;

        manifest.spec.optimizer.tournament_size = 100;
        assert!(manifest.validate().is_err());
        manifest.spec.optimizer.tournament_size = 3;

        manifest.spec.encoding.max_connections_per_module = 0;
        assert!(manifest.validate().is_err());
        manifest.spec.encoding.max_connections_per_module = 4;

        manifest.kind = "NodeConfig".to_string();
        assert!(manifest.validate().is_err());
        manifest.kind = KIND.to_string();

        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oic-config.yaml");

        let mut manifest = EngineConfigManifest::default();
        manifest.metadata.name = "prod".to_string();
        manifest.spec.optimizer.random_seed = Some(7);
        manifest.to_yaml_file(&path).unwrap();

        let loaded = EngineConfigManifest::load_or_default(Some(path)).unwrap();
        assert_eq!(loaded.metadata.name, "prod");
        assert_eq!(loaded.spec.optimizer.random_seed, Some(7));
        assert_eq!(
            loaded.spec.orchestration.poison_cooldown,
            Duration::from_secs(3600)
        );
    }
}
