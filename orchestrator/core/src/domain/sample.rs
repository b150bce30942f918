// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Compatibility Samples
//!
//! Ground truth for the predictor: what actually happened on a deployed edge.
//! Samples are immutable once recorded and live in a bounded rolling window
//! in the sample store.

use crate::domain::connection::EdgeKey;
use crate::domain::predictor::PairFeatures;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SampleId(pub Uuid);

impl SampleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SampleId {
    fn default() -> Self {
        Self::new()
    }
}

/// Telemetry observed on a deployed connection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutcomeMetrics {
    pub latency_ms: f64,
    /// Fraction of failed requests in [0, 1]
    pub error_rate: f64,
    /// Requests per second
    pub throughput: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompatibilitySample {
    pub sample_id: SampleId,
    pub edge: EdgeKey,
    pub features: PairFeatures,
    pub outcome: OutcomeMetrics,
    pub recorded_at: DateTime<Utc>,
}

impl CompatibilitySample {
    pub fn new(features: PairFeatures, outcome: OutcomeMetrics, recorded_at: DateTime<Utc>) -> Self {
        Self {
            sample_id: SampleId::new(),
            edge: EdgeKey::new(features.source.clone(), features.target.clone()),
            features,
            outcome,
            recorded_at,
        }
    }
}

/// Reference points used to fold latency and throughput into [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutcomeNormalization {
    #[serde(default = "default_reference_latency_ms")]
    pub reference_latency_ms: f64,

    #[serde(default = "default_reference_throughput")]
    pub reference_throughput: f64,
}

impl Default for OutcomeNormalization {
    fn default() -> Self {
        Self {
            reference_latency_ms: default_reference_latency_ms(),
            reference_throughput: default_reference_throughput(),
        }
    }
}

impl OutcomeNormalization {
    /// Composite realised outcome in [0, 1]:
    /// 0.5 success + 0.3 latency score + 0.2 throughput score.
    pub fn realized(&self, outcome: &OutcomeMetrics) -> f64 {
        let success = 1.0 - outcome.error_rate.clamp(0.0, 1.0);
        let latency = 1.0 / (1.0 + outcome.latency_ms.max(0.0) / self.reference_latency_ms);
        let t = outcome.throughput.max(0.0);
        let throughput = t / (t + self.reference_throughput);
        let value = 0.5 * success + 0.3 * latency + 0.2 * throughput;
        if value.is_finite() {
            value.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// Half-open time window `[since, until)`; `until = None` means "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleWindow {
    pub since: DateTime<Utc>,
    pub until: Option<DateTime<Utc>>,
}

impl SampleWindow {
    pub fn since(since: DateTime<Utc>) -> Self {
        Self { since, until: None }
    }

    pub fn between(since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self {
            since,
            until: Some(until),
        }
    }

    /// The trailing `span` ending now.
    pub fn trailing(span: Duration) -> Self {
        Self::since(Utc::now() - span)
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.since && self.until.map_or(true, |until| at < until)
    }
}

fn default_reference_latency_ms() -> f64 {
    100.0
}

fn default_reference_throughput() -> f64 {
    100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_realized_outcome_bounds() {
        let norm = OutcomeNormalization::default();
        let perfect = OutcomeMetrics {
            latency_ms: 0.0,
            error_rate: 0.0,
            throughput: 1e12,
        };
        assert!(norm.realized(&perfect) > 0.99);

        let broken = OutcomeMetrics {
            latency_ms: 1e12,
            error_rate: 1.0,
            throughput: 0.0,
        };
        assert!(norm.realized(&broken) < 0.01);
    }

    #[test]
    fn test_realized_outcome_reference_point() {
        let norm = OutcomeNormalization::default();
        let outcome = OutcomeMetrics {
            latency_ms: 100.0,
            error_rate: 0.1,
            throughput: 100.0,
        };
        // 0.5 * 0.9 + 0.3 * 0.5 + 0.2 * 0.5
        assert!((norm.realized(&outcome) - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_window_is_half_open() {
        let start = Utc::now();
        let end = start + Duration::minutes(5);
        let window = SampleWindow::between(start, end);
        assert!(window.contains(start));
        assert!(!window.contains(end));
        assert!(SampleWindow::since(start).contains(end));
    }
}
