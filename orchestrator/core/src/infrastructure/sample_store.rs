// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Bounded in-memory sample store. Oldest samples are evicted first once
//! the capacity is reached.

use crate::domain::repository::{SampleStore, SampleStoreError};
use crate::domain::sample::{CompatibilitySample, SampleWindow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Clone)]
pub struct InMemorySampleStore {
    samples: Arc<RwLock<VecDeque<CompatibilitySample>>>,
    capacity: usize,
}

impl InMemorySampleStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: Arc::new(RwLock::new(VecDeque::new())),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.read().is_empty()
    }
}

#[async_trait]
impl SampleStore for InMemorySampleStore {
    async fn record_sample(&self, sample: CompatibilitySample) -> Result<(), SampleStoreError> {
        let mut samples = self.samples.write();
        samples.push_back(sample);
        while samples.len() > self.capacity {
            samples.pop_front();
        }
        Ok(())
    }

    async fn query_samples(&self, window: SampleWindow) -> Result<Vec<CompatibilitySample>, SampleStoreError> {
        Ok(self
            .samples
            .read()
            .iter()
            .filter(|s| window.contains(s.recorded_at))
            .cloned()
            .collect())
    }

    async fn count_since(&self, since: DateTime<Utc>) -> Result<usize, SampleStoreError> {
        Ok(self
            .samples
            .read()
            .iter()
            .filter(|s| s.recorded_at >= since)
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::module::{ModuleId, Observed};
    use crate::domain::predictor::PairFeatures;
    use crate::domain::sample::OutcomeMetrics;
    use chrono::Duration;

    fn sample(at: DateTime<Utc>) -> CompatibilitySample {
        let features = PairFeatures {
            source: ModuleId::new("a"),
            target: ModuleId::new("b"),
            capability_overlap: 0.5,
            dependency_declared: 0.0,
            source_success_rate: Observed::Unknown,
            target_success_rate: Observed::Known(0.9),
            latency_score: 0.5,
            timeout_feasibility: 1.0,
            rate_limit_feasibility: 1.0,
            auth_match: 1.0,
            health: 1.0,
            metric_coverage: 0.5,
        };
        let outcome = OutcomeMetrics {
            latency_ms: 20.0,
            error_rate: 0.01,
            throughput: 80.0,
        };
        CompatibilitySample::new(features, outcome, at)
    }

    #[tokio::test]
    async fn test_rolling_window_evicts_oldest() {
        let store = InMemorySampleStore::new(3);
        let start = Utc::now();
        for i in 0..5 {
            store.record_sample(sample(start + Duration::seconds(i))).await.unwrap();
        }

        assert_eq!(store.len(), 3);
        let all = store.query_samples(SampleWindow::since(start)).await.unwrap();
        assert_eq!(all[0].recorded_at, start + Duration::seconds(2));
    }

    #[tokio::test]
    async fn test_query_window_and_count() {
        let store = InMemorySampleStore::new(100);
        let start = Utc::now();
        for i in 0..10 {
            store.record_sample(sample(start + Duration::minutes(i))).await.unwrap();
        }

        let window = SampleWindow::between(start + Duration::minutes(2), start + Duration::minutes(5));
        assert_eq!(store.query_samples(window).await.unwrap().len(), 3);
        assert_eq!(store.count_since(start + Duration::minutes(7)).await.unwrap(), 3);
    }
}
