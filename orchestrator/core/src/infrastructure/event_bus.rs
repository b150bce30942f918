// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Pub/Sub for Domain Events
//
// Provides in-memory event streaming using tokio broadcast channels.
// Observers (CLI, tests, telemetry forwarders) subscribe to run, deployment
// and model events without coupling to the orchestration loop.
//
// In-memory only: events are lost on restart.

use crate::domain::events::{CatalogEvent, DeploymentEvent, ModelEvent, OptimizationEvent, RunId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Unified domain event type for the event bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    Catalog(CatalogEvent),
    Optimization(OptimizationEvent),
    Deployment(DeploymentEvent),
    Model(ModelEvent),
}

impl DomainEvent {
    /// Run the event belongs to, if any
    pub fn run_id(&self) -> Option<RunId> {
        match self {
            DomainEvent::Optimization(e) => Some(e.run_id()),
            DomainEvent::Deployment(e) => Some(e.run_id()),
            DomainEvent::Catalog(_) | DomainEvent::Model(_) => None,
        }
    }
}

/// Event bus for publishing and subscribing to domain events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity
    /// Capacity determines how many events can be buffered before dropping old ones
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create event bus with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish_catalog_event(&self, event: CatalogEvent) {
        self.publish(DomainEvent::Catalog(event));
    }

    pub fn publish_optimization_event(&self, event: OptimizationEvent) {
        self.publish(DomainEvent::Optimization(event));
    }

    pub fn publish_deployment_event(&self, event: DeploymentEvent) {
        self.publish(DomainEvent::Deployment(event));
    }

    pub fn publish_model_event(&self, event: ModelEvent) {
        self.publish(DomainEvent::Model(event));
    }

    fn publish(&self, event: DomainEvent) {
        debug!("Publishing event: {:?}", event);

        // send() only fails when nobody is listening
        let receiver_count = self.sender.send(event).unwrap_or(0);

        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all domain events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe and filter for one optimizer run
    pub fn subscribe_run(&self, run_id: RunId) -> RunEventReceiver {
        RunEventReceiver {
            receiver: self.sender.subscribe(),
            run_id,
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Receiver for all domain events
pub struct EventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
}

impl EventReceiver {
    /// Receive the next event (waits until one is available)
    pub async fn recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver for the events of a single run (filtered)
pub struct RunEventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
    run_id: RunId,
}

impl RunEventReceiver {
    /// Receive the next event of the run, skipping everything else
    pub async fn recv(&mut self) -> Result<DomainEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if event.run_id() == Some(self.run_id) {
                return Ok(event);
            }
        }
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::RunTrigger;
    use crate::domain::module::ModuleId;
    use crate::domain::predictor::ModelVersion;
    use chrono::Utc;

    fn started(run_id: RunId) -> OptimizationEvent {
        OptimizationEvent::RunStarted {
            run_id,
            trigger: RunTrigger::Manual,
            module_count: 3,
            model_version: ModelVersion(1),
            started_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        event_bus.publish_catalog_event(CatalogEvent::ModuleRegistered {
            module_id: ModuleId::new("x"),
            registered_at: Utc::now(),
        });

        match receiver.recv().await.unwrap() {
            DomainEvent::Catalog(CatalogEvent::ModuleRegistered { module_id, .. }) => {
                assert_eq!(module_id, ModuleId::new("x"));
            }
            _ => panic!("Wrong event type received"),
        }
    }

    #[tokio::test]
    async fn test_run_event_filtering() {
        let event_bus = EventBus::new(10);
        let run_id = RunId::new();
        let mut receiver = event_bus.subscribe_run(run_id);

        event_bus.publish_optimization_event(started(RunId::new()));
        event_bus.publish_model_event(ModelEvent::ModelRolledBack {
            from: ModelVersion(2),
            to: ModelVersion(1),
            rolled_back_at: Utc::now(),
        });
        event_bus.publish_optimization_event(started(run_id));

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.run_id(), Some(run_id));
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let event_bus = EventBus::new(10);
        let mut receiver1 = event_bus.subscribe();
        let mut receiver2 = event_bus.subscribe();

        assert_eq!(event_bus.subscriber_count(), 2);

        event_bus.publish_optimization_event(started(RunId::new()));

        let _ = receiver1.recv().await.unwrap();
        let _ = receiver2.recv().await.unwrap();
        assert!(matches!(receiver1.try_recv(), Err(EventBusError::Empty)));
    }
}
