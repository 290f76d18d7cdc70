//! Domain event system: decoupled notifications about queries and graph
//! changes.
//!
//! Events are published when something interesting happens in the system.
//! Other components can subscribe to react without tight coupling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A query was answered from the cache
    CacheHit {
        tenant_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A query was answered by the full pipeline
    QueryAnswered {
        tenant_id: String,
        sources_count: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// An optional collaborator failed and its default was substituted
    ContextDegraded {
        tenant_id: String,
        source: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// Graph records were upserted
    GraphUpdated {
        tenant_id: String,
        records: usize,
        timestamp: DateTime<Utc>,
    },

    /// A graph sync completed and the tenant's version moved
    GraphSynced {
        tenant_id: String,
        version: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::GraphSynced {
            tenant_id: "t1".into(),
            version: "v-1".into(),
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::GraphSynced {
                tenant_id, version, ..
            } => {
                assert_eq!(tenant_id, "t1");
                assert_eq!(version, "v-1");
            }
            _ => panic!("Expected GraphSynced event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::CacheHit {
            tenant_id: "t1".into(),
            timestamp: Utc::now(),
        });
    }
}
