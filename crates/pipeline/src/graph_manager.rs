//! Knowledge graph ingestion and per-tenant sync tracking.
//!
//! Mutations arrive as `graph.update` / `graph.sync` events from the
//! learning-content stream. Both upsert; only a sync moves the tenant's
//! recorded version.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use educore_core::error::GraphError;
use educore_core::event::{DomainEvent, EventBus};
use educore_core::graph::{
    EVENT_GRAPH_SYNC, EVENT_GRAPH_UPDATE, EdgeInput, GraphContextSource, GraphEvent,
    GraphNeighborhood, GraphStore, GraphVersion, KnowledgeContext, KnowledgeGraphEdge,
    KnowledgeGraphNode, NodeInput,
};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default `max_nodes` for [`KnowledgeGraphManager::enrich_context`].
pub const DEFAULT_MAX_NODES: usize = 10;

/// Default staleness bound for [`KnowledgeGraphManager::verify_sync_time`].
pub const DEFAULT_MAX_SYNC_AGE: Duration = Duration::from_secs(300);

/// Nodes scanned per tenant when matching a query against concept labels.
const CONTEXT_SCAN_LIMIT: usize = 500;

pub struct KnowledgeGraphManager {
    store: Arc<dyn GraphStore>,
    versions: DashMap<String, GraphVersion>,
    last_generated: AtomicU64,
    default_max_nodes: usize,
    event_bus: Option<Arc<EventBus>>,
}

impl KnowledgeGraphManager {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self {
            store,
            versions: DashMap::new(),
            last_generated: AtomicU64::new(0),
            default_max_nodes: DEFAULT_MAX_NODES,
            event_bus: None,
        }
    }

    pub fn with_default_max_nodes(mut self, max_nodes: usize) -> Self {
        self.default_max_nodes = max_nodes.max(1);
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    /// Upsert nodes then edges for a tenant. Returns the number of records written.
    ///
    /// Inputs without a node id (or without both edge endpoints) are skipped.
    /// A failure surfaces as [`GraphError::UpdateFailed`]; whatever the store
    /// already applied stays applied.
    pub async fn update_graph(
        &self,
        tenant_id: &str,
        nodes: Vec<NodeInput>,
        edges: Vec<EdgeInput>,
    ) -> Result<usize, GraphError> {
        if tenant_id.trim().is_empty() {
            return Err(GraphError::InvalidEvent("tenantId is required".into()));
        }

        let (node_count, edge_count) = (nodes.len(), edges.len());
        let nodes: Vec<KnowledgeGraphNode> = nodes
            .into_iter()
            .filter_map(|n| n.into_node(tenant_id))
            .collect();
        let edges: Vec<KnowledgeGraphEdge> = edges
            .into_iter()
            .filter_map(|e| e.into_edge(tenant_id))
            .collect();

        let skipped = (node_count - nodes.len()) + (edge_count - edges.len());
        if skipped > 0 {
            debug!(tenant_id, skipped, "Skipping incomplete graph records");
        }

        let written = match self.store.apply_batch(tenant_id, &nodes, &edges).await {
            Ok(written) => written,
            Err(e) => {
                let e = match e {
                    GraphError::UpdateFailed { .. } => e,
                    other => GraphError::UpdateFailed {
                        tenant_id: tenant_id.to_string(),
                        applied: Vec::new(),
                        reason: other.to_string(),
                    },
                };
                error!(tenant_id, store = self.store.name(), error = %e, "Graph update failed");
                return Err(e);
            }
        };

        info!(
            tenant_id,
            nodes = nodes.len(),
            edges = edges.len(),
            "Knowledge graph updated"
        );
        if let Some(bus) = &self.event_bus {
            bus.publish(DomainEvent::GraphUpdated {
                tenant_id: tenant_id.to_string(),
                records: written,
                timestamp: Utc::now(),
            });
        }
        Ok(written)
    }

    /// Nodes matching `node_ids` (all nodes when empty, up to `max_nodes`)
    /// and every edge touching one of `node_ids`.
    pub async fn enrich_context(
        &self,
        tenant_id: &str,
        node_ids: &[String],
        max_nodes: Option<usize>,
    ) -> Result<GraphNeighborhood, GraphError> {
        let limit = max_nodes.unwrap_or(self.default_max_nodes);
        let (nodes, edges) = tokio::join!(
            self.store.find_nodes(tenant_id, node_ids, limit),
            self.store.find_edges(tenant_id, node_ids),
        );
        Ok(GraphNeighborhood {
            nodes: nodes?,
            edges: edges?,
        })
    }

    /// Apply a sync batch and record the tenant's new version.
    ///
    /// Without an explicit version one is generated; generated versions are
    /// strictly increasing across calls. The recorded timestamp defaults to now.
    pub async fn sync_graph(
        &self,
        tenant_id: &str,
        nodes: Vec<NodeInput>,
        edges: Vec<EdgeInput>,
        version: Option<String>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<GraphVersion, GraphError> {
        self.update_graph(tenant_id, nodes, edges).await?;

        let recorded = GraphVersion {
            version: version
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| self.next_version()),
            timestamp: timestamp.unwrap_or_else(Utc::now),
        };
        self.versions
            .insert(tenant_id.to_string(), recorded.clone());

        info!(tenant_id, version = %recorded.version, "Knowledge graph synced");
        if let Some(bus) = &self.event_bus {
            bus.publish(DomainEvent::GraphSynced {
                tenant_id: tenant_id.to_string(),
                version: recorded.version.clone(),
                timestamp: recorded.timestamp,
            });
        }
        Ok(recorded)
    }

    /// `v-{millis}`, bumped past the previous value when the clock has not moved.
    fn next_version(&self) -> String {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        let previous = match self
            .last_generated
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
                Some(now.max(prev + 1))
            }) {
            Ok(prev) | Err(prev) => prev,
        };
        format!("v-{}", now.max(previous + 1))
    }

    /// Route an inbound event.
    ///
    /// Events without a type or tenant are ignored. Unknown types are logged
    /// and cause no writes.
    pub async fn handle_event(&self, event: GraphEvent) -> Result<(), GraphError> {
        let (Some(event_type), Some(tenant_id)) = (event.event_type, event.tenant_id) else {
            debug!("Ignoring graph event without type or tenant");
            return Ok(());
        };
        if tenant_id.is_empty() {
            debug!(%event_type, "Ignoring graph event with empty tenant");
            return Ok(());
        }

        let payload = event.payload;
        match event_type.as_str() {
            EVENT_GRAPH_SYNC => {
                self.sync_graph(
                    &tenant_id,
                    payload.nodes,
                    payload.edges,
                    payload.version,
                    payload.timestamp,
                )
                .await?;
            }
            EVENT_GRAPH_UPDATE => {
                self.update_graph(&tenant_id, payload.nodes, payload.edges)
                    .await?;
            }
            other => {
                warn!(event_type = other, %tenant_id, "Unknown graph event type");
            }
        }
        Ok(())
    }

    pub fn get_graph_version(&self, tenant_id: &str) -> Option<GraphVersion> {
        self.versions.get(tenant_id).map(|v| v.clone())
    }

    /// Whether the tenant's last sync is no older than `max_age`.
    /// A tenant that never synced is stale.
    pub fn verify_sync_time(&self, tenant_id: &str, max_age: Duration) -> bool {
        let Some(version) = self.get_graph_version(tenant_id) else {
            return false;
        };
        let age_ms = Utc::now().timestamp_millis() - version.timestamp.timestamp_millis();
        i128::from(age_ms) <= i128::try_from(max_age.as_millis()).unwrap_or(i128::MAX)
    }
}

#[async_trait]
impl GraphContextSource for KnowledgeGraphManager {
    /// Concepts whose label occurs in the query, plus their neighbours.
    async fn context_for_query(
        &self,
        tenant_id: &str,
        query: &str,
    ) -> Result<Option<KnowledgeContext>, GraphError> {
        let query = query.to_lowercase();
        let candidates = self
            .store
            .find_nodes(tenant_id, &[], CONTEXT_SCAN_LIMIT)
            .await?;

        let matched: Vec<&KnowledgeGraphNode> = candidates
            .iter()
            .filter(|node| query.contains(&node.label().to_lowercase()))
            .collect();
        if matched.is_empty() {
            return Ok(None);
        }

        let matched_ids: Vec<String> = matched.iter().map(|n| n.node_id.clone()).collect();
        let edges = self.store.find_edges(tenant_id, &matched_ids).await?;
        let neighbour_ids: Vec<String> = edges
            .iter()
            .flat_map(|e| [e.source_node_id.clone(), e.target_node_id.clone()])
            .filter(|id| !matched_ids.contains(id))
            .collect();
        let neighbours = if neighbour_ids.is_empty() {
            Vec::new()
        } else {
            self.store
                .find_nodes(tenant_id, &neighbour_ids, self.default_max_nodes)
                .await?
        };

        let mut seen = HashSet::new();
        let related_concepts: Vec<String> = matched
            .into_iter()
            .chain(neighbours.iter())
            .map(|node| node.label().to_string())
            .filter(|label| seen.insert(label.clone()))
            .take(self.default_max_nodes)
            .collect();

        Ok(Some(KnowledgeContext { related_concepts }))
    }
}
