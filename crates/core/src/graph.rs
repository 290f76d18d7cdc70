//! Knowledge graph model: concept nodes, typed edges, and the datastore
//! contract used to persist them.
//!
//! Records are always scoped by tenant. A node is identified by
//! `(tenant_id, node_id)` and an edge by `(tenant_id, id)`; upserting an
//! existing record never changes its tenant.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GraphError;

/// Node type used when a payload omits one.
pub const DEFAULT_NODE_TYPE: &str = "concept";

/// Edge type used when a payload omits one.
pub const DEFAULT_EDGE_TYPE: &str = "related_to";

/// Inbound event type that upserts records and bumps the graph version.
pub const EVENT_GRAPH_SYNC: &str = "graph.sync";

/// Inbound event type that upserts records without a version bump.
pub const EVENT_GRAPH_UPDATE: &str = "graph.update";

/// A stored concept node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeGraphNode {
    pub tenant_id: String,
    pub node_id: String,
    pub node_type: String,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl KnowledgeGraphNode {
    /// Human-readable label: `title`, then `name`, then the node id.
    pub fn label(&self) -> &str {
        ["title", "name"]
            .iter()
            .find_map(|k| self.properties.get(*k).and_then(|v| v.as_str()))
            .unwrap_or(self.node_id.as_str())
    }
}

/// A stored directed edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeGraphEdge {
    pub tenant_id: String,
    pub id: String,
    pub source_node_id: String,
    pub target_node_id: String,
    pub edge_type: String,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl KnowledgeGraphEdge {
    pub fn touches(&self, node_id: &str) -> bool {
        self.source_node_id == node_id || self.target_node_id == node_id
    }
}

/// Composite edge identity used when a payload carries no `edgeId`.
pub fn derive_edge_id(source_node_id: &str, target_node_id: &str, edge_type: &str) -> String {
    format!("{source_node_id}::{target_node_id}::{edge_type}")
}

fn default_node_type() -> String {
    DEFAULT_NODE_TYPE.into()
}

fn default_edge_type() -> String {
    DEFAULT_EDGE_TYPE.into()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// A node as it arrives in a mutation payload. `node_id` may be missing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInput {
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default = "default_node_type")]
    pub node_type: String,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl Default for NodeInput {
    fn default() -> Self {
        Self {
            node_id: None,
            node_type: default_node_type(),
            properties: serde_json::Map::new(),
        }
    }
}

impl NodeInput {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: Some(node_id.into()),
            node_type: default_node_type(),
            properties: serde_json::Map::new(),
        }
    }

    pub fn with_type(mut self, node_type: impl Into<String>) -> Self {
        self.node_type = node_type.into();
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Bind to a tenant. `None` when the node id is absent.
    pub fn into_node(self, tenant_id: &str) -> Option<KnowledgeGraphNode> {
        Some(KnowledgeGraphNode {
            tenant_id: tenant_id.to_string(),
            node_id: non_empty(self.node_id)?,
            node_type: self.node_type,
            properties: self.properties,
        })
    }
}

/// An edge as it arrives in a mutation payload. Endpoints may be missing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeInput {
    #[serde(default)]
    pub edge_id: Option<String>,
    #[serde(default)]
    pub source_node_id: Option<String>,
    #[serde(default)]
    pub target_node_id: Option<String>,
    #[serde(default = "default_edge_type")]
    pub edge_type: String,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl Default for EdgeInput {
    fn default() -> Self {
        Self {
            edge_id: None,
            source_node_id: None,
            target_node_id: None,
            edge_type: default_edge_type(),
            weight: None,
            properties: serde_json::Map::new(),
        }
    }
}

impl EdgeInput {
    pub fn new(source_node_id: impl Into<String>, target_node_id: impl Into<String>) -> Self {
        Self {
            edge_id: None,
            source_node_id: Some(source_node_id.into()),
            target_node_id: Some(target_node_id.into()),
            edge_type: default_edge_type(),
            weight: None,
            properties: serde_json::Map::new(),
        }
    }

    pub fn with_id(mut self, edge_id: impl Into<String>) -> Self {
        self.edge_id = Some(edge_id.into());
        self
    }

    pub fn with_type(mut self, edge_type: impl Into<String>) -> Self {
        self.edge_type = edge_type.into();
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    /// Bind to a tenant. `None` when either endpoint is absent.
    pub fn into_edge(self, tenant_id: &str) -> Option<KnowledgeGraphEdge> {
        let source = non_empty(self.source_node_id)?;
        let target = non_empty(self.target_node_id)?;
        let id = non_empty(self.edge_id)
            .unwrap_or_else(|| derive_edge_id(&source, &target, &self.edge_type));
        Some(KnowledgeGraphEdge {
            tenant_id: tenant_id.to_string(),
            id,
            source_node_id: source,
            target_node_id: target,
            edge_type: self.edge_type,
            weight: self.weight,
            properties: self.properties,
        })
    }
}

/// Result of a neighbourhood lookup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphNeighborhood {
    pub nodes: Vec<KnowledgeGraphNode>,
    pub edges: Vec<KnowledgeGraphEdge>,
}

/// Graph context folded into a prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeContext {
    pub related_concepts: Vec<String>,
}

impl KnowledgeContext {
    pub fn is_empty(&self) -> bool {
        self.related_concepts.is_empty()
    }
}

/// Last recorded sync for a tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphVersion {
    pub version: String,
    pub timestamp: DateTime<Utc>,
}

/// Payload of an inbound graph mutation event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphEventPayload {
    #[serde(default)]
    pub nodes: Vec<NodeInput>,
    #[serde(default)]
    pub edges: Vec<EdgeInput>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// An inbound `{type, tenantId, payload}` message from the event stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEvent {
    #[serde(default, rename = "type")]
    pub event_type: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub payload: GraphEventPayload,
}

/// The graph datastore contract.
///
/// Implementations: in-memory (for testing and single-process use),
/// PostgreSQL.
#[async_trait]
pub trait GraphStore: Send + Sync {
    fn name(&self) -> &str;

    /// Insert, or update `node_type` and `properties` of an existing node.
    async fn upsert_node(&self, node: &KnowledgeGraphNode) -> std::result::Result<(), GraphError>;

    /// Insert, or update `edge_type`, `weight` and `properties` of an existing edge.
    async fn upsert_edge(&self, edge: &KnowledgeGraphEdge) -> std::result::Result<(), GraphError>;

    /// Up to `limit` nodes of the tenant, restricted to `node_ids` when non-empty.
    async fn find_nodes(
        &self,
        tenant_id: &str,
        node_ids: &[String],
        limit: usize,
    ) -> std::result::Result<Vec<KnowledgeGraphNode>, GraphError>;

    /// All edges of the tenant with either endpoint in `node_ids`.
    async fn find_edges(
        &self,
        tenant_id: &str,
        node_ids: &[String],
    ) -> std::result::Result<Vec<KnowledgeGraphEdge>, GraphError>;

    /// Apply nodes then edges.
    ///
    /// The default runs record by record; on failure the returned
    /// `UpdateFailed` lists the keys already written. Stores with
    /// transactions override this to make the batch all-or-nothing.
    async fn apply_batch(
        &self,
        tenant_id: &str,
        nodes: &[KnowledgeGraphNode],
        edges: &[KnowledgeGraphEdge],
    ) -> std::result::Result<usize, GraphError> {
        let mut applied = Vec::with_capacity(nodes.len() + edges.len());

        for node in nodes {
            if let Err(e) = self.upsert_node(node).await {
                return Err(GraphError::UpdateFailed {
                    tenant_id: tenant_id.to_string(),
                    applied,
                    reason: e.to_string(),
                });
            }
            applied.push(format!("node:{}", node.node_id));
        }

        for edge in edges {
            if let Err(e) = self.upsert_edge(edge).await {
                return Err(GraphError::UpdateFailed {
                    tenant_id: tenant_id.to_string(),
                    applied,
                    reason: e.to_string(),
                });
            }
            applied.push(format!("edge:{}", edge.id));
        }

        Ok(applied.len())
    }
}

/// Supplies related-concept context for a query.
#[async_trait]
pub trait GraphContextSource: Send + Sync {
    async fn context_for_query(
        &self,
        tenant_id: &str,
        query: &str,
    ) -> std::result::Result<Option<KnowledgeContext>, GraphError>;
}
