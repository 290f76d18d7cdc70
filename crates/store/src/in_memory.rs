//! In-memory backends: useful for testing and single-process deployments.

use async_trait::async_trait;
use educore_core::cache::CacheStore;
use educore_core::error::{CacheError, GraphError};
use educore_core::graph::{GraphStore, KnowledgeGraphEdge, KnowledgeGraphNode};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// A TTL cache held in a HashMap.
///
/// Expired entries are dropped lazily on read and on every write. A TTL too
/// large to represent as an [`Instant`] never expires.
pub struct InMemoryCache {
    entries: Arc<RwLock<HashMap<String, (String, Option<Instant>)>>>,
}

fn is_live(expires: Option<Instant>, now: Instant) -> bool {
    expires.is_none_or(|at| at > now)
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|(_, expires)| is_live(*expires, now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop `key` if it is still expired as of `now`. A value written since
    /// the caller's read is left alone.
    async fn evict_if_expired(&self, key: &str, now: Instant) {
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|(_, expires)| !is_live(*expires, now)) {
            entries.remove(key);
        }
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some((value, expires)) if is_live(*expires, now) => {
                    return Ok(Some(value.clone()));
                }
                Some(_) => {}
                None => return Ok(None),
            }
        }
        self.evict_if_expired(key, now).await;
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, (_, expires)| is_live(*expires, now));
        entries.insert(key.to_string(), (value.to_string(), now.checked_add(ttl)));
        Ok(())
    }
}

type NodeKey = (String, String);
type EdgeKey = (String, String);

/// A graph store over two ordered maps keyed by `(tenant_id, id)`.
pub struct InMemoryGraphStore {
    nodes: Arc<RwLock<BTreeMap<NodeKey, KnowledgeGraphNode>>>,
    edges: Arc<RwLock<BTreeMap<EdgeKey, KnowledgeGraphEdge>>>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self {
            nodes: Arc::new(RwLock::new(BTreeMap::new())),
            edges: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    pub async fn node_count(&self, tenant_id: &str) -> usize {
        self.nodes
            .read()
            .await
            .keys()
            .filter(|(t, _)| t == tenant_id)
            .count()
    }

    pub async fn edge_count(&self, tenant_id: &str) -> usize {
        self.edges
            .read()
            .await
            .keys()
            .filter(|(t, _)| t == tenant_id)
            .count()
    }

    pub async fn get_node(&self, tenant_id: &str, node_id: &str) -> Option<KnowledgeGraphNode> {
        self.nodes
            .read()
            .await
            .get(&(tenant_id.to_string(), node_id.to_string()))
            .cloned()
    }

    pub async fn get_edge(&self, tenant_id: &str, id: &str) -> Option<KnowledgeGraphEdge> {
        self.edges
            .read()
            .await
            .get(&(tenant_id.to_string(), id.to_string()))
            .cloned()
    }
}

impl Default for InMemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn upsert_node(&self, node: &KnowledgeGraphNode) -> Result<(), GraphError> {
        let key = (node.tenant_id.clone(), node.node_id.clone());
        let mut nodes = self.nodes.write().await;
        match nodes.get_mut(&key) {
            Some(existing) => {
                existing.node_type = node.node_type.clone();
                existing.properties = node.properties.clone();
            }
            None => {
                nodes.insert(key, node.clone());
            }
        }
        Ok(())
    }

    async fn upsert_edge(&self, edge: &KnowledgeGraphEdge) -> Result<(), GraphError> {
        let key = (edge.tenant_id.clone(), edge.id.clone());
        let mut edges = self.edges.write().await;
        match edges.get_mut(&key) {
            Some(existing) => {
                existing.edge_type = edge.edge_type.clone();
                existing.weight = edge.weight;
                existing.properties = edge.properties.clone();
            }
            None => {
                edges.insert(key, edge.clone());
            }
        }
        Ok(())
    }

    async fn find_nodes(
        &self,
        tenant_id: &str,
        node_ids: &[String],
        limit: usize,
    ) -> Result<Vec<KnowledgeGraphNode>, GraphError> {
        let nodes = self.nodes.read().await;
        Ok(nodes
            .values()
            .filter(|n| n.tenant_id == tenant_id)
            .filter(|n| node_ids.is_empty() || node_ids.contains(&n.node_id))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn find_edges(
        &self,
        tenant_id: &str,
        node_ids: &[String],
    ) -> Result<Vec<KnowledgeGraphEdge>, GraphError> {
        let edges = self.edges.read().await;
        Ok(edges
            .values()
            .filter(|e| e.tenant_id == tenant_id)
            .filter(|e| node_ids.iter().any(|id| e.touches(id)))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use educore_core::graph::{EdgeInput, NodeInput};
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn cache_entries_expire() {
        let cache = InMemoryCache::new();
        cache.set("qp:t1:abc", "{}", Duration::from_secs(300)).await.unwrap();
        assert_eq!(cache.get("qp:t1:abc").await.unwrap().as_deref(), Some("{}"));

        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(cache.get("qp:t1:abc").await.unwrap().is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn huge_ttl_never_expires() {
        let cache = InMemoryCache::new();
        cache.set("k", "v", Duration::from_secs(u64::MAX)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_read_does_not_evict_a_fresh_write() {
        let cache = InMemoryCache::new();
        cache.set("k", "old", Duration::from_secs(1)).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;

        // A reader saw the expired entry at `seen`, then a writer refreshed it.
        let seen = Instant::now();
        cache.set("k", "new", Duration::from_secs(60)).await.unwrap();
        cache.evict_if_expired("k", seen).await;
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("new"));

        tokio::time::advance(Duration::from_secs(61)).await;
        cache.evict_if_expired("k", Instant::now()).await;
        assert!(cache.entries.read().await.is_empty());
    }

    #[tokio::test]
    async fn cache_overwrites_value() {
        let cache = InMemoryCache::new();
        cache.set("k", "one", Duration::from_secs(60)).await.unwrap();
        cache.set("k", "two", Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("two"));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn node_update_keeps_tenant_and_replaces_fields() {
        let store = InMemoryGraphStore::new();
        let first = NodeInput::new("n1")
            .with_property("title", json!("REST"))
            .into_node("t1")
            .unwrap();
        store.upsert_node(&first).await.unwrap();

        let second = NodeInput::new("n1")
            .with_type("topic")
            .with_property("title", json!("REST APIs"))
            .into_node("t1")
            .unwrap();
        store.upsert_node(&second).await.unwrap();

        let stored = store.get_node("t1", "n1").await.unwrap();
        assert_eq!(stored.node_type, "topic");
        assert_eq!(stored.properties["title"], "REST APIs");
        assert_eq!(store.node_count("t1").await, 1);
    }

    #[tokio::test]
    async fn same_node_id_in_two_tenants_is_two_records() {
        let store = InMemoryGraphStore::new();
        for tenant in ["t1", "t2"] {
            let node = NodeInput::new("shared").into_node(tenant).unwrap();
            store.upsert_node(&node).await.unwrap();
        }
        assert_eq!(store.node_count("t1").await, 1);
        assert_eq!(store.node_count("t2").await, 1);
        assert_eq!(store.get_node("t2", "shared").await.unwrap().tenant_id, "t2");
    }

    #[tokio::test]
    async fn find_respects_filter_limit_and_tenant() {
        let store = InMemoryGraphStore::new();
        for id in ["a", "b", "c"] {
            store
                .upsert_node(&NodeInput::new(id).into_node("t1").unwrap())
                .await
                .unwrap();
        }
        store
            .upsert_node(&NodeInput::new("z").into_node("t2").unwrap())
            .await
            .unwrap();
        store
            .upsert_edge(&EdgeInput::new("a", "b").into_edge("t1").unwrap())
            .await
            .unwrap();
        store
            .upsert_edge(&EdgeInput::new("a", "b").into_edge("t2").unwrap())
            .await
            .unwrap();

        let all = store.find_nodes("t1", &[], 2).await.unwrap();
        assert_eq!(all.len(), 2);

        let filtered = store.find_nodes("t1", &["c".to_string()], 10).await.unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].node_id, "c");

        let edges = store.find_edges("t1", &["b".to_string()]).await.unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].tenant_id, "t1");

        assert!(store.find_edges("t1", &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn default_batch_applies_everything() {
        let store = InMemoryGraphStore::new();
        let nodes = vec![
            NodeInput::new("a").into_node("t1").unwrap(),
            NodeInput::new("b").into_node("t1").unwrap(),
        ];
        let edges = vec![EdgeInput::new("a", "b").into_edge("t1").unwrap()];
        let applied = store.apply_batch("t1", &nodes, &edges).await.unwrap();
        assert_eq!(applied, 3);
        assert!(store.get_edge("t1", "a::b::related_to").await.is_some());
    }
}
