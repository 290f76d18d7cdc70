//! PostgreSQL + pgvector backends.
//!
//! Implements:
//! - [`GraphStore`] over `knowledge_graph_nodes` / `knowledge_graph_edges`,
//!   with batches applied inside a single transaction
//! - [`VectorRetriever`] over `vector_embeddings` using pgvector's `<=>`
//! - [`CacheStore`] over `query_cache` with an `expires_at` column
//!
//! # Setup
//!
//! ```sql
//! CREATE EXTENSION IF NOT EXISTS vector;
//! ```
//!
//! Then run the migration in `migrations/001_create_educore_tables.sql`
//! (or call [`migrate`]).
//!
//! # Feature gate
//!
//! ```toml
//! educore-store = { workspace = true, features = ["postgres"] }
//! ```

use async_trait::async_trait;
use sqlx::Row;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

pub use sqlx::postgres::PgPool;

use educore_core::cache::CacheStore;
use educore_core::error::{CacheError, GraphError, ProviderError};
use educore_core::graph::{GraphStore, KnowledgeGraphEdge, KnowledgeGraphNode};
use educore_core::retrieval::{RetrievalMode, RetrievalQuery, RetrievedChunk, VectorRetriever};

/// Open a connection pool.
pub async fn connect(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    info!("Connected to PostgreSQL");
    Ok(pool)
}

/// Run the bundled schema migration.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::Error> {
    let migration_sql = include_str!("../migrations/001_create_educore_tables.sql");
    sqlx::raw_sql(migration_sql).execute(pool).await?;
    info!("Educore schema migration complete");
    Ok(())
}

/// Format an embedding as a pgvector literal.
fn vector_literal(embedding: &[f32]) -> String {
    format!(
        "[{}]",
        embedding
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",")
    )
}

// ── Graph store ──────────────────────────────────────────────────────────

const UPSERT_NODE_SQL: &str = "INSERT INTO knowledge_graph_nodes (tenant_id, node_id, node_type, properties) \
     VALUES ($1, $2, $3, $4) \
     ON CONFLICT (tenant_id, node_id) DO UPDATE SET \
       node_type = EXCLUDED.node_type, \
       properties = EXCLUDED.properties, \
       updated_at = NOW()";

const UPSERT_EDGE_SQL: &str = "INSERT INTO knowledge_graph_edges \
       (tenant_id, id, source_node_id, target_node_id, edge_type, weight, properties) \
     VALUES ($1, $2, $3, $4, $5, $6, $7) \
     ON CONFLICT (tenant_id, id) DO UPDATE SET \
       edge_type = EXCLUDED.edge_type, \
       weight = EXCLUDED.weight, \
       properties = EXCLUDED.properties, \
       updated_at = NOW()";

async fn upsert_node_with<'e, E>(executor: E, node: &KnowledgeGraphNode) -> Result<(), sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(UPSERT_NODE_SQL)
        .bind(&node.tenant_id)
        .bind(&node.node_id)
        .bind(&node.node_type)
        .bind(Json(&node.properties))
        .execute(executor)
        .await?;
    Ok(())
}

async fn upsert_edge_with<'e, E>(executor: E, edge: &KnowledgeGraphEdge) -> Result<(), sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(UPSERT_EDGE_SQL)
        .bind(&edge.tenant_id)
        .bind(&edge.id)
        .bind(&edge.source_node_id)
        .bind(&edge.target_node_id)
        .bind(&edge.edge_type)
        .bind(edge.weight)
        .bind(Json(&edge.properties))
        .execute(executor)
        .await?;
    Ok(())
}

fn row_to_node(row: &PgRow) -> KnowledgeGraphNode {
    let properties: Json<serde_json::Map<String, serde_json::Value>> = row.get("properties");
    KnowledgeGraphNode {
        tenant_id: row.get("tenant_id"),
        node_id: row.get("node_id"),
        node_type: row.get("node_type"),
        properties: properties.0,
    }
}

fn row_to_edge(row: &PgRow) -> KnowledgeGraphEdge {
    let properties: Json<serde_json::Map<String, serde_json::Value>> = row.get("properties");
    KnowledgeGraphEdge {
        tenant_id: row.get("tenant_id"),
        id: row.get("id"),
        source_node_id: row.get("source_node_id"),
        target_node_id: row.get("target_node_id"),
        edge_type: row.get("edge_type"),
        weight: row.get("weight"),
        properties: properties.0,
    }
}

/// Knowledge graph persisted in PostgreSQL.
pub struct PgGraphStore {
    pool: PgPool,
}

impl PgGraphStore {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GraphStore for PgGraphStore {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn upsert_node(&self, node: &KnowledgeGraphNode) -> Result<(), GraphError> {
        upsert_node_with(&self.pool, node)
            .await
            .map_err(|e| GraphError::Storage(format!("node upsert failed: {e}")))
    }

    async fn upsert_edge(&self, edge: &KnowledgeGraphEdge) -> Result<(), GraphError> {
        upsert_edge_with(&self.pool, edge)
            .await
            .map_err(|e| GraphError::Storage(format!("edge upsert failed: {e}")))
    }

    async fn find_nodes(
        &self,
        tenant_id: &str,
        node_ids: &[String],
        limit: usize,
    ) -> Result<Vec<KnowledgeGraphNode>, GraphError> {
        let rows = sqlx::query(
            "SELECT tenant_id, node_id, node_type, properties \
             FROM knowledge_graph_nodes \
             WHERE tenant_id = $1 AND (cardinality($2::text[]) = 0 OR node_id = ANY($2)) \
             ORDER BY node_id \
             LIMIT $3",
        )
        .bind(tenant_id)
        .bind(node_ids)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| GraphError::QueryFailed(format!("node lookup failed: {e}")))?;

        Ok(rows.iter().map(row_to_node).collect())
    }

    async fn find_edges(
        &self,
        tenant_id: &str,
        node_ids: &[String],
    ) -> Result<Vec<KnowledgeGraphEdge>, GraphError> {
        let rows = sqlx::query(
            "SELECT tenant_id, id, source_node_id, target_node_id, edge_type, weight, properties \
             FROM knowledge_graph_edges \
             WHERE tenant_id = $1 AND (source_node_id = ANY($2) OR target_node_id = ANY($2)) \
             ORDER BY id",
        )
        .bind(tenant_id)
        .bind(node_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| GraphError::QueryFailed(format!("edge lookup failed: {e}")))?;

        Ok(rows.iter().map(row_to_edge).collect())
    }

    /// All-or-nothing: the whole batch commits or none of it does.
    async fn apply_batch(
        &self,
        tenant_id: &str,
        nodes: &[KnowledgeGraphNode],
        edges: &[KnowledgeGraphEdge],
    ) -> Result<usize, GraphError> {
        let failed = |reason: String| GraphError::UpdateFailed {
            tenant_id: tenant_id.to_string(),
            applied: Vec::new(),
            reason,
        };

        let mut tx = self.pool.begin().await.map_err(|e| failed(e.to_string()))?;

        for node in nodes {
            upsert_node_with(&mut *tx, node)
                .await
                .map_err(|e| failed(format!("node {}: {e}", node.node_id)))?;
        }
        for edge in edges {
            upsert_edge_with(&mut *tx, edge)
                .await
                .map_err(|e| failed(format!("edge {}: {e}", edge.id)))?;
        }

        tx.commit().await.map_err(|e| failed(e.to_string()))?;

        debug!(tenant_id, nodes = nodes.len(), edges = edges.len(), "Graph batch committed");
        Ok(nodes.len() + edges.len())
    }
}

// ── Vector retriever ─────────────────────────────────────────────────────

/// Similarity search over `vector_embeddings` with pgvector.
///
/// RBAC: rows with a non-empty `allowed_roles` are only visible to callers
/// holding one of those roles. Requested attributes must match any
/// same-named key present in the row's `metadata`.
pub struct PgVectorRetriever {
    pool: PgPool,
    threshold: f32,
    allow_unfiltered: bool,
}

impl PgVectorRetriever {
    pub fn from_pool(pool: PgPool, threshold: f32) -> Self {
        Self {
            pool,
            threshold,
            allow_unfiltered: false,
        }
    }

    pub fn with_unfiltered(mut self, allow: bool) -> Self {
        self.allow_unfiltered = allow;
        self
    }

    fn effective_threshold(&self, mode: RetrievalMode) -> f32 {
        match mode {
            RetrievalMode::Diagnostic if self.allow_unfiltered => -1.0,
            _ => self.threshold,
        }
    }
}

#[async_trait]
impl VectorRetriever for PgVectorRetriever {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn get_similar_content(
        &self,
        query: RetrievalQuery<'_>,
    ) -> Result<Vec<RetrievedChunk>, ProviderError> {
        let attributes: &HashMap<String, String> = query.attributes;

        let rows = sqlx::query(
            "SELECT id, tenant_id, content_id, content_type, content_text, metadata, \
                    1.0 - (embedding <=> $2::vector) AS similarity \
             FROM vector_embeddings \
             WHERE tenant_id = $1 \
               AND (cardinality(allowed_roles) = 0 OR allowed_roles && $3::text[]) \
               AND NOT EXISTS ( \
                   SELECT 1 FROM jsonb_each_text($4::jsonb) a \
                   WHERE metadata ? a.key AND metadata->>a.key <> a.value) \
               AND 1.0 - (embedding <=> $2::vector) >= $5 \
             ORDER BY embedding <=> $2::vector ASC \
             LIMIT $6",
        )
        .bind(query.tenant_id)
        .bind(vector_literal(query.embedding))
        .bind(query.roles)
        .bind(Json(attributes))
        .bind(f64::from(self.effective_threshold(query.mode)))
        .bind(query.top_k as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ProviderError::Unavailable(format!("vector search failed: {e}")))?;

        Ok(rows
            .iter()
            .map(|row| {
                let metadata: Json<serde_json::Map<String, serde_json::Value>> = row.get("metadata");
                let similarity: f64 = row.get("similarity");
                RetrievedChunk {
                    id: row.get("id"),
                    tenant_id: row.get("tenant_id"),
                    content_id: row.get("content_id"),
                    content_type: row.get("content_type"),
                    text: row.get("content_text"),
                    similarity: (similarity as f32).clamp(0.0, 1.0),
                    metadata: metadata.0,
                }
            })
            .collect())
    }
}

// ── Cache ────────────────────────────────────────────────────────────────

/// Response cache persisted in `query_cache`.
pub struct PgCache {
    pool: PgPool,
}

impl PgCache {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Delete expired rows. Returns how many were removed.
    pub async fn purge_expired(&self) -> Result<u64, CacheError> {
        let result = sqlx::query("DELETE FROM query_cache WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl CacheStore for PgCache {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let row = sqlx::query(
            "SELECT value FROM query_cache WHERE cache_key = $1 AND expires_at > NOW()",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CacheError::Unavailable(e.to_string()))?;

        Ok(row.map(|r| r.get("value")))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        sqlx::query(
            "INSERT INTO query_cache (cache_key, value, expires_at) \
             VALUES ($1, $2, NOW() + make_interval(secs => $3)) \
             ON CONFLICT (cache_key) DO UPDATE SET \
               value = EXCLUDED.value, \
               expires_at = EXCLUDED.expires_at",
        )
        .bind(key)
        .bind(value)
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(())
    }
}

// ── Unit tests (no DB required) ──────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_serialization() {
        assert_eq!(vector_literal(&[0.1, 0.2, 0.3]), "[0.1,0.2,0.3]");
        assert_eq!(vector_literal(&[]), "[]");
    }

    #[test]
    fn upserts_never_rewrite_tenant() {
        for sql in [UPSERT_NODE_SQL, UPSERT_EDGE_SQL] {
            let update_clause = sql.split("DO UPDATE SET").nth(1).unwrap();
            assert!(!update_clause.contains("tenant_id"));
        }
    }

    #[test]
    fn migration_defines_all_tables() {
        let sql = include_str!("../migrations/001_create_educore_tables.sql");
        for table in [
            "knowledge_graph_nodes",
            "knowledge_graph_edges",
            "vector_embeddings",
            "query_cache",
        ] {
            assert!(sql.contains(table), "missing table {table}");
        }
    }
}
