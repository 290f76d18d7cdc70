//! Vector similarity and an in-memory tenant-scoped similarity index.
//!
//! The index enforces the retriever contract itself: tenant scope, role and
//! attribute filtering, the similarity threshold, ordering and `top_k`.

use async_trait::async_trait;
use educore_core::error::ProviderError;
use educore_core::retrieval::{RetrievalMode, RetrievalQuery, RetrievedChunk, VectorRetriever};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Metadata key listing the roles allowed to read a chunk.
pub const ALLOWED_ROLES_KEY: &str = "allowedRoles";

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if either vector is zero-length or empty.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

struct IndexedChunk {
    chunk: RetrievedChunk,
    embedding: Vec<f32>,
}

impl IndexedChunk {
    /// Chunks without an `allowedRoles` list are readable by everyone.
    fn readable_by(&self, roles: &[String]) -> bool {
        match self.chunk.metadata.get(ALLOWED_ROLES_KEY).and_then(Value::as_array) {
            Some(allowed) if !allowed.is_empty() => allowed
                .iter()
                .filter_map(Value::as_str)
                .any(|a| roles.iter().any(|r| r == a)),
            _ => true,
        }
    }

    /// Every requested attribute the chunk declares must match.
    fn matches_attributes(&self, attributes: &HashMap<String, String>) -> bool {
        attributes.iter().all(|(k, v)| match self.chunk.metadata.get(k) {
            Some(Value::String(s)) => s == v,
            Some(other) => other.to_string() == *v,
            None => true,
        })
    }
}

/// An in-memory similarity index over tenant content.
pub struct InMemoryVectorIndex {
    entries: Arc<RwLock<Vec<IndexedChunk>>>,
    threshold: f32,
    allow_unfiltered: bool,
}

impl InMemoryVectorIndex {
    pub fn new(threshold: f32) -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
            threshold,
            allow_unfiltered: false,
        }
    }

    /// Permit `RetrievalMode::Diagnostic` queries to skip the threshold.
    pub fn with_unfiltered(mut self, allow: bool) -> Self {
        self.allow_unfiltered = allow;
        self
    }

    /// Add or replace (by `id` within the tenant) a piece of content.
    pub async fn insert(&self, chunk: RetrievedChunk, embedding: Vec<f32>) {
        let mut entries = self.entries.write().await;
        entries.retain(|e| !(e.chunk.tenant_id == chunk.tenant_id && e.chunk.id == chunk.id));
        entries.push(IndexedChunk { chunk, embedding });
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl VectorRetriever for InMemoryVectorIndex {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get_similar_content(
        &self,
        query: RetrievalQuery<'_>,
    ) -> Result<Vec<RetrievedChunk>, ProviderError> {
        let unfiltered = match query.mode {
            RetrievalMode::Filtered => false,
            RetrievalMode::Diagnostic if self.allow_unfiltered => true,
            RetrievalMode::Diagnostic => {
                warn!(
                    tenant_id = query.tenant_id,
                    "Diagnostic retrieval requested but not enabled, applying threshold"
                );
                false
            }
        };

        let entries = self.entries.read().await;
        let mut scored: Vec<RetrievedChunk> = entries
            .iter()
            .filter(|e| e.chunk.tenant_id == query.tenant_id)
            .filter(|e| e.readable_by(query.roles))
            .filter(|e| e.matches_attributes(query.attributes))
            .filter_map(|e| {
                let similarity = cosine_similarity(&e.embedding, query.embedding).clamp(0.0, 1.0);
                if unfiltered || similarity >= self.threshold {
                    let mut chunk = e.chunk.clone();
                    chunk.similarity = similarity;
                    Some(chunk)
                } else {
                    None
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(query.top_k);

        debug!(
            tenant_id = query.tenant_id,
            results = scored.len(),
            "Vector retrieval complete"
        );
        Ok(scored)
    }
}
