//! VectorRetriever trait: tenant-scoped similarity search.
//!
//! The retriever owns RBAC and threshold filtering. Callers treat whatever
//! comes back as already policy-filtered and ranked.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ProviderError;

/// One ranked piece of tenant content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievedChunk {
    pub id: String,
    pub tenant_id: String,
    pub content_id: String,
    /// e.g. "course", "exercise", "document"
    pub content_type: String,
    pub text: String,
    /// Similarity in [0, 1]
    pub similarity: f32,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Whether threshold filtering applies.
///
/// `Diagnostic` returns candidates regardless of similarity and is only
/// honoured by retrievers explicitly built to allow it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    #[default]
    Filtered,
    Diagnostic,
}

/// Parameters of a similarity search.
#[derive(Debug, Clone)]
pub struct RetrievalQuery<'a> {
    pub tenant_id: &'a str,
    pub embedding: &'a [f32],
    pub top_k: usize,
    pub roles: &'a [String],
    pub attributes: &'a HashMap<String, String>,
    pub mode: RetrievalMode,
}

/// The retriever contract.
///
/// Implementations must return at most `top_k` chunks belonging to
/// `tenant_id`, ordered by non-increasing similarity, each at or above the
/// configured threshold (unless the query is in `Diagnostic` mode and the
/// retriever permits it).
#[async_trait]
pub trait VectorRetriever: Send + Sync {
    fn name(&self) -> &str;

    async fn get_similar_content(
        &self,
        query: RetrievalQuery<'_>,
    ) -> std::result::Result<Vec<RetrievedChunk>, ProviderError>;
}

/// Check the ordering/threshold invariant on a result list.
pub fn is_ranked(chunks: &[RetrievedChunk], threshold: f32) -> bool {
    chunks.windows(2).all(|w| w[0].similarity >= w[1].similarity)
        && chunks.iter().all(|c| c.similarity >= threshold)
}
