//! Query request/response types and the pure helpers around them.
//!
//! Everything here is deterministic: query normalisation and cache-key
//! derivation must give identical output for identical input so that
//! cached answers are found again.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::retrieval::RetrievedChunk;

/// Default number of chunks retrieved per query.
pub const DEFAULT_TOP_K: usize = 5;

/// Default cache key namespace.
pub const DEFAULT_CACHE_PREFIX: &str = "qp";

/// A natural-language query scoped to a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    /// Isolation boundary for caching and retrieval
    pub tenant_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Raw query text as typed by the user
    pub query_text: String,

    /// RBAC hints forwarded untouched to the retriever
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,

    /// Attribute hints forwarded untouched to the retriever
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, String>,

    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_true")]
    pub use_cache: bool,

    /// Caller annotations copied into the response metadata.
    ///
    /// Never embedded and never part of the cache key.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_true() -> bool {
    true
}

impl QueryRequest {
    /// A request with default options (`top_k = 5`, cache enabled).
    pub fn new(tenant_id: impl Into<String>, query_text: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            user_id: None,
            session_id: None,
            query_text: query_text.into(),
            roles: Vec::new(),
            attributes: HashMap::new(),
            top_k: DEFAULT_TOP_K,
            use_cache: true,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.roles = roles;
        self
    }

    pub fn with_attributes(mut self, attributes: HashMap<String, String>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Map<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Response metadata attached to every answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryMetadata {
    pub tenant_id: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    /// True only when served from the response cache
    pub cached: bool,
    pub top_k: usize,
    pub sources_count: usize,
    /// Caller annotations (e.g. personalization context)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The answer to a query together with the chunks it was grounded in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<RetrievedChunk>,
    pub metadata: QueryMetadata,
}

/// Trim and collapse internal whitespace runs to a single space.
///
/// Idempotent: normalising an already-normalised query is a no-op.
pub fn normalize_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Canonical payload hashed into a cache key. Field order is fixed.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CacheKeyMaterial<'a> {
    tenant_id: &'a str,
    query: &'a str,
    user_id: Option<&'a str>,
    session_id: Option<&'a str>,
}

/// Derive the response-cache key for a normalised query.
///
/// Format: `{prefix}:{tenant_id}:{sha256 hex}`. The tenant appears in clear so
/// keys from different tenants can never collide.
pub fn cache_key(
    prefix: &str,
    tenant_id: &str,
    normalized_query: &str,
    user_id: Option<&str>,
    session_id: Option<&str>,
) -> String {
    let material = CacheKeyMaterial {
        tenant_id,
        query: normalized_query,
        user_id,
        session_id,
    };
    // Serialising a struct of strings cannot fail.
    let canonical = serde_json::to_vec(&material).unwrap_or_default();
    let digest = Sha256::digest(&canonical);
    format!("{prefix}:{tenant_id}:{}", hex::encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_whitespace() {
        assert_eq!(normalize_query("  Hello   World  "), "Hello World");
        assert_eq!(normalize_query("a\t\nb"), "a b");
        assert_eq!(normalize_query("   "), "");
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = normalize_query("  Explain   microservices?\n");
        assert_eq!(normalize_query(&once), once);
    }

    #[test]
    fn cache_key_is_deterministic() {
        let a = cache_key("qp", "t1", "hello", Some("u1"), None);
        let b = cache_key("qp", "t1", "hello", Some("u1"), None);
        assert_eq!(a, b);
        assert!(a.starts_with("qp:t1:"));
        assert_eq!(a.len(), "qp:t1:".len() + 64);
    }

    #[test]
    fn cache_key_varies_with_every_input() {
        let base = cache_key("qp", "t1", "hello", Some("u1"), Some("s1"));
        assert_ne!(base, cache_key("qp", "t2", "hello", Some("u1"), Some("s1")));
        assert_ne!(base, cache_key("qp", "t1", "hello!", Some("u1"), Some("s1")));
        assert_ne!(base, cache_key("qp", "t1", "hello", Some("u2"), Some("s1")));
        assert_ne!(base, cache_key("qp", "t1", "hello", Some("u1"), None));
        assert_ne!(base, cache_key("other", "t1", "hello", Some("u1"), Some("s1")));
    }

    #[test]
    fn request_defaults_from_json() {
        let req: QueryRequest =
            serde_json::from_str(r#"{"tenantId":"t1","queryText":"hi"}"#).unwrap();
        assert_eq!(req.top_k, DEFAULT_TOP_K);
        assert!(req.use_cache);
        assert!(req.roles.is_empty());
    }

    #[test]
    fn metadata_flattens_extra_fields() {
        let mut extra = serde_json::Map::new();
        extra.insert("skillGaps".into(), serde_json::json!(["sql"]));
        let meta = QueryMetadata {
            tenant_id: "t1".into(),
            user_id: None,
            session_id: None,
            cached: false,
            top_k: 5,
            sources_count: 0,
            extra,
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["skillGaps"][0], "sql");
        assert_eq!(json["sourcesCount"], 0);

        let back: QueryMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(back, meta);
    }
}
