//! CacheStore trait: TTL key/value storage for serialized responses.
//!
//! Entries are never invalidated explicitly; they only expire.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::CacheError;

/// The core CacheStore trait.
///
/// Implementations: in-memory, PostgreSQL, none (no-op).
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// The backend name (e.g., "memory", "postgres", "none").
    fn name(&self) -> &str;

    /// Fetch a live value. Expired entries read as `None`.
    async fn get(&self, key: &str) -> std::result::Result<Option<String>, CacheError>;

    /// Store a value that expires after `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Duration)
    -> std::result::Result<(), CacheError>;
}
