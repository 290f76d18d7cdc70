//! No-op cache backend: disables response caching entirely.

use async_trait::async_trait;
use educore_core::cache::CacheStore;
use educore_core::error::CacheError;
use std::time::Duration;

/// A cache that stores nothing. Every lookup misses.
pub struct NoopCache;

#[async_trait]
impl CacheStore for NoopCache {
    fn name(&self) -> &str {
        "none"
    }

    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), CacheError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn always_misses() {
        let cache = NoopCache;
        cache.set("k", "v", Duration::from_secs(60)).await.unwrap();
        assert!(cache.get("k").await.unwrap().is_none());
    }
}
