//! Key-value backend trait.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

/// The subset of Redis semantics the record store relies on: string values
/// with optional expiry, unordered string sets and a prefix scan over keys.
///
/// Each call is atomic on its own; nothing spans keys.
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Set a string value. `ttl = None` keeps it until deleted.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    async fn del(&self, key: &str) -> Result<(), StoreError>;

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError>;

    async fn srem(&self, key: &str, member: &str) -> Result<(), StoreError>;

    async fn scard(&self, key: &str) -> Result<u64, StoreError>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError>;

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// A uniformly random member, or `None` for an empty or missing set.
    async fn srandmember(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Every live string key starting with `prefix`, in no particular order.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Backend name for logs (e.g., "memory", "redis").
    fn backend_name(&self) -> &str;
}

/// Blanket implementation so `Arc<dyn KvBackend>` can be used directly.
#[async_trait]
impl<T: KvBackend + ?Sized> KvBackend for Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        (**self).set(key, value, ttl).await
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        (**self).del(key).await
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError> {
        (**self).sadd(key, member).await
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        (**self).srem(key, member).await
    }

    async fn scard(&self, key: &str) -> Result<u64, StoreError> {
        (**self).scard(key).await
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        (**self).smembers(key).await
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        (**self).sismember(key, member).await
    }

    async fn srandmember(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).srandmember(key).await
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        (**self).scan_prefix(prefix).await
    }

    fn backend_name(&self) -> &str {
        (**self).backend_name()
    }
}
