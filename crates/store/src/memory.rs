//! In-process backend with Redis-like semantics. Used in tests and for
//! running the bot without a Redis server (state is lost on restart).

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::IteratorRandom;
use tokio::time::Instant;

use crate::backend::KvBackend;
use crate::error::StoreError;

#[derive(Default)]
struct Inner {
    strings: HashMap<String, (String, Option<Instant>)>,
    sets: HashMap<String, HashSet<String>>,
}

/// In-memory key-value backend. Expiry is evaluated lazily on read using the
/// tokio clock, so paused-time tests can advance past a TTL.
#[derive(Default)]
pub struct MemoryBackend {
    inner: Mutex<Inner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend("memory backend lock poisoned".to_string()))
    }

    /// Number of live string keys (expired entries excluded).
    pub fn string_key_count(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .map(|inner| {
                inner
                    .strings
                    .values()
                    .filter(|(_, exp)| exp.map_or(true, |e| e > now))
                    .count()
            })
            .unwrap_or(0)
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut inner = self.lock()?;
        match inner.strings.get(key) {
            Some((_, Some(expires))) if *expires <= Instant::now() => {
                inner.strings.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let expires = ttl.map(|t| Instant::now() + t);
        self.lock()?
            .strings
            .insert(key.to_string(), (value.to_string(), expires));
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.strings.remove(key);
        inner.sets.remove(key);
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.lock()?
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if let Some(set) = inner.sets.get_mut(key) {
            set.remove(member);
            // Redis drops empty sets.
            if set.is_empty() {
                inner.sets.remove(key);
            }
        }
        Ok(())
    }

    async fn scard(&self, key: &str) -> Result<u64, StoreError> {
        Ok(self.lock()?.sets.get(key).map_or(0, |s| s.len() as u64))
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .lock()?
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        Ok(self
            .lock()?
            .sets
            .get(key)
            .is_some_and(|s| s.contains(member)))
    }

    async fn srandmember(&self, key: &str) -> Result<Option<String>, StoreError> {
        let inner = self.lock()?;
        let mut rng = rand::thread_rng();
        Ok(inner
            .sets
            .get(key)
            .and_then(|s| s.iter().choose(&mut rng).cloned()))
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let now = Instant::now();
        Ok(self
            .lock()?
            .strings
            .iter()
            .filter(|(key, (_, exp))| key.starts_with(prefix) && exp.map_or(true, |e| e > now))
            .map(|(key, _)| key.clone())
            .collect())
    }

    fn backend_name(&self) -> &str {
        "memory"
    }
}
