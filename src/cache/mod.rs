//! 响应缓存存储：按操作身份与变量指纹索引的有界 TTL 存储。
//!
//! # Response Cache Store
//!
//! The bounded, TTL-expiring store underneath the cache policy. Entries are
//! keyed by `(operation id, canonical variables fingerprint)`; capacity is
//! enforced with least-recently-used eviction and expiry is checked lazily on
//! read. The store is a reusable component: the cache policy owns one by
//! default, but several policies may share a store by reference.
//!
//! Time is measured with `tokio::time::Instant`, so TTL behavior is fully
//! deterministic under a paused test clock.

use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::types::Response;
use crate::{Error, Result};

/// Identity of one cache entry.
///
/// The fingerprint hashes the operation id together with the canonical
/// serialization of its variables. `serde_json` maps serialize with sorted
/// keys, so equal variables always fingerprint identically regardless of
/// insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    fingerprint: String,
}

impl CacheKey {
    pub fn new(operation_id: &str, variables: &Value) -> Result<Self> {
        let canonical =
            serde_json::to_string(variables).map_err(|e| Error::Json(e.to_string()))?;
        let mut hasher = Sha256::new();
        hasher.update(operation_id.as_bytes());
        hasher.update(b"\n");
        hasher.update(canonical.as_bytes());
        let fingerprint: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        Ok(Self { fingerprint })
    }

    pub fn as_str(&self) -> &str {
        &self.fingerprint
    }
}

struct Entry {
    response: Response,
    stored_at: Instant,
}

/// Bounded key→response store with TTL expiry.
pub struct ResponseCache {
    entries: Mutex<LruCache<CacheKey, Entry>>,
    ttl: Duration,
}

impl ResponseCache {
    /// `max_entries` is clamped to at least one slot.
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Look up an entry, treating anything older than the TTL as a miss (the
    /// expired entry is dropped). With `refresh_ttl` a hit restarts the
    /// entry's TTL clock. Hits return an independent copy.
    pub async fn get(&self, key: &CacheKey, refresh_ttl: bool) -> Option<Response> {
        let mut entries = self.entries.lock().await;
        let expired = match entries.get(key) {
            Some(entry) => entry.stored_at.elapsed() > self.ttl,
            None => return None,
        };
        if expired {
            entries.pop(key);
            debug!(key = key.as_str(), "cache entry expired");
            return None;
        }
        let entry = entries.get_mut(key)?;
        if refresh_ttl {
            entry.stored_at = Instant::now();
        }
        Some(entry.response.clone())
    }

    /// Insert a response snapshot, evicting the least-recently-used entry
    /// when the store is full.
    pub async fn put(&self, key: CacheKey, response: Response) {
        let mut entries = self.entries.lock().await;
        entries.push(
            key,
            Entry {
                response,
                stored_at: Instant::now(),
            },
        );
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
