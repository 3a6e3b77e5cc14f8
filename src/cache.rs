//! Decision cache.
//!
//! One key-naming scheme for both cache shapes, one invalidation entry
//! point. Keys put the user id before the tenant id so a single prefix
//! delete clears every entry for a user across tenants. The snapshot
//! version is part of the key, so a reference-data reload can never serve
//! patterns computed against an older graph.
//!
//! Cache trouble is never allowed to change an answer: errors and timeouts
//! degrade to a miss (recompute from the source of truth) with a logged
//! warning. The cache can make the engine slower, not wrong.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::errors::{AccessError, AccessResult};

const KEY_ROOT: &str = "perm";

/// Key-value cache abstraction: get / set-with-TTL / delete / delete-prefix.
/// `MemoryCacheStore` is in-process; a Redis-backed implementation satisfies
/// the same contract in deployments that share cache across instances.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> AccessResult<Option<String>>;
    async fn set(&self, key: &str, value: String, ttl: Duration) -> AccessResult<()>;
    async fn delete(&self, key: &str) -> AccessResult<()>;
    async fn delete_prefix(&self, prefix: &str) -> AccessResult<u64>;
}

// =============================================================================
// KEY SCHEME
// =============================================================================

fn tenant_segment(tenant_id: Option<Uuid>) -> String {
    tenant_id.map(|t| t.to_string()).unwrap_or_else(|| "global".to_string())
}

/// Key for the full resolved set of a `(user, tenant)` pair.
pub fn set_key(user_id: Uuid, tenant_id: Option<Uuid>, snapshot_version: u64) -> String {
    format!(
        "{}:set:{}:{}:v{}",
        KEY_ROOT,
        user_id,
        tenant_segment(tenant_id),
        snapshot_version
    )
}

/// Key for a single point decision.
pub fn decision_key(
    user_id: Uuid,
    tenant_id: Option<Uuid>,
    permission: &str,
    resource_scope: Option<&str>,
    snapshot_version: u64,
) -> String {
    format!(
        "{}:dec:{}:{}:v{}:{}:{}",
        KEY_ROOT,
        user_id,
        tenant_segment(tenant_id),
        snapshot_version,
        permission,
        resource_scope.unwrap_or("-")
    )
}

fn user_prefixes(user_id: Uuid, tenant_id: Option<Uuid>) -> [String; 2] {
    match tenant_id {
        Some(tenant) => [
            format!("{}:set:{}:{}:", KEY_ROOT, user_id, tenant),
            format!("{}:dec:{}:{}:", KEY_ROOT, user_id, tenant),
        ],
        None => [
            format!("{}:set:{}:", KEY_ROOT, user_id),
            format!("{}:dec:{}:", KEY_ROOT, user_id),
        ],
    }
}

// =============================================================================
// DECISION CACHE
// =============================================================================

/// Timeout-bound, fail-open wrapper the resolver talks to.
pub struct DecisionCache {
    store: std::sync::Arc<dyn CacheStore>,
    pub set_ttl: Duration,
    pub decision_ttl: Duration,
    op_timeout: Duration,
}

impl DecisionCache {
    pub fn new(
        store: std::sync::Arc<dyn CacheStore>,
        set_ttl: Duration,
        decision_ttl: Duration,
        op_timeout: Duration,
    ) -> Self {
        Self {
            store,
            set_ttl,
            decision_ttl,
            op_timeout,
        }
    }

    /// Read and deserialize; any failure (store error, timeout, corrupt
    /// payload) is a miss.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match tokio::time::timeout(self.op_timeout, self.store.get(key)).await {
            Ok(Ok(value)) => value?,
            Ok(Err(e)) => {
                tracing::warn!(key = %key, error = %e, "cache read failed, recomputing from source");
                return None;
            }
            Err(_) => {
                tracing::warn!(key = %key, "cache read timed out, recomputing from source");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "corrupt cache entry, recomputing from source");
                None
            }
        }
    }

    /// Serialize and write; failures are logged and dropped.
    pub async fn put_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "failed to serialize cache entry");
                return;
            }
        };
        match tokio::time::timeout(self.op_timeout, self.store.set(key, raw, ttl)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(key = %key, error = %e, "cache write failed"),
            Err(_) => tracing::warn!(key = %key, "cache write timed out"),
        }
    }

    /// Drop every entry for a user, optionally narrowed to one tenant.
    pub async fn invalidate_user(&self, user_id: Uuid, tenant_id: Option<Uuid>) {
        for prefix in user_prefixes(user_id, tenant_id) {
            match tokio::time::timeout(self.op_timeout, self.store.delete_prefix(&prefix)).await {
                Ok(Ok(removed)) => {
                    tracing::debug!(prefix = %prefix, removed, "cache entries invalidated");
                }
                Ok(Err(e)) => {
                    tracing::error!(prefix = %prefix, error = %e, "cache invalidation failed");
                }
                Err(_) => {
                    tracing::error!(prefix = %prefix, "cache invalidation timed out");
                }
            }
        }
    }
}

// =============================================================================
// IN-MEMORY STORE
// =============================================================================

struct MemoryEntry {
    value: String,
    expires_at: DateTime<Utc>,
}

impl MemoryEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// In-process cache store on a concurrent map. Expired entries are evicted
/// when touched.
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: DashMap<String, MemoryEntry>,
    unavailable: std::sync::atomic::AtomicBool,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a cache-store outage; every operation fails until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable
            .store(unavailable, std::sync::atomic::Ordering::SeqCst);
    }

    fn check_available(&self) -> AccessResult<()> {
        if self.unavailable.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(AccessError::cache("cache store unavailable"));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> AccessResult<Option<String>> {
        self.check_available()?;
        let now = Utc::now();
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                return Ok(Some(entry.value.clone()));
            }
        }
        // Evict lazily so expired values do not linger.
        self.entries
            .remove_if(key, |_, entry| entry.is_expired(now));
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> AccessResult<()> {
        self.check_available()?;
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl)
                .map_err(|e| AccessError::cache(format!("ttl out of range: {}", e)))?;
        self.entries
            .insert(key.to_string(), MemoryEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> AccessResult<()> {
        self.check_available()?;
        self.entries.remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> AccessResult<u64> {
        self.check_available()?;
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        Ok((before - self.entries.len()) as u64)
    }
}
