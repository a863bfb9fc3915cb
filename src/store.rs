//! Shared state collaborators
//!
//! The circuit breaker keeps per-path counters and the sticky-session selector
//! keeps hash-to-target assignments. Both live behind traits so deployments
//! can back them with a distributed cache; the in-memory implementations here
//! serve a single gateway process and the test suite.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::StoreError;

/// Counters for one routing path within a breaker scope
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathCounters {
    pub failure_count: u32,
    pub success_count: u32,
    /// Epoch milliseconds of the first failure in the current window
    pub first_failure_time: Option<u64>,
}

impl PathCounters {
    pub fn total(&self) -> u32 {
        self.failure_count.saturating_add(self.success_count)
    }
}

/// All counters for one breaker scope, keyed by routing path
pub type BreakerCounters = HashMap<String, PathCounters>;

/// Mutation applied to a scope's counters under `CounterStore::update`
pub type CounterMutation = Box<dyn FnOnce(&mut BreakerCounters) + Send>;

#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn get(&self, scope_key: &str) -> Result<BreakerCounters, StoreError>;

    async fn put(&self, scope_key: &str, counters: BreakerCounters) -> Result<(), StoreError>;

    /// Read-modify-write a scope's counters
    ///
    /// The default implementation is not atomic across processes. Backends
    /// with native atomic updates should override it.
    async fn update(&self, scope_key: &str, mutation: CounterMutation) -> Result<(), StoreError> {
        let mut counters = self.get(scope_key).await?;
        mutation(&mut counters);
        self.put(scope_key, counters).await
    }
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), StoreError>;
}

/// Process-local counter store
///
/// Updates hold the shard lock for the scope key, so concurrent recordings
/// in one process never lose increments.
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    scopes: DashMap<String, BreakerCounters>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn get(&self, scope_key: &str) -> Result<BreakerCounters, StoreError> {
        Ok(self
            .scopes
            .get(scope_key)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    async fn put(&self, scope_key: &str, counters: BreakerCounters) -> Result<(), StoreError> {
        self.scopes.insert(scope_key.to_string(), counters);
        Ok(())
    }

    async fn update(&self, scope_key: &str, mutation: CounterMutation) -> Result<(), StoreError> {
        let mut entry = self.scopes.entry(scope_key.to_string()).or_default();
        mutation(entry.value_mut());
        Ok(())
    }
}

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

/// Writes between sweeps of expired key-value entries
pub const SWEEP_EVERY_PUTS: usize = 128;

/// Process-local key-value store with TTL expiry
///
/// Expired entries are dropped when read, and every [`SWEEP_EVERY_PUTS`]th
/// write sweeps the whole map so keys that are never read again do not pile up.
#[derive(Debug, Default)]
pub struct InMemoryKeyValueStore {
    entries: DashMap<String, Entry>,
    puts: AtomicUsize,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every expired entry, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.expires_at.is_none_or(|deadline| deadline > now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::debug!(
                removed,
                remaining = self.entries.len(),
                "Swept expired key-value entries"
            );
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        match self.entries.get(key) {
            None => return Ok(None),
            Some(entry) if entry.expires_at.is_none_or(|deadline| deadline > now) => {
                return Ok(Some(entry.value.clone()));
            }
            Some(_) => {}
        }
        self.entries
            .remove_if(key, |_, entry| entry.expires_at.is_some_and(|d| d <= now));
        Ok(None)
    }

    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), StoreError> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .insert(key.to_string(), Entry { value, expires_at });
        if (self.puts.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_EVERY_PUTS == 0 {
            self.purge_expired();
        }
        Ok(())
    }
}
