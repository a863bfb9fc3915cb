//! Sticky-session target assignment for load-balanced groups
//!
//! A request's identity is a hash over configured fields (request headers,
//! metadata and body params) salted with the config version. The chosen
//! target index is stored under that hash so repeat requests land on the same
//! target until the entry expires or the config changes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::metrics::{self, Metrics, StoreKind};
use crate::store::KeyValueStore;

/// Default lifetime of a sticky assignment
pub const DEFAULT_STICKY_TTL_SECONDS: u64 = 3_600;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StickySessionConfig {
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default, alias = "hashFields")]
    hash_fields: Vec<String>,
    /// Seconds; falls back to the server-wide default
    #[serde(default)]
    ttl: Option<u64>,
}

fn default_enabled() -> bool {
    true
}

impl StickySessionConfig {
    pub fn new(hash_fields: Vec<String>, ttl: Option<u64>) -> Self {
        Self {
            enabled: true,
            hash_fields,
            ttl,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn hash_fields(&self) -> &[String] {
        &self.hash_fields
    }

    pub fn ttl(&self) -> Option<u64> {
        self.ttl
    }
}

/// The request-side values a hash field can refer to
#[derive(Debug, Clone, Copy)]
pub struct HashContext<'a> {
    pub headers: &'a http::HeaderMap,
    pub metadata: &'a Map<String, Value>,
    pub params: &'a Value,
}

impl HashContext<'_> {
    /// Resolve `headers.x`, `metadata.x` or `params.a.b` to a value
    fn lookup(&self, field: &str) -> Option<Value> {
        let (source, rest) = field.split_once('.')?;
        match source {
            "headers" => self
                .headers
                .get(rest.to_ascii_lowercase())
                .and_then(|value| value.to_str().ok())
                .map(|value| Value::String(value.to_string())),
            "metadata" => self.metadata.get(rest).cloned(),
            "params" => lookup_path(self.params, rest).cloned(),
            _ => {
                tracing::debug!(field, "Ignoring sticky hash field with unknown source");
                None
            }
        }
    }
}

/// Walk a dotted path through nested objects and arrays
pub(crate) fn lookup_path<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Stable sha256 identity for a request under a config version
///
/// Object keys are sorted recursively so the hash does not depend on the
/// order fields arrived in.
pub fn identifier_hash(
    context: &HashContext<'_>,
    fields: &[String],
    config_version: &str,
) -> String {
    let collected: BTreeMap<&str, Value> = fields
        .iter()
        .map(|field| {
            let value = context.lookup(field).map(canonicalize).unwrap_or(Value::Null);
            (field.as_str(), value)
        })
        .collect();

    let mut hasher = Sha256::new();
    hasher.update(config_version.as_bytes());
    hasher.update(b"\n");
    // BTreeMap keys plus canonicalized values serialize deterministically.
    match serde_json::to_vec(&collected) {
        Ok(bytes) => hasher.update(&bytes),
        Err(e) => tracing::warn!(error = %e, "Failed to serialize sticky hash fields"),
    }
    hex::encode(hasher.finalize())
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .into_iter()
                .map(|(key, value)| (key, canonicalize(value)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

fn store_key(config_version: &str, hash: &str) -> String {
    format!("sticky:{}:{}", config_version, hash)
}

/// Result of a sticky lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StickyLookup {
    pub target_index: Option<usize>,
    pub identifier_hash: String,
}

pub struct StickySessionSelector {
    store: Arc<dyn KeyValueStore>,
    default_ttl: Duration,
    metrics: Arc<Metrics>,
}

impl StickySessionSelector {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        default_ttl: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            default_ttl,
            metrics,
        }
    }

    /// Find the stored target for this request, if any
    ///
    /// Store errors and unparseable entries are treated as "no assignment".
    pub async fn get_target_index(
        &self,
        context: &HashContext<'_>,
        config: &StickySessionConfig,
        config_version: &str,
    ) -> StickyLookup {
        let hash = identifier_hash(context, config.hash_fields(), config_version);
        let key = store_key(config_version, &hash);

        let target_index = match self.store.get(&key).await {
            Ok(Some(raw)) => match raw.parse::<usize>() {
                Ok(index) => Some(index),
                Err(e) => {
                    tracing::warn!(key = %key, value = %raw, error = %e, "Ignoring corrupt sticky entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Sticky session lookup failed");
                self.store_failed();
                None
            }
        };

        StickyLookup {
            target_index,
            identifier_hash: hash,
        }
    }

    /// Persist a target choice under an identifier hash
    pub async fn set_target_index_by_hash(
        &self,
        config_version: &str,
        identifier_hash: &str,
        target_index: usize,
        ttl_seconds: Option<u64>,
    ) {
        let key = store_key(config_version, identifier_hash);
        let ttl = ttl_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.default_ttl);
        if let Err(e) = self
            .store
            .put(&key, target_index.to_string(), Some(ttl))
            .await
        {
            tracing::warn!(key = %key, error = %e, "Failed to persist sticky session");
            self.store_failed();
        }
    }

    fn store_failed(&self) {
        if let Err(e) = self.metrics.record_store_failure(StoreKind::KeyValue) {
            metrics::log_recording_failure("record_store_failure", e);
        }
    }
}
