//! Per-path circuit breaker over a shared counter store
//!
//! Paths are routing-tree positions (`config.targets[0].targets[1]`). A leaf is
//! tracked when it or an ancestor carries a `cb_config`; conditional groups
//! cut the inheritance chain. Counters live in a [`CounterStore`] keyed by
//! `{organisation}:{workspace}:{config slug}` so every gateway instance serving
//! the same saved config shares one view.
//!
//! A path opens when either threshold is crossed and closes again once the
//! cooldown since its first failure has elapsed, at which point its counters
//! are wiped. Store failures fail open: the breaker then reports every path
//! closed rather than blocking traffic.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::StoreError;
use crate::metrics::{self, Metrics, StoreKind};
use crate::routing::{RoutingNode, child_path, ROOT_PATH};
use crate::store::{CounterStore, PathCounters};

/// Cooldowns shorter than this are raised to it
pub const MIN_COOLDOWN_MS: u64 = 30_000;
/// Requests required before the percentage threshold applies
pub const DEFAULT_MINIMUM_REQUESTS: u32 = 5;

/// Breaker settings as written in a routing document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default, alias = "failureThreshold")]
    pub failure_threshold: Option<u32>,
    #[serde(default, alias = "failureThresholdPercentage")]
    pub failure_threshold_percentage: Option<f64>,
    #[serde(default, alias = "cooldownInterval")]
    pub cooldown_interval: Option<u64>,
    #[serde(default, alias = "minimumRequests")]
    pub minimum_requests: Option<u32>,
    #[serde(default, alias = "failureStatusCodes")]
    pub failure_status_codes: Option<Vec<u16>>,
}

/// Breaker settings with defaults applied
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedBreakerConfig {
    failure_threshold: Option<u32>,
    failure_threshold_percentage: Option<f64>,
    cooldown_ms: u64,
    minimum_requests: u32,
    failure_status_codes: Option<Vec<u16>>,
}

impl ResolvedBreakerConfig {
    /// `None` when the config sets neither threshold and so can never open
    pub fn from_config(config: &CircuitBreakerConfig) -> Option<Self> {
        if config.failure_threshold.is_none() && config.failure_threshold_percentage.is_none() {
            return None;
        }
        Some(Self {
            failure_threshold: config.failure_threshold,
            failure_threshold_percentage: config.failure_threshold_percentage,
            cooldown_ms: config
                .cooldown_interval
                .unwrap_or(MIN_COOLDOWN_MS)
                .max(MIN_COOLDOWN_MS),
            minimum_requests: config.minimum_requests.unwrap_or(DEFAULT_MINIMUM_REQUESTS),
            failure_status_codes: config.failure_status_codes.clone(),
        })
    }

    pub fn cooldown_ms(&self) -> u64 {
        self.cooldown_ms
    }

    /// Whether a final response status counts against the path
    pub fn is_failure(&self, status: u16) -> bool {
        match &self.failure_status_codes {
            Some(codes) => codes.contains(&status),
            None => status >= 500,
        }
    }

    fn threshold_crossed(&self, counters: &PathCounters) -> bool {
        let by_count = self
            .failure_threshold
            .is_some_and(|threshold| counters.failure_count >= threshold);
        let total = counters.total();
        let by_percentage = self.failure_threshold_percentage.is_some_and(|percentage| {
            total > 0
                && total >= self.minimum_requests
                && f64::from(counters.failure_count) / f64::from(total) * 100.0 >= percentage
        });
        by_count || by_percentage
    }
}

/// Breaker view of one tracked path
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitBreakerStatus {
    pub path: String,
    pub config: ResolvedBreakerConfig,
    pub failure_count: u32,
    pub success_count: u32,
    pub first_failure_time: Option<u64>,
    pub is_open: bool,
}

impl CircuitBreakerStatus {
    fn closed(path: String, config: ResolvedBreakerConfig) -> Self {
        Self {
            path,
            config,
            failure_count: 0,
            success_count: 0,
            first_failure_time: None,
            is_open: false,
        }
    }
}

/// Tracked paths keyed by routing path
pub type PathStatusMap = BTreeMap<String, CircuitBreakerStatus>;

/// Identity of the shared counters for one saved config
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CircuitBreakerScope {
    pub organisation_id: String,
    pub workspace_id: String,
    pub config_slug: String,
}

impl CircuitBreakerScope {
    pub fn new(
        organisation_id: impl Into<String>,
        workspace_id: impl Into<String>,
        config_slug: impl Into<String>,
    ) -> Self {
        Self {
            organisation_id: organisation_id.into(),
            workspace_id: workspace_id.into(),
            config_slug: config_slug.into(),
        }
    }

    pub fn store_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.organisation_id, self.workspace_id, self.config_slug
        )
    }
}

pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(elapsed) => elapsed.as_millis() as u64,
            Err(e) => {
                tracing::error!(error = %e, "System clock is before the Unix epoch");
                0
            }
        }
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
        }
    }

    pub fn advance(&self, millis: u64) {
        self.now_ms.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Collect every tracked leaf path with its inherited breaker config
pub fn extract_paths(root: &RoutingNode) -> PathStatusMap {
    let mut paths = PathStatusMap::new();
    collect_paths(root, ROOT_PATH.to_string(), None, &mut paths);
    paths
}

fn collect_paths(
    node: &RoutingNode,
    path: String,
    inherited: Option<&CircuitBreakerConfig>,
    paths: &mut PathStatusMap,
) {
    let current = node.settings().cb_config().or(inherited);

    if node.targets().is_empty() {
        if let Some(config) = current.and_then(ResolvedBreakerConfig::from_config) {
            paths.insert(path.clone(), CircuitBreakerStatus::closed(path, config));
        }
        return;
    }

    // Conditional branches are chosen by request content, not health, so
    // their children only get a breaker they declare themselves.
    let passed_down = if node.is_conditional() { None } else { current };
    for (index, child) in node.targets().iter().enumerate() {
        collect_paths(child, child_path(&path, index), passed_down, paths);
    }
}

/// Annotate the tree with open/closed state from a status map
///
/// Leaves take their own status; a group is open only when every child is
/// open. Nodes with no tracked descendants stay unannotated.
pub fn apply_status(root: &mut RoutingNode, statuses: &PathStatusMap) {
    mark_node(root, ROOT_PATH, statuses);
}

fn mark_node(node: &mut RoutingNode, path: &str, statuses: &PathStatusMap) -> bool {
    if node.targets().is_empty() {
        let open = statuses.get(path).map(|status| status.is_open);
        node.set_circuit_open(open);
        return open.unwrap_or(false);
    }

    let mut all_open = true;
    let mut any_tracked = false;
    for (index, child) in node.targets_mut().iter_mut().enumerate() {
        let child_open = mark_node(child, &child_path(path, index), statuses);
        all_open &= child_open;
        any_tracked |= child.circuit_open().is_some();
    }
    node.set_circuit_open(any_tracked.then_some(all_open));
    any_tracked && all_open
}

pub struct CircuitBreaker {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
}

impl CircuitBreaker {
    pub fn new(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            clock,
            metrics,
        }
    }

    /// Fill the map with stored counters and compute open state
    ///
    /// Paths whose cooldown has elapsed are reported closed and their
    /// counters are removed from the store.
    pub async fn check_status(
        &self,
        scope: &CircuitBreakerScope,
        mut statuses: PathStatusMap,
    ) -> PathStatusMap {
        let key = scope.store_key();
        let counters = match self.store.get(&key).await {
            Ok(counters) => counters,
            Err(e) => {
                self.store_failed(&key, &e);
                return statuses;
            }
        };

        let now = self.clock.now_ms();
        let mut expired = Vec::new();
        for (path, status) in statuses.iter_mut() {
            let Some(stored) = counters.get(path) else {
                continue;
            };
            let cooled_down = stored
                .first_failure_time
                .is_some_and(|first| now.saturating_sub(first) > status.config.cooldown_ms());
            if cooled_down {
                expired.push(path.clone());
                continue;
            }
            status.failure_count = stored.failure_count;
            status.success_count = stored.success_count;
            status.first_failure_time = stored.first_failure_time;
            status.is_open = status.config.threshold_crossed(stored);
            if status.is_open {
                tracing::debug!(
                    path = %path,
                    failures = stored.failure_count,
                    successes = stored.success_count,
                    "Circuit open"
                );
            }
        }

        if !expired.is_empty() {
            tracing::info!(scope = %key, paths = ?expired, "Circuit cooldown elapsed, resetting counters");
            let reset = expired.clone();
            let result = self
                .store
                .update(
                    &key,
                    Box::new(move |counters| {
                        for path in &reset {
                            counters.remove(path);
                        }
                    }),
                )
                .await;
            if let Err(e) = result {
                self.store_failed(&key, &e);
            }
        }

        statuses
    }

    pub async fn record_failure(
        &self,
        scope: &CircuitBreakerScope,
        path: &str,
        status: u16,
    ) -> Result<(), StoreError> {
        let now = self.clock.now_ms();
        let path = path.to_string();
        tracing::debug!(path = %path, status, "Recording circuit failure");
        self.store
            .update(
                &scope.store_key(),
                Box::new(move |counters| {
                    let entry = counters.entry(path).or_default();
                    entry.failure_count = entry.failure_count.saturating_add(1);
                    entry.first_failure_time.get_or_insert(now);
                }),
            )
            .await
    }

    pub async fn record_success(
        &self,
        scope: &CircuitBreakerScope,
        path: &str,
    ) -> Result<(), StoreError> {
        let path = path.to_string();
        self.store
            .update(
                &scope.store_key(),
                Box::new(move |counters| {
                    let entry = counters.entry(path).or_default();
                    entry.success_count = entry.success_count.saturating_add(1);
                }),
            )
            .await
    }

    /// Classify a final response for a tracked path and record it
    pub async fn record_outcome(
        &self,
        scope: &CircuitBreakerScope,
        status: &CircuitBreakerStatus,
        response_status: u16,
    ) {
        let result = if status.config.is_failure(response_status) {
            self.record_failure(scope, &status.path, response_status).await
        } else {
            self.record_success(scope, &status.path).await
        };
        if let Err(e) = result {
            self.store_failed(&scope.store_key(), &e);
        }
    }

    fn store_failed(&self, key: &str, error: &StoreError) {
        tracing::warn!(
            scope = %key,
            error = %error,
            "Circuit breaker store unavailable, treating circuits as closed"
        );
        if let Err(e) = self.metrics.record_store_failure(StoreKind::Counter) {
            metrics::log_recording_failure("record_store_failure", e);
        }
    }
}
