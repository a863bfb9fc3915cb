//! Prometheus metrics collection for Switchboard
//!
//! Tracks final response classes, strategy resolutions, upstream attempts,
//! resilience events (fallback advances, skipped Retry-After waits, targets
//! skipped behind an open circuit), hook denials and shared-store failures.
//!
//! Metrics are exposed via the `/metrics` endpoint in Prometheus text format.
//! Every label is an enum so cardinality is fixed at compile time.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

use crate::hooks::HookEventType;

/// Status class of a final gateway response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    ClientError,
    ServerError,
    Other,
}

impl StatusClass {
    pub fn from_status(status: u16) -> Self {
        match status {
            200..=299 => Self::Success,
            400..=499 => Self::ClientError,
            500..=599 => Self::ServerError,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "2xx",
            Self::ClientError => "4xx",
            Self::ServerError => "5xx",
            Self::Other => "other",
        }
    }
}

/// Group strategy label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyLabel {
    Single,
    Fallback,
    LoadBalance,
    Conditional,
}

impl StrategyLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Fallback => "fallback",
            Self::LoadBalance => "loadbalance",
            Self::Conditional => "conditional",
        }
    }
}

/// Which shared store an operation failed against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Counter,
    KeyValue,
}

impl StoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::KeyValue => "key_value",
        }
    }
}

/// Kind of fire-and-forget work spawned by a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundTask {
    AsyncHooks,
    BreakerRecord,
}

impl BackgroundTask {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AsyncHooks => "async_hooks",
            Self::BreakerRecord => "breaker_record",
        }
    }
}

/// Metrics collector for Switchboard
#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<Registry>,
    responses_total: IntCounterVec,
    strategy_resolutions: IntCounterVec,
    upstream_attempts: IntCounter,
    fallback_advances: IntCounter,
    retry_after_skips: IntCounter,
    circuit_open_skips: IntCounter,
    hook_denials: IntCounterVec,
    store_failures: IntCounterVec,
    background_task_failures: IntCounterVec,
    routing_duration: Histogram,
}

impl Metrics {
    /// Create a new Metrics instance registered against a fresh registry
    ///
    /// # Errors
    ///
    /// Returns an error if metric registration fails (e.g., duplicate names).
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let responses_total = IntCounterVec::new(
            Opts::new(
                "switchboard_responses_total",
                "Final gateway responses by status class",
            ),
            &["status_class"],
        )?;

        // Counted once per group node visited, so nested trees count every level.
        let strategy_resolutions = IntCounterVec::new(
            Opts::new(
                "switchboard_strategy_resolutions_total",
                "Group nodes resolved by strategy mode",
            ),
            &["strategy"],
        )?;

        let upstream_attempts = IntCounter::with_opts(Opts::new(
            "switchboard_upstream_attempts_total",
            "Upstream provider calls made, including retries",
        ))?;

        let fallback_advances = IntCounter::with_opts(Opts::new(
            "switchboard_fallback_advances_total",
            "Times a fallback group moved on to its next target",
        ))?;

        let retry_after_skips = IntCounter::with_opts(Opts::new(
            "switchboard_retry_after_skips_total",
            "Retries abandoned because a Retry-After hint exceeded the wait budget",
        ))?;

        let circuit_open_skips = IntCounter::with_opts(Opts::new(
            "switchboard_circuit_open_skips_total",
            "Targets excluded from selection because their circuit was open",
        ))?;

        let hook_denials = IntCounterVec::new(
            Opts::new(
                "switchboard_hook_denials_total",
                "Requests denied by a failing synchronous hook, by event",
            ),
            &["event"],
        )?;

        // Store failures never fail a request; alert on sustained increase.
        let store_failures = IntCounterVec::new(
            Opts::new(
                "switchboard_store_failures_total",
                "Shared store operations that failed and were skipped",
            ),
            &["store"],
        )?;

        let background_task_failures = IntCounterVec::new(
            Opts::new(
                "switchboard_background_task_failures_total",
                "Background tasks that panicked before completing",
            ),
            &["task"],
        )?;

        let routing_duration = Histogram::with_opts(
            HistogramOpts::new(
                "switchboard_routing_duration_ms",
                "End-to-end routing latency in milliseconds",
            )
            .buckets(vec![
                1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0, 30000.0,
            ]),
        )?;

        registry.register(Box::new(responses_total.clone()))?;
        registry.register(Box::new(strategy_resolutions.clone()))?;
        registry.register(Box::new(upstream_attempts.clone()))?;
        registry.register(Box::new(fallback_advances.clone()))?;
        registry.register(Box::new(retry_after_skips.clone()))?;
        registry.register(Box::new(circuit_open_skips.clone()))?;
        registry.register(Box::new(hook_denials.clone()))?;
        registry.register(Box::new(store_failures.clone()))?;
        registry.register(Box::new(background_task_failures.clone()))?;
        registry.register(Box::new(routing_duration.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            responses_total,
            strategy_resolutions,
            upstream_attempts,
            fallback_advances,
            retry_after_skips,
            circuit_open_skips,
            hook_denials,
            store_failures,
            background_task_failures,
            routing_duration,
        })
    }

    pub fn record_response(&self, status: u16) -> Result<(), prometheus::Error> {
        self.responses_total
            .get_metric_with_label_values(&[StatusClass::from_status(status).as_str()])?
            .inc();
        Ok(())
    }

    pub fn record_strategy(&self, strategy: StrategyLabel) -> Result<(), prometheus::Error> {
        self.strategy_resolutions
            .get_metric_with_label_values(&[strategy.as_str()])?
            .inc();
        Ok(())
    }

    pub fn record_upstream_attempts(&self, attempts: u32) {
        self.upstream_attempts.inc_by(u64::from(attempts));
    }

    pub fn record_fallback_advance(&self) {
        self.fallback_advances.inc();
    }

    pub fn record_retry_after_skip(&self) {
        self.retry_after_skips.inc();
    }

    pub fn record_circuit_open_skips(&self, skipped: usize) {
        self.circuit_open_skips.inc_by(skipped as u64);
    }

    pub fn record_hook_denial(&self, event: HookEventType) -> Result<(), prometheus::Error> {
        self.hook_denials
            .get_metric_with_label_values(&[event.as_str()])?
            .inc();
        Ok(())
    }

    pub fn record_store_failure(&self, store: StoreKind) -> Result<(), prometheus::Error> {
        self.store_failures
            .get_metric_with_label_values(&[store.as_str()])?
            .inc();
        Ok(())
    }

    pub fn record_background_task_failure(
        &self,
        task: BackgroundTask,
    ) -> Result<(), prometheus::Error> {
        self.background_task_failures
            .get_metric_with_label_values(&[task.as_str()])?
            .inc();
        Ok(())
    }

    /// Record end-to-end routing latency
    ///
    /// # Errors
    ///
    /// Rejects NaN, infinite and negative durations, which would corrupt the
    /// histogram's percentiles.
    pub fn record_routing_duration(&self, duration_ms: f64) -> Result<(), prometheus::Error> {
        if !duration_ms.is_finite() || duration_ms < 0.0 {
            return Err(prometheus::Error::Msg(format!(
                "Histogram value must be finite and non-negative, got: {}",
                duration_ms
            )));
        }
        self.routing_duration.observe(duration_ms);
        Ok(())
    }

    /// Total background task failures across all task kinds
    pub fn background_task_failures_count(&self) -> u64 {
        [
            BackgroundTask::AsyncHooks,
            BackgroundTask::BreakerRecord,
        ]
        .iter()
        .filter_map(|task| {
            self.background_task_failures
                .get_metric_with_label_values(&[task.as_str()])
                .ok()
        })
        .map(|counter| counter.get())
        .sum()
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| {
            prometheus::Error::Msg(format!("Metrics output is not valid UTF-8: {}", e))
        })
    }
}

/// Log a metrics recording failure without failing the request
pub(crate) fn log_recording_failure(operation: &'static str, error: prometheus::Error) {
    tracing::warn!(
        operation,
        error = %error,
        "Failed to record metric (non-fatal, request continues)"
    );
}
