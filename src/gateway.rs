//! Top-level routing entry point
//!
//! [`Gateway`] owns the collaborators (upstream caller, body transformer,
//! stores, check executor) and runs one routing document per request:
//! circuit status lookup, recursive resolution, final response headers and
//! metrics.

use serde_json::Value;
use std::borrow::Cow;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{AppError, AppResult};
use crate::hooks::{BuiltinChecks, CheckExecutor, HooksManager};
use crate::metrics::{self, Metrics};
use crate::request::GatewayRequest;
use crate::resilience::circuit_breaker::{
    CircuitBreaker, Clock, PathStatusMap, SystemClock, apply_status, extract_paths,
};
use crate::resilience::retry::{RetryEngine, RetrySettings};
use crate::response::{GatewayResponse, TRACE_ID_HEADER};
use crate::routing::{InheritedConfig, Resolver, RoutingNode};
use crate::sticky::{DEFAULT_STICKY_TTL_SECONDS, StickySessionSelector};
use crate::store::{CounterStore, InMemoryCounterStore, InMemoryKeyValueStore, KeyValueStore};
use crate::tasks::BackgroundTasks;
use crate::upstream::{BodyTransformer, PassthroughTransformer, ReqwestCaller, UpstreamCaller};

#[derive(Clone)]
pub struct Gateway {
    resolver: Arc<Resolver>,
    default_input_guardrails: Arc<Vec<Value>>,
    default_output_guardrails: Arc<Vec<Value>>,
}

impl Gateway {
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::default()
    }

    /// Route `request` through `root` and return the final response
    ///
    /// Never fails: routing errors become a 400 and internal faults a
    /// gateway-exception 500.
    pub async fn route(&self, root: &RoutingNode, request: &GatewayRequest) -> GatewayResponse {
        let started = Instant::now();

        let (tree, statuses) = self.with_circuit_status(root, request).await;
        let inherited = InheritedConfig::root(
            self.default_input_guardrails.as_ref().clone(),
            self.default_output_guardrails.as_ref().clone(),
        );

        let mut response = match self
            .resolver
            .resolve(&tree, request, inherited, &statuses)
            .await
        {
            Ok(response) => response,
            Err(e) => GatewayResponse::json(
                400,
                &serde_json::json!({
                    "status": "failure",
                    "message": e.to_string(),
                }),
            ),
        };
        response.set_header(TRACE_ID_HEADER, &request.request_id);

        let metrics = &self.resolver.metrics;
        if let Err(e) = metrics.record_response(response.status()) {
            metrics::log_recording_failure("record_response", e);
        }
        if let Err(e) = metrics.record_routing_duration(started.elapsed().as_secs_f64() * 1000.0) {
            metrics::log_recording_failure("record_routing_duration", e);
        }

        response
    }

    /// Annotate the tree with open circuits when the request has a breaker scope
    async fn with_circuit_status<'a>(
        &self,
        root: &'a RoutingNode,
        request: &GatewayRequest,
    ) -> (Cow<'a, RoutingNode>, PathStatusMap) {
        let Some(scope) = request.breaker_scope.as_ref() else {
            return (Cow::Borrowed(root), PathStatusMap::new());
        };
        let statuses = extract_paths(root);
        if statuses.is_empty() {
            return (Cow::Borrowed(root), statuses);
        }

        let statuses = self.resolver.breaker.check_status(scope, statuses).await;
        let mut tree = root.clone();
        apply_status(&mut tree, &statuses);
        (Cow::Owned(tree), statuses)
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.resolver.metrics
    }

    pub fn tasks(&self) -> &BackgroundTasks {
        &self.resolver.tasks
    }

    pub fn hooks(&self) -> &Arc<HooksManager> {
        &self.resolver.hooks
    }
}

/// Collaborators default to the in-memory stores, the built-in checks, the
/// `reqwest` caller and the pass-through transformer.
pub struct GatewayBuilder {
    upstream: Option<Arc<dyn UpstreamCaller>>,
    transformer: Arc<dyn BodyTransformer>,
    checks: Arc<dyn CheckExecutor>,
    counter_store: Arc<dyn CounterStore>,
    key_value_store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    metrics: Option<Arc<Metrics>>,
    retry_settings: RetrySettings,
    sticky_ttl: Duration,
    default_input_guardrails: Vec<Value>,
    default_output_guardrails: Vec<Value>,
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self {
            upstream: None,
            transformer: Arc::new(PassthroughTransformer::default()),
            checks: Arc::new(BuiltinChecks),
            counter_store: Arc::new(InMemoryCounterStore::new()),
            key_value_store: Arc::new(InMemoryKeyValueStore::new()),
            clock: Arc::new(SystemClock),
            metrics: None,
            retry_settings: RetrySettings::default(),
            sticky_ttl: Duration::from_secs(DEFAULT_STICKY_TTL_SECONDS),
            default_input_guardrails: Vec::new(),
            default_output_guardrails: Vec::new(),
        }
    }
}

impl GatewayBuilder {
    pub fn upstream(mut self, upstream: Arc<dyn UpstreamCaller>) -> Self {
        self.upstream = Some(upstream);
        self
    }

    pub fn transformer(mut self, transformer: Arc<dyn BodyTransformer>) -> Self {
        self.transformer = transformer;
        self
    }

    pub fn checks(mut self, checks: Arc<dyn CheckExecutor>) -> Self {
        self.checks = checks;
        self
    }

    pub fn counter_store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.counter_store = store;
        self
    }

    pub fn key_value_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.key_value_store = store;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn retry_settings(mut self, settings: RetrySettings) -> Self {
        self.retry_settings = settings;
        self
    }

    pub fn sticky_ttl(mut self, ttl: Duration) -> Self {
        self.sticky_ttl = ttl;
        self
    }

    pub fn default_guardrails(mut self, input: Vec<Value>, output: Vec<Value>) -> Self {
        self.default_input_guardrails = input;
        self.default_output_guardrails = output;
        self
    }

    pub fn build(self) -> AppResult<Gateway> {
        let metrics = match self.metrics {
            Some(metrics) => metrics,
            None => Arc::new(
                Metrics::new()
                    .map_err(|e| AppError::Internal(format!("failed to create metrics: {}", e)))?,
            ),
        };
        let upstream: Arc<dyn UpstreamCaller> = match self.upstream {
            Some(upstream) => upstream,
            None => Arc::new(ReqwestCaller::new().map_err(|e| {
                AppError::Internal(format!("failed to create HTTP client: {}", e))
            })?),
        };

        let resolver = Resolver {
            upstream,
            transformer: self.transformer,
            retry: RetryEngine::new(self.retry_settings),
            hooks: Arc::new(HooksManager::new(self.checks)),
            breaker: Arc::new(CircuitBreaker::new(
                self.counter_store,
                self.clock,
                metrics.clone(),
            )),
            sticky: StickySessionSelector::new(
                self.key_value_store,
                self.sticky_ttl,
                metrics.clone(),
            ),
            tasks: BackgroundTasks::new(metrics.clone()),
            metrics,
        };

        Ok(Gateway {
            resolver: Arc::new(resolver),
            default_input_guardrails: Arc::new(self.default_input_guardrails),
            default_output_guardrails: Arc::new(self.default_output_guardrails),
        })
    }
}
