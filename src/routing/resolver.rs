//! Recursive target resolution
//!
//! `Resolver::resolve` walks a routing tree top-down. Each level merges its
//! settings into a fresh [`InheritedConfig`], narrows its children to the
//! circuit-closed ones, applies its strategy and recurses. Leaves run the
//! hook span and retry engine around one upstream target.
//!
//! Every leaf produces exactly one response. Internal faults become a
//! gateway-exception response so a parent fallback can react to them; only
//! conditional routing errors escape as `Err`.

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{RouterError, TransformError};
use crate::hooks::{
    HookEventType, HookMode, HooksManager, SpanId, SpanInit, attach_hook_results, denied_response,
};
use crate::metrics::{self, BackgroundTask, Metrics};
use crate::request::GatewayRequest;
use crate::resilience::circuit_breaker::{CircuitBreaker, PathStatusMap};
use crate::resilience::retry::{RetryEngine, RetryPolicy};
use crate::response::{
    CACHE_STATUS_HEADER, GatewayResponse, LAST_USED_INDEX_HEADER, PROVIDER_HEADER,
    RETRY_COUNT_HEADER,
};
use crate::routing::conditional::{self, ConditionContext};
use crate::routing::inherit::InheritedConfig;
use crate::routing::load_balance::{DEFAULT_WEIGHT, select_weighted};
use crate::routing::node::{CacheMode, NodeKind, ProviderTarget, RoutingNode, Strategy};
use crate::routing::{ROOT_PATH, child_path};
use crate::sticky::{HashContext, StickySessionConfig, StickySessionSelector};
use crate::tasks::BackgroundTasks;
use crate::upstream::{BodyTransformer, TransformInput, UpstreamCaller};

/// The collaborators one resolution needs
pub struct Resolver {
    pub(crate) upstream: Arc<dyn UpstreamCaller>,
    pub(crate) transformer: Arc<dyn BodyTransformer>,
    pub(crate) retry: RetryEngine,
    pub(crate) hooks: Arc<HooksManager>,
    pub(crate) breaker: Arc<CircuitBreaker>,
    pub(crate) sticky: StickySessionSelector,
    pub(crate) tasks: BackgroundTasks,
    pub(crate) metrics: Arc<Metrics>,
}

/// Per-request inputs shared by every level of one resolution
struct Resolution<'a> {
    request: &'a GatewayRequest,
    statuses: &'a PathStatusMap,
}

/// What a leaf call produced
struct LeafOutcome {
    response: GatewayResponse,
    upstream_called: bool,
}

impl Resolver {
    /// Resolve `root` for `request`
    ///
    /// When `inherited` is a root value, guardrail and mutator shorthands
    /// are converted into hooks first.
    pub async fn resolve(
        &self,
        root: &RoutingNode,
        request: &GatewayRequest,
        inherited: InheritedConfig,
        statuses: &PathStatusMap,
    ) -> Result<GatewayResponse, RouterError> {
        let resolution = Resolution { request, statuses };
        if inherited.is_root() {
            let normalized = root.with_normalized_hooks();
            return self
                .resolve_node(&normalized, &resolution, inherited, ROOT_PATH.to_string())
                .await;
        }
        self.resolve_node(root, &resolution, inherited, ROOT_PATH.to_string())
            .await
    }

    fn resolve_node<'a>(
        &'a self,
        node: &'a RoutingNode,
        resolution: &'a Resolution<'a>,
        inherited: InheritedConfig,
        path: String,
    ) -> BoxFuture<'a, Result<GatewayResponse, RouterError>> {
        async move {
            let settings = inherited.merge(node.settings());

            let (strategy, targets) = match node.kind() {
                NodeKind::Leaf(target) => {
                    return Ok(self.resolve_leaf(target, resolution, &settings, path).await);
                }
                NodeKind::Group { strategy, targets } => (strategy, targets),
            };

            if let Err(e) = self.metrics.record_strategy(strategy.label()) {
                metrics::log_recording_failure("record_strategy", e);
            }
            tracing::debug!(
                request_id = %resolution.request.request_id,
                path = %path,
                strategy = strategy.label().as_str(),
                targets = targets.len(),
                "Resolving target group"
            );

            match strategy {
                Strategy::Single => {
                    let index = self.eligible(targets, &path).first().copied().unwrap_or(0);
                    self.resolve_child(targets, index, resolution, settings, &path)
                        .await
                }
                Strategy::Fallback { on_status_codes } => {
                    let eligible = self.eligible(targets, &path);
                    self.resolve_fallback(
                        targets,
                        &eligible,
                        on_status_codes.as_deref(),
                        resolution,
                        settings,
                        &path,
                    )
                    .await
                }
                Strategy::LoadBalance { sticky_session } => {
                    let eligible = self.eligible(targets, &path);
                    let index = self
                        .choose_balanced(
                            targets,
                            &eligible,
                            sticky_session.as_ref(),
                            resolution,
                            &path,
                        )
                        .await;
                    self.resolve_child(targets, index, resolution, settings, &path)
                        .await
                }
                Strategy::Conditional { conditions, default } => {
                    let context = ConditionContext::new(
                        &resolution.request.metadata,
                        &resolution.request.body,
                        &resolution.request.path,
                    );
                    let index = conditional::select_target(
                        conditions,
                        default.as_deref(),
                        targets,
                        &context,
                    )
                    .inspect_err(|e| {
                        tracing::warn!(
                            request_id = %resolution.request.request_id,
                            path = %path,
                            error = %e,
                            "Conditional routing failed"
                        );
                    })?;
                    self.resolve_child(targets, index, resolution, settings, &path)
                        .await
                }
            }
        }
        .boxed()
    }

    async fn resolve_child(
        &self,
        targets: &[RoutingNode],
        index: usize,
        resolution: &Resolution<'_>,
        settings: InheritedConfig,
        path: &str,
    ) -> Result<GatewayResponse, RouterError> {
        match targets.get(index) {
            Some(child) => {
                self.resolve_node(child, resolution, settings, child_path(path, index))
                    .await
            }
            None => {
                tracing::error!(path = %path, index, "Selected target index out of range");
                Ok(GatewayResponse::gateway_exception(
                    "selected target does not exist",
                ))
            }
        }
    }

    /// Indices of children that may be tried
    ///
    /// Open children are skipped while at least one child is healthy; when
    /// every child is open they all stay eligible.
    fn eligible(&self, targets: &[RoutingNode], path: &str) -> Vec<usize> {
        let healthy: Vec<usize> = targets
            .iter()
            .enumerate()
            .filter(|(_, child)| child.circuit_open() != Some(true))
            .map(|(index, _)| index)
            .collect();

        if healthy.is_empty() {
            if !targets.is_empty() {
                tracing::warn!(path = %path, "All targets have open circuits, trying them anyway");
            }
            return (0..targets.len()).collect();
        }

        let skipped = targets.len() - healthy.len();
        if skipped > 0 {
            tracing::info!(path = %path, skipped, "Skipping targets with open circuits");
            self.metrics.record_circuit_open_skips(skipped);
        }
        healthy
    }

    async fn resolve_fallback(
        &self,
        targets: &[RoutingNode],
        eligible: &[usize],
        on_status_codes: Option<&[u16]>,
        resolution: &Resolution<'_>,
        settings: InheritedConfig,
        path: &str,
    ) -> Result<GatewayResponse, RouterError> {
        let mut last = None;
        for (position, &index) in eligible.iter().enumerate() {
            let response = self
                .resolve_child(targets, index, resolution, settings.clone(), path)
                .await?;

            let accepted = response.is_gateway_exception()
                || match on_status_codes {
                    Some(codes) => !codes.contains(&response.status()),
                    None => response.is_success(),
                };
            if accepted {
                return Ok(response);
            }

            if position + 1 < eligible.len() {
                tracing::info!(
                    request_id = %resolution.request.request_id,
                    path = %child_path(path, index),
                    status = response.status(),
                    "Fallback target failed, trying next"
                );
                self.metrics.record_fallback_advance();
            }
            last = Some(response);
        }

        Ok(last.unwrap_or_else(|| {
            GatewayResponse::gateway_exception("fallback group has no targets")
        }))
    }

    /// Sticky assignment if one is stored and still in range, else a weighted draw
    async fn choose_balanced(
        &self,
        targets: &[RoutingNode],
        eligible: &[usize],
        sticky: Option<&StickySessionConfig>,
        resolution: &Resolution<'_>,
        path: &str,
    ) -> usize {
        let request = resolution.request;
        let sticky = sticky
            .filter(|config| config.enabled())
            .zip(request.config_version.as_deref());

        let mut identifier_hash = None;
        if let Some((config, version)) = sticky {
            let context = HashContext {
                headers: &request.headers,
                metadata: &request.metadata,
                params: &request.body,
            };
            let lookup = self.sticky.get_target_index(&context, config, version).await;
            match lookup.target_index {
                Some(index) if index < targets.len() => {
                    tracing::debug!(path = %path, target_index = index, "Reusing sticky target");
                    return index;
                }
                Some(index) => {
                    tracing::debug!(
                        path = %path,
                        target_index = index,
                        targets = targets.len(),
                        "Stored sticky target is out of range, reselecting"
                    );
                }
                None => {}
            }
            identifier_hash = Some(lookup.identifier_hash);
        }

        let weighted: Vec<(usize, u32)> = eligible
            .iter()
            .map(|&index| (index, targets[index].weight().unwrap_or(DEFAULT_WEIGHT)))
            .collect();
        let index = select_weighted(&weighted).unwrap_or(0);

        if let (Some((config, version)), Some(hash)) = (sticky, identifier_hash) {
            self.sticky
                .set_target_index_by_hash(version, &hash, index, config.ttl())
                .await;
        }
        index
    }

    async fn resolve_leaf(
        &self,
        target: &ProviderTarget,
        resolution: &Resolution<'_>,
        settings: &InheritedConfig,
        path: String,
    ) -> GatewayResponse {
        let outcome = self.call_leaf(target, resolution.request, settings, &path).await;

        if outcome.upstream_called
            && let Some(scope) = resolution.request.breaker_scope.as_ref()
            && let Some(status) = resolution.statuses.get(&path)
        {
            let breaker = self.breaker.clone();
            let scope = scope.clone();
            let status = status.clone();
            let code = outcome.response.status();
            self.tasks.spawn(BackgroundTask::BreakerRecord, async move {
                breaker.record_outcome(&scope, &status, code).await;
            });
        }

        outcome.response
    }

    /// One provider call inside its own hook span
    async fn call_leaf(
        &self,
        target: &ProviderTarget,
        request: &GatewayRequest,
        settings: &InheritedConfig,
        path: &str,
    ) -> LeafOutcome {
        let mut params = request.body.clone();
        if let Value::Object(map) = &mut params {
            for (key, value) in settings.override_params() {
                map.insert(key.clone(), value.clone());
            }
        }

        let span_id = self.hooks.create_span(SpanInit {
            request_json: params.clone(),
            is_streaming: request.is_streaming(),
            provider: target.provider().to_string(),
            request_type: request.function,
            metadata: request.metadata.clone(),
            before_request_hooks: settings.before_request_hooks(),
            after_request_hooks: settings.after_request_hooks(),
        });

        let leaf = self.run_leaf(span_id, target, request, settings, params, path);
        let attempt = AssertUnwindSafe(leaf).catch_unwind().await;
        let outcome = match attempt {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                tracing::error!(
                    request_id = %request.request_id,
                    path = %path,
                    provider = %target.provider(),
                    error = %e,
                    "Failed to build upstream request"
                );
                LeafOutcome {
                    response: GatewayResponse::gateway_exception(&e.to_string()),
                    upstream_called: false,
                }
            }
            Err(_) => {
                tracing::error!(
                    request_id = %request.request_id,
                    path = %path,
                    provider = %target.provider(),
                    "Target call panicked"
                );
                LeafOutcome {
                    response: GatewayResponse::gateway_exception(
                        "internal error while calling target",
                    ),
                    upstream_called: false,
                }
            }
        };

        self.finish_span(span_id, outcome.upstream_called);
        outcome
    }

    async fn run_leaf(
        &self,
        span_id: SpanId,
        target: &ProviderTarget,
        request: &GatewayRequest,
        settings: &InheritedConfig,
        params: Value,
        path: &str,
    ) -> Result<LeafOutcome, TransformError> {
        let before = self
            .hooks
            .execute_hooks(span_id, HookEventType::BeforeRequestHook, HookMode::Sync)
            .await;
        if before.should_deny {
            self.record_denial(HookEventType::BeforeRequestHook);
            let mut response = denied_response(&before.results, &[]);
            set_leaf_headers(&mut response, path, target.provider());
            return Ok(LeafOutcome {
                response,
                upstream_called: false,
            });
        }
        let params = if before.transformed {
            self.hooks.request_json(span_id).unwrap_or(params)
        } else {
            params
        };

        let upstream_request = self.transformer.transform_request(TransformInput {
            target,
            settings,
            request,
            params: &params,
        })?;

        let policy = settings.retry().cloned().unwrap_or_else(RetryPolicy::default);
        let timeout = settings.request_timeout().map(Duration::from_millis);
        let upstream = &self.upstream;
        let outbound = &upstream_request;
        let outcome = self
            .retry
            .execute(&policy, timeout, || upstream.call(outbound))
            .await;

        self.metrics.record_upstream_attempts(outcome.attempts_made);
        if outcome.retry_after_skipped {
            self.metrics.record_retry_after_skip();
        }
        let retry_header = outcome.attempt_count_header();
        let mut response = self
            .transformer
            .transform_response(target.provider(), outcome.response);

        tracing::info!(
            request_id = %request.request_id,
            path = %path,
            provider = %target.provider(),
            status = response.status(),
            attempts = outcome.attempts_made,
            "Target call completed"
        );

        if !request.is_streaming()
            && let Some(json) = response.json_body()
        {
            self.hooks.set_response(span_id, response.status(), json);
            let after = self
                .hooks
                .execute_hooks(span_id, HookEventType::AfterRequestHook, HookMode::Sync)
                .await;
            if after.should_deny {
                self.record_denial(HookEventType::AfterRequestHook);
                let (before_results, after_results) = self.hooks.sync_results(span_id);
                response = denied_response(&before_results, &after_results);
            } else {
                if after.transformed
                    && let Some(rewritten) = self.hooks.transformed_response(span_id)
                {
                    response.set_json_body(&rewritten);
                }
                let (before_results, after_results) = self.hooks.sync_results(span_id);
                attach_hook_results(&mut response, &before_results, &after_results);
            }
        }

        set_leaf_headers(&mut response, path, target.provider());
        response.set_header(RETRY_COUNT_HEADER, &retry_header);
        response.set_header(CACHE_STATUS_HEADER, cache_status(settings));

        Ok(LeafOutcome {
            response,
            upstream_called: true,
        })
    }

    /// Run async hooks in the background, then drop the span
    fn finish_span(&self, span_id: SpanId, upstream_called: bool) {
        let run_before = self
            .hooks
            .has_hooks(span_id, HookEventType::BeforeRequestHook, HookMode::Async);
        let run_after = upstream_called
            && self
                .hooks
                .has_hooks(span_id, HookEventType::AfterRequestHook, HookMode::Async);

        if !run_before && !run_after {
            self.hooks.finish_span(span_id);
            return;
        }

        let hooks = self.hooks.clone();
        self.tasks.spawn(BackgroundTask::AsyncHooks, async move {
            if run_before {
                hooks
                    .execute_hooks(span_id, HookEventType::BeforeRequestHook, HookMode::Async)
                    .await;
            }
            if run_after {
                hooks
                    .execute_hooks(span_id, HookEventType::AfterRequestHook, HookMode::Async)
                    .await;
            }
            hooks.finish_span(span_id);
        });
    }

    fn record_denial(&self, event: HookEventType) {
        if let Err(e) = self.metrics.record_hook_denial(event) {
            metrics::log_recording_failure("record_hook_denial", e);
        }
    }
}

fn set_leaf_headers(response: &mut GatewayResponse, path: &str, provider: &str) {
    response.set_header(LAST_USED_INDEX_HEADER, path);
    response.set_header(PROVIDER_HEADER, provider);
}

/// No cache backend is attached, so an enabled cache always misses
fn cache_status(settings: &InheritedConfig) -> &'static str {
    match settings.cache().map(|cache| cache.mode()) {
        Some(CacheMode::Simple | CacheMode::Semantic) => "MISS",
        Some(CacheMode::Disabled) | None => "DISABLED",
    }
}
