//! Per-call hook spans
//!
//! A span is created for each leaf call and holds the hook context, the hook
//! lists that apply to the call and every result produced so far. Retries of
//! the same leaf reuse the span; fallback to another leaf creates a new one.

use dashmap::DashMap;
use futures::future::join_all;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::hooks::{
    CheckExecutor, CheckResult, HookCheck, HookContext, HookDefinition, HookEventType, HookResult,
    HookType, RequestContext, ResponseContext, TransformedData,
};
use crate::request::FunctionKind;

pub type SpanId = Uuid;

/// Which hooks of an event to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookMode {
    /// Blocking hooks whose verdicts and transforms apply to the call
    Sync,
    /// Background hooks that only record results
    Async,
}

impl HookMode {
    fn selects(&self, hook: &HookDefinition) -> bool {
        match self {
            Self::Sync => !hook.run_async,
            Self::Async => hook.run_async,
        }
    }
}

/// Inputs for a new span
#[derive(Debug, Clone)]
pub struct SpanInit {
    pub request_json: Value,
    pub is_streaming: bool,
    pub provider: String,
    pub request_type: FunctionKind,
    pub metadata: Map<String, Value>,
    pub before_request_hooks: Vec<HookDefinition>,
    pub after_request_hooks: Vec<HookDefinition>,
}

#[derive(Debug)]
struct HookSpan {
    context: HookContext,
    before_hooks: Vec<HookDefinition>,
    after_hooks: Vec<HookDefinition>,
    before_results: Vec<HookResult>,
    after_results: Vec<HookResult>,
}

impl HookSpan {
    fn hooks(&self, event: HookEventType) -> &[HookDefinition] {
        match event {
            HookEventType::BeforeRequestHook => &self.before_hooks,
            HookEventType::AfterRequestHook => &self.after_hooks,
        }
    }

    fn results_mut(&mut self, event: HookEventType) -> &mut Vec<HookResult> {
        match event {
            HookEventType::BeforeRequestHook => &mut self.before_results,
            HookEventType::AfterRequestHook => &mut self.after_results,
        }
    }
}

/// Outcome of running one event's hooks
#[derive(Debug, Clone, Default)]
pub struct HookExecution {
    pub results: Vec<HookResult>,
    pub should_deny: bool,
    pub transformed: bool,
}

pub struct HooksManager {
    executor: Arc<dyn CheckExecutor>,
    spans: DashMap<SpanId, HookSpan>,
}

impl HooksManager {
    pub fn new(executor: Arc<dyn CheckExecutor>) -> Self {
        Self {
            executor,
            spans: DashMap::new(),
        }
    }

    pub fn create_span(&self, init: SpanInit) -> SpanId {
        let id = Uuid::new_v4();
        let span = HookSpan {
            context: HookContext {
                request: RequestContext {
                    json: init.request_json,
                    is_streaming: init.is_streaming,
                    is_transformed: false,
                },
                response: ResponseContext {
                    json: Value::Null,
                    status: 0,
                    is_transformed: false,
                },
                provider: init.provider,
                request_type: init.request_type,
                metadata: init.metadata,
            },
            before_hooks: init.before_request_hooks,
            after_hooks: init.after_request_hooks,
            before_results: Vec::new(),
            after_results: Vec::new(),
        };
        self.spans.insert(id, span);
        id
    }

    /// Whether the span has any hooks of this event and mode
    pub fn has_hooks(&self, span_id: SpanId, event: HookEventType, mode: HookMode) -> bool {
        self.spans
            .get(&span_id)
            .is_some_and(|span| span.hooks(event).iter().any(|hook| mode.selects(hook)))
    }

    /// Run every hook of `event` matching `mode` concurrently
    ///
    /// In sync mode, transforms are applied to the span in declaration order
    /// and `should_deny` reports whether any hook denied the call.
    pub async fn execute_hooks(
        &self,
        span_id: SpanId,
        event: HookEventType,
        mode: HookMode,
    ) -> HookExecution {
        let snapshot = self.spans.get(&span_id).map(|span| {
            let hooks: Vec<HookDefinition> = span
                .hooks(event)
                .iter()
                .filter(|hook| mode.selects(hook))
                .cloned()
                .collect();
            (span.context.clone(), hooks)
        });
        let Some((context, hooks)) = snapshot else {
            tracing::warn!(span_id = %span_id, event = event.as_str(), "Hook span not found");
            return HookExecution::default();
        };
        if hooks.is_empty() {
            return HookExecution::default();
        }

        let results = join_all(
            hooks
                .iter()
                .map(|hook| self.run_hook(hook, event, &context)),
        )
        .await;

        let should_deny = mode == HookMode::Sync && results.iter().any(HookResult::denies);
        let mut transformed = false;
        if let Some(mut span) = self.spans.get_mut(&span_id) {
            if mode == HookMode::Sync {
                for data in results.iter().filter_map(|r| r.transformed_data.as_ref()) {
                    span.context.apply(data);
                    transformed = true;
                }
            }
            span.results_mut(event).extend(results.iter().cloned());
        }

        if should_deny {
            tracing::info!(
                span_id = %span_id,
                event = event.as_str(),
                denied_by = ?results
                    .iter()
                    .filter(|r| r.denies())
                    .map(|r| r.id.as_str())
                    .collect::<Vec<_>>(),
                "Request denied by hook"
            );
        }

        HookExecution {
            results,
            should_deny,
            transformed,
        }
    }

    async fn run_hook(
        &self,
        hook: &HookDefinition,
        event: HookEventType,
        context: &HookContext,
    ) -> HookResult {
        let started = Instant::now();
        let enabled: Vec<&HookCheck> = hook.checks.iter().filter(|c| c.is_enabled).collect();

        let checks = match hook.hook_type {
            // Mutators chain: each check sees the previous check's output.
            HookType::Mutator => {
                let mut current = context.clone();
                let mut results = Vec::with_capacity(enabled.len());
                for check in enabled {
                    let result = self.run_check(check, event, &current).await;
                    if let Some(data) = &result.transformed_data {
                        current.apply(data);
                    }
                    results.push(result);
                }
                results
            }
            HookType::Guardrail => {
                join_all(
                    enabled
                        .into_iter()
                        .map(|check| self.run_check(check, event, context)),
                )
                .await
            }
        };

        let verdict = checks.iter().all(|check| check.verdict);
        let mut transformed_data = TransformedData::default();
        for data in checks.iter().filter_map(|c| c.transformed_data.as_ref()) {
            transformed_data.merge(data);
        }
        let transformed = !transformed_data.is_empty();
        let feedback = if verdict {
            hook.on_success.clone()
        } else {
            hook.on_fail.clone()
        };

        HookResult {
            id: hook.id.clone(),
            hook_type: hook.hook_type,
            verdict,
            deny: hook.deny,
            run_async: hook.run_async,
            event_type: event,
            checks,
            feedback,
            transformed,
            execution_time: started.elapsed().as_millis() as u64,
            transformed_data: transformed.then_some(transformed_data),
        }
    }

    async fn run_check(
        &self,
        check: &HookCheck,
        event: HookEventType,
        context: &HookContext,
    ) -> CheckResult {
        let started = Instant::now();
        match self.executor.execute(check, event, context).await {
            Ok(outcome) => {
                let transformed_data = outcome.transformed_data.filter(|data| !data.is_empty());
                CheckResult {
                    id: check.id.clone(),
                    verdict: outcome.verdict,
                    data: outcome.data,
                    error: None,
                    transformed: transformed_data.is_some(),
                    execution_time: started.elapsed().as_millis() as u64,
                    transformed_data,
                }
            }
            Err(e) => {
                tracing::warn!(
                    check_id = %check.id,
                    event = event.as_str(),
                    error = %e,
                    "Check failed to run, treating as passed"
                );
                CheckResult {
                    id: check.id.clone(),
                    verdict: true,
                    data: None,
                    error: Some(e.to_string()),
                    transformed: false,
                    execution_time: started.elapsed().as_millis() as u64,
                    transformed_data: None,
                }
            }
        }
    }

    /// Record the provider response so after-request hooks can see it
    pub fn set_response(&self, span_id: SpanId, status: u16, json: Value) {
        if let Some(mut span) = self.spans.get_mut(&span_id) {
            span.context.response = ResponseContext {
                json,
                status,
                is_transformed: false,
            };
        }
    }

    /// Current request params, including any before-hook transforms
    pub fn request_json(&self, span_id: SpanId) -> Option<Value> {
        self.spans
            .get(&span_id)
            .map(|span| span.context.request.json.clone())
    }

    /// Current response body when an after-hook rewrote it
    pub fn transformed_response(&self, span_id: SpanId) -> Option<Value> {
        self.spans
            .get(&span_id)
            .filter(|span| span.context.response.is_transformed)
            .map(|span| span.context.response.json.clone())
    }

    /// Synchronous results recorded so far, as (before, after)
    pub fn sync_results(&self, span_id: SpanId) -> (Vec<HookResult>, Vec<HookResult>) {
        self.spans
            .get(&span_id)
            .map(|span| {
                let sync = |results: &[HookResult]| {
                    results
                        .iter()
                        .filter(|r| !r.run_async)
                        .cloned()
                        .collect::<Vec<_>>()
                };
                (sync(&span.before_results), sync(&span.after_results))
            })
            .unwrap_or_default()
    }

    pub fn finish_span(&self, span_id: SpanId) {
        self.spans.remove(&span_id);
    }

    pub fn active_spans(&self) -> usize {
        self.spans.len()
    }
}
