//! Guardrail and mutator hooks around a provider call
//!
//! Hooks are declared on routing nodes (directly, or via the
//! `input_guardrails`/`output_guardrails`/`input_mutators`/`output_mutators`
//! shorthands) and run inside a per-call span:
//!
//! - before-request hooks see the request params and may rewrite them
//! - after-request hooks see the provider response and may rewrite it
//! - a failing synchronous hook with `deny` set turns the call into a 446
//! - `async` hooks never block or alter the response; they run in the
//!   background once the response is ready
//!
//! Individual checks are supplied by a [`CheckExecutor`]; [`BuiltinChecks`]
//! provides the `default.*` registry.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::request::FunctionKind;
use crate::response::GatewayResponse;

pub mod checks;
pub mod manager;
pub mod shorthand;

pub use checks::{BuiltinChecks, CheckExecutor, CheckOutcome};
pub use manager::{HookExecution, HookMode, HooksManager, SpanId, SpanInit};
pub use shorthand::convert_shorthand;

/// Status returned when a hook denies a request
pub const HOOK_DENIED_STATUS: u16 = 446;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HookEventType {
    BeforeRequestHook,
    AfterRequestHook,
}

impl HookEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BeforeRequestHook => "beforeRequestHook",
            Self::AfterRequestHook => "afterRequestHook",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookType {
    #[default]
    Guardrail,
    Mutator,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookCheck {
    pub id: String,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default = "default_true", alias = "isEnabled")]
    pub is_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl HookCheck {
    pub fn new(id: impl Into<String>, parameters: Value) -> Self {
        Self {
            id: id.into(),
            parameters,
            is_enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookDefinition {
    pub id: String,
    #[serde(rename = "type", default)]
    pub hook_type: HookType,
    #[serde(default)]
    pub checks: Vec<HookCheck>,
    #[serde(default)]
    pub deny: bool,
    #[serde(rename = "async", default)]
    pub run_async: bool,
    #[serde(default, alias = "onFail", skip_serializing_if = "Option::is_none")]
    pub on_fail: Option<Value>,
    #[serde(default, alias = "onSuccess", skip_serializing_if = "Option::is_none")]
    pub on_success: Option<Value>,
}

impl HookDefinition {
    pub fn guardrail(id: impl Into<String>, checks: Vec<HookCheck>) -> Self {
        Self {
            id: id.into(),
            hook_type: HookType::Guardrail,
            checks,
            deny: false,
            run_async: false,
            on_fail: None,
            on_success: None,
        }
    }

    pub fn mutator(id: impl Into<String>, checks: Vec<HookCheck>) -> Self {
        Self {
            hook_type: HookType::Mutator,
            ..Self::guardrail(id, checks)
        }
    }

    pub fn with_deny(mut self, deny: bool) -> Self {
        self.deny = deny;
        self
    }

    pub fn with_async(mut self, run_async: bool) -> Self {
        self.run_async = run_async;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestContext {
    pub json: Value,
    pub is_streaming: bool,
    pub is_transformed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseContext {
    pub json: Value,
    pub status: u16,
    pub is_transformed: bool,
}

/// Everything a check can see
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HookContext {
    pub request: RequestContext,
    pub response: ResponseContext,
    pub provider: String,
    pub request_type: FunctionKind,
    pub metadata: Map<String, Value>,
}

impl HookContext {
    /// Text a check should inspect for the given event
    ///
    /// Before the call this is the prompt (chat message contents, `prompt` or
    /// `input`); after it, the generated choices.
    pub fn text_for(&self, event: HookEventType) -> String {
        match event {
            HookEventType::BeforeRequestHook => request_text(&self.request.json),
            HookEventType::AfterRequestHook => response_text(&self.response.json),
        }
    }

    pub(crate) fn apply(&mut self, data: &TransformedData) {
        if let Some(request) = &data.request {
            self.request.json = request.clone();
            self.request.is_transformed = true;
        }
        if let Some(response) = &data.response {
            self.response.json = response.clone();
            self.response.is_transformed = true;
        }
    }
}

fn content_text(content: &Value) -> Option<String> {
    match content {
        Value::String(text) => Some(text.clone()),
        Value::Array(parts) => {
            let texts: Vec<&str> = parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect();
            (!texts.is_empty()).then(|| texts.join("\n"))
        }
        _ => None,
    }
}

fn request_text(json: &Value) -> String {
    if let Some(messages) = json.get("messages").and_then(Value::as_array) {
        return messages
            .iter()
            .filter_map(|message| message.get("content").and_then(content_text))
            .collect::<Vec<_>>()
            .join("\n");
    }
    ["prompt", "input"]
        .iter()
        .find_map(|key| json.get(*key))
        .map(|value| match value {
            Value::Array(items) => items
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join("\n"),
            other => content_text(other).unwrap_or_default(),
        })
        .unwrap_or_default()
}

fn response_text(json: &Value) -> String {
    json.get("choices")
        .and_then(Value::as_array)
        .map(|choices| {
            choices
                .iter()
                .filter_map(|choice| {
                    choice
                        .pointer("/message/content")
                        .and_then(content_text)
                        .or_else(|| choice.get("text").and_then(Value::as_str).map(str::to_string))
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

/// Replacement documents produced by a check
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformedData {
    pub request: Option<Value>,
    pub response: Option<Value>,
}

impl TransformedData {
    pub fn is_empty(&self) -> bool {
        self.request.is_none() && self.response.is_none()
    }

    pub(crate) fn merge(&mut self, later: &TransformedData) {
        if later.request.is_some() {
            self.request.clone_from(&later.request);
        }
        if later.response.is_some() {
            self.response.clone_from(&later.response);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckResult {
    pub id: String,
    pub verdict: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub transformed: bool,
    pub execution_time: u64,
    #[serde(skip)]
    pub(crate) transformed_data: Option<TransformedData>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HookResult {
    pub id: String,
    #[serde(rename = "type")]
    pub hook_type: HookType,
    pub verdict: bool,
    pub deny: bool,
    #[serde(rename = "async")]
    pub run_async: bool,
    pub event_type: HookEventType,
    pub checks: Vec<CheckResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Value>,
    pub transformed: bool,
    pub execution_time: u64,
    #[serde(skip)]
    pub(crate) transformed_data: Option<TransformedData>,
}

impl HookResult {
    /// A failing synchronous hook that is allowed to deny
    pub fn denies(&self) -> bool {
        self.deny && !self.verdict && !self.run_async
    }
}

fn hook_results_json(before: &[HookResult], after: &[HookResult]) -> Value {
    serde_json::json!({
        "before_request_hooks": before,
        "after_request_hooks": after,
    })
}

/// 446 response listing the hook results that led to the denial
pub fn denied_response(before: &[HookResult], after: &[HookResult]) -> GatewayResponse {
    GatewayResponse::json(
        HOOK_DENIED_STATUS,
        &serde_json::json!({
            "error": {
                "message": "The guardrail checks defined in the config failed. You can find more information in the `hook_results` object.",
                "type": "hooks_failed",
                "param": null,
                "code": null,
            },
            "hook_results": hook_results_json(before, after),
        }),
    )
}

/// Attach synchronous hook results to a JSON response body
///
/// Non-object bodies are left untouched.
pub fn attach_hook_results(
    response: &mut GatewayResponse,
    before: &[HookResult],
    after: &[HookResult],
) {
    if before.is_empty() && after.is_empty() {
        return;
    }
    if let Some(Value::Object(mut map)) = response.json_body() {
        map.insert("hook_results".to_string(), hook_results_json(before, after));
        response.set_json_body(&Value::Object(map));
    }
}
