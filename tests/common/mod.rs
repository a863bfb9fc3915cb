//! Shared fixtures for integration tests
//!
//! `ScriptedUpstream` stands in for provider APIs: each provider gets a queue
//! of replies, and every call is recorded so tests can assert on what the
//! gateway actually sent.
#![allow(dead_code)]

use async_trait::async_trait;
use http::{HeaderMap, HeaderValue, Method};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use switchboard::error::UpstreamError;
use switchboard::gateway::{Gateway, GatewayBuilder};
use switchboard::request::GatewayRequest;
use switchboard::response::GatewayResponse;
use switchboard::routing::RoutingNode;
use switchboard::upstream::{PassthroughTransformer, UpstreamCaller, UpstreamRequest};

pub const PROVIDERS: [&str; 4] = ["openai", "anthropic", "mistral", "groq"];

/// One scripted provider reply
#[derive(Debug, Clone)]
pub enum Reply {
    /// Chat completion with the given status
    Status(u16),
    /// Status plus extra response headers
    WithHeaders(u16, Vec<(&'static str, &'static str)>),
    /// Reply only after the delay elapses
    Delayed(Duration, u16),
    /// Connection refused
    Refused,
}

/// What the gateway sent upstream
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub provider: String,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Value,
}

#[derive(Default)]
pub struct ScriptedUpstream {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedUpstream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue replies for `provider`; once drained it answers 200
    pub fn script(&self, provider: &str, replies: impl IntoIterator<Item = Reply>) {
        self.scripts
            .lock()
            .entry(provider.to_string())
            .or_default()
            .extend(replies);
    }

    /// Answer every call to `provider` with `status`
    pub fn always(&self, provider: &str, status: u16) {
        self.script(provider, std::iter::repeat_n(Reply::Status(status), 64));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, provider: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.provider == provider)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }
}

/// `http://openai.test/chat/completions` -> `openai`
fn provider_of(url: &str) -> String {
    url.trim_start_matches("http://")
        .split(['/', '.'])
        .next()
        .unwrap_or_default()
        .to_string()
}

pub fn completion_body(provider: &str) -> Value {
    json!({
        "id": "cmpl-1",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": format!("hello from {}", provider)}
        }]
    })
}

fn reply_response(
    provider: &str,
    status: u16,
    headers: &[(&'static str, &'static str)],
) -> GatewayResponse {
    let body = if (200..300).contains(&status) {
        completion_body(provider)
    } else {
        json!({"error": {"message": format!("{} failed with {}", provider, status)}})
    };
    let mut response = GatewayResponse::json(status, &body);
    for (name, value) in headers {
        response
            .headers_mut()
            .insert(*name, HeaderValue::from_static(value));
    }
    response
}

#[async_trait]
impl UpstreamCaller for ScriptedUpstream {
    async fn call(&self, request: &UpstreamRequest) -> Result<GatewayResponse, UpstreamError> {
        let provider = provider_of(&request.url);
        self.calls.lock().push(RecordedCall {
            provider: provider.clone(),
            url: request.url.clone(),
            headers: request.headers.clone(),
            body: serde_json::from_slice(&request.body).unwrap_or(Value::Null),
        });

        let reply = self
            .scripts
            .lock()
            .get_mut(&provider)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Reply::Status(200));

        match reply {
            Reply::Status(status) => Ok(reply_response(&provider, status, &[])),
            Reply::WithHeaders(status, headers) => Ok(reply_response(&provider, status, &headers)),
            Reply::Delayed(delay, status) => {
                tokio::time::sleep(delay).await;
                Ok(reply_response(&provider, status, &[]))
            }
            Reply::Refused => Err(UpstreamError::Connect("connection refused".to_string())),
        }
    }
}

/// Pass-through transformer knowing `http://{provider}.test` for each test provider
pub fn transformer() -> PassthroughTransformer {
    PassthroughTransformer::new(
        PROVIDERS
            .iter()
            .map(|provider| (provider.to_string(), format!("http://{}.test/v1", provider)))
            .collect(),
    )
}

/// Builder wired to the scripted upstream, ready for further customisation
pub fn builder(upstream: Arc<ScriptedUpstream>) -> GatewayBuilder {
    Gateway::builder()
        .upstream(upstream)
        .transformer(Arc::new(transformer()))
}

pub fn gateway(upstream: Arc<ScriptedUpstream>) -> Gateway {
    builder(upstream).build().expect("gateway should build")
}

pub fn chat_request(prompt: &str) -> GatewayRequest {
    GatewayRequest::new(
        Method::POST,
        "/v1/chat/completions",
        json!({
            "model": "gpt-4o-mini",
            "messages": [{"role": "user", "content": prompt}]
        }),
    )
}

pub fn document(value: Value) -> RoutingNode {
    RoutingNode::from_value(value).expect("routing document should parse")
}

pub fn header<'a>(response: &'a GatewayResponse, name: &str) -> &'a str {
    response
        .header_str(name)
        .unwrap_or_else(|| panic!("response should carry {}", name))
}
