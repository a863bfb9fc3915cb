/// Tests for settings flowing from groups down to leaves
///
/// Retry, timeout, forwarded headers and host replace what a parent set;
/// override params merge key by key.
mod common;

use common::{ScriptedUpstream, chat_request, document, gateway, header};
use http::HeaderValue;
use serde_json::json;
use switchboard::response::{CACHE_STATUS_HEADER, RETRY_COUNT_HEADER};

#[tokio::test(start_paused = true)]
async fn test_child_retry_replaces_parent_retry() {
    let upstream = ScriptedUpstream::new();
    upstream.always("openai", 503);
    upstream.always("anthropic", 503);
    let gw = gateway(upstream.clone());

    let root = document(json!({
        "strategy": {"mode": "fallback"},
        "retry": {"attempts": 2},
        "targets": [
            {"provider": "openai"},
            {"provider": "anthropic", "retry": {"attempts": 0}}
        ]
    }));
    gw.route(&root, &chat_request("hi")).await;

    assert_eq!(upstream.calls_to("openai"), 3, "inherits parent retry");
    assert_eq!(upstream.calls_to("anthropic"), 1, "own retry wins");
}

#[tokio::test]
async fn test_override_params_merge_down_the_tree() {
    let upstream = ScriptedUpstream::new();
    let gw = gateway(upstream.clone());

    let root = document(json!({
        "strategy": {"mode": "single"},
        "override_params": {"temperature": 0, "model": "group-model"},
        "targets": [{
            "provider": "openai",
            "overrideParams": {"model": "gpt-4o"}
        }]
    }));
    gw.route(&root, &chat_request("hi")).await;

    let sent = &upstream.calls()[0].body;
    assert_eq!(sent["temperature"], 0);
    assert_eq!(sent["model"], "gpt-4o");
    assert_eq!(sent["messages"][0]["content"], "hi");
}

#[tokio::test]
async fn test_forward_headers_and_api_key() {
    let upstream = ScriptedUpstream::new();
    let gw = gateway(upstream.clone());

    let root = document(json!({
        "strategy": {"mode": "single"},
        "forward_headers": ["X-Tenant"],
        "targets": [{"provider": "openai", "api_key": "sk-live", "virtual_key": "vk-openai"}]
    }));
    let mut headers = http::HeaderMap::new();
    headers.insert("x-tenant", HeaderValue::from_static("acme"));
    headers.insert("x-unlisted", HeaderValue::from_static("nope"));
    let request = chat_request("hi").with_headers(headers);

    gw.route(&root, &request).await;

    let call = &upstream.calls()[0];
    assert_eq!(call.headers["x-tenant"], "acme");
    assert!(call.headers.get("x-unlisted").is_none());
    assert_eq!(call.headers["authorization"], "Bearer sk-live");
    assert_eq!(call.headers["x-gateway-virtual-key"], "vk-openai");
    assert_eq!(call.url, "http://openai.test/v1/chat/completions");
}

#[tokio::test]
async fn test_custom_host_overrides_provider_base_url() {
    let upstream = ScriptedUpstream::new();
    let gw = gateway(upstream.clone());

    let root = document(json!({
        "provider": "openai",
        "custom_host": "http://mistral.test/proxy/"
    }));
    let response = gw.route(&root, &chat_request("hi")).await;

    assert_eq!(response.status(), 200);
    assert_eq!(upstream.calls()[0].url, "http://mistral.test/proxy/chat/completions");
}

#[tokio::test]
async fn test_cache_status_header_follows_inherited_cache_mode() {
    let upstream = ScriptedUpstream::new();
    let gw = gateway(upstream.clone());

    let cached = document(json!({
        "strategy": {"mode": "single"},
        "cache": {"mode": "simple", "max_age": 60},
        "targets": [{"provider": "openai"}]
    }));
    let response = gw.route(&cached, &chat_request("hi")).await;
    assert_eq!(header(&response, CACHE_STATUS_HEADER), "MISS");
    assert_eq!(header(&response, RETRY_COUNT_HEADER), "0");

    let uncached = document(json!({"provider": "openai"}));
    let response = gw.route(&uncached, &chat_request("hi")).await;
    assert_eq!(header(&response, CACHE_STATUS_HEADER), "DISABLED");
}
