/// Tests for the HTTP surface: `/v1/*`, `/health` and `/metrics`
///
/// Most tests drive the Axum router with `oneshot` over a scripted upstream.
/// The end-to-end tests run the production state (reqwest caller,
/// pass-through transformer) against wiremock providers.
mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{Reply, ScriptedUpstream, gateway};
use serde_json::{Value, json};
use std::str::FromStr;
use std::sync::Arc;
use switchboard::config::Config;
use switchboard::handlers::{AppState, build_router};
use switchboard::response::{LAST_USED_INDEX_HEADER, PROVIDER_HEADER, TRACE_ID_HEADER};
use switchboard::saved_configs::{SavedConfig, SavedConfigRegistry};
use tower::ServiceExt;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CONFIG: &str = r#"
[server]
host = "127.0.0.1"
port = 3000
organisation_id = "org-1"
workspace_id = "ws-1"
"#;

fn app(upstream: Arc<ScriptedUpstream>, saved: SavedConfigRegistry) -> axum::Router {
    let config = Arc::new(Config::from_str(CONFIG).unwrap());
    build_router(AppState::with_gateway(config, gateway(upstream), saved))
}

fn chat(headers: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("content-type", "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder
        .body(Body::from(
            json!({"model": "gpt-4o-mini", "messages": [{"role": "user", "content": "hi"}]})
                .to_string(),
        ))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_inline_config_routes_request() {
    let upstream = ScriptedUpstream::new();
    upstream.script("openai", [Reply::Status(500)]);
    let config = json!({
        "strategy": {"mode": "fallback"},
        "targets": [{"provider": "openai"}, {"provider": "anthropic"}]
    })
    .to_string();

    let response = app(upstream.clone(), SavedConfigRegistry::new())
        .oneshot(chat(&[("x-gateway-config", config.as_str())]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[PROVIDER_HEADER], "anthropic");
    assert_eq!(response.headers()[LAST_USED_INDEX_HEADER], "config.targets[1]");
    assert!(response.headers().contains_key(TRACE_ID_HEADER));
    let body = json_body(response).await;
    assert_eq!(body["choices"][0]["message"]["content"], "hello from anthropic");
}

#[tokio::test]
async fn test_provider_header_with_bearer_token() {
    let upstream = ScriptedUpstream::new();

    let response = app(upstream.clone(), SavedConfigRegistry::new())
        .oneshot(chat(&[
            ("x-gateway-provider", "groq"),
            ("authorization", "Bearer gsk-123"),
        ]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let call = &upstream.calls()[0];
    assert_eq!(call.provider, "groq");
    assert_eq!(call.headers["authorization"], "Bearer gsk-123");
}

#[tokio::test]
async fn test_inbound_trace_id_is_reused() {
    let upstream = ScriptedUpstream::new();

    let response = app(upstream, SavedConfigRegistry::new())
        .oneshot(chat(&[
            ("x-gateway-provider", "openai"),
            (TRACE_ID_HEADER, "trace-42"),
        ]))
        .await
        .unwrap();

    assert_eq!(response.headers()[TRACE_ID_HEADER], "trace-42");
}

#[tokio::test]
async fn test_missing_routing_headers_is_400() {
    let upstream = ScriptedUpstream::new();

    let response = app(upstream.clone(), SavedConfigRegistry::new())
        .oneshot(chat(&[]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert!(body["error"].as_str().unwrap().contains("x-gateway-config"));
    assert_eq!(upstream.total_calls(), 0);
}

#[tokio::test]
async fn test_malformed_inline_config_is_400() {
    let upstream = ScriptedUpstream::new();

    let response = app(upstream, SavedConfigRegistry::new())
        .oneshot(chat(&[(
            "x-gateway-config",
            r#"{"strategy": {"mode": "roundrobin"}, "targets": [{"provider": "openai"}]}"#,
        )]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_invalid_metadata_header_is_400() {
    let upstream = ScriptedUpstream::new();

    let response = app(upstream, SavedConfigRegistry::new())
        .oneshot(chat(&[
            ("x-gateway-provider", "openai"),
            ("x-gateway-metadata", "not json"),
        ]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_saved_config_is_404() {
    let upstream = ScriptedUpstream::new();

    let response = app(upstream, SavedConfigRegistry::new())
        .oneshot(chat(&[("x-gateway-config", "no-such-config")]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

/// SCENARIO: A saved config with a breaker, where the primary keeps failing
///
/// EXPECTED: Requests by slug are scoped, so the breaker opens and the third
/// request skips the primary
#[tokio::test]
async fn test_saved_config_by_slug_enables_circuit_breaker() {
    let upstream = ScriptedUpstream::new();
    upstream.always("openai", 500);
    let mut saved = SavedConfigRegistry::new();
    saved.insert(
        SavedConfig::parse(
            "support-bot",
            r#"{
                "strategy": {"mode": "fallback"},
                "cb_config": {"failure_threshold": 2},
                "targets": [{"provider": "openai"}, {"provider": "anthropic"}]
            }"#,
        )
        .unwrap(),
    );
    let config = Arc::new(Config::from_str(CONFIG).unwrap());
    let state = AppState::with_gateway(config, gateway(upstream.clone()), saved);
    let router = build_router(state.clone());

    for _ in 0..3 {
        let response = router
            .clone()
            .oneshot(chat(&[("x-gateway-config", "support-bot")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        state.gateway().tasks().wait_idle().await;
    }

    assert_eq!(upstream.calls_to("openai"), 2);
    assert_eq!(upstream.calls_to("anthropic"), 3);
}

#[tokio::test]
async fn test_conditional_metadata_from_header() {
    let upstream = ScriptedUpstream::new();
    let config = json!({
        "strategy": {
            "mode": "conditional",
            "conditions": [{"query": {"metadata.plan": "pro"}, "then": "pro"}]
        },
        "targets": [{"name": "pro", "provider": "mistral"}]
    })
    .to_string();
    let router = app(upstream, SavedConfigRegistry::new());

    let routed = router
        .clone()
        .oneshot(chat(&[
            ("x-gateway-config", config.as_str()),
            ("x-gateway-metadata", r#"{"plan": "pro"}"#),
        ]))
        .await
        .unwrap();
    assert_eq!(routed.headers()[PROVIDER_HEADER], "mistral");

    let unmatched = router
        .oneshot(chat(&[("x-gateway-config", config.as_str())]))
        .await
        .unwrap();
    assert_eq!(unmatched.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(unmatched).await["status"], "failure");
}

#[tokio::test]
async fn test_health_and_metrics_endpoints() {
    let router = app(ScriptedUpstream::new(), SavedConfigRegistry::new());

    let health = router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(health.status(), StatusCode::OK);
    assert_eq!(json_body(health).await["status"], "OK");

    let metrics = router
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(metrics.status(), StatusCode::OK);
}

/// SCENARIO: Production state against two wiremock providers; the first is
/// rate limited with a Retry-After far beyond the budget
///
/// EXPECTED: No wait, one call to the first provider, fallback to the second
#[tokio::test]
async fn test_end_to_end_fallback_over_http() {
    let primary = MockServer::start().await;
    let secondary = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "9999")
                .set_body_json(json!({"error": {"message": "slow down"}})),
        )
        .expect(1)
        .mount(&primary)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-secondary"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cmpl-e2e",
            "choices": [{"message": {"role": "assistant", "content": "from secondary"}}]
        })))
        .expect(1)
        .mount(&secondary)
        .await;

    let toml = format!(
        "{}\n[providers.primary]\nbase_url = \"{}/v1\"\n\n[providers.secondary]\nbase_url = \"{}/v1\"\n",
        CONFIG,
        primary.uri(),
        secondary.uri()
    );
    let config = Arc::new(Config::from_str(&toml).unwrap());
    let router = build_router(AppState::new(config).unwrap());

    let routing = json!({
        "strategy": {"mode": "fallback"},
        "targets": [
            {"provider": "primary", "retry": {"attempts": 3, "use_retry_after_header": true}},
            {"provider": "secondary", "api_key": "sk-secondary"}
        ]
    })
    .to_string();
    let response = router
        .oneshot(chat(&[("x-gateway-config", routing.as_str())]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[PROVIDER_HEADER], "secondary");
    assert_eq!(
        json_body(response).await["choices"][0]["message"]["content"],
        "from secondary"
    );
}
