//! Routing performance benchmarks
//!
//! Measures the non-I/O parts of routing: weighted selection, sticky session
//! hashing, routing document parsing, and one full resolution against an
//! in-process upstream.
//!
//! ## Expected Performance Characteristics
//!
//! - Weighted selection: tens of nanoseconds for typical group sizes
//! - Sticky hashing: low single-digit microseconds (canonical JSON + sha256)
//! - Document parsing: microseconds; paid per request for inline configs
//!
//! **Note**: Actual measurements vary with compiler version, CPU architecture, and system load.
//!
//! Run with: `cargo bench`

use async_trait::async_trait;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use http::{HeaderMap, Method};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::hint::black_box;
use std::sync::Arc;
use switchboard::{
    config::Config,
    error::UpstreamError,
    gateway::Gateway,
    request::GatewayRequest,
    response::GatewayResponse,
    routing::{RoutingNode, load_balance::select_weighted_with},
    sticky::{HashContext, identifier_hash},
    upstream::{PassthroughTransformer, UpstreamCaller, UpstreamRequest},
};

/// Benchmark weighted selection across group sizes
fn bench_weighted_selection(c: &mut Criterion) {
    let mut group = c.benchmark_group("weighted_selection");

    for size in [2usize, 8, 32] {
        let candidates: Vec<(usize, u32)> = (0..size).map(|i| (i, (i as u32 % 5) + 1)).collect();
        group.bench_with_input(BenchmarkId::from_parameter(size), &candidates, |b, c| {
            let mut rng = StdRng::seed_from_u64(7);
            b.iter(|| select_weighted_with(&mut rng, black_box(c)));
        });
    }

    group.finish();
}

/// Benchmark sticky identifier hashing
///
/// Runs once per load-balanced request with sticky sessions enabled.
fn bench_sticky_hash(c: &mut Criterion) {
    let headers = HeaderMap::new();
    let metadata: Map<String, Value> = serde_json::from_value(json!({
        "user": "user-1234",
        "session": {"id": "abc", "tags": ["b", "a"]}
    }))
    .unwrap();
    let params = json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "hi"}]});
    let context = HashContext {
        headers: &headers,
        metadata: &metadata,
        params: &params,
    };

    let mut group = c.benchmark_group("sticky_hash");
    let cases = [
        ("one_field", vec!["metadata.user".to_string()]),
        (
            "nested_fields",
            vec![
                "metadata.user".to_string(),
                "metadata.session".to_string(),
                "params.model".to_string(),
            ],
        ),
    ];
    for (name, fields) in cases {
        group.bench_with_input(BenchmarkId::from_parameter(name), &fields, |b, f| {
            b.iter(|| identifier_hash(&context, black_box(f), "v1"));
        });
    }
    group.finish();
}

/// Benchmark routing document parsing
///
/// Inline `x-gateway-config` documents are parsed on every request.
fn bench_document_parsing(c: &mut Criterion) {
    let simple = r#"{"provider": "openai", "retry": {"attempts": 2}}"#;
    let nested = json!({
        "strategy": {"mode": "fallback"},
        "cb_config": {"failure_threshold": 3},
        "input_guardrails": [{"default.contains": {"words": ["ssn"], "operator": "none"}}],
        "targets": [
            {
                "strategy": {"mode": "loadbalance", "sticky_session": {"hash_fields": ["metadata.user"]}},
                "targets": [
                    {"provider": "openai", "weight": 3},
                    {"provider": "anthropic", "weight": 1}
                ]
            },
            {
                "strategy": {
                    "mode": "conditional",
                    "conditions": [{"query": {"metadata.tier": "gold"}, "then": "gold"}],
                    "default": "std"
                },
                "targets": [
                    {"name": "gold", "provider": "mistral"},
                    {"name": "std", "provider": "groq"}
                ]
            }
        ]
    })
    .to_string();

    let mut group = c.benchmark_group("document_parsing");
    for (name, document) in [("single_leaf", simple.to_string()), ("nested", nested)] {
        group.bench_with_input(BenchmarkId::from_parameter(name), &document, |b, d| {
            b.iter(|| black_box(d).parse::<RoutingNode>().unwrap());
        });
    }
    group.finish();
}

/// Benchmark server configuration parsing
///
/// Called once during startup.
fn bench_config_parsing(c: &mut Criterion) {
    let toml_str = r#"
[server]
host = "127.0.0.1"
port = 3000

[providers.openai]
base_url = "https://api.openai.com/v1"

[providers.local]
base_url = "http://127.0.0.1:11434/v1"

[guardrails]
default_input = ["default.requiredMetadataKeys"]
"#;

    c.bench_function("config_parsing", |b| {
        b.iter(|| black_box(toml_str).parse::<Config>().unwrap());
    });
}

/// Answers every call with a fixed completion
struct StaticUpstream;

#[async_trait]
impl UpstreamCaller for StaticUpstream {
    async fn call(&self, _request: &UpstreamRequest) -> Result<GatewayResponse, UpstreamError> {
        Ok(GatewayResponse::json(
            200,
            &json!({"choices": [{"message": {"role": "assistant", "content": "ok"}}]}),
        ))
    }
}

/// Benchmark one full resolution of a fallback over load-balanced leaves
fn bench_route(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let gateway = Gateway::builder()
        .upstream(Arc::new(StaticUpstream))
        .transformer(Arc::new(PassthroughTransformer::new(HashMap::from([
            ("openai".to_string(), "http://openai.local/v1".to_string()),
            ("anthropic".to_string(), "http://anthropic.local/v1".to_string()),
        ]))))
        .build()
        .unwrap();
    let root: RoutingNode = r#"{
        "strategy": {"mode": "fallback"},
        "targets": [
            {"strategy": {"mode": "loadbalance"}, "targets": [
                {"provider": "openai", "weight": 2},
                {"provider": "anthropic", "weight": 1}
            ]},
            {"provider": "anthropic"}
        ]
    }"#
    .parse()
    .unwrap();
    let request = GatewayRequest::new(
        Method::POST,
        "/v1/chat/completions",
        json!({"model": "gpt-4o-mini", "messages": [{"role": "user", "content": "hi"}]}),
    );

    c.bench_function("route_fallback_loadbalance", |b| {
        b.to_async(&runtime)
            .iter(|| async { gateway.route(&root, &request).await });
    });
}

criterion_group!(
    benches,
    bench_weighted_selection,
    bench_sticky_hash,
    bench_document_parsing,
    bench_config_parsing,
    bench_route,
);
criterion_main!(benches);
