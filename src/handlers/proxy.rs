//! Gateway endpoint for `/v1/*`
//!
//! Turns an inbound HTTP request into a [`GatewayRequest`], resolves the
//! routing document it names, and hands both to the routing engine.
//!
//! The routing document comes from one of:
//! - `x-gateway-config`: an inline JSON document, or the slug of a saved config
//! - `x-gateway-provider`: a single provider, authenticated with the inbound
//!   `Authorization: Bearer` token

use axum::{
    Extension,
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, Uri, header::AUTHORIZATION},
};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::str::FromStr;

use crate::error::{AppError, AppResult};
use crate::handlers::AppState;
use crate::middleware::RequestId;
use crate::request::GatewayRequest;
use crate::resilience::CircuitBreakerScope;
use crate::response::{GatewayResponse, PROVIDER_HEADER};
use crate::routing::RoutingNode;

pub const CONFIG_HEADER: &str = "x-gateway-config";
pub const CONFIG_VERSION_HEADER: &str = "x-gateway-config-version";
pub const METADATA_HEADER: &str = "x-gateway-metadata";

/// Routing document for one request, with the identity of a saved config
struct ResolvedConfig<'a> {
    root: Cow<'a, RoutingNode>,
    version: Option<String>,
    slug: Option<String>,
}

/// `/v1/*` handler
///
/// # Errors
///
/// Returns 400 for an unparseable body, metadata or routing document, and 404
/// when `x-gateway-config` names an unknown saved config. Everything past
/// request assembly is answered by the engine itself.
pub async fn handler(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<GatewayResponse> {
    let body = parse_body(&body)?;
    let metadata = parse_metadata(&headers)?;

    let saved;
    let resolved = match header_str(&headers, CONFIG_HEADER) {
        Some(raw) if raw.trim_start().starts_with('{') => ResolvedConfig {
            root: Cow::Owned(RoutingNode::from_str(raw)?),
            version: None,
            slug: None,
        },
        Some(slug) => {
            saved = state
                .saved_configs()
                .get(slug)
                .ok_or_else(|| AppError::UnknownSavedConfig(slug.to_string()))?;
            ResolvedConfig {
                root: Cow::Borrowed(saved.root()),
                version: Some(saved.version().to_string()),
                slug: Some(saved.slug().to_string()),
            }
        }
        None => match header_str(&headers, PROVIDER_HEADER) {
            Some(provider) => ResolvedConfig {
                root: Cow::Owned(RoutingNode::leaf(provider, bearer_token(&headers))),
                version: None,
                slug: None,
            },
            None => {
                return Err(AppError::Validation(format!(
                    "Either {} or {} header is required",
                    CONFIG_HEADER, PROVIDER_HEADER
                )));
            }
        },
    };

    let mut request = GatewayRequest::new(method, uri.path(), body)
        .with_headers(headers.clone())
        .with_metadata(metadata)
        .with_request_id(request_id.as_str());

    let version = header_str(&headers, CONFIG_VERSION_HEADER)
        .map(str::to_string)
        .or(resolved.version);
    if let Some(version) = version {
        request = request.with_config_version(version);
    }
    if let Some(slug) = resolved.slug {
        let server = &state.config().server;
        request = request.with_breaker_scope(CircuitBreakerScope::new(
            server.organisation_id.as_str(),
            server.workspace_id.as_str(),
            slug,
        ));
    }

    tracing::debug!(
        request_id = %request_id,
        function = request.function.as_str(),
        config_version = ?request.config_version,
        "Routing gateway request"
    );

    Ok(state.gateway().route(&resolved.root, &request).await)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn parse_body(body: &Bytes) -> AppResult<Value> {
    if body.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body)
        .map_err(|e| AppError::Validation(format!("Request body is not valid JSON: {}", e)))
}

fn parse_metadata(headers: &HeaderMap) -> AppResult<Map<String, Value>> {
    let Some(raw) = header_str(headers, METADATA_HEADER) else {
        return Ok(Map::new());
    };
    match serde_json::from_str(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(AppError::Validation(format!(
            "{} must be a JSON object",
            METADATA_HEADER
        ))),
        Err(e) => Err(AppError::Validation(format!(
            "{} is not valid JSON: {}",
            METADATA_HEADER, e
        ))),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    header_str(headers, AUTHORIZATION.as_str())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
}
