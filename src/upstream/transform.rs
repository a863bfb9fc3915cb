//! Canonical request to provider request mapping

use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::TransformError;
use crate::request::GatewayRequest;
use crate::response::GatewayResponse;
use crate::routing::{InheritedConfig, ProviderTarget};
use crate::upstream::UpstreamRequest;

/// Header carrying a leaf's virtual key to providers that resolve it
pub const VIRTUAL_KEY_HEADER: &str = "x-gateway-virtual-key";

/// Everything needed to build one provider request
#[derive(Debug, Clone, Copy)]
pub struct TransformInput<'a> {
    pub target: &'a ProviderTarget,
    pub settings: &'a InheritedConfig,
    pub request: &'a GatewayRequest,
    /// Request params after override params and hook transforms
    pub params: &'a Value,
}

/// Provider wire-format mapping
pub trait BodyTransformer: Send + Sync {
    fn transform_request(
        &self,
        input: TransformInput<'_>,
    ) -> Result<UpstreamRequest, TransformError>;

    /// Map a provider reply back to the canonical shape
    fn transform_response(&self, _provider: &str, response: GatewayResponse) -> GatewayResponse {
        response
    }
}

/// Forwards the canonical body unchanged to an OpenAI-compatible endpoint
///
/// The URL is `custom_host` (when the routing document sets one) or the
/// provider's configured base URL, joined with the inbound path minus its
/// `/v1` prefix.
#[derive(Debug, Clone, Default)]
pub struct PassthroughTransformer {
    base_urls: HashMap<String, String>,
}

impl PassthroughTransformer {
    pub fn new(base_urls: HashMap<String, String>) -> Self {
        Self { base_urls }
    }

    fn base_url<'a>(&'a self, input: &TransformInput<'a>) -> Result<&'a str, TransformError> {
        input
            .settings
            .custom_host()
            .or_else(|| self.base_urls.get(input.target.provider()).map(String::as_str))
            .ok_or_else(|| TransformError::UnknownProvider(input.target.provider().to_string()))
    }
}

impl BodyTransformer for PassthroughTransformer {
    fn transform_request(
        &self,
        input: TransformInput<'_>,
    ) -> Result<UpstreamRequest, TransformError> {
        let base = self.base_url(&input)?;
        let path = input.request.path.as_str();
        let suffix = path.strip_prefix("/v1").unwrap_or(path);
        let url = format!("{}{}", base.trim_end_matches('/'), suffix);

        let mut headers = HeaderMap::new();
        if let Some(names) = input.settings.forward_headers() {
            for name in names {
                let header = HeaderName::from_bytes(name.to_ascii_lowercase().as_bytes())
                    .map_err(|_| TransformError::InvalidHeader(name.clone()))?;
                if let Some(value) = input.request.headers.get(&header) {
                    headers.insert(header, value.clone());
                }
            }
        }
        if let Some(key) = input.target.api_key() {
            let value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|_| TransformError::InvalidHeader(AUTHORIZATION.to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }
        if let Some(virtual_key) = input.target.virtual_key() {
            let value = HeaderValue::from_str(virtual_key)
                .map_err(|_| TransformError::InvalidHeader(VIRTUAL_KEY_HEADER.to_string()))?;
            headers.insert(VIRTUAL_KEY_HEADER, value);
        }

        let body = if input.request.method == Method::GET || input.params.is_null() {
            Bytes::new()
        } else {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            serde_json::to_vec(input.params)
                .map(Bytes::from)
                .map_err(|e| TransformError::Encode(e.to_string()))?
        };

        Ok(UpstreamRequest {
            url,
            method: input.request.method.clone(),
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::RoutingNode;
    use serde_json::json;

    fn leaf(document: Value) -> (ProviderTarget, InheritedConfig) {
        let node = RoutingNode::from_value(document).unwrap();
        let settings = InheritedConfig::default().merge(node.settings());
        match node.kind() {
            crate::routing::NodeKind::Leaf(target) => (target.clone(), settings),
            other => panic!("expected leaf, got {:?}", other),
        }
    }

    fn transformer() -> PassthroughTransformer {
        PassthroughTransformer::new(HashMap::from([(
            "openai".to_string(),
            "https://api.openai.test/v1/".to_string(),
        )]))
    }

    #[test]
    fn test_joins_base_url_and_sets_bearer() {
        let (target, settings) = leaf(json!({"provider": "openai", "api_key": "sk-1"}));
        let request = GatewayRequest::new(Method::POST, "/v1/chat/completions", json!({}));
        let params = json!({"model": "gpt-4o"});

        let upstream = transformer()
            .transform_request(TransformInput {
                target: &target,
                settings: &settings,
                request: &request,
                params: &params,
            })
            .unwrap();

        assert_eq!(upstream.url, "https://api.openai.test/v1/chat/completions");
        assert_eq!(upstream.headers[AUTHORIZATION], "Bearer sk-1");
        assert_eq!(upstream.headers[CONTENT_TYPE], "application/json");
        let sent: Value = serde_json::from_slice(&upstream.body).unwrap();
        assert_eq!(sent, params);
    }

    #[test]
    fn test_custom_host_and_forward_headers() {
        let (target, settings) = leaf(json!({
            "provider": "self-hosted",
            "custom_host": "http://10.0.0.5:8000/v1",
            "forward_headers": ["X-Team", "x-absent"]
        }));
        let mut headers = HeaderMap::new();
        headers.insert("x-team", "search".parse().unwrap());
        headers.insert("x-private", "nope".parse().unwrap());
        let request = GatewayRequest::new(Method::POST, "/v1/embeddings", json!({}))
            .with_headers(headers);

        let upstream = transformer()
            .transform_request(TransformInput {
                target: &target,
                settings: &settings,
                request: &request,
                params: &json!({"input": "hi"}),
            })
            .unwrap();

        assert_eq!(upstream.url, "http://10.0.0.5:8000/v1/embeddings");
        assert_eq!(upstream.headers["x-team"], "search");
        assert!(upstream.headers.get("x-private").is_none());
        assert!(upstream.headers.get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_unknown_provider_is_an_error() {
        let (target, settings) = leaf(json!({"provider": "mystery"}));
        let request = GatewayRequest::new(Method::POST, "/v1/chat/completions", json!({}));
        let err = transformer()
            .transform_request(TransformInput {
                target: &target,
                settings: &settings,
                request: &request,
                params: &json!({}),
            })
            .unwrap_err();
        assert_eq!(err, TransformError::UnknownProvider("mystery".to_string()));
    }
}
