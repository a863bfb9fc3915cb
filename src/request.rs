//! Inbound request model shared by every routing stage

use http::{HeaderMap, Method};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::resilience::circuit_breaker::CircuitBreakerScope;

/// The provider operation a request maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FunctionKind {
    ChatComplete,
    Complete,
    Embed,
    ImageGenerate,
    CreateSpeech,
    UploadFile,
    /// Any other path, forwarded as-is
    Proxy,
}

impl FunctionKind {
    /// Classify an inbound `/v1/...` path
    pub fn from_path(path: &str) -> Self {
        let trimmed = path.trim_end_matches('/');
        match trimmed.strip_prefix("/v1").unwrap_or(trimmed) {
            "/chat/completions" => Self::ChatComplete,
            "/completions" => Self::Complete,
            "/embeddings" => Self::Embed,
            "/images/generations" => Self::ImageGenerate,
            "/audio/speech" => Self::CreateSpeech,
            "/files" => Self::UploadFile,
            _ => Self::Proxy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChatComplete => "chatComplete",
            Self::Complete => "complete",
            Self::Embed => "embed",
            Self::ImageGenerate => "imageGenerate",
            Self::CreateSpeech => "createSpeech",
            Self::UploadFile => "uploadFile",
            Self::Proxy => "proxy",
        }
    }
}

/// A request entering the routing engine
///
/// Built once by the HTTP layer and shared immutably by every node of the
/// routing tree. Per-target changes (override params, hook mutations) are made
/// on copies inside the leaf call.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub function: FunctionKind,
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Value,
    pub metadata: Map<String, Value>,
    pub config_version: Option<String>,
    pub breaker_scope: Option<CircuitBreakerScope>,
    pub request_id: String,
}

impl GatewayRequest {
    pub fn new(method: Method, path: impl Into<String>, body: Value) -> Self {
        let path = path.into();
        Self {
            function: FunctionKind::from_path(&path),
            method,
            path,
            headers: HeaderMap::new(),
            body,
            metadata: Map::new(),
            config_version: None,
            breaker_scope: None,
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_config_version(mut self, version: impl Into<String>) -> Self {
        self.config_version = Some(version.into());
        self
    }

    pub fn with_breaker_scope(mut self, scope: CircuitBreakerScope) -> Self {
        self.breaker_scope = Some(scope);
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// `true` when the caller asked for a streamed response
    pub fn is_streaming(&self) -> bool {
        self.body.get("stream").and_then(Value::as_bool) == Some(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_kind_from_path() {
        assert_eq!(
            FunctionKind::from_path("/v1/chat/completions"),
            FunctionKind::ChatComplete
        );
        assert_eq!(FunctionKind::from_path("/v1/embeddings/"), FunctionKind::Embed);
        assert_eq!(FunctionKind::from_path("/v1/files"), FunctionKind::UploadFile);
        assert_eq!(FunctionKind::from_path("/v1/batches"), FunctionKind::Proxy);
    }

    #[test]
    fn test_streaming_flag_reads_body() {
        let request = GatewayRequest::new(
            Method::POST,
            "/v1/chat/completions",
            serde_json::json!({"stream": true}),
        );
        assert!(request.is_streaming());

        let request = GatewayRequest::new(Method::POST, "/v1/chat/completions", Value::Null);
        assert!(!request.is_streaming());
    }
}
