//! Gateway response type and the headers the engine stamps on it
//!
//! Every leaf call, synthesized error and hook denial is a `GatewayResponse`.
//! The HTTP layer converts it into an Axum response without inspecting it.

use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use serde_json::Value;

/// Marks a response synthesized from an unexpected gateway fault
pub const EXCEPTION_HEADER: &str = "x-gateway-exception";
/// Retries that preceded success, or `-1` when no attempt succeeded
pub const RETRY_COUNT_HEADER: &str = "x-gateway-retry-attempt-count";
/// Path of the leaf that produced the final response, e.g. `config.targets[1]`
pub const LAST_USED_INDEX_HEADER: &str = "x-gateway-last-used-option-index";
/// Provider id of the leaf that produced the final response
pub const PROVIDER_HEADER: &str = "x-gateway-provider";
/// Request correlation id echoed back to the caller
pub const TRACE_ID_HEADER: &str = "x-gateway-trace-id";
/// Cache policy outcome for the leaf call
pub const CACHE_STATUS_HEADER: &str = "x-gateway-cache-status";

#[derive(Debug, Clone)]
pub struct GatewayResponse {
    status: u16,
    headers: HeaderMap,
    body: Bytes,
}

impl GatewayResponse {
    pub fn new(status: u16, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// Build a response with a JSON body and matching content type
    pub fn json(status: u16, body: &Value) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Self::new(status, headers, body.to_string())
    }

    /// 500 response carrying the gateway-exception sentinel
    ///
    /// Fallback loops treat this as terminal: an internal fault is not a
    /// provider failure worth retrying on another target.
    pub fn gateway_exception(message: &str) -> Self {
        let mut response = Self::json(
            500,
            &serde_json::json!({
                "status": "failure",
                "message": message,
            }),
        );
        response.set_header(EXCEPTION_HEADER, "true");
        response
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_gateway_exception(&self) -> bool {
        self.headers
            .get(EXCEPTION_HEADER)
            .is_some_and(|value| value.as_bytes() == b"true")
    }

    /// Parse the body as JSON, returning `None` for non-JSON payloads
    pub fn json_body(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }

    /// Replace the body with a JSON document
    pub fn set_json_body(&mut self, body: &Value) {
        self.body = Bytes::from(body.to_string());
        self.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        self.headers.remove(header::CONTENT_LENGTH);
    }

    /// Insert a header, silently skipping values that are not valid header text
    pub fn set_header(&mut self, name: &'static str, value: &str) {
        match HeaderValue::from_str(value) {
            Ok(value) => {
                self.headers.insert(HeaderName::from_static(name), value);
            }
            Err(e) => {
                tracing::warn!(header = name, error = %e, "Dropping invalid response header value");
            }
        }
    }

    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

impl IntoResponse for GatewayResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, self.body).into_response();
        for (name, value) in self.headers.iter() {
            // Hop-by-hop and framing headers are recomputed by hyper.
            if name == header::CONTENT_LENGTH || name == header::TRANSFER_ENCODING {
                continue;
            }
            response.headers_mut().insert(name.clone(), value.clone());
        }
        response
    }
}
