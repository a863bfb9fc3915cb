//! `reqwest`-backed upstream caller

use async_trait::async_trait;
use std::error::Error as _;

use crate::error::UpstreamError;
use crate::response::GatewayResponse;
use crate::upstream::{UpstreamCaller, UpstreamRequest};

/// Default caller used by the server binary
///
/// Holds one pooled client. Per-attempt timeouts are applied by the retry
/// engine, so the client itself has none.
#[derive(Debug, Clone)]
pub struct ReqwestCaller {
    client: reqwest::Client,
}

impl ReqwestCaller {
    pub fn new() -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| classify(&e))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl UpstreamCaller for ReqwestCaller {
    async fn call(&self, request: &UpstreamRequest) -> Result<GatewayResponse, UpstreamError> {
        tracing::debug!(url = %request.url, method = %request.method, "Calling upstream provider");

        let response = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(request.headers.clone())
            .body(request.body.clone())
            .send()
            .await
            .map_err(|e| classify(&e))?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| classify(&e))?;

        tracing::debug!(url = %request.url, status, bytes = body.len(), "Upstream replied");
        Ok(GatewayResponse::new(status, headers, body))
    }
}

fn classify(error: &reqwest::Error) -> UpstreamError {
    if error.is_connect() {
        return UpstreamError::Connect(error.to_string());
    }
    let name = if error.is_timeout() {
        "TimeoutError"
    } else if error.is_body() || error.is_decode() {
        "BodyError"
    } else if error.is_builder() {
        "BuilderError"
    } else {
        "RequestError"
    };
    UpstreamError::Network {
        message: error.to_string(),
        cause: error.source().map(ToString::to_string),
        name: name.to_string(),
    }
}
