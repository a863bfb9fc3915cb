//! Upstream provider collaborators
//!
//! The routing engine never speaks HTTP itself. A [`BodyTransformer`] turns
//! the canonical request into a provider request and an [`UpstreamCaller`]
//! performs it.

pub mod client;
pub mod transform;

pub use client::ReqwestCaller;
pub use transform::{BodyTransformer, PassthroughTransformer, TransformInput};

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method};

use crate::error::UpstreamError;
use crate::response::GatewayResponse;

/// A fully built provider request
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub url: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Performs one physical upstream call
///
/// Implementations must not retry; the retry engine owns that. Any reply,
/// including non-2xx, is `Ok`. Only transport failures are errors.
#[async_trait]
pub trait UpstreamCaller: Send + Sync {
    async fn call(&self, request: &UpstreamRequest) -> Result<GatewayResponse, UpstreamError>;
}
