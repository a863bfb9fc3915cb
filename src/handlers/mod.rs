//! HTTP request handlers for the Switchboard API

use axum::{
    Router, middleware,
    routing::{any, get},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::error::AppResult;
use crate::gateway::Gateway;
use crate::metrics::Metrics;
use crate::middleware::request_id_middleware;
use crate::saved_configs::SavedConfigRegistry;
use crate::upstream::PassthroughTransformer;

pub mod health;
pub mod metrics;
pub mod proxy;

/// Application state shared across all handlers
///
/// All fields are Arc'd (the gateway internally) for cheap cloning across
/// Axum handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    gateway: Gateway,
    saved_configs: Arc<SavedConfigRegistry>,
}

impl AppState {
    /// Create the production state: `reqwest` upstream, pass-through
    /// transformer over the configured providers, in-memory stores
    ///
    /// # Errors
    ///
    /// Fails when metrics registration or HTTP client construction fails, or
    /// when a saved routing document cannot be loaded.
    pub fn new(config: Arc<Config>) -> AppResult<Self> {
        let gateway = Gateway::builder()
            .transformer(Arc::new(PassthroughTransformer::new(
                config.provider_base_urls(),
            )))
            .retry_settings(config.retry)
            .sticky_ttl(std::time::Duration::from_secs(
                config.sticky_session.default_ttl_seconds,
            ))
            .default_guardrails(
                config.guardrails.default_input.clone(),
                config.guardrails.default_output.clone(),
            )
            .build()?;

        let saved_configs = match &config.saved_configs.dir {
            Some(dir) => SavedConfigRegistry::load_dir(dir)?,
            None => SavedConfigRegistry::new(),
        };
        tracing::info!(saved_configs = saved_configs.len(), "Application state ready");

        Ok(Self::with_gateway(config, gateway, saved_configs))
    }

    /// Assemble state from prebuilt parts
    pub fn with_gateway(
        config: Arc<Config>,
        gateway: Gateway,
        saved_configs: SavedConfigRegistry,
    ) -> Self {
        Self {
            config,
            gateway,
            saved_configs: Arc::new(saved_configs),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn metrics(&self) -> &Metrics {
        self.gateway.metrics()
    }

    pub fn saved_configs(&self) -> &SavedConfigRegistry {
        &self.saved_configs
    }
}

/// HTTP routes: health, metrics and the `/v1/*` gateway surface
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::handler))
        .route("/metrics", get(metrics::handler))
        .route("/v1/{*path}", any(proxy::handler))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
