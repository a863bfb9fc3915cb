//! Switchboard - AI provider gateway routing and resilience engine
//!
//! Resolves a declarative routing document (fallback chains, weighted load
//! balancing with sticky sessions, conditional routing) against a request,
//! wrapping each provider call with retries, circuit breaking and guardrail
//! hooks.

pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod hooks;
pub mod metrics;
pub mod middleware;
pub mod request;
pub mod resilience;
pub mod response;
pub mod routing;
pub mod saved_configs;
pub mod sticky;
pub mod store;
pub mod tasks;
pub mod telemetry;
pub mod upstream;
