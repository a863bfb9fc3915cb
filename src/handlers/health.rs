//! Health check endpoint
//!
//! Provides a simple health check for monitoring and load balancers.

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use crate::handlers::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: &'static str,
    /// Background work status: "operational" or "degraded"
    pub background_tasks_status: &'static str,
    /// Background tasks still running
    pub pending_background_tasks: usize,
}

/// Health check handler
///
/// Returns 200 OK with service status. Background work is "degraded" once
/// any async hook or circuit breaker recording task has panicked.
pub async fn handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let failures = state.metrics().background_task_failures_count();
    let background_tasks_status = if failures > 0 { "degraded" } else { "operational" };

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "OK",
            background_tasks_status,
            pending_background_tasks: state.gateway().tasks().pending(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::metrics::BackgroundTask;
    use std::str::FromStr;
    use std::sync::Arc;

    fn create_test_state() -> AppState {
        let config = Config::from_str("[server]\nhost = \"127.0.0.1\"\nport = 3000\n")
            .expect("should parse test config");
        AppState::new(Arc::new(config)).expect("should create AppState")
    }

    #[tokio::test]
    async fn test_health_handler_returns_ok() {
        let state = create_test_state();
        let (status, Json(body)) = handler(State(state)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "OK");
        assert_eq!(body.background_tasks_status, "operational");
        assert_eq!(body.pending_background_tasks, 0);
    }

    #[tokio::test]
    async fn test_health_handler_shows_degraded_after_task_panic() {
        let state = create_test_state();
        state
            .gateway()
            .tasks()
            .spawn(BackgroundTask::AsyncHooks, async { panic!("boom") });
        state.gateway().tasks().wait_idle().await;

        let (status, Json(body)) = handler(State(state)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.background_tasks_status, "degraded");
    }
}
