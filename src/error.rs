//! Error types for Switchboard
//!
//! `AppError` is the server-facing error and implements `IntoResponse` for Axum
//! handlers. The engine-level errors below it never escape a request: the
//! resolver converts them into gateway responses at the boundary.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read config file {path}: {source}")]
    ConfigFileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ConfigParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration in {path}: {reason}")]
    ConfigValidationFailed { path: String, reason: String },

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Invalid routing config: {0}")]
    RoutingConfig(#[from] ConfigError),

    #[error("Unknown saved config '{0}'")]
    UnknownSavedConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::RoutingConfig(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            Self::UnknownSavedConfig(_) => (StatusCode::NOT_FOUND, self.to_string()),
            Self::Config(msg) | Self::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone())
            }
            Self::ConfigFileRead { .. }
            | Self::ConfigParseFailed { .. }
            | Self::ConfigValidationFailed { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

/// Convenience type alias for Results
pub type AppResult<T> = Result<T, AppError>;

/// Rejections raised while parsing a routing document
///
/// `path` always names the offending node in `config.targets[i]` form so the
/// caller can find it in a deeply nested tree.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("routing config is not valid: {0}")]
    Malformed(String),

    #[error("target at {path} must define either a provider or a strategy with targets")]
    MissingProvider { path: String },

    #[error("strategy at {path} has no targets")]
    EmptyTargets { path: String },

    #[error("unknown strategy mode '{mode}' at {path}")]
    UnknownMode { path: String, mode: String },

    #[error("conditional strategy at {path} requires at least one condition")]
    MissingConditions { path: String },

    #[error("retry attempts at {path} must be at most {max}, got {got}")]
    RetryAttempts { path: String, got: u32, max: u32 },
}

/// Routing failures that surface to the caller as a 400
///
/// These propagate unchanged through fallback loops: a misrouted request is
/// a client problem, and trying the next target would not fix it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("no conditions passed and no default target was specified")]
    NoMatch,

    #[error("conditional target '{0}' does not exist")]
    UnknownTarget(String),

    #[error("invalid conditional query: {0}")]
    InvalidQuery(String),
}

/// Failures talking to a shared counter or key-value store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("stored value for '{key}' is corrupt: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Transport failures from an upstream provider call
///
/// HTTP error statuses are not errors here; they come back as responses.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("connection to upstream failed: {0}")]
    Connect(String),

    #[error("{message}")]
    Network {
        message: String,
        cause: Option<String>,
        name: String,
    },
}

/// Failures building the upstream request or reading the provider reply
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("no base URL known for provider '{0}'")]
    UnknownProvider(String),

    #[error("invalid header '{0}'")]
    InvalidHeader(String),

    #[error("failed to encode request body: {0}")]
    Encode(String),
}

/// Failures inside a single guardrail or mutator check
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckError {
    #[error("unknown check '{0}'")]
    UnknownCheck(String),

    #[error("invalid parameters for check '{id}': {reason}")]
    InvalidParameters { id: String, reason: String },

    #[error("check '{id}' failed to run: {reason}")]
    Execution { id: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_response_status() {
        let err = AppError::Validation("test".to_string());
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_routing_config_error_maps_to_bad_request() {
        let err: AppError = ConfigError::EmptyTargets {
            path: "config".to_string(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Invalid routing config: strategy at config has no targets"
        );
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_unknown_saved_config_is_not_found() {
        let err = AppError::UnknownSavedConfig("prod-routing".to_string());
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_internal_error_response_status() {
        let err = AppError::Internal("unexpected state".to_string());
        assert_eq!(err.to_string(), "Internal error: unexpected state");
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_config_file_read_keeps_source() {
        use std::error::Error as _;
        let err = AppError::ConfigFileRead {
            path: "missing.toml".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        };
        assert!(err.to_string().contains("missing.toml"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_router_error_messages() {
        assert_eq!(
            RouterError::UnknownTarget("cheap".to_string()).to_string(),
            "conditional target 'cheap' does not exist"
        );
        assert_eq!(
            RouterError::NoMatch.to_string(),
            "no conditions passed and no default target was specified"
        );
    }
}
