//! Retry and timeout engine for a single upstream target
//!
//! Wraps one provider call in a bounded retry loop:
//! - every attempt runs under an optional per-attempt timeout that turns into
//!   a synthesized 408
//! - retryable statuses are retried with deterministic exponential backoff
//! - a 429 carrying a Retry-After hint waits for the hint instead, within a
//!   global wait budget, and backoff is switched off afterwards
//! - transport errors become 503 (connect) or 500 (other) responses so callers
//!   only ever see responses
//!
//! The engine never returns an error: exhaustion returns the last response.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use crate::error::UpstreamError;
use crate::response::GatewayResponse;

/// Statuses retried when a policy does not list its own
pub const DEFAULT_RETRY_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];
/// Upper bound for `retry.attempts` in a routing document
pub const MAX_RETRY_ATTEMPTS: u32 = 5;
/// Default ceiling for the sum of all Retry-After waits within one engine run
pub const DEFAULT_MAX_RETRY_AFTER_MS: u64 = 60_000;
/// Default base backoff in milliseconds
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;
/// Default backoff growth factor
pub const DEFAULT_BACKOFF_FACTOR: u32 = 2;
/// Maximum single backoff wait in milliseconds
pub const MAX_BACKOFF_MS: u64 = 30_000;

/// Retry-After style headers, most precise first
const RETRY_AFTER_HEADERS: [(&str, RetryAfterUnit); 3] = [
    ("retry-after-ms", RetryAfterUnit::Millis),
    ("x-ms-retry-after-ms", RetryAfterUnit::Millis),
    ("retry-after", RetryAfterUnit::Seconds),
];

#[derive(Debug, Clone, Copy)]
enum RetryAfterUnit {
    Millis,
    Seconds,
}

/// Per-target retry policy from a routing document
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default)]
    attempts: u32,
    #[serde(default, alias = "onStatusCodes")]
    on_status_codes: Option<Vec<u16>>,
    #[serde(default, alias = "useRetryAfterHeader")]
    use_retry_after_header: bool,
}

impl RetryPolicy {
    pub fn new(
        attempts: u32,
        on_status_codes: Option<Vec<u16>>,
        use_retry_after_header: bool,
    ) -> Self {
        Self {
            attempts,
            on_status_codes,
            use_retry_after_header,
        }
    }

    /// Retries allowed after the first call
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn on_status_codes(&self) -> Option<&[u16]> {
        self.on_status_codes.as_deref()
    }

    pub fn use_retry_after_header(&self) -> bool {
        self.use_retry_after_header
    }

    pub fn is_retryable(&self, status: u16) -> bool {
        match self.on_status_codes() {
            Some(codes) if !codes.is_empty() => codes.contains(&status),
            _ => DEFAULT_RETRY_STATUS_CODES.contains(&status),
        }
    }
}

/// Process-wide retry tuning from the `[retry]` config section
///
/// Deserialisation goes through [`RawRetrySettings`] so out-of-range values
/// are rejected while the TOML is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRetrySettings")]
pub struct RetrySettings {
    max_retry_after_ms: u64,
    backoff_base_ms: u64,
    backoff_factor: u32,
}

#[derive(Deserialize)]
struct RawRetrySettings {
    #[serde(default = "default_max_retry_after_ms")]
    max_retry_after_ms: u64,
    #[serde(default = "default_backoff_base_ms")]
    backoff_base_ms: u64,
    #[serde(default = "default_backoff_factor")]
    backoff_factor: u32,
}

impl TryFrom<RawRetrySettings> for RetrySettings {
    type Error = String;

    fn try_from(raw: RawRetrySettings) -> Result<Self, Self::Error> {
        if raw.max_retry_after_ms == 0 {
            return Err("retry.max_retry_after_ms must be greater than 0".to_string());
        }
        if raw.backoff_factor == 0 {
            return Err("retry.backoff_factor must be at least 1".to_string());
        }
        if raw.backoff_base_ms > MAX_BACKOFF_MS {
            return Err(format!(
                "retry.backoff_base_ms cannot exceed {}ms, got {}",
                MAX_BACKOFF_MS, raw.backoff_base_ms
            ));
        }
        Ok(Self {
            max_retry_after_ms: raw.max_retry_after_ms,
            backoff_base_ms: raw.backoff_base_ms,
            backoff_factor: raw.backoff_factor,
        })
    }
}

fn default_max_retry_after_ms() -> u64 {
    DEFAULT_MAX_RETRY_AFTER_MS
}

fn default_backoff_base_ms() -> u64 {
    DEFAULT_BACKOFF_BASE_MS
}

fn default_backoff_factor() -> u32 {
    DEFAULT_BACKOFF_FACTOR
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retry_after_ms: DEFAULT_MAX_RETRY_AFTER_MS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
        }
    }
}

impl RetrySettings {
    pub fn new(max_retry_after_ms: u64, backoff_base_ms: u64, backoff_factor: u32) -> Self {
        Self {
            max_retry_after_ms,
            backoff_base_ms,
            backoff_factor,
        }
    }

    pub fn max_retry_after_ms(&self) -> u64 {
        self.max_retry_after_ms
    }

    pub fn backoff_base_ms(&self) -> u64 {
        self.backoff_base_ms
    }

    pub fn backoff_factor(&self) -> u32 {
        self.backoff_factor
    }
}

/// Calculate exponential backoff with overflow protection
///
/// `base * factor^(retry-1)`, capped at [`MAX_BACKOFF_MS`]. `retry` is 1-indexed.
///
/// With the defaults (base 1000ms, factor 2):
/// - Retry 1: 1000ms
/// - Retry 2: 2000ms
/// - Retry 3: 4000ms
/// - Retry 6+: 30,000ms (capped)
pub fn calculate_backoff(settings: &RetrySettings, retry: u32) -> u64 {
    let exponent = retry.saturating_sub(1);
    settings
        .backoff_base_ms
        .saturating_mul(u64::from(settings.backoff_factor).saturating_pow(exponent))
        .min(MAX_BACKOFF_MS)
}

/// Read a Retry-After hint in milliseconds from response headers
pub fn parse_retry_after(headers: &http::HeaderMap) -> Option<u64> {
    RETRY_AFTER_HEADERS.iter().find_map(|(name, unit)| {
        let raw = headers.get(*name)?.to_str().ok()?.trim();
        let value: f64 = raw.parse().ok()?;
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        let millis = match unit {
            RetryAfterUnit::Millis => value,
            RetryAfterUnit::Seconds => value * 1000.0,
        };
        Some(millis.ceil() as u64)
    })
}

/// What a retry engine run produced
#[derive(Debug, Clone)]
pub struct RetryOutcome {
    pub response: GatewayResponse,
    /// Retries that preceded the successful attempt; `None` when no attempt succeeded
    pub retries_before_success: Option<u32>,
    /// Upstream calls actually made
    pub attempts_made: u32,
    /// `true` when a Retry-After hint exceeded the wait budget and retrying stopped
    pub retry_after_skipped: bool,
}

impl RetryOutcome {
    /// Value for the retry-count response header
    pub fn attempt_count_header(&self) -> String {
        self.retries_before_success
            .map(i64::from)
            .unwrap_or(-1)
            .to_string()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetryEngine {
    settings: RetrySettings,
}

impl RetryEngine {
    pub fn new(settings: RetrySettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &RetrySettings {
        &self.settings
    }

    /// Run `call` up to `policy.attempts() + 1` times
    ///
    /// `call` must produce a fresh future for every attempt.
    pub async fn execute<F, Fut>(
        &self,
        policy: &RetryPolicy,
        timeout: Option<Duration>,
        mut call: F,
    ) -> RetryOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<GatewayResponse, UpstreamError>>,
    {
        let total_attempts = policy.attempts().saturating_add(1);
        let mut retry_after_spent_ms: u64 = 0;
        let mut backoff_enabled = true;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let response = attempt_once(call(), timeout).await;
            let status = response.status();

            if !policy.is_retryable(status) {
                let succeeded = (200..=204).contains(&status);
                if !succeeded {
                    tracing::debug!(
                        status,
                        attempt,
                        "Non-retryable status, returning response without further attempts"
                    );
                }
                return RetryOutcome {
                    response,
                    retries_before_success: succeeded.then_some(attempt - 1),
                    attempts_made: attempt,
                    retry_after_skipped: false,
                };
            }

            if attempt >= total_attempts {
                tracing::warn!(
                    status,
                    attempts = attempt,
                    "All retry attempts exhausted, returning last response"
                );
                return RetryOutcome {
                    response,
                    retries_before_success: None,
                    attempts_made: attempt,
                    retry_after_skipped: false,
                };
            }

            let mut delay_ms = if backoff_enabled {
                calculate_backoff(&self.settings, attempt)
            } else {
                0
            };

            if status == 429 && policy.use_retry_after_header() {
                if let Some(hint_ms) = parse_retry_after(response.headers()) {
                    let remaining = self
                        .settings
                        .max_retry_after_ms
                        .saturating_sub(retry_after_spent_ms);
                    if hint_ms >= remaining {
                        tracing::warn!(
                            retry_after_ms = hint_ms,
                            remaining_budget_ms = remaining,
                            attempt,
                            "Retry-After exceeds remaining wait budget, skipping further retries"
                        );
                        return RetryOutcome {
                            response,
                            retries_before_success: None,
                            attempts_made: attempt,
                            retry_after_skipped: true,
                        };
                    }
                    retry_after_spent_ms += hint_ms;
                    delay_ms = hint_ms;
                    backoff_enabled = false;
                }
            }

            tracing::debug!(
                status,
                attempt,
                max_attempts = total_attempts,
                delay_ms,
                "Retrying upstream call"
            );
            if delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }
}

async fn attempt_once<Fut>(call: Fut, timeout: Option<Duration>) -> GatewayResponse
where
    Fut: Future<Output = Result<GatewayResponse, UpstreamError>>,
{
    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_elapsed) => {
                tracing::warn!(
                    timeout_ms = limit.as_millis() as u64,
                    "Upstream attempt timed out"
                );
                return timeout_response(limit);
            }
        },
        None => call.await,
    };

    match result {
        Ok(response) => response,
        Err(UpstreamError::Connect(message)) => {
            tracing::warn!(error = %message, "Upstream connection failed");
            GatewayResponse::new(503, http::HeaderMap::new(), message)
        }
        Err(UpstreamError::Network {
            message,
            cause,
            name,
        }) => {
            tracing::warn!(error = %message, name = %name, "Upstream request failed");
            GatewayResponse::json(
                500,
                &serde_json::json!({
                    "message": message,
                    "cause": cause,
                    "name": name,
                }),
            )
        }
    }
}

fn timeout_response(limit: Duration) -> GatewayResponse {
    let millis = limit.as_millis();
    GatewayResponse::json(
        408,
        &serde_json::json!({
            "error": {
                "message": format!("Request exceeded the timeout sent in the request: {}ms", millis),
                "type": "timeout_error",
                "param": null,
                "code": null,
            }
        }),
    )
}
