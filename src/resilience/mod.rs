//! Resilience primitives applied around upstream targets
//!
//! - `retry`: bounded retry/timeout loop around a single provider call
//! - `circuit_breaker`: shared per-path failure tracking that removes
//!   unhealthy targets from selection

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerScope, CircuitBreakerStatus, Clock,
    ManualClock, PathStatusMap, SystemClock,
};
pub use retry::{RetryEngine, RetryOutcome, RetryPolicy, RetrySettings};
