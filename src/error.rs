//! Fault taxonomy and retry policy.
//!
//! Every failure raised inside the session layer is mapped into the
//! closed [`AuthFault`] set. The kind decides everything downstream:
//! whether the login sequence retries, whether the controller tears the
//! session down, and which message the user sees. Classification is
//! conservative - `InvalidCredentials` only ever comes from an explicit
//! status code, never from matching error text, since that kind gates
//! retry and forces teardown.

use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;
use tracing::warn;

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Initial backoff delay for retried login attempts.
const RETRY_BASE_DELAY_MS: u64 = 1000;

/// Backoff ceiling. Login is interactive; waiting longer than this just
/// looks like a hang.
const RETRY_MAX_DELAY_MS: u64 = 10_000;

/// Total attempts for the login sequence (1 initial + 2 retries).
const RETRY_MAX_ATTEMPTS: u32 = 3;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthFault {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("server error ({status})")]
    ServerError { status: u16 },

    #[error("network error: {message}")]
    NetworkError { message: String },

    #[error("request timed out")]
    Timeout,

    #[error("{message}")]
    Unknown { message: String },
}

impl AuthFault {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            format!(
                "{}... (truncated, {} total bytes)",
                &body[..MAX_ERROR_BODY_LENGTH],
                body.len()
            )
        }
    }

    /// Classify an HTTP status on an auth-intent call.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        match status.as_u16() {
            401 | 403 => AuthFault::InvalidCredentials,
            500..=599 => AuthFault::ServerError {
                status: status.as_u16(),
            },
            code => AuthFault::Unknown {
                message: format!("status {}: {}", code, Self::truncate_body(body)),
            },
        }
    }

    /// Classify a transport-level failure (no HTTP status available).
    /// Prefers reqwest's structured predicates, then falls back to
    /// matching the error text, since the transport does not always
    /// expose a structured cause.
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            return AuthFault::Timeout;
        }
        if err.is_connect() {
            return AuthFault::NetworkError {
                message: err.to_string(),
            };
        }
        Self::from_message(&err.to_string())
    }

    /// Textual-pattern classification for faults lacking a status code.
    /// Never yields `InvalidCredentials` - that kind requires an explicit
    /// status.
    pub fn from_message(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("timeout") || lower.contains("timed out") || lower.contains("abort") {
            AuthFault::Timeout
        } else if lower.contains("network")
            || lower.contains("connection")
            || lower.contains("dns")
            || lower.contains("fetch")
        {
            AuthFault::NetworkError {
                message: message.to_string(),
            }
        } else {
            AuthFault::Unknown {
                message: message.to_string(),
            }
        }
    }

    /// Whether the bounded login retry may try again on this fault.
    /// A stale refresh token or bad password will not become valid by
    /// retrying; only transport-shaped faults qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthFault::NetworkError { .. } | AuthFault::Timeout)
    }

    /// Human-readable message for surfacing to the user, keyed by kind.
    pub fn user_message(&self) -> &'static str {
        match self {
            AuthFault::InvalidCredentials => "Invalid username or password.",
            AuthFault::ServerError { .. } => "The server hit an internal error. Try again shortly.",
            AuthFault::NetworkError { .. } => "Could not reach the server. Check your connection.",
            AuthFault::Timeout => "The request timed out. Try again.",
            AuthFault::Unknown { .. } => "Something went wrong. Try again.",
        }
    }
}

impl From<reqwest::Error> for AuthFault {
    fn from(err: reqwest::Error) -> Self {
        AuthFault::from_transport(&err)
    }
}

/// Exponential backoff for the login sequence: 1s, 2s, 4s... capped at
/// 10s, at most 3 attempts, and only for retryable faults. Refresh is
/// never routed through this - see the session controller.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub factor: u32,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: RETRY_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(RETRY_BASE_DELAY_MS),
            factor: 2,
            max_delay: Duration::from_millis(RETRY_MAX_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay after the given 1-based attempt number.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self
            .base_delay
            .saturating_mul(self.factor.saturating_pow(attempt.saturating_sub(1)));
        scaled.min(self.max_delay)
    }

    /// Run `op`, retrying retryable faults with backoff until the attempt
    /// budget is spent. The final fault is returned as-is.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, AuthFault>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, AuthFault>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(fault) if fault.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        fault = %fault,
                        "transient fault, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(fault) => return Err(fault),
            }
        }
    }
}
