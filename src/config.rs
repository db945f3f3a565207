//! Library configuration.
//!
//! `AuthConfig` collects the tunables of the session layer: the base URL
//! the `/auth/*` endpoints live under, timeouts, and the expiry buffer
//! applied when deciding whether a token is still usable.

use std::time::Duration;

use crate::error::RetryPolicy;

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Seconds before the server-side expiry at which a token is already
/// treated as expired. Avoids dispatching a request with a token that
/// expires mid-flight.
const EXPIRY_BUFFER_SECS: u64 = 60;

/// Delay used when a token's refresh midpoint has already passed.
/// A fixed short delay instead of zero avoids refresh storms on tokens
/// decoded long after issuance.
const LATE_REFRESH_DELAY_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Base URL the auth endpoints are resolved against, without a
    /// trailing slash (e.g. `https://api.example.com`).
    pub base_url: String,
    pub request_timeout: Duration,
    pub expiry_buffer: Duration,
    pub late_refresh_delay: Duration,
    /// Bounded retry applied to the login sequence only.
    pub login_retry: RetryPolicy,
}

impl AuthConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            expiry_buffer: Duration::from_secs(EXPIRY_BUFFER_SECS),
            late_refresh_delay: Duration::from_secs(LATE_REFRESH_DELAY_SECS),
            login_retry: RetryPolicy::default(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new("")
    }
}
