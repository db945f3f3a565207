//! Bearer token claim decoding and expiry math.
//!
//! Tokens are opaque three-segment strings whose middle segment carries
//! self-describing claims (issued-at, expiry). The codec decodes without
//! verifying the signature - the server remains the authority; the client
//! only uses the claims to schedule refreshes and avoid sending tokens it
//! already knows are dead. Malformed input decodes to `None`, never an
//! error.

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

/// Decoded token claims. Absence of a claim means "treat as already
/// expired" - a token we cannot reason about is not worth trusting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claims {
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct RawClaims {
    #[serde(default)]
    iat: Option<i64>,
    #[serde(default)]
    exp: Option<i64>,
}

impl Claims {
    /// Whether the token expires within `buffer` from now (or already has).
    /// A missing expiry claim counts as expired.
    pub fn is_expired(&self, buffer: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => {
                let remaining = (expires_at - Utc::now()).num_seconds();
                remaining <= buffer.as_secs() as i64
            }
            None => true,
        }
    }

    /// Delay until the midpoint of the validity window, the point at which
    /// a proactive refresh should fire. Returns `late_delay` when the
    /// midpoint has already passed or the issue time is unknown, and
    /// `None` when there is no expiry to schedule against.
    pub fn refresh_delay(&self, late_delay: Duration) -> Option<Duration> {
        let expires_at = self.expires_at?;
        let Some(issued_at) = self.issued_at else {
            return Some(late_delay);
        };
        let midpoint = issued_at + (expires_at - issued_at) / 2;
        let until = (midpoint - Utc::now()).num_milliseconds();
        if until <= 0 {
            Some(late_delay)
        } else {
            Some(Duration::from_millis(until as u64))
        }
    }
}

/// Decode the claims segment of a bearer token.
///
/// Returns `None` on any malformed input: wrong segment count, invalid
/// base64url, or a payload that is not a JSON object with numeric
/// timestamp claims.
pub fn decode(token: &str) -> Option<Claims> {
    let mut segments = token.split('.');
    let (_, payload, _) = (segments.next()?, segments.next()?, segments.next()?);
    if segments.next().is_some() {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let raw: RawClaims = serde_json::from_slice(&bytes).ok()?;

    Some(Claims {
        issued_at: raw.iat.and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        expires_at: raw.exp.and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
    })
}

/// Whether a token should be treated as expired. `None`, undecodable, and
/// expiry-less tokens are all expired.
pub fn is_expired(token: Option<&str>, buffer: Duration) -> bool {
    match token.and_then(decode) {
        Some(claims) => claims.is_expired(buffer),
        None => true,
    }
}

/// Proactive refresh delay for a token, per [`Claims::refresh_delay`].
pub fn proactive_refresh_delay(token: &str, late_delay: Duration) -> Option<Duration> {
    decode(token)?.refresh_delay(late_delay)
}
