//! The `/auth/*` endpoint boundary.
//!
//! `AuthApi` is the seam between the session layer and the transport:
//! the controller only ever talks to this trait, so tests script it and
//! the production build plugs in [`HttpAuthApi`]. All bodies are JSON.

pub mod client;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AuthFault;

pub use client::HttpAuthApi;

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
    /// Servers may rotate the refresh token; absent means keep the old one.
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Identity profile returned by `GET /auth/me`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Identity {
    #[serde(alias = "userId", alias = "user_id")]
    pub id: String,
    #[serde(alias = "displayName", default)]
    pub display_name: String,
    #[serde(default)]
    pub role: Option<String>,
}

/// The four auth endpoints the session layer consumes.
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, AuthFault>;
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, AuthFault>;
    async fn me(&self, access_token: &str) -> Result<Identity, AuthFault>;
    async fn logout(&self, access_token: &str) -> Result<(), AuthFault>;
}
