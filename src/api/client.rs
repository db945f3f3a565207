//! reqwest-backed implementation of the auth endpoint boundary.
//!
//! Thin and mechanical: build the request, check the status, parse the
//! body. Classification of failures into the fault taxonomy happens here
//! so everything above this layer reasons in `AuthFault` terms only.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::AuthConfig;
use crate::error::AuthFault;

use super::{AuthApi, Identity, LoginRequest, LoginResponse, RefreshRequest, RefreshResponse};

/// Auth API client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpAuthApi {
    client: Client,
    base_url: String,
}

impl HttpAuthApi {
    pub fn new(config: &AuthConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Check if response is successful, mapping failures into the fault
    /// taxonomy with the response body attached.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, AuthFault> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(AuthFault::from_status(status, &body))
        }
    }

    async fn parse<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, AuthFault> {
        response.json().await.map_err(|e| AuthFault::Unknown {
            message: format!("invalid response body: {}", e),
        })
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, AuthFault> {
        debug!(username, "sending login request");
        let response = self
            .client
            .post(self.url("/auth/login"))
            .json(&LoginRequest { username, password })
            .send()
            .await?;
        let response = Self::check_response(response).await?;
        Self::parse(response).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, AuthFault> {
        debug!("sending refresh request");
        let response = self
            .client
            .post(self.url("/auth/refresh"))
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;
        let response = Self::check_response(response).await?;
        Self::parse(response).await
    }

    async fn me(&self, access_token: &str) -> Result<Identity, AuthFault> {
        debug!("fetching identity profile");
        let response = self
            .client
            .get(self.url("/auth/me"))
            .bearer_auth(access_token)
            .send()
            .await?;
        let response = Self::check_response(response).await?;
        Self::parse(response).await
    }

    async fn logout(&self, access_token: &str) -> Result<(), AuthFault> {
        debug!("sending logout request");
        let response = self
            .client
            .post(self.url("/auth/logout"))
            .bearer_auth(access_token)
            .json(&serde_json::json!({}))
            .send()
            .await?;
        Self::check_response(response).await?;
        Ok(())
    }
}
