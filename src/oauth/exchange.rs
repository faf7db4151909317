//! HTTP client for the provider's token endpoint.

use super::{ExchangeError, TokenExchange, TokenResponse};
use crate::config::OAuthConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use std::time::Duration;
use tracing::debug;

/// Performs token exchanges with HTTP Basic client authentication.
///
/// Every request is bounded by the configured timeout; a timeout surfaces as
/// [`ExchangeError::Timeout`] like any other exchange failure.
pub struct OAuthExchangeClient {
    http: reqwest::Client,
    token_url: String,
    basic_credentials: String,
}

impl OAuthExchangeClient {
    /// Builds a client from the OAuth settings, using their request timeout.
    pub fn new(config: &OAuthConfig) -> Result<Self> {
        Self::with_timeout(config, config.request_timeout())
    }

    pub fn with_timeout(config: &OAuthConfig, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build token endpoint HTTP client")?;

        Ok(Self {
            http,
            token_url: config.token_url.clone(),
            basic_credentials: basic_credentials(&config.client_id, &config.client_secret),
        })
    }

    async fn post_form(&self, form: &[(&str, &str)]) -> Result<TokenResponse, ExchangeError> {
        let response = self
            .http
            .post(&self.token_url)
            .header(AUTHORIZATION, format!("Basic {}", self.basic_credentials))
            .header(ACCEPT, "application/json")
            .form(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ExchangeError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse =
            serde_json::from_str(&body).map_err(|e| ExchangeError::Decode(e.to_string()))?;

        if token.access_token.trim().is_empty() {
            return Err(ExchangeError::Decode(
                "response carried an empty access_token".to_string(),
            ));
        }

        debug!(
            has_refresh_token = token.refresh_token.is_some(),
            expires_in = ?token.expires_in,
            "Token exchange successful"
        );

        Ok(token)
    }
}

#[async_trait]
impl TokenExchange for OAuthExchangeClient {
    async fn exchange_authorization_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse, ExchangeError> {
        // Codes arrive percent-encoded (e.g. a trailing "%40"); the endpoint
        // expects the decoded value.
        let decoded = urlencoding::decode(code)
            .map(|c| c.into_owned())
            .unwrap_or_else(|_| code.to_string());

        debug!(token_url = %self.token_url, "Exchanging authorization code");

        self.post_form(&[
            ("grant_type", "authorization_code"),
            ("code", decoded.as_str()),
            ("redirect_uri", redirect_uri),
        ])
        .await
    }

    async fn exchange_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<TokenResponse, ExchangeError> {
        debug!(token_url = %self.token_url, "Exchanging refresh token");

        self.post_form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }
}

fn basic_credentials(client_id: &str, client_secret: &str) -> String {
    BASE64.encode(format!("{}:{}", client_id, client_secret))
}
