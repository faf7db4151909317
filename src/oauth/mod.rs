//! OAuth 2.0 exchanges against the brokerage token endpoint.
//!
//! Two grants are supported:
//! 1. `authorization_code`: the one-time exchange after the user completes
//!    the provider's consent screen (produces the first token pair)
//! 2. `refresh_token`: every later exchange, driven by the lifecycle manager
//!
//! Neither exchange retries; retry policy belongs to the scheduler.

mod exchange;
mod provider;

pub use exchange::OAuthExchangeClient;
pub use provider::{build_authorization_url, AuthorizeUrlError};

use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use thiserror::Error;

/// Token endpoint response.
///
/// Accepts both the standard snake_case field names and camelCase variants.
#[derive(Clone, Default, Deserialize, PartialEq, Eq)]
pub struct TokenResponse {
    #[serde(alias = "accessToken")]
    pub access_token: String,
    #[serde(default, alias = "refreshToken")]
    pub refresh_token: Option<String>,
    #[serde(default, alias = "expiresIn")]
    pub expires_in: Option<i64>,
    #[serde(default, alias = "tokenType")]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default, alias = "idToken")]
    pub id_token: Option<String>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Failure of a single token endpoint exchange.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Connection failure before a response arrived.
    #[error("token request failed: {0}")]
    Transport(String),

    /// No response within the configured timeout.
    #[error("token request timed out")]
    Timeout,

    /// Non-2xx response; status and raw body are kept for diagnostics.
    #[error("token endpoint returned HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    /// 2xx response whose body is not a usable token response.
    #[error("invalid token response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ExchangeError::Timeout
        } else {
            ExchangeError::Transport(err.to_string())
        }
    }
}

/// The two grants the lifecycle manager needs from the provider.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn exchange_authorization_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse, ExchangeError>;

    async fn exchange_refresh_token(&self, refresh_token: &str)
        -> Result<TokenResponse, ExchangeError>;
}
