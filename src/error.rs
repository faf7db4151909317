//! Failure taxonomy for the token lifecycle.

use crate::oauth::ExchangeError;
use chrono::Duration;
use thiserror::Error;

/// Why a valid token could not be produced.
///
/// The lifecycle manager never lets these escape [`refresh`] or
/// [`get_valid_token`]; they are logged and folded into `None`. The typed
/// form is available through `try_refresh` for callers that need to choose
/// between "restart the OAuth flow" and "try again later".
///
/// [`refresh`]: crate::token::TokenLifecycleManager::refresh
/// [`get_valid_token`]: crate::token::TokenLifecycleManager::get_valid_token
#[derive(Debug, Error)]
pub enum TokenError {
    /// Token store unreachable or returned unreadable data.
    #[error("token store failure: {0:#}")]
    Persistence(#[source] anyhow::Error),

    /// Network failure or timeout talking to the token endpoint.
    #[error("token endpoint unreachable: {0}")]
    ExchangeTransport(String),

    /// Token endpoint answered with a non-success status.
    #[error("token endpoint rejected the exchange with HTTP {status}: {body}")]
    ExchangeRejected { status: u16, body: String },

    /// Refresh token is past its validity window.
    #[error("refresh token is {} hours old; the OAuth flow must be restarted", .age.num_hours())]
    TokenTooOld { age: Duration },

    /// Store is empty.
    #[error("no token stored; the OAuth flow has not been completed")]
    NoToken,

    /// Current record carries no refresh token.
    #[error("current token record has no refresh token")]
    NoRefreshToken,
}

impl TokenError {
    /// True when only a human-driven authorization-code flow can recover.
    pub fn is_terminal(&self) -> bool {
        match self {
            TokenError::TokenTooOld { .. } | TokenError::NoToken | TokenError::NoRefreshToken => {
                true
            }
            TokenError::ExchangeRejected { status, .. } => is_credential_rejection(*status),
            TokenError::Persistence(_) | TokenError::ExchangeTransport(_) => false,
        }
    }

    /// Short label used in structured log fields.
    pub fn reason(&self) -> &'static str {
        match self {
            TokenError::Persistence(_) => "persistence_error",
            TokenError::ExchangeTransport(_) => "exchange_transport_error",
            TokenError::ExchangeRejected { .. } => "exchange_rejected",
            TokenError::TokenTooOld { .. } => "token_too_old",
            TokenError::NoToken => "no_token",
            TokenError::NoRefreshToken => "no_refresh_token",
        }
    }
}

impl From<ExchangeError> for TokenError {
    fn from(err: ExchangeError) -> Self {
        match err {
            ExchangeError::Rejected { status, body } => TokenError::ExchangeRejected { status, body },
            other => TokenError::ExchangeTransport(other.to_string()),
        }
    }
}

// Shared with callers that joined a failed refresh. The persistence source
// chain is flattened into one message.
impl Clone for TokenError {
    fn clone(&self) -> Self {
        match self {
            TokenError::Persistence(e) => TokenError::Persistence(anyhow::anyhow!("{:#}", e)),
            TokenError::ExchangeTransport(msg) => TokenError::ExchangeTransport(msg.clone()),
            TokenError::ExchangeRejected { status, body } => TokenError::ExchangeRejected {
                status: *status,
                body: body.clone(),
            },
            TokenError::TokenTooOld { age } => TokenError::TokenTooOld { age: *age },
            TokenError::NoToken => TokenError::NoToken,
            TokenError::NoRefreshToken => TokenError::NoRefreshToken,
        }
    }
}

/// 400/401 from the token endpoint means the grant itself was refused.
pub fn is_credential_rejection(status: u16) -> bool {
    matches!(status, 400 | 401)
}
