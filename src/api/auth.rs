//! Interactive OAuth flow endpoints.
//!
//! 1. Operator opens GET /api/auth/initiate (or fetches the URL from
//!    GET /api/auth/authorization-url)
//! 2. Provider login and consent
//! 3. Provider redirects to GET /api/auth/callback?code=..
//! 4. Code is exchanged and the first token pair is stored

use super::{AppError, AppState};
use crate::error::TokenError;
use crate::oauth::{build_authorization_url, AuthorizeUrlError};
use axum::{
    extract::{Query, State},
    response::{Json, Redirect},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

pub(super) fn create_auth_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/auth/authorization-url", get(authorization_url))
        .route("/api/auth/initiate", get(initiate))
        .route("/api/auth/redirect", get(initiate))
        .route("/api/auth/callback", get(callback))
        .with_state(state)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizationUrlResponse {
    authorization_url: String,
    instructions: Instructions,
    token_lifecycle: TokenLifecycleInfo,
}

#[derive(Serialize)]
struct Instructions {
    step1: &'static str,
    step2: &'static str,
    step3: &'static str,
    step4: &'static str,
    step5: &'static str,
}

const INSTRUCTIONS: Instructions = Instructions {
    step1: "Visit the authorization URL to begin the three-legged OAuth flow",
    step2: "Log in on the provider's login page",
    step3: "After consent and grant, the provider redirects back with an authorization code",
    step4: "The authorization code is exchanged for access and refresh tokens automatically",
    step5: "The refresh scheduler keeps the access token fresh from then on",
};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenLifecycleInfo {
    access_token_valid_minutes: i64,
    refresh_token_valid_days: i64,
    automatic_refresh_before_expiry_minutes: u64,
}

impl TokenLifecycleInfo {
    fn from_state(state: &AppState) -> Self {
        Self {
            access_token_valid_minutes: state.config.provider.access_token_validity_minutes,
            refresh_token_valid_days: state.config.provider.refresh_token_validity_days,
            automatic_refresh_before_expiry_minutes: state
                .config
                .refresh
                .refresh_before_expiry_minutes,
        }
    }
}

/// OAuth callback query parameters
#[derive(Deserialize)]
struct CallbackParams {
    code: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CallbackResponse {
    message: &'static str,
    token_info: CallbackTokenInfo,
    background_service: BackgroundServiceInfo,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CallbackTokenInfo {
    token_id: i64,
    access_token_expires_in_minutes: i64,
    refresh_token_valid_for_days: i64,
    token_type: Option<String>,
    scope: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BackgroundServiceInfo {
    message: &'static str,
    refresh_will_occur_before_minutes: u64,
}

impl From<AuthorizeUrlError> for AppError {
    fn from(e: AuthorizeUrlError) -> Self {
        AppError::BadRequest(format!("{}. Please check your configuration.", e))
    }
}

/// GET /api/auth/authorization-url
async fn authorization_url(
    State(state): State<Arc<AppState>>,
) -> Result<Json<AuthorizationUrlResponse>, AppError> {
    let url = build_authorization_url(&state.config.oauth)?;

    Ok(Json(AuthorizationUrlResponse {
        authorization_url: url,
        instructions: INSTRUCTIONS,
        token_lifecycle: TokenLifecycleInfo::from_state(&state),
    }))
}

/// GET /api/auth/initiate
///
/// Redirects the browser to the provider's login page.
async fn initiate(State(state): State<Arc<AppState>>) -> Result<Redirect, AppError> {
    let url = build_authorization_url(&state.config.oauth).map_err(|e| {
        warn!(error = %e, "Cannot start OAuth flow");
        AppError::from(e)
    })?;

    info!("Redirecting to OAuth provider");
    Ok(Redirect::temporary(&url))
}

/// GET /api/auth/callback
async fn callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> Result<Json<CallbackResponse>, AppError> {
    if let Some(error) = params.error {
        let description = params
            .error_description
            .unwrap_or_else(|| "Unknown error".to_string());
        warn!(error = %error, description = %description, "OAuth authorization failed");
        return Err(AppError::BadRequest(format!(
            "OAuth authorization failed: {} - {}",
            error, description
        )));
    }

    let code = params
        .code
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing authorization code.".to_string()))?;

    let redirect_uri = state
        .config
        .oauth
        .redirect_uri
        .as_deref()
        .filter(|uri| !uri.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("Redirect URI is not configured.".to_string()))?;

    let authorized = state
        .manager
        .authorize(&code, redirect_uri)
        .await
        .map_err(|e| match e {
            TokenError::ExchangeRejected { status, body } => {
                warn!(status, body = %body, "Authorization code exchange rejected");
                AppError::Provider {
                    message: format!("OAuth token exchange failed with HTTP {}", status),
                    details: body,
                }
            }
            TokenError::ExchangeTransport(msg) => {
                error!(error = %msg, "Authorization code exchange failed");
                AppError::BadGateway(format!("OAuth token exchange failed: {}", msg))
            }
            other => {
                error!(error = %other, "Failed to store token from authorization code");
                AppError::ServerError("Failed to store token".to_string())
            }
        })?;

    info!(token_id = authorized.record.id, "OAuth flow completed");

    let expires_in_minutes = authorized
        .expires_in
        .filter(|secs| *secs > 0)
        .map(|secs| secs / 60)
        .unwrap_or(state.config.provider.access_token_validity_minutes);

    Ok(Json(CallbackResponse {
        message: "OAuth flow completed successfully",
        token_info: CallbackTokenInfo {
            token_id: authorized.record.id,
            access_token_expires_in_minutes: expires_in_minutes,
            refresh_token_valid_for_days: state.config.provider.refresh_token_validity_days,
            token_type: authorized.token_type,
            scope: authorized.scope,
        },
        background_service: BackgroundServiceInfo {
            message: "Token lifecycle management is now active",
            refresh_will_occur_before_minutes: state.config.refresh.refresh_before_expiry_minutes,
        },
    }))
}
