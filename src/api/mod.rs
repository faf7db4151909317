//! HTTP surface: OAuth initiation and callback, token status and manual
//! refresh, and an authenticated pass-through to the brokerage API.
//!
//! All handlers read token state through [`TokenLifecycleManager`]; none of
//! them touch the store directly.

mod auth;
mod broker;
mod token;

use crate::config::TokenWardenConfig;
use crate::error::TokenError;
use crate::token::TokenLifecycleManager;
use anyhow::{Context, Result};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    Router,
};
use serde::Serialize;
use std::sync::Arc;

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

/// Application error types for the token API
#[derive(Debug)]
enum AppError {
    BadRequest(String),
    Unauthorized(String),
    BadGateway(String),
    ServiceUnavailable(String),
    ServerError(String),
    Provider { message: String, details: String },
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg, None),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg, None),
            AppError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg, None),
            AppError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg, None),
            AppError::Provider { message, details } => {
                (StatusCode::BAD_REQUEST, message, Some(details))
            }
        };

        (status, Json(ErrorResponse { error, details })).into_response()
    }
}

impl From<TokenError> for AppError {
    fn from(e: TokenError) -> Self {
        if e.is_terminal() {
            AppError::Unauthorized(e.to_string())
        } else {
            AppError::ServiceUnavailable(e.to_string())
        }
    }
}

/// Shared application state for all routers
pub struct AppState {
    pub manager: Arc<TokenLifecycleManager>,
    pub config: TokenWardenConfig,
    /// Client for pass-through calls to the brokerage API.
    pub broker_http: reqwest::Client,
}

impl AppState {
    pub fn new(manager: Arc<TokenLifecycleManager>, config: TokenWardenConfig) -> Result<Self> {
        let broker_http = reqwest::Client::builder()
            .timeout(config.oauth.request_timeout())
            .build()
            .context("Failed to build brokerage API HTTP client")?;

        Ok(Self {
            manager,
            config,
            broker_http,
        })
    }
}

/// Creates the full API router.
pub fn create_router(state: AppState) -> Router {
    let state = Arc::new(state);
    Router::new()
        .merge(auth::create_auth_router(state.clone()))
        .merge(token::create_token_router(state.clone()))
        .merge(broker::create_broker_router(state))
}
