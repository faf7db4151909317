//! Token status, health, history, and manual refresh endpoints.

use super::{AppError, AppState};
use crate::credentials::TokenRecord;
use crate::token::format_span;
use axum::{
    extract::{Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

pub(super) fn create_token_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/token/status", get(token_status))
        .route("/api/token/health", get(token_health))
        .route("/api/token/refresh", post(manual_refresh))
        .route("/api/token/history", get(token_history))
        .with_state(state)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenStatusResponse {
    has_token: bool,
    is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    token_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    time_until_expiry: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token_age: Option<String>,
    needs_oauth_restart: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token_days_remaining: Option<f64>,
    record_count: u64,
    next_step: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenHealthResponse {
    status: &'static str,
    is_valid: bool,
    time_until_expiry: Option<String>,
    timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    success: bool,
    message: &'static str,
    token_id: i64,
    expires_at: DateTime<Utc>,
}

const DEFAULT_HISTORY_LIMIT: usize = 20;
const MAX_HISTORY_LIMIT: usize = 500;

#[derive(Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
}

/// Record metadata only; secrets are never serialized.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryResponse {
    total: u64,
    records: Vec<TokenRecord>,
}

/// GET /api/token/status
async fn token_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<TokenStatusResponse>, AppError> {
    let status = state.manager.status().map_err(|e| {
        error!(error = %e, "Failed to read token status");
        AppError::from(e)
    })?;

    let days_remaining = status.refresh_token_remaining.map(|left| {
        if status.needs_flow_restart {
            0.0
        } else {
            left.num_seconds() as f64 / 86_400.0
        }
    });

    Ok(Json(TokenStatusResponse {
        has_token: status.has_token,
        is_valid: status.is_valid,
        token_id: status.token_id,
        expires_at: status.expires_at,
        created_at: status.created_at,
        time_until_expiry: status.time_until_expiry.map(format_span),
        refresh_token_age: status.refresh_token_age.map(format_span),
        needs_oauth_restart: status.needs_flow_restart,
        refresh_token_days_remaining: days_remaining,
        record_count: status.record_count,
        next_step: status.next_step(),
    }))
}

/// GET /api/token/health
async fn token_health(
    State(state): State<Arc<AppState>>,
) -> Result<Json<TokenHealthResponse>, AppError> {
    let status = state.manager.status().map_err(|e| {
        error!(error = %e, "Failed to read token health");
        AppError::from(e)
    })?;

    Ok(Json(TokenHealthResponse {
        status: status.health().as_str(),
        is_valid: status.is_valid,
        time_until_expiry: status.time_until_expiry.map(format_span),
        timestamp: state.manager.now(),
    }))
}

/// POST /api/token/refresh
///
/// Runs the same refresh path as the scheduler. Failures that need the
/// OAuth flow restarted return 401; retryable failures return 503.
async fn manual_refresh(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RefreshResponse>, AppError> {
    info!("Manual token refresh requested");

    let token = state.manager.try_refresh().await.map_err(|e| {
        warn!(reason = e.reason(), error = %e, "Manual token refresh failed");
        AppError::from(e)
    })?;

    Ok(Json(RefreshResponse {
        success: true,
        message: "Token refreshed successfully",
        token_id: token.id,
        expires_at: token.expires_at,
    }))
}

/// GET /api/token/history
async fn token_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, AppError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(MAX_HISTORY_LIMIT);

    let status = state.manager.status().map_err(AppError::from)?;
    let records = state.manager.history(limit).map_err(|e| {
        error!(error = %e, "Failed to read token history");
        AppError::from(e)
    })?;

    Ok(Json(HistoryResponse {
        total: status.record_count,
        records,
    }))
}
