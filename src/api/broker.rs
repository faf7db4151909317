//! Authenticated pass-through to the brokerage API.

use super::{AppError, AppState};
use axum::{
    extract::{Path, RawQuery, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, warn};

pub(super) fn create_broker_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/broker/*path", get(pass_through))
        .with_state(state)
}

#[derive(Serialize)]
struct NoTokenResponse {
    message: &'static str,
    errors: [&'static str; 1],
}

/// GET /api/broker/*path
///
/// Forwards to `{api_base_url}/{path}` with the current access token. The
/// upstream status and body are relayed unchanged.
async fn pass_through(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
) -> Result<Response, AppError> {
    let Some(token) = state.manager.get_valid_token().await else {
        warn!(path = %path, "No valid token for brokerage API request");
        return Ok((
            StatusCode::UNAUTHORIZED,
            Json(NoTokenResponse {
                message: "No valid authorization token available",
                errors: ["OAuth flow needs to be completed or restarted; restart the OAuth flow via GET /api/auth/initiate"],
            }),
        )
            .into_response());
    };

    let mut url = format!(
        "{}/{}",
        state.config.oauth.api_base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        url.push('?');
        url.push_str(&query);
    }

    debug!(token_id = token.id, url = %url, "Forwarding brokerage API request");

    let upstream = state
        .broker_http
        .get(&url)
        .header(ACCEPT, "application/json")
        .header(AUTHORIZATION, format!("Bearer {}", token.access_token))
        .send()
        .await
        .map_err(|e| {
            error!(error = %e, url = %url, "Brokerage API request failed");
            if e.is_timeout() {
                AppError::BadGateway("Request to brokerage API timed out".to_string())
            } else {
                AppError::BadGateway(format!("Failed to connect to brokerage API: {}", e))
            }
        })?;

    let status = StatusCode::from_u16(upstream.status().as_u16())
        .unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = upstream
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| HeaderValue::from_str(v).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/json"));

    let body = upstream.bytes().await.map_err(|e| {
        error!(error = %e, "Failed to read brokerage API response");
        AppError::BadGateway(format!("Failed to read brokerage API response: {}", e))
    })?;

    if !status.is_success() {
        warn!(status = status.as_u16(), path = %path, "Brokerage API returned an error");
    }

    Ok((status, [(header::CONTENT_TYPE, content_type)], body.to_vec()).into_response())
}
