// Shared setup for API integration tests

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use tokenwarden::api::{create_router, AppState};
use tokenwarden::clock::{Clock, ManualClock};
use tokenwarden::config::{OAuthConfig, TokenWardenConfig};
use tokenwarden::credentials::{NewToken, SqliteTokenStore, TokenRecord, TokenStore};
use tokenwarden::oauth::OAuthExchangeClient;
use tokenwarden::token::{LifecyclePolicy, TokenLifecycleManager};
use tower::ServiceExt;

pub const REDIRECT_URI: &str = "https://127.0.0.1:8182/api/auth/callback";

pub struct TestApp {
    pub router: Router,
    pub store: Arc<SqliteTokenStore>,
    pub clock: ManualClock,
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 3, 9, 30, 0).unwrap()
}

/// OAuth settings pointing every endpoint at `server_url`.
pub fn oauth_config(server_url: &str) -> OAuthConfig {
    OAuthConfig {
        client_id: "app-key".to_string(),
        client_secret: "app-secret".to_string(),
        redirect_uri: Some(REDIRECT_URI.to_string()),
        token_url: format!("{}/v1/oauth/token", server_url),
        authorize_url: format!("{}/v1/oauth/authorize", server_url),
        api_base_url: format!("{}/trader/v1", server_url),
        ..OAuthConfig::default()
    }
}

pub fn create_test_app(oauth: OAuthConfig) -> TestApp {
    let key = BASE64.encode([0u8; 32]);
    let store = Arc::new(SqliteTokenStore::new(":memory:", &key).unwrap());
    let clock = ManualClock::new(start_time());

    let config = TokenWardenConfig {
        oauth,
        ..TokenWardenConfig::default()
    };

    let exchange = Arc::new(OAuthExchangeClient::new(&config.oauth).unwrap());
    let manager = Arc::new(TokenLifecycleManager::with_clock(
        store.clone(),
        exchange,
        LifecyclePolicy::from(&config.provider),
        Arc::new(clock.clone()),
    ));

    let router = create_router(AppState::new(manager, config).unwrap());

    TestApp {
        router,
        store,
        clock,
    }
}

impl TestApp {
    /// Stores a token whose refresh token was issued `issued_ago` before
    /// now and whose access token expires `expires_in` after now.
    pub fn seed(&self, issued_ago: Duration, expires_in: Duration) -> TokenRecord {
        let now = self.clock.now();
        self.store
            .save(&NewToken {
                access_token: "access-0".to_string(),
                refresh_token: Some("refresh-0".to_string()),
                expires_at: now + expires_in,
                created_at: now - issued_ago,
                refresh_issued_at: now - issued_ago,
            })
            .unwrap()
    }

    pub async fn send(&self, method: &str, uri: &str) -> Response<Body> {
        self.router
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }
}

pub async fn json_of(response: Response<Body>) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

pub const TOKEN_RESPONSE: &str = r#"{"access_token":"access-1","refresh_token":"refresh-1","expires_in":1800,"token_type":"Bearer","scope":"api"}"#;
