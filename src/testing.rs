//! Test doubles shared by the unit test modules.

use crate::credentials::{NewToken, SqliteTokenStore, TokenRecord, TokenStore};
use crate::oauth::{ExchangeError, TokenExchange, TokenResponse};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn test_key() -> String {
    BASE64.encode([0u8; 32])
}

pub fn memory_store() -> SqliteTokenStore {
    SqliteTokenStore::new(":memory:", &test_key()).expect("Failed to create test store")
}

/// Whole-second start instant so stored timestamps compare exactly.
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 6, 14, 0, 0).unwrap()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    /// New access and refresh token on every call.
    Rotate,
    /// New access token, refresh token omitted.
    KeepRefresh,
    Reject(u16),
    Unreachable,
}

/// In-process token endpoint that counts calls.
pub struct ScriptedExchange {
    behaviour: Mutex<Behaviour>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedExchange {
    pub fn new(behaviour: Behaviour) -> Self {
        Self {
            behaviour: Mutex::new(behaviour),
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    pub fn with_delay(behaviour: Behaviour, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new(behaviour)
        }
    }

    pub fn set_behaviour(&self, behaviour: Behaviour) {
        *self.behaviour.lock().unwrap() = behaviour;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn respond(&self) -> Result<TokenResponse, ExchangeError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let behaviour = *self.behaviour.lock().unwrap();
        match behaviour {
            Behaviour::Rotate => Ok(TokenResponse {
                access_token: format!("access-{}", n),
                refresh_token: Some(format!("refresh-{}", n)),
                expires_in: Some(1800),
                token_type: Some("Bearer".to_string()),
                ..TokenResponse::default()
            }),
            Behaviour::KeepRefresh => Ok(TokenResponse {
                access_token: format!("access-{}", n),
                expires_in: Some(1800),
                ..TokenResponse::default()
            }),
            Behaviour::Reject(status) => Err(ExchangeError::Rejected {
                status,
                body: r#"{"error":"invalid_grant"}"#.to_string(),
            }),
            Behaviour::Unreachable => Err(ExchangeError::Transport("connection refused".to_string())),
        }
    }
}

#[async_trait]
impl TokenExchange for ScriptedExchange {
    async fn exchange_authorization_code(
        &self,
        _code: &str,
        _redirect_uri: &str,
    ) -> Result<TokenResponse, ExchangeError> {
        self.respond().await
    }

    async fn exchange_refresh_token(
        &self,
        _refresh_token: &str,
    ) -> Result<TokenResponse, ExchangeError> {
        self.respond().await
    }
}

/// Store whose every call fails, as if the database were unreachable.
pub struct UnreachableStore;

impl TokenStore for UnreachableStore {
    fn save(&self, _token: &NewToken) -> Result<TokenRecord> {
        Err(anyhow!("database is locked"))
    }

    fn latest(&self) -> Result<Option<TokenRecord>> {
        Err(anyhow!("database is locked"))
    }

    fn history(&self, _limit: usize) -> Result<Vec<TokenRecord>> {
        Err(anyhow!("database is locked"))
    }

    fn count(&self) -> Result<u64> {
        Err(anyhow!("database is locked"))
    }
}
