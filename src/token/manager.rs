use super::status::TokenStatus;
use crate::clock::{Clock, SystemClock};
use crate::config::ProviderConfig;
use crate::credentials::{NewToken, TokenRecord, TokenStore};
use crate::error::{is_credential_rejection, TokenError};
use crate::oauth::{TokenExchange, TokenResponse};
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Provider-defined token lifetimes.
#[derive(Debug, Clone)]
pub struct LifecyclePolicy {
    /// Age at which a refresh token is presumed dead.
    pub refresh_token_validity: Duration,
    /// Access token lifetime assumed when a response omits `expires_in`.
    pub default_access_token_validity: Duration,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self::from(&ProviderConfig::default())
    }
}

impl From<&ProviderConfig> for LifecyclePolicy {
    fn from(config: &ProviderConfig) -> Self {
        Self {
            refresh_token_validity: config.refresh_token_validity(),
            default_access_token_validity: config.access_token_validity(),
        }
    }
}

/// Result of a completed authorization-code exchange.
#[derive(Debug, Clone)]
pub struct AuthorizedToken {
    pub record: TokenRecord,
    pub expires_in: Option<i64>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
}

/// What a caller saw when it decided a refresh was needed.
///
/// Taken before the decision read, so any refresh that completes after the
/// read is visible once the caller holds the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshTicket {
    attempt: u64,
    observed: Option<i64>,
}

/// Outcome of the most recent refresh attempt, shared with every caller
/// that queued behind it.
#[derive(Default)]
struct RefreshSlot {
    attempt: u64,
    last: Option<Result<TokenRecord, TokenError>>,
}

/// Keeps the single brokerage token pair valid.
///
/// Reads always go to the store, so every caller sees the latest appended
/// record. Writes are serialized by `write_guard`: at most one refresh
/// exchange is in flight, and callers that waited behind it receive its
/// result, success or failure, instead of exchanging again.
pub struct TokenLifecycleManager {
    store: Arc<dyn TokenStore>,
    exchange: Arc<dyn TokenExchange>,
    clock: Arc<dyn Clock>,
    policy: LifecyclePolicy,
    write_guard: Mutex<RefreshSlot>,
    // Mirrors `RefreshSlot::attempt`; only written under the guard.
    attempts: AtomicU64,
}

impl TokenLifecycleManager {
    pub fn new(
        store: Arc<dyn TokenStore>,
        exchange: Arc<dyn TokenExchange>,
        policy: LifecyclePolicy,
    ) -> Self {
        Self::with_clock(store, exchange, policy, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn TokenStore>,
        exchange: Arc<dyn TokenExchange>,
        policy: LifecyclePolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            exchange,
            clock,
            policy,
            write_guard: Mutex::new(RefreshSlot::default()),
            attempts: AtomicU64::new(0),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// The current record, without any validity check.
    pub fn current_token(&self) -> Result<Option<TokenRecord>, TokenError> {
        self.store.latest().map_err(TokenError::Persistence)
    }

    /// Up to `limit` records, newest first.
    pub fn history(&self, limit: usize) -> Result<Vec<TokenRecord>, TokenError> {
        self.store.history(limit).map_err(TokenError::Persistence)
    }

    /// A token whose access token has not expired, refreshing if needed.
    ///
    /// Never returns a record with `expires_at <= now`. Every failure,
    /// including an unreachable store, yields `None`.
    pub async fn get_valid_token(&self) -> Option<TokenRecord> {
        match self.try_valid_token().await {
            Ok(token) => Some(token),
            Err(err) => {
                debug!(reason = err.reason(), "No valid token available");
                None
            }
        }
    }

    /// [`get_valid_token`](Self::get_valid_token) with the failure reason.
    pub async fn try_valid_token(&self) -> Result<TokenRecord, TokenError> {
        let (ticket, current) = self.observe()?;
        if let Some(current) = current {
            if current.expires_at > self.clock.now() {
                return Ok(current);
            }
            debug!(token_id = current.id, "Access token expired, refreshing on demand");
        }

        let refreshed = self.try_refresh_from(ticket).await?;
        if refreshed.expires_at > self.clock.now() {
            Ok(refreshed)
        } else {
            // Only reachable with a clock that jumped past a fresh expiry
            Err(TokenError::ExchangeTransport(
                "refreshed token was already expired".to_string(),
            ))
        }
    }

    /// Runs the refresh state machine; `None` on every failure.
    ///
    /// The reason for a failure is logged here so that callers (the
    /// scheduler and HTTP handlers) only need to count or translate it.
    pub async fn refresh(&self) -> Option<TokenRecord> {
        match self.try_refresh().await {
            Ok(token) => Some(token),
            Err(err) => {
                log_refresh_failure(&err);
                None
            }
        }
    }

    /// Runs the refresh state machine, returning the typed failure.
    pub async fn try_refresh(&self) -> Result<TokenRecord, TokenError> {
        let ticket = self.refresh_ticket()?;
        self.try_refresh_from(ticket).await
    }

    /// Notes the current record and refresh attempt ahead of a decision to
    /// refresh. Pass it to [`refresh_from`](Self::refresh_from).
    pub fn refresh_ticket(&self) -> Result<RefreshTicket, TokenError> {
        self.observe().map(|(ticket, _)| ticket)
    }

    /// [`refresh`](Self::refresh) for a caller that decided from the state
    /// captured in `ticket`.
    pub async fn refresh_from(&self, ticket: RefreshTicket) -> Option<TokenRecord> {
        match self.try_refresh_from(ticket).await {
            Ok(token) => Some(token),
            Err(err) => {
                log_refresh_failure(&err);
                None
            }
        }
    }

    fn observe(&self) -> Result<(RefreshTicket, Option<TokenRecord>), TokenError> {
        let attempt = self.attempts.load(Ordering::Acquire);
        let current = self.current_token()?;
        let ticket = RefreshTicket {
            attempt,
            observed: current.as_ref().map(|t| t.id),
        };
        Ok((ticket, current))
    }

    async fn try_refresh_from(&self, ticket: RefreshTicket) -> Result<TokenRecord, TokenError> {
        let mut slot = self.write_guard.lock().await;

        let current = self.current_token()?;

        if let Some(current) = &current {
            if Some(current.id) != ticket.observed {
                debug!(token_id = current.id, "Joined refresh completed by another caller");
                return Ok(current.clone());
            }
        }

        if slot.attempt != ticket.attempt {
            if let Some(last) = &slot.last {
                debug!(attempt = slot.attempt, "Joined refresh attempt made by another caller");
                return last.clone();
            }
        }

        let outcome = self.exchange_refresh(current).await;

        slot.attempt += 1;
        slot.last = Some(outcome.clone());
        self.attempts.store(slot.attempt, Ordering::Release);

        outcome
    }

    async fn exchange_refresh(&self, current: Option<TokenRecord>) -> Result<TokenRecord, TokenError> {
        let current = current.ok_or(TokenError::NoToken)?;

        let refresh_token = current
            .usable_refresh_token()
            .ok_or(TokenError::NoRefreshToken)?
            .to_string();

        let age = self.clock.now() - current.refresh_issued_at;
        if age >= self.policy.refresh_token_validity {
            return Err(TokenError::TokenTooOld { age });
        }

        info!(
            token_id = current.id,
            refresh_token_age_hours = age.num_hours(),
            "Exchanging refresh token"
        );

        let response = self.exchange.exchange_refresh_token(&refresh_token).await?;

        let new_token = self.token_from_response(&response, Some(&current));
        let saved = self.store.save(&new_token).map_err(TokenError::Persistence)?;

        info!(
            token_id = saved.id,
            expires_at = %saved.expires_at,
            refresh_token_rotated = saved.refresh_issued_at == saved.created_at,
            "Token refreshed"
        );

        Ok(saved)
    }

    /// Exchanges an authorization code and stores the resulting first token.
    pub async fn authorize(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<AuthorizedToken, TokenError> {
        let response = self
            .exchange
            .exchange_authorization_code(code, redirect_uri)
            .await?;

        let record = self.store_authorization(&response).await?;

        Ok(AuthorizedToken {
            record,
            expires_in: response.expires_in,
            token_type: response.token_type,
            scope: response.scope,
        })
    }

    /// Stores a token obtained from an authorization-code exchange.
    ///
    /// The record starts a fresh refresh-token validity window.
    pub async fn store_authorization(
        &self,
        response: &TokenResponse,
    ) -> Result<TokenRecord, TokenError> {
        let _slot = self.write_guard.lock().await;

        let new_token = self.token_from_response(response, None);
        let saved = self.store.save(&new_token).map_err(TokenError::Persistence)?;

        info!(
            token_id = saved.id,
            expires_at = %saved.expires_at,
            has_refresh_token = saved.refresh_token.is_some(),
            "Stored token from authorization code exchange"
        );

        Ok(saved)
    }

    /// `latest().expires_at > now`.
    pub fn is_valid(&self) -> Result<bool, TokenError> {
        let now = self.clock.now();
        Ok(self
            .current_token()?
            .map_or(false, |t| t.expires_at > now))
    }

    /// Time left on the access token, clamped at zero.
    pub fn time_until_expiry(&self) -> Result<Option<Duration>, TokenError> {
        let now = self.clock.now();
        Ok(self
            .current_token()?
            .map(|t| time_until_expiry(&t, now)))
    }

    /// True when only an interactive authorization can recover: no token
    /// exists, or the refresh token has reached its validity window.
    pub fn needs_flow_restart(&self) -> Result<bool, TokenError> {
        let now = self.clock.now();
        Ok(match self.current_token()? {
            None => true,
            Some(t) => refresh_token_age(&t, now) >= self.policy.refresh_token_validity,
        })
    }

    /// Time since the current refresh token was issued.
    pub fn refresh_token_age(&self) -> Result<Option<Duration>, TokenError> {
        let now = self.clock.now();
        Ok(self
            .current_token()?
            .map(|t| refresh_token_age(&t, now)))
    }

    /// All status fields computed from one read of the store.
    pub fn status(&self) -> Result<TokenStatus, TokenError> {
        let now = self.clock.now();
        let current = self.current_token()?;
        let record_count = self.store.count().map_err(TokenError::Persistence)?;

        Ok(match current {
            None => TokenStatus::empty(record_count),
            Some(token) => {
                let age = refresh_token_age(&token, now);
                let needs_flow_restart = age >= self.policy.refresh_token_validity;
                TokenStatus {
                    has_token: true,
                    is_valid: token.expires_at > now,
                    token_id: Some(token.id),
                    expires_at: Some(token.expires_at),
                    created_at: Some(token.created_at),
                    time_until_expiry: Some(time_until_expiry(&token, now)),
                    refresh_token_age: Some(age),
                    refresh_token_remaining: Some(
                        (self.policy.refresh_token_validity - age).max(Duration::zero()),
                    ),
                    needs_flow_restart,
                    record_count,
                }
            }
        })
    }

    fn token_from_response(
        &self,
        response: &TokenResponse,
        previous: Option<&TokenRecord>,
    ) -> NewToken {
        let now = self.clock.now();

        let lifetime = response
            .expires_in
            .filter(|secs| *secs > 0)
            .map(Duration::seconds)
            .unwrap_or(self.policy.default_access_token_validity);

        // Reused refresh token inherits its issuance time
        let rotated = response
            .refresh_token
            .as_deref()
            .filter(|token| !token.trim().is_empty());
        let (refresh_token, refresh_issued_at) = match (rotated, previous) {
            (Some(token), _) => (Some(token.to_string()), now),
            (None, Some(prev)) => (prev.refresh_token.clone(), prev.refresh_issued_at),
            (None, None) => (None, now),
        };

        NewToken {
            access_token: response.access_token.clone(),
            refresh_token,
            expires_at: now + lifetime,
            created_at: now,
            refresh_issued_at,
        }
    }
}

fn time_until_expiry(token: &TokenRecord, now: DateTime<Utc>) -> Duration {
    (token.expires_at - now).max(Duration::zero())
}

fn refresh_token_age(token: &TokenRecord, now: DateTime<Utc>) -> Duration {
    now - token.refresh_issued_at
}

fn log_refresh_failure(err: &TokenError) {
    match err {
        TokenError::NoToken => {
            info!(reason = err.reason(), "No token to refresh; OAuth flow has not been completed");
        }
        TokenError::NoRefreshToken => {
            error!(reason = err.reason(), "Current token record has no refresh token; not retrying");
        }
        TokenError::TokenTooOld { age } => {
            warn!(
                reason = err.reason(),
                refresh_token_age_hours = age.num_hours(),
                "Refresh token is past its validity window; OAuth flow must be restarted"
            );
        }
        TokenError::ExchangeRejected { status, body } if is_credential_rejection(*status) => {
            warn!(
                reason = err.reason(),
                status = *status,
                body = %body,
                "Provider rejected the refresh token; it is likely expired or revoked"
            );
        }
        TokenError::ExchangeRejected { status, body } => {
            warn!(
                reason = err.reason(),
                status = *status,
                body = %body,
                "Token endpoint returned an HTTP error"
            );
        }
        TokenError::ExchangeTransport(msg) => {
            warn!(reason = err.reason(), error = %msg, "Token endpoint unreachable");
        }
        TokenError::Persistence(e) => {
            error!(reason = err.reason(), error = %format!("{:#}", e), "Token store failure during refresh");
        }
    }
}
