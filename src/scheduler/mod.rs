use crate::config::RefreshConfig;
use crate::error::TokenError;
use crate::token::{format_span, TokenLifecycleManager};
use chrono::Duration;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};


/// What a single scheduler tick observed and did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// No token, or the refresh token is past its validity window.
    FlowRestartRequired { refresh_token_age: Option<Duration> },
    /// The access token was inside the refresh window and was refreshed.
    Refreshed { token_id: i64 },
    /// A due refresh did not produce a token.
    RefreshFailed {
        consecutive_failures: u32,
        escalated: bool,
    },
    /// Nothing to do until the next check.
    Healthy { time_until_expiry: Duration },
    /// The tick itself failed, e.g. the token store was unreachable.
    Errored {
        consecutive_failures: u32,
        escalated: bool,
    },
}

/// Background loop that refreshes the access token ahead of expiry.
///
/// Ticks run one at a time. The failure counter and escalation count live
/// on the scheduler and are only touched from its own task.
pub struct RefreshScheduler {
    manager: Arc<TokenLifecycleManager>,
    config: RefreshConfig,
    consecutive_failures: u32,
    streak_escalated: bool,
    escalations: u64,
}

impl RefreshScheduler {
    pub fn new(manager: Arc<TokenLifecycleManager>, config: RefreshConfig) -> Self {
        Self {
            manager,
            config,
            consecutive_failures: 0,
            streak_escalated: false,
            escalations: 0,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Number of escalation alerts raised for failure streaks.
    pub fn escalations(&self) -> u64 {
        self.escalations
    }

    /// Runs the loop on a new task until `shutdown` is cancelled.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Tick, sleep, repeat. Cancellation interrupts the sleep immediately;
    /// a tick already in progress is allowed to finish.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            check_interval_minutes = self.config.check_interval_minutes,
            refresh_before_expiry_minutes = self.config.refresh_before_expiry_minutes,
            max_consecutive_failures = self.config.max_consecutive_failures,
            "Token refresh scheduler started"
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let outcome = self.tick().await;
            let delay = self.delay_after(&outcome);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => break,
            }
        }

        info!("Token refresh scheduler stopped");
    }

    /// Performs one check-and-maybe-refresh pass.
    pub async fn tick(&mut self) -> TickOutcome {
        match self.check().await {
            Ok(outcome) => outcome,
            Err(err) => {
                let escalated = self.record_failure();
                error!(
                    reason = err.reason(),
                    error = %err,
                    consecutive_failures = self.consecutive_failures,
                    "Token refresh tick failed"
                );
                if escalated {
                    self.escalate("token refresh checks keep failing");
                }
                TickOutcome::Errored {
                    consecutive_failures: self.consecutive_failures,
                    escalated,
                }
            }
        }
    }

    async fn check(&mut self) -> Result<TickOutcome, TokenError> {
        let ticket = self.manager.refresh_ticket()?;

        if self.manager.needs_flow_restart()? {
            let refresh_token_age = self.manager.refresh_token_age()?;
            match refresh_token_age {
                Some(age) => error!(
                    escalation = true,
                    refresh_token_age = %format_span(age),
                    "Refresh token has expired; restart the OAuth flow via GET /api/auth/authorization-url"
                ),
                None => error!(
                    escalation = true,
                    "No token stored; complete the OAuth flow via GET /api/auth/authorization-url"
                ),
            }
            self.reset_failures();
            return Ok(TickOutcome::FlowRestartRequired { refresh_token_age });
        }

        let time_until_expiry = self
            .manager
            .time_until_expiry()?
            .unwrap_or_else(Duration::zero);

        if time_until_expiry > self.config.refresh_threshold() {
            debug!(
                time_until_expiry = %format_span(time_until_expiry),
                "Access token healthy"
            );
            self.reset_failures();
            return Ok(TickOutcome::Healthy { time_until_expiry });
        }

        info!(
            time_until_expiry = %format_span(time_until_expiry),
            "Access token inside refresh window, refreshing"
        );

        match self.manager.refresh_from(ticket).await {
            Some(token) => {
                info!(
                    token_id = token.id,
                    expires_at = %token.expires_at,
                    "Scheduled refresh succeeded"
                );
                self.reset_failures();
                Ok(TickOutcome::Refreshed { token_id: token.id })
            }
            None => {
                let escalated = self.record_failure();
                warn!(
                    consecutive_failures = self.consecutive_failures,
                    max_consecutive_failures = self.config.max_consecutive_failures,
                    "Scheduled refresh failed"
                );
                if escalated {
                    self.escalate("scheduled token refresh keeps failing");
                }
                Ok(TickOutcome::RefreshFailed {
                    consecutive_failures: self.consecutive_failures,
                    escalated,
                })
            }
        }
    }

    /// Bumps the failure counter; true if this failure should escalate.
    fn record_failure(&mut self) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if !self.streak_escalated
            && self.consecutive_failures >= self.config.max_consecutive_failures
        {
            self.streak_escalated = true;
            self.escalations += 1;
            return true;
        }
        false
    }

    fn reset_failures(&mut self) {
        if self.consecutive_failures > 0 {
            info!(
                previous_failures = self.consecutive_failures,
                "Token refresh recovered"
            );
        }
        self.consecutive_failures = 0;
        self.streak_escalated = false;
    }

    fn escalate(&self, what: &str) {
        error!(
            escalation = true,
            consecutive_failures = self.consecutive_failures,
            "Manual intervention required: {}",
            what
        );
    }

    fn delay_after(&self, outcome: &TickOutcome) -> std::time::Duration {
        match outcome {
            TickOutcome::Errored { .. } => self.config.error_retry_delay(),
            _ => self.config.check_interval(),
        }
    }
}
