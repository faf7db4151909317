use chrono::{DateTime, Duration, Utc};

/// Access tokens within this window of expiry report as expiring soon.
const EXPIRING_SOON_MINUTES: i64 = 30;

/// Point-in-time view of the current token, read once from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenStatus {
    pub has_token: bool,
    pub is_valid: bool,
    pub token_id: Option<i64>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub time_until_expiry: Option<Duration>,
    pub refresh_token_age: Option<Duration>,
    /// Time left before the refresh token reaches its validity window.
    pub refresh_token_remaining: Option<Duration>,
    pub needs_flow_restart: bool,
    pub record_count: u64,
}

impl TokenStatus {
    pub(crate) fn empty(record_count: u64) -> Self {
        Self {
            has_token: false,
            is_valid: false,
            token_id: None,
            expires_at: None,
            created_at: None,
            time_until_expiry: None,
            refresh_token_age: None,
            refresh_token_remaining: None,
            needs_flow_restart: true,
            record_count,
        }
    }

    pub fn health(&self) -> TokenHealth {
        if !self.is_valid {
            return TokenHealth::Expired;
        }
        match self.time_until_expiry {
            Some(left) if left <= Duration::minutes(EXPIRING_SOON_MINUTES) => {
                TokenHealth::ExpiringSoon
            }
            _ => TokenHealth::Healthy,
        }
    }

    /// Operator guidance for the current state.
    pub fn next_step(&self) -> &'static str {
        if !self.has_token {
            "Call GET /api/auth/authorization-url to start the OAuth flow"
        } else if self.needs_flow_restart {
            "Refresh token expired - restart OAuth flow with GET /api/auth/authorization-url"
        } else if self.is_valid {
            "Token is valid"
        } else {
            "Token will be automatically refreshed by the background scheduler"
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenHealth {
    Healthy,
    ExpiringSoon,
    Expired,
}

impl TokenHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenHealth::Healthy => "Healthy",
            TokenHealth::ExpiringSoon => "Expiring Soon",
            TokenHealth::Expired => "Expired",
        }
    }
}

/// Renders a span as `dd.hh:mm:ss`; negative spans render as zero.
pub fn format_span(span: Duration) -> String {
    let total = span.num_seconds().max(0);
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;
    format!("{:02}.{:02}:{:02}:{:02}", days, hours, minutes, seconds)
}
