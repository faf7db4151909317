use super::TokenWardenConfig;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::warn;

impl TokenWardenConfig {
    /// Override file values with `TOKENWARDEN_*` environment variables.
    ///
    /// Secrets are expected to come from the environment rather than the
    /// TOML file.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Same as [`apply_env_overrides`](Self::apply_env_overrides) with an
    /// arbitrary lookup, so tests need not touch process state.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("TOKENWARDEN_CLIENT_ID") {
            self.oauth.client_id = v;
        }
        if let Some(v) = lookup("TOKENWARDEN_CLIENT_SECRET") {
            self.oauth.client_secret = v;
        }
        if let Some(v) = lookup("TOKENWARDEN_REDIRECT_URI") {
            self.oauth.redirect_uri = Some(v);
        }
        if let Some(v) = lookup("TOKENWARDEN_TOKEN_URL") {
            self.oauth.token_url = v;
        }
        if let Some(v) = lookup("TOKENWARDEN_AUTHORIZE_URL") {
            self.oauth.authorize_url = v;
        }
        if let Some(v) = lookup("TOKENWARDEN_API_BASE_URL") {
            self.oauth.api_base_url = v;
        }
        if let Some(v) = lookup("TOKENWARDEN_DATABASE_PATH") {
            self.store.database_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("TOKENWARDEN_BIND_ADDRESS") {
            self.server.bind_address = v;
        }

        override_parsed(&lookup, "TOKENWARDEN_REQUEST_TIMEOUT_SECONDS", &mut self.oauth.request_timeout_seconds);
        override_parsed(&lookup, "TOKENWARDEN_CHECK_INTERVAL_MINUTES", &mut self.refresh.check_interval_minutes);
        override_parsed(
            &lookup,
            "TOKENWARDEN_REFRESH_BEFORE_EXPIRY_MINUTES",
            &mut self.refresh.refresh_before_expiry_minutes,
        );
        override_parsed(
            &lookup,
            "TOKENWARDEN_ERROR_RETRY_DELAY_MINUTES",
            &mut self.refresh.error_retry_delay_minutes,
        );
        override_parsed(
            &lookup,
            "TOKENWARDEN_MAX_CONSECUTIVE_FAILURES",
            &mut self.refresh.max_consecutive_failures,
        );
    }
}

fn override_parsed<F, T>(lookup: &F, name: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(name) {
        match raw.parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => warn!(variable = name, value = %raw, "Ignoring unparsable environment override"),
        }
    }
}
