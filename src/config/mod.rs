pub mod env;

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

/// Complete tokenwarden configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenWardenConfig {
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// OAuth application settings registered with the brokerage provider
#[derive(Clone, Deserialize)]
pub struct OAuthConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,
    /// Base URL that pass-through requests are forwarded to
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Upper bound for a single token endpoint call
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_token_url() -> String {
    "https://api.schwabapi.com/v1/oauth/token".to_string()
}

fn default_authorize_url() -> String {
    "https://api.schwabapi.com/v1/oauth/authorize".to_string()
}

fn default_api_base_url() -> String {
    "https://api.schwabapi.com/trader/v1".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl OAuthConfig {
    pub fn request_timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.request_timeout_seconds)
    }
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: None,
            token_url: default_token_url(),
            authorize_url: default_authorize_url(),
            api_base_url: default_api_base_url(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

// Hand-written so the client secret never reaches the logs.
impl fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .field("token_url", &self.token_url)
            .field("authorize_url", &self.authorize_url)
            .field("api_base_url", &self.api_base_url)
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .finish()
    }
}

/// Background refresh scheduler knobs
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
    /// How often the scheduler wakes up to check the token
    #[serde(default = "default_check_interval")]
    pub check_interval_minutes: u64,
    /// Refresh once the access token has less than this left
    #[serde(default = "default_refresh_before_expiry")]
    pub refresh_before_expiry_minutes: u64,
    /// Sleep after an unexpected tick error
    #[serde(default = "default_error_retry_delay")]
    pub error_retry_delay_minutes: u64,
    /// Consecutive failures before an escalation alert
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
}

fn default_check_interval() -> u64 {
    15
}

fn default_refresh_before_expiry() -> u64 {
    30
}

fn default_error_retry_delay() -> u64 {
    5
}

fn default_max_consecutive_failures() -> u32 {
    3
}

impl RefreshConfig {
    pub fn check_interval(&self) -> StdDuration {
        StdDuration::from_secs(self.check_interval_minutes * 60)
    }

    pub fn refresh_threshold(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.refresh_before_expiry_minutes as i64)
    }

    pub fn error_retry_delay(&self) -> StdDuration {
        StdDuration::from_secs(self.error_retry_delay_minutes * 60)
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            check_interval_minutes: default_check_interval(),
            refresh_before_expiry_minutes: default_refresh_before_expiry(),
            error_retry_delay_minutes: default_error_retry_delay(),
            max_consecutive_failures: default_max_consecutive_failures(),
        }
    }
}

/// Token lifetimes documented by the provider
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Used when a token response carries no usable `expires_in`
    #[serde(default = "default_access_token_validity")]
    pub access_token_validity_minutes: i64,
    #[serde(default = "default_refresh_token_validity")]
    pub refresh_token_validity_days: i64,
}

fn default_access_token_validity() -> i64 {
    30
}

fn default_refresh_token_validity() -> i64 {
    7
}

impl ProviderConfig {
    pub fn access_token_validity(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.access_token_validity_minutes)
    }

    pub fn refresh_token_validity(&self) -> chrono::Duration {
        chrono::Duration::days(self.refresh_token_validity_days)
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            access_token_validity_minutes: default_access_token_validity(),
            refresh_token_validity_days: default_refresh_token_validity(),
        }
    }
}

/// Token store location
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("tokenwarden.db")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// HTTP listener
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<TokenWardenConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: TokenWardenConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(config)
}

/// Load the file if it exists (defaults otherwise), then apply
/// `TOKENWARDEN_*` environment overrides.
pub fn load_config_with_env<P: AsRef<Path>>(path: P) -> Result<TokenWardenConfig> {
    let path = path.as_ref();
    let mut config = if path.exists() {
        load_config(path)?
    } else {
        TokenWardenConfig::default()
    };
    config.apply_env_overrides();
    Ok(config)
}
