//! Append-only, encrypted persistence for brokerage OAuth tokens.
//!
//! Every successful authorization-code or refresh exchange appends a new
//! [`TokenRecord`]; nothing is updated in place and nothing is deleted. The
//! current token is always the record with the greatest `created_at`.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       TokenStore (trait)                 │
//! │  - save (append)                         │
//! │  - latest / history / count              │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//!      (seal)                (open)
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       TokenCipher                        │
//! │  - AES-256-GCM, one nonce per secret     │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       SQLite (oauth_tokens table)        │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use tokenwarden::credentials::{NewToken, SqliteTokenStore, TokenStore};
//! use chrono::{Duration, Utc};
//!
//! # fn main() -> anyhow::Result<()> {
//! let encryption_key = std::env::var("TOKENWARDEN_ENCRYPTION_KEY")?;
//! let store = SqliteTokenStore::new("tokens.db", &encryption_key)?;
//!
//! let now = Utc::now();
//! let saved = store.save(&NewToken {
//!     access_token: "access".to_string(),
//!     refresh_token: Some("refresh".to_string()),
//!     expires_at: now + Duration::minutes(30),
//!     created_at: now,
//!     refresh_issued_at: now,
//! })?;
//!
//! assert_eq!(store.latest()?.map(|t| t.id), Some(saved.id));
//! # Ok(())
//! # }
//! ```

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

mod encryption;
mod storage;

pub use encryption::TokenCipher;
pub use storage::SqliteTokenStore;

/// A persisted access/refresh token pair.
///
/// `created_at` is immutable and orders the history. `refresh_issued_at` is
/// when the provider issued the refresh token this record carries: equal to
/// `created_at` when the exchange rotated the refresh token, inherited from
/// the previous record when the provider reused it.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    pub id: i64,
    #[serde(skip_serializing)]
    pub access_token: String,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub refresh_issued_at: DateTime<Utc>,
}

impl TokenRecord {
    /// Refresh token if present and non-empty.
    pub fn usable_refresh_token(&self) -> Option<&str> {
        self.refresh_token
            .as_deref()
            .filter(|token| !token.trim().is_empty())
    }
}

impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("id", &self.id)
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .field("created_at", &self.created_at)
            .field("refresh_issued_at", &self.refresh_issued_at)
            .finish()
    }
}

/// A token record that has not been assigned an id yet.
#[derive(Clone)]
pub struct NewToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub refresh_issued_at: DateTime<Utc>,
}

/// Repository for token records.
///
/// Deliberately exposes no update or delete: history is append-only.
pub trait TokenStore: Send + Sync {
    /// Appends a record and returns it with its assigned id.
    fn save(&self, token: &NewToken) -> Result<TokenRecord>;

    /// The current record (greatest `created_at`), if any.
    fn latest(&self) -> Result<Option<TokenRecord>>;

    /// Up to `limit` records, newest first.
    fn history(&self, limit: usize) -> Result<Vec<TokenRecord>>;

    /// Total number of stored records.
    fn count(&self) -> Result<u64>;
}
