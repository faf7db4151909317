//! SQLite-backed token history.

use super::{NewToken, TokenCipher, TokenRecord, TokenStore};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SELECT_COLUMNS: &str = r#"
    SELECT id,
           access_token, access_token_nonce,
           refresh_token, refresh_token_nonce,
           expires_at, created_at, refresh_issued_at
    FROM oauth_tokens
"#;

/// Encrypted, append-only token store backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE oauth_tokens (
///     id INTEGER PRIMARY KEY AUTOINCREMENT,
///     access_token TEXT NOT NULL,        -- Encrypted
///     access_token_nonce TEXT NOT NULL,
///     refresh_token TEXT,                -- Encrypted (optional)
///     refresh_token_nonce TEXT,
///     expires_at TEXT NOT NULL,          -- RFC 3339, UTC, microseconds
///     created_at TEXT NOT NULL,
///     refresh_issued_at TEXT NOT NULL
/// );
/// ```
///
/// Timestamps are written in a fixed-width UTC form so that ordering by the
/// TEXT column matches chronological order.
///
/// The connection mutex is taken per call and released when the call
/// returns; it is never held across a scheduler tick or a network exchange.
pub struct SqliteTokenStore {
    conn: Mutex<Connection>,
    cipher: TokenCipher,
}

impl SqliteTokenStore {
    /// Creates or opens a token store.
    ///
    /// # Arguments
    /// * `db_path` - Path to the SQLite file, or `:memory:`
    /// * `encryption_key` - Base64-encoded 32-byte master key
    pub fn new<P: AsRef<Path>>(db_path: P, encryption_key: &str) -> Result<Self> {
        let cipher = TokenCipher::from_base64(encryption_key).context("Invalid encryption key")?;

        let conn = Connection::open(db_path).context("Failed to open token database")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS oauth_tokens (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                access_token TEXT NOT NULL,
                access_token_nonce TEXT NOT NULL,
                refresh_token TEXT,
                refresh_token_nonce TEXT,
                expires_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                refresh_issued_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_oauth_tokens_created_at
                ON oauth_tokens(created_at);
            "#,
        )
        .context("Failed to create oauth_tokens table")?;

        Ok(Self {
            conn: Mutex::new(conn),
            cipher,
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Token store connection mutex poisoned"))
    }

    fn decode_row(&self, row: &Row<'_>) -> Result<TokenRecord> {
        let id: i64 = row.get(0)?;

        let access_token_encrypted: String = row.get(1)?;
        let access_token_nonce: String = row.get(2)?;
        let access_token = self
            .cipher
            .open(&access_token_encrypted, &access_token_nonce)
            .with_context(|| format!("Failed to decrypt access token of record {}", id))?;

        let refresh_token: Option<String> = row.get(3)?;
        let refresh_token_nonce: Option<String> = row.get(4)?;
        let refresh_token = match (refresh_token, refresh_token_nonce) {
            (Some(encrypted), Some(nonce)) => Some(
                self.cipher
                    .open(&encrypted, &nonce)
                    .with_context(|| format!("Failed to decrypt refresh token of record {}", id))?,
            ),
            _ => None,
        };

        Ok(TokenRecord {
            id,
            access_token,
            refresh_token,
            expires_at: parse_timestamp(&row.get::<_, String>(5)?)?,
            created_at: parse_timestamp(&row.get::<_, String>(6)?)?,
            refresh_issued_at: parse_timestamp(&row.get::<_, String>(7)?)?,
        })
    }
}

impl TokenStore for SqliteTokenStore {
    fn save(&self, token: &NewToken) -> Result<TokenRecord> {
        let access = self
            .cipher
            .seal(&token.access_token)
            .context("Failed to encrypt access token")?;

        let refresh = token
            .refresh_token
            .as_deref()
            .map(|secret| self.cipher.seal(secret))
            .transpose()
            .context("Failed to encrypt refresh token")?;
        let (refresh_encrypted, refresh_nonce) = match refresh {
            Some(sealed) => (Some(sealed.ciphertext), Some(sealed.nonce)),
            None => (None, None),
        };

        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO oauth_tokens (
                access_token, access_token_nonce,
                refresh_token, refresh_token_nonce,
                expires_at, created_at, refresh_issued_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                access.ciphertext,
                access.nonce,
                refresh_encrypted,
                refresh_nonce,
                format_timestamp(&token.expires_at),
                format_timestamp(&token.created_at),
                format_timestamp(&token.refresh_issued_at),
            ],
        )
        .context("Failed to append token record")?;

        Ok(TokenRecord {
            id: conn.last_insert_rowid(),
            access_token: token.access_token.clone(),
            refresh_token: token.refresh_token.clone(),
            expires_at: token.expires_at.trunc_subsecs(6),
            created_at: token.created_at.trunc_subsecs(6),
            refresh_issued_at: token.refresh_issued_at.trunc_subsecs(6),
        })
    }

    fn latest(&self) -> Result<Option<TokenRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "{} ORDER BY created_at DESC, id DESC LIMIT 1",
                SELECT_COLUMNS
            ))
            .context("Failed to prepare latest-token query")?;

        let mut rows = stmt.query([]).context("Failed to query latest token")?;
        match rows.next().context("Failed to read token row")? {
            Some(row) => Ok(Some(self.decode_row(row)?)),
            None => Ok(None),
        }
    }

    fn history(&self, limit: usize) -> Result<Vec<TokenRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "{} ORDER BY created_at DESC, id DESC LIMIT ?1",
                SELECT_COLUMNS
            ))
            .context("Failed to prepare token history query")?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut rows = stmt
            .query(params![limit])
            .context("Failed to query token history")?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().context("Failed to read token row")? {
            records.push(self.decode_row(row)?);
        }
        Ok(records)
    }

    fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM oauth_tokens", [], |row| row.get(0))
            .context("Failed to count token records")?;
        Ok(count.max(0) as u64)
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp in token store: {}", raw))
}
