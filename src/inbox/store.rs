// SPDX-License-Identifier: MIT
//! Durable inbox storage.
//!
//! One [`InboxStore`] trait, one concrete [`SqliteStore`] adapter (SQLite in
//! WAL mode). The trait is the contract the router and lifecycle manager
//! program against; tests may substitute their own adapter.
//!
//! Contract highlights:
//! - `put` never overwrites an existing token.
//! - Reads of expired records behave as not-found.
//! - Malformed tokens are not-found, not store errors.
//! - `drain` returns-and-clears in one transaction: appends arriving during
//!   a drain are neither lost nor replayed by the next drain.

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::{sqlite::SqliteConnectOptions, SqlitePool};
use std::path::Path;
use std::str::FromStr;

use super::model::{InboxRecord, Message};
use crate::tier::Tier;

/// Default timeout for individual SQLite queries.
/// Prevents hung queries from blocking the daemon indefinitely.
const QUERY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

async fn with_timeout<T>(fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(QUERY_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!(
            "database query timed out after {}s",
            QUERY_TIMEOUT.as_secs()
        )),
    }
}

/// Tokens are URL-safe base64; anything else is rejected before touching
/// the store.
static TOKEN_SHAPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());

pub fn token_is_well_formed(token: &str) -> bool {
    !token.is_empty() && token.len() <= 128 && TOKEN_SHAPE.is_match(token)
}

/// A custom domain bound to an owning account for webhook delivery.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DomainBinding {
    pub domain:      String,
    pub owner_id:    String,
    /// Unix millis until which the owning subscription is considered live.
    pub valid_until: i64,
    pub created_at:  i64,
}

impl DomainBinding {
    pub fn is_live(&self, now_millis: i64) -> bool {
        self.valid_until > now_millis
    }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

#[async_trait]
pub trait InboxStore: Send + Sync {
    /// Persist a new inbox. Fails if the token already exists.
    async fn put(&self, record: &InboxRecord) -> Result<()>;

    /// Look up a live inbox by token. Malformed or expired ⇒ `None`.
    async fn get_by_token(&self, token: &str) -> Result<Option<InboxRecord>>;

    /// Look up the most-recently-created live inbox for an address.
    async fn get_by_address(&self, address: &str) -> Result<Option<InboxRecord>>;

    /// Queue a message for a later drain. Arrival order is preserved.
    async fn append_message(&self, token: &str, message: &Message) -> Result<()>;

    /// Return and clear the pending queue atomically.
    async fn drain_messages(&self, token: &str) -> Result<Vec<Message>>;

    /// Delete every inbox whose expiry has passed, with its queue.
    /// Idempotent; safe to run concurrently with reads and writes.
    async fn sweep_expired(&self) -> Result<u64>;

    /// Count live inboxes. Expensive — callers cache it.
    async fn count_active(&self) -> Result<u64>;

    /// Total accepted messages, for stats reporting.
    async fn increment_received(&self) -> Result<()>;
    async fn received_total(&self) -> Result<u64>;

    /// Account-level webhook sink, keyed by owner identity.
    async fn set_account_webhook(&self, owner_id: &str, url: &str) -> Result<()>;
    async fn get_account_webhook(&self, owner_id: &str) -> Result<Option<String>>;
    async fn delete_account_webhook(&self, owner_id: &str) -> Result<()>;

    /// Custom-domain ownership bindings.
    async fn put_domain_binding(&self, binding: &DomainBinding) -> Result<()>;
    async fn get_domain_binding(&self, domain: &str) -> Result<Option<DomainBinding>>;
    /// Returns `false` when no binding owned by `owner_id` existed.
    async fn delete_domain_binding(&self, domain: &str, owner_id: &str) -> Result<bool>;
}

// ─── SQLite adapter ──────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct InboxRow {
    token:       String,
    address:     String,
    tier:        String,
    owner_id:    Option<String>,
    webhook_url: Option<String>,
    expires_at:  i64,
    created_at:  i64,
}

impl From<InboxRow> for InboxRecord {
    fn from(row: InboxRow) -> InboxRecord {
        InboxRecord {
            address: row.address,
            token: row.token,
            expires_at: row.expires_at,
            tier: Tier::parse(&row.tier),
            owner_id: row.owner_id,
            webhook_url: row.webhook_url,
            created_at: row.created_at,
        }
    }
}

impl SqliteStore {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let db_path = data_dir.join("wispmail.db");
        let opts =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))?
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .create_if_missing(true);
        let pool = SqlitePool::connect_with(opts).await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> Result<()> {
        let stmts = [
            "CREATE TABLE IF NOT EXISTS inboxes (
                token       TEXT PRIMARY KEY,
                address     TEXT NOT NULL,
                tier        TEXT NOT NULL DEFAULT 'none',
                owner_id    TEXT,
                webhook_url TEXT,
                expires_at  INTEGER NOT NULL,
                created_at  INTEGER NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_inboxes_address ON inboxes(address)",
            "CREATE TABLE IF NOT EXISTS inbox_messages (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                token     TEXT NOT NULL,
                payload   TEXT NOT NULL,
                queued_at INTEGER NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_inbox_messages_token ON inbox_messages(token)",
            "CREATE TABLE IF NOT EXISTS account_webhooks (
                owner_id   TEXT PRIMARY KEY,
                url        TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS domain_bindings (
                domain      TEXT PRIMARY KEY,
                owner_id    TEXT NOT NULL,
                valid_until INTEGER NOT NULL,
                created_at  INTEGER NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS counters (
                name  TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            )",
        ];
        for stmt in stmts {
            sqlx::query(stmt)
                .execute(pool)
                .await
                .context("failed to run schema statement")?;
        }
        Ok(())
    }

    fn now_millis() -> i64 {
        Utc::now().timestamp_millis()
    }
}

#[async_trait]
impl InboxStore for SqliteStore {
    async fn put(&self, record: &InboxRecord) -> Result<()> {
        // Plain INSERT: the token primary key makes an overwrite a conflict
        // error instead of a silent replace.
        sqlx::query(
            "INSERT INTO inboxes (token, address, tier, owner_id, webhook_url, expires_at, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.token)
        .bind(&record.address)
        .bind(record.tier.as_str())
        .bind(&record.owner_id)
        .bind(&record.webhook_url)
        .bind(record.expires_at)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .context("failed to insert inbox")?;
        Ok(())
    }

    async fn get_by_token(&self, token: &str) -> Result<Option<InboxRecord>> {
        if !token_is_well_formed(token) {
            return Ok(None);
        }
        let row: Option<InboxRow> =
            sqlx::query_as("SELECT * FROM inboxes WHERE token = ? AND expires_at > ?")
                .bind(token)
                .bind(Self::now_millis())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(InboxRecord::from))
    }

    async fn get_by_address(&self, address: &str) -> Result<Option<InboxRecord>> {
        let row: Option<InboxRow> = sqlx::query_as(
            "SELECT * FROM inboxes WHERE address = ? AND expires_at > ?
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(address)
        .bind(Self::now_millis())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(InboxRecord::from))
    }

    async fn append_message(&self, token: &str, message: &Message) -> Result<()> {
        let payload = serde_json::to_string(message)?;
        sqlx::query("INSERT INTO inbox_messages (token, payload, queued_at) VALUES (?, ?, ?)")
            .bind(token)
            .bind(&payload)
            .bind(Self::now_millis())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn drain_messages(&self, token: &str) -> Result<Vec<Message>> {
        // Select and delete inside one transaction, bounded by the highest
        // id seen: a message appended mid-drain survives for the next drain.
        let mut tx = self.pool.begin().await?;
        let rows: Vec<(i64, String)> =
            sqlx::query_as("SELECT id, payload FROM inbox_messages WHERE token = ? ORDER BY id")
                .bind(token)
                .fetch_all(&mut *tx)
                .await?;
        if let Some((last_id, _)) = rows.last() {
            sqlx::query("DELETE FROM inbox_messages WHERE token = ? AND id <= ?")
                .bind(token)
                .bind(last_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        let mut messages = Vec::with_capacity(rows.len());
        for (_, payload) in rows {
            messages.push(serde_json::from_str(&payload).context("corrupt queued message")?);
        }
        Ok(messages)
    }

    async fn sweep_expired(&self) -> Result<u64> {
        let now = Self::now_millis();
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM inbox_messages WHERE token IN
             (SELECT token FROM inboxes WHERE expires_at <= ?)",
        )
        .bind(now)
        .execute(&mut *tx)
        .await?;
        let swept = sqlx::query("DELETE FROM inboxes WHERE expires_at <= ?")
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(swept)
    }

    async fn count_active(&self) -> Result<u64> {
        with_timeout(async {
            let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM inboxes WHERE expires_at > ?")
                .bind(Self::now_millis())
                .fetch_one(&self.pool)
                .await?;
            Ok(row.0 as u64)
        })
        .await
    }

    async fn increment_received(&self) -> Result<()> {
        sqlx::query(
            "INSERT INTO counters (name, value) VALUES ('received', 1)
             ON CONFLICT(name) DO UPDATE SET value = value + 1",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn received_total(&self) -> Result<u64> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT value FROM counters WHERE name = 'received'")
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(v,)| v as u64).unwrap_or(0))
    }

    async fn set_account_webhook(&self, owner_id: &str, url: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO account_webhooks (owner_id, url, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(owner_id) DO UPDATE SET url = excluded.url, updated_at = excluded.updated_at",
        )
        .bind(owner_id)
        .bind(url)
        .bind(Self::now_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_account_webhook(&self, owner_id: &str) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT url FROM account_webhooks WHERE owner_id = ?")
                .bind(owner_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(url,)| url))
    }

    async fn delete_account_webhook(&self, owner_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM account_webhooks WHERE owner_id = ?")
            .bind(owner_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn put_domain_binding(&self, binding: &DomainBinding) -> Result<()> {
        sqlx::query(
            "INSERT INTO domain_bindings (domain, owner_id, valid_until, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(domain) DO UPDATE SET
               owner_id = excluded.owner_id,
               valid_until = excluded.valid_until",
        )
        .bind(&binding.domain)
        .bind(&binding.owner_id)
        .bind(binding.valid_until)
        .bind(binding.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_domain_binding(&self, domain: &str) -> Result<Option<DomainBinding>> {
        Ok(sqlx::query_as("SELECT * FROM domain_bindings WHERE domain = ?")
            .bind(domain)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn delete_domain_binding(&self, domain: &str, owner_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM domain_bindings WHERE domain = ? AND owner_id = ?")
            .bind(domain)
            .bind(owner_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
