pub mod event_log;

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteConnectOptions, SqlitePool};
use std::{path::Path, str::FromStr};
use tracing::warn;

use crate::policy::{CreditBalance, UserCreditState};

/// Default timeout for individual SQLite queries.
/// Prevents a hung query from blocking a CLI invocation indefinitely.
const QUERY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Execute a future with the standard query timeout.
async fn with_timeout<T>(fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(QUERY_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!(
            "database query timed out after {}s",
            QUERY_TIMEOUT.as_secs()
        )),
    }
}

// ─── Rows ─────────────────────────────────────────────────────────────────────

/// One persisted credit state, as stored.
///
/// `last_renewal_at` is RFC-3339 TEXT; `unlimited` and `credits_remaining`
/// are separate columns so no count value is reserved as a sentinel.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CreditStateRow {
    pub user_id: String,
    pub unlimited: bool,
    pub credits_remaining: i64,
    pub last_renewal_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl CreditStateRow {
    /// Decode the row into policy state, sanitizing malformed values.
    ///
    /// Deny-leaning defaults: a negative count reads as zero remaining; an
    /// unparsable timestamp reads as "never renewed" (which forces a renewal
    /// and restores a sane row on the next evaluation).
    pub fn to_state(&self) -> UserCreditState {
        let last_renewal_at = self.last_renewal_at.as_deref().and_then(|raw| {
            match DateTime::parse_from_rfc3339(raw) {
                Ok(dt) => Some(dt.with_timezone(&Utc)),
                Err(e) => {
                    warn!(user_id = %self.user_id, raw, err = %e, "unparsable last_renewal_at — treating as never renewed");
                    None
                }
            }
        });

        let balance = if self.unlimited {
            CreditBalance::Unlimited
        } else if self.credits_remaining < 0 {
            warn!(user_id = %self.user_id, credits = self.credits_remaining, "negative stored credit count — treating as zero");
            CreditBalance::Metered(0)
        } else {
            CreditBalance::Metered(self.credits_remaining.min(u32::MAX as i64) as u32)
        };

        UserCreditState {
            balance,
            last_renewal_at,
        }
    }
}

// ─── Storage ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        Self::new_with_slow_query(data_dir, 0).await
    }

    /// Create storage with slow-query logging enabled.
    ///
    /// `slow_query_ms` is the threshold in milliseconds — queries exceeding
    /// it are logged at WARN level. Set to 0 to disable slow-query logging.
    pub async fn new_with_slow_query(data_dir: &Path, slow_query_ms: u64) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let db_path = data_dir.join("creditd.db");
        let mut opts =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))?
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .create_if_missing(true);

        if slow_query_ms > 0 {
            use sqlx::ConnectOptions as _;
            opts = opts.log_slow_statements(
                log::LevelFilter::Warn,
                std::time::Duration::from_millis(slow_query_ms),
            );
        }

        let pool = SqlitePool::connect_with(opts).await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> Result<()> {
        sqlx::migrate!("src/storage/migrations")
            .run(pool)
            .await
            .context("Failed to run database migrations")
    }

    // ─── Credit states ────────────────────────────────────────────────────

    /// Insert a fresh credit state for `user_id`.
    ///
    /// Returns `false` (and leaves the row untouched) if one already exists.
    pub async fn create_state(&self, user_id: &str, state: &UserCreditState) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let (unlimited, credits) = encode_balance(state.balance);
        let last = state.last_renewal_at.map(|t| t.to_rfc3339());
        with_timeout(async {
            let result = sqlx::query(
                "INSERT INTO credit_states
                     (user_id, unlimited, credits_remaining, last_renewal_at, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(user_id) DO NOTHING",
            )
            .bind(user_id)
            .bind(unlimited)
            .bind(credits)
            .bind(&last)
            .bind(&now)
            .bind(&now)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    pub async fn get_state(&self, user_id: &str) -> Result<Option<CreditStateRow>> {
        with_timeout(async {
            Ok(
                sqlx::query_as("SELECT * FROM credit_states WHERE user_id = ?")
                    .bind(user_id)
                    .fetch_optional(&self.pool)
                    .await?,
            )
        })
        .await
    }

    pub async fn list_states(&self) -> Result<Vec<CreditStateRow>> {
        with_timeout(async {
            Ok(sqlx::query_as("SELECT * FROM credit_states ORDER BY user_id")
                .fetch_all(&self.pool)
                .await?)
        })
        .await
    }

    /// Apply a daily renewal as an idempotent conditional write.
    ///
    /// The guard compares against the `last_renewal_at` the caller observed
    /// when it decided the renewal was due. Of two racing renewals for the
    /// same user, only one matches the guard; the loser must re-read.
    /// Returns whether this write applied.
    pub async fn apply_renewal(
        &self,
        user_id: &str,
        observed_last_renewal_at: Option<&str>,
        renewed: &UserCreditState,
    ) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let (unlimited, credits) = encode_balance(renewed.balance);
        let stamp = renewed.last_renewal_at.map(|t| t.to_rfc3339());
        with_timeout(async {
            let result = sqlx::query(
                "UPDATE credit_states
                 SET unlimited = ?, credits_remaining = ?, last_renewal_at = ?, updated_at = ?
                 WHERE user_id = ? AND last_renewal_at IS ?",
            )
            .bind(unlimited)
            .bind(credits)
            .bind(&stamp)
            .bind(&now)
            .bind(user_id)
            .bind(observed_last_renewal_at)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    /// Apply one metered decrement as a compare-and-set on the prior count.
    ///
    /// Two consumptions evaluated against the same stale snapshot cannot
    /// both commit: the second no longer matches `observed_remaining`.
    /// The guard also keeps the stored count from ever going negative.
    /// Returns whether this write applied.
    pub async fn apply_consumption(
        &self,
        user_id: &str,
        observed_remaining: i64,
        new_remaining: i64,
    ) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        with_timeout(async {
            let result = sqlx::query(
                "UPDATE credit_states
                 SET credits_remaining = ?, updated_at = ?
                 WHERE user_id = ? AND unlimited = 0 AND credits_remaining = ?",
            )
            .bind(new_remaining)
            .bind(&now)
            .bind(user_id)
            .bind(observed_remaining)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    /// Set an unlimited grant for the remainder of the grant day.
    ///
    /// Stamps `last_renewal_at = granted_at`. Returns `false` when no such
    /// user exists.
    pub async fn apply_grant(&self, user_id: &str, granted_at: DateTime<Utc>) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        with_timeout(async {
            let result = sqlx::query(
                "UPDATE credit_states
                 SET unlimited = 1, last_renewal_at = ?, updated_at = ?
                 WHERE user_id = ?",
            )
            .bind(granted_at.to_rfc3339())
            .bind(&now)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }
}

fn encode_balance(balance: CreditBalance) -> (bool, i64) {
    match balance {
        CreditBalance::Unlimited => (true, 0),
        CreditBalance::Metered(n) => (false, i64::from(n)),
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
