//! # Postgres Store
//!
//! `AccountStore` implementation on top of sqlx/Postgres. Quota consumption
//! is a single conditional `UPDATE`, promo redemption runs in a transaction.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgPool;
use tracing::{debug, info, warn};

use crate::error::StorageError;
use crate::models::{PromoCode, PromoRow, Tier, UserAccount, UserRow};
use crate::store::{AccountStore, RedeemOutcome};

const USER_COLUMNS: &str = "user_id, username, created_at, subscription_type, subscription_until, \
     daily_photos_used, last_reset_date, total_photos_analyzed, custom_photo_limit";

const PROMO_COLUMNS: &str = "code, promo_type, is_used, used_by, used_at, created_at, expires_at";

/// Initialize the database schema
pub async fn init_database_schema(pool: &PgPool) -> Result<(), StorageError> {
    info!("Initializing database schema...");

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS users (
            user_id BIGINT PRIMARY KEY,
            username TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            subscription_type TEXT NOT NULL DEFAULT 'free',
            subscription_until TIMESTAMPTZ,
            daily_photos_used INTEGER NOT NULL DEFAULT 0,
            last_reset_date DATE NOT NULL DEFAULT CURRENT_DATE,
            total_photos_analyzed BIGINT NOT NULL DEFAULT 0,
            custom_photo_limit INTEGER,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS promo_codes (
            code TEXT PRIMARY KEY,
            promo_type TEXT NOT NULL,
            is_used BOOLEAN NOT NULL DEFAULT FALSE,
            used_by BIGINT,
            used_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            expires_at TIMESTAMPTZ
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_promo_codes_is_used ON promo_codes (is_used)")
        .execute(pool)
        .await?;

    info!("Database schema initialized successfully");
    Ok(())
}

/// Postgres-backed account and promo storage
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn limit_param(limit: u32) -> i32 {
    i32::try_from(limit).unwrap_or(i32::MAX)
}

#[async_trait]
impl AccountStore for PgStore {
    async fn get_user(&self, user_id: i64) -> Result<Option<UserAccount>, StorageError> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = $1"))
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(UserAccount::from_row).transpose()
    }

    async fn get_or_create_user(
        &self,
        user_id: i64,
        username: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<UserAccount, StorageError> {
        let row: UserRow = sqlx::query_as(&format!(
            "INSERT INTO users (user_id, username, created_at, last_reset_date)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (user_id) DO UPDATE
                 SET username = COALESCE(EXCLUDED.username, users.username)
             RETURNING {USER_COLUMNS}"
        ))
        .bind(user_id)
        .bind(username)
        .bind(now)
        .bind(now.date_naive())
        .fetch_one(&self.pool)
        .await?;

        UserAccount::from_row(row)
    }

    async fn reset_if_new_day(&self, user_id: i64, today: NaiveDate) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "UPDATE users
             SET daily_photos_used = 0, last_reset_date = $2, updated_at = NOW()
             WHERE user_id = $1 AND last_reset_date < $2",
        )
        .bind(user_id)
        .bind(today)
        .execute(&self.pool)
        .await?;

        let reset = result.rows_affected() > 0;
        if reset {
            debug!(user_id, %today, "Daily counter reset");
        }
        Ok(reset)
    }

    async fn consume_if_below(
        &self,
        user_id: i64,
        limit: u32,
    ) -> Result<Option<UserAccount>, StorageError> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "UPDATE users
             SET daily_photos_used = daily_photos_used + 1,
                 total_photos_analyzed = total_photos_analyzed + 1,
                 updated_at = NOW()
             WHERE user_id = $1 AND daily_photos_used < $2
             RETURNING {USER_COLUMNS}"
        ))
        .bind(user_id)
        .bind(limit_param(limit))
        .fetch_optional(&self.pool)
        .await?;

        row.map(UserAccount::from_row).transpose()
    }

    async fn reset_daily(&self, user_id: i64, today: NaiveDate) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "UPDATE users
             SET daily_photos_used = 0, last_reset_date = $2, updated_at = NOW()
             WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(today)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_subscription(
        &self,
        user_id: i64,
        tier: Tier,
        until: Option<DateTime<Utc>>,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "UPDATE users
             SET subscription_type = $2, subscription_until = $3, updated_at = NOW()
             WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(tier.as_str())
        .bind(until)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_promo(&self, code: &str) -> Result<Option<PromoCode>, StorageError> {
        let row: Option<PromoRow> =
            sqlx::query_as(&format!("SELECT {PROMO_COLUMNS} FROM promo_codes WHERE code = $1"))
                .bind(code)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(PromoCode::from_row))
    }

    async fn insert_promo(&self, promo: &PromoCode) -> Result<bool, StorageError> {
        let row = promo.to_row();
        let result = sqlx::query(
            "INSERT INTO promo_codes (code, promo_type, is_used, used_by, used_at, created_at, expires_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (code) DO NOTHING",
        )
        .bind(&row.code)
        .bind(&row.promo_type)
        .bind(row.is_used)
        .bind(row.used_by)
        .bind(row.used_at)
        .bind(row.created_at)
        .bind(row.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_promos(&self) -> Result<Vec<PromoCode>, StorageError> {
        let rows: Vec<PromoRow> = sqlx::query_as(&format!(
            "SELECT {PROMO_COLUMNS} FROM promo_codes ORDER BY created_at DESC, code"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PromoCode::from_row).collect())
    }

    async fn purge_promos(&self) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM promo_codes").execute(&self.pool).await?;
        warn!(deleted = result.rows_affected(), "All promo codes purged");
        Ok(result.rows_affected())
    }

    async fn redeem_promo(
        &self,
        code: &str,
        user_id: i64,
        tier: Tier,
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<RedeemOutcome, StorageError> {
        let mut tx = self.pool.begin().await?;

        // Grant first: the row lock serializes concurrent redemptions by the
        // same user, and the guard is re-evaluated against the committed row.
        let granted = sqlx::query(
            "UPDATE users
             SET subscription_type = $2, subscription_until = $3, updated_at = NOW()
             WHERE user_id = $1
               AND NOT (subscription_type <> 'free'
                        AND (subscription_until IS NULL OR subscription_until > $4))",
        )
        .bind(user_id)
        .bind(tier.as_str())
        .bind(until)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if granted.rows_affected() == 0 {
            let exists: Option<i64> =
                sqlx::query_scalar("SELECT user_id FROM users WHERE user_id = $1")
                    .bind(user_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            tx.rollback().await?;
            return match exists {
                Some(_) => {
                    debug!(user_id, code, "Redemption refused, subscription active");
                    Ok(RedeemOutcome::SubscriptionActive)
                }
                None => Err(StorageError::UserNotFound(user_id)),
            };
        }

        let marked = sqlx::query(
            "UPDATE promo_codes
             SET is_used = TRUE, used_by = $2, used_at = $3
             WHERE code = $1 AND is_used = FALSE",
        )
        .bind(code)
        .bind(user_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if marked.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(RedeemOutcome::CodeUnavailable);
        }

        tx.commit().await?;
        info!(user_id, code, tier = %tier, "Promo code redeemed");
        Ok(RedeemOutcome::Redeemed)
    }
}
