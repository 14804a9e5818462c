//! # Account and Promo Models
//!
//! Typed user accounts and promo codes, plus the row types that cross the
//! storage boundary. `UserRow`/`PromoRow` mirror the persisted columns;
//! `from_row`/`to_row` are the only places the two shapes are converted.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::error::StorageError;

/// Subscription level of a user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[default]
    Free,
    PremiumWeek,
    PremiumMonth,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::PremiumWeek => "premium_week",
            Tier::PremiumMonth => "premium_month",
        }
    }

    pub fn is_paid(&self) -> bool {
        !matches!(self, Tier::Free)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "premium_week" | "week" => Ok(Tier::PremiumWeek),
            "premium_month" | "month" | "premium" => Ok(Tier::PremiumMonth),
            other => Err(format!("unknown tier: {other}")),
        }
    }
}

/// Kind of subscription a promo code grants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromoType {
    PremiumWeek,
    PremiumMonth,
}

impl PromoType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromoType::PremiumWeek => "premium_week",
            PromoType::PremiumMonth => "premium_month",
        }
    }

    /// Tier granted on redemption
    pub fn tier(&self) -> Tier {
        match self {
            PromoType::PremiumWeek => Tier::PremiumWeek,
            PromoType::PremiumMonth => Tier::PremiumMonth,
        }
    }

    /// Length of the granted subscription
    pub fn duration_days(&self) -> i64 {
        match self {
            PromoType::PremiumWeek => 7,
            PromoType::PremiumMonth => 30,
        }
    }

    /// Lenient parse used for stored rows: anything mentioning "month" is a
    /// month code, everything else a week code.
    fn from_stored(raw: &str) -> Self {
        if raw.to_lowercase().contains("month") {
            PromoType::PremiumMonth
        } else {
            PromoType::PremiumWeek
        }
    }
}

impl fmt::Display for PromoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PromoType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "week" | "premium_week" => Ok(PromoType::PremiumWeek),
            "month" | "premium_month" => Ok(PromoType::PremiumMonth),
            other => Err(format!("unknown promo type: {other}")),
        }
    }
}

/// A user account as the analysis core sees it
#[derive(Debug, Clone, PartialEq)]
pub struct UserAccount {
    pub user_id: i64,
    pub username: Option<String>,
    pub created_at: DateTime<Utc>,
    pub tier: Tier,
    pub subscription_until: Option<DateTime<Utc>>,
    pub daily_used: u32,
    pub last_reset_date: NaiveDate,
    pub total_analyzed: u64,
    /// Admin/testing override of the tier limit
    pub custom_limit: Option<u32>,
}

impl UserAccount {
    /// Fresh free-tier account
    pub fn new(user_id: i64, username: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            username,
            created_at: now,
            tier: Tier::Free,
            subscription_until: None,
            daily_used: 0,
            last_reset_date: now.date_naive(),
            total_analyzed: 0,
            custom_limit: None,
        }
    }

    pub fn from_row(row: UserRow) -> Result<Self, StorageError> {
        let tier = row.subscription_type.parse().unwrap_or_else(|e| {
            warn!(user_id = row.user_id, error = %e, "Unknown tier in user row, treating as free");
            Tier::Free
        });

        let daily_used = u32::try_from(row.daily_photos_used).map_err(|_| {
            StorageError::CorruptRecord(format!(
                "user {} has negative daily counter {}",
                row.user_id, row.daily_photos_used
            ))
        })?;
        let total_analyzed = u64::try_from(row.total_photos_analyzed).map_err(|_| {
            StorageError::CorruptRecord(format!(
                "user {} has negative lifetime counter {}",
                row.user_id, row.total_photos_analyzed
            ))
        })?;
        // A negative override is meaningless; fall back to the tier limit
        let custom_limit = row.custom_photo_limit.and_then(|l| u32::try_from(l).ok());

        Ok(Self {
            user_id: row.user_id,
            username: row.username,
            created_at: row.created_at,
            tier,
            subscription_until: row.subscription_until,
            daily_used,
            last_reset_date: row.last_reset_date,
            total_analyzed,
            custom_limit,
        })
    }

    pub fn to_row(&self) -> UserRow {
        UserRow {
            user_id: self.user_id,
            username: self.username.clone(),
            created_at: self.created_at,
            subscription_type: self.tier.as_str().to_string(),
            subscription_until: self.subscription_until,
            daily_photos_used: i32::try_from(self.daily_used).unwrap_or(i32::MAX),
            last_reset_date: self.last_reset_date,
            total_photos_analyzed: i64::try_from(self.total_analyzed).unwrap_or(i64::MAX),
            custom_photo_limit: self.custom_limit.map(|l| i32::try_from(l).unwrap_or(i32::MAX)),
        }
    }
}

/// Persisted shape of a user account
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct UserRow {
    pub user_id: i64,
    #[sqlx(default)]
    pub username: Option<String>,
    pub created_at: DateTime<Utc>,
    pub subscription_type: String,
    #[sqlx(default)]
    pub subscription_until: Option<DateTime<Utc>>,
    pub daily_photos_used: i32,
    pub last_reset_date: NaiveDate,
    pub total_photos_analyzed: i64,
    #[sqlx(default)]
    pub custom_photo_limit: Option<i32>,
}

/// A single-use subscription code
#[derive(Debug, Clone, PartialEq)]
pub struct PromoCode {
    pub code: String,
    pub promo_type: PromoType,
    pub is_used: bool,
    pub used_by: Option<i64>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl PromoCode {
    pub fn new(
        code: String,
        promo_type: PromoType,
        now: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            code,
            promo_type,
            is_used: false,
            used_by: None,
            used_at: None,
            created_at: now,
            expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| expires < now)
    }

    /// Unused and not expired
    pub fn is_redeemable(&self, now: DateTime<Utc>) -> bool {
        !self.is_used && !self.is_expired(now)
    }

    pub fn from_row(row: PromoRow) -> Self {
        Self {
            promo_type: PromoType::from_stored(&row.promo_type),
            code: row.code,
            is_used: row.is_used,
            used_by: row.used_by,
            used_at: row.used_at,
            created_at: row.created_at,
            expires_at: row.expires_at,
        }
    }

    pub fn to_row(&self) -> PromoRow {
        PromoRow {
            code: self.code.clone(),
            promo_type: self.promo_type.as_str().to_string(),
            is_used: self.is_used,
            used_by: self.used_by,
            used_at: self.used_at,
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}

/// Persisted shape of a promo code
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct PromoRow {
    pub code: String,
    pub promo_type: String,
    #[sqlx(default)]
    pub is_used: bool,
    #[sqlx(default)]
    pub used_by: Option<i64>,
    #[sqlx(default)]
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[sqlx(default)]
    pub expires_at: Option<DateTime<Utc>>,
}
