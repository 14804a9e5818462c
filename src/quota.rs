//! # Quota Ledger
//!
//! Answers "may this user run one more photo analysis today?" and records the
//! consumption. Limits derive from the subscription tier unless an admin
//! override is set on the account.
//!
//! There is no background job resetting counters: every check first runs
//! [`QuotaLedger::reset_if_new_day`], which is a conditional update and so
//! resets at most once per calendar day no matter how often it is called.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::QuotaConfig;
use crate::error::StorageError;
use crate::models::{Tier, UserAccount};
use crate::store::AccountStore;

/// Result of a quota check
#[derive(Debug, Clone, PartialEq)]
pub enum QuotaDecision {
    /// One unit was consumed
    Granted { used: u32, limit: u32 },
    /// Nothing was consumed, the daily allowance is spent
    Exhausted { used: u32, limit: u32 },
}

impl QuotaDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, QuotaDecision::Granted { .. })
    }
}

/// Snapshot of a user's allowance for status displays
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaStatus {
    pub used: u32,
    pub limit: u32,
    pub remaining: u32,
    pub tier: Tier,
    pub subscription_active: bool,
    pub subscription_until: Option<DateTime<Utc>>,
    pub total_analyzed: u64,
}

/// Per-user daily counters and tier-derived limits
pub struct QuotaLedger {
    store: Arc<dyn AccountStore>,
    config: QuotaConfig,
}

impl QuotaLedger {
    pub fn new(store: Arc<dyn AccountStore>, config: QuotaConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<dyn AccountStore> {
        &self.store
    }

    /// Daily limit for an account: the admin override if set, else the tier limit
    pub fn get_limit(&self, account: &UserAccount) -> u32 {
        if let Some(limit) = account.custom_limit {
            return limit;
        }
        match account.tier {
            Tier::Free => self.config.free_daily_limit,
            Tier::PremiumWeek | Tier::PremiumMonth => self.config.premium_daily_limit,
        }
    }

    /// Fetch the account, creating it on first contact
    pub async fn account(
        &self,
        user_id: i64,
        username: Option<&str>,
    ) -> Result<UserAccount, StorageError> {
        self.store.get_or_create_user(user_id, username, Utc::now()).await
    }

    pub async fn reset_if_new_day(&self, user_id: i64) -> Result<bool, StorageError> {
        self.reset_if_new_day_at(user_id, Utc::now()).await
    }

    pub async fn reset_if_new_day_at(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        self.store.reset_if_new_day(user_id, now.date_naive()).await
    }

    /// Consume one analysis unit if the user has any left today
    pub async fn try_consume(&self, user_id: i64) -> Result<QuotaDecision, StorageError> {
        self.try_consume_at(user_id, Utc::now()).await
    }

    pub async fn try_consume_at(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<QuotaDecision, StorageError> {
        self.store.get_or_create_user(user_id, None, now).await?;
        self.reset_if_new_day_at(user_id, now).await?;

        let account = self
            .store
            .get_user(user_id)
            .await?
            .ok_or(StorageError::UserNotFound(user_id))?;
        let limit = self.get_limit(&account);

        match self.store.consume_if_below(user_id, limit).await? {
            Some(updated) => {
                info!(user_id, used = updated.daily_used, limit, "Photo quota consumed");
                Ok(QuotaDecision::Granted {
                    used: updated.daily_used,
                    limit,
                })
            }
            None => {
                // Re-read so the reported count reflects concurrent consumers
                let used = self
                    .store
                    .get_user(user_id)
                    .await?
                    .map(|a| a.daily_used)
                    .unwrap_or(account.daily_used);
                warn!(user_id, used, limit, "Photo quota exhausted");
                Ok(QuotaDecision::Exhausted { used, limit })
            }
        }
    }

    /// Admin override: zero today's counter regardless of the calendar
    pub async fn reset_daily(&self, user_id: i64) -> Result<bool, StorageError> {
        let reset = self.store.reset_daily(user_id, Utc::now().date_naive()).await?;
        if reset {
            info!(user_id, "Daily quota reset by administrator");
        }
        Ok(reset)
    }

    /// Overwrite tier and expiry, creating the account if needed
    pub async fn set_subscription(
        &self,
        user_id: i64,
        tier: Tier,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError> {
        self.store.get_or_create_user(user_id, None, Utc::now()).await?;
        if !self.store.set_subscription(user_id, tier, until).await? {
            return Err(StorageError::UserNotFound(user_id));
        }
        info!(user_id, tier = %tier, until = ?until, "Subscription updated");
        Ok(())
    }

    /// Current usage, applying any pending daily reset first
    pub async fn status(&self, user_id: i64) -> Result<QuotaStatus, StorageError> {
        let now = Utc::now();
        self.store.get_or_create_user(user_id, None, now).await?;
        self.reset_if_new_day_at(user_id, now).await?;
        let account = self
            .store
            .get_user(user_id)
            .await?
            .ok_or(StorageError::UserNotFound(user_id))?;

        let limit = self.get_limit(&account);
        debug!(user_id, used = account.daily_used, limit, "Quota status requested");
        Ok(QuotaStatus {
            used: account.daily_used,
            limit,
            remaining: limit.saturating_sub(account.daily_used),
            tier: account.tier,
            subscription_active: is_subscription_active(&account, now),
            subscription_until: account.subscription_until,
            total_analyzed: account.total_analyzed,
        })
    }
}

/// Paid tier with no expiry or an expiry in the future.
///
/// A paid tier without an expiry is a permanent grant (admin action).
pub fn is_subscription_active(account: &UserAccount, now: DateTime<Utc>) -> bool {
    account.tier.is_paid() && account.subscription_until.map_or(true, |until| until > now)
}
