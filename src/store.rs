//! # Account Store
//!
//! Record storage for user accounts and promo codes. The analysis core only
//! talks to [`AccountStore`]; `db::PgStore` backs it with Postgres and
//! [`MemoryStore`] keeps everything in process (tests, local runs without a
//! database).

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::error::StorageError;
use crate::models::{PromoCode, Tier, UserAccount};
use crate::quota::is_subscription_active;

/// Result of the atomic mark-and-grant step of a promo redemption
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedeemOutcome {
    /// Code marked used and subscription granted
    Redeemed,
    /// Code missing or already used; nothing changed
    CodeUnavailable,
    /// The user already holds an active paid subscription; nothing changed
    SubscriptionActive,
}

/// Storage backend for accounts and promo codes
///
/// Every method is a single atomic unit with respect to the persisted
/// records. In particular `consume_if_below` must be a conditional update and
/// `redeem_promo` must mark the code and grant the subscription together.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Fetch an account by user id
    async fn get_user(&self, user_id: i64) -> Result<Option<UserAccount>, StorageError>;

    /// Fetch an account, creating a free one on first contact
    async fn get_or_create_user(
        &self,
        user_id: i64,
        username: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<UserAccount, StorageError>;

    /// Zero the daily counter if the stored reset date is before `today`.
    /// Returns whether a reset happened.
    async fn reset_if_new_day(&self, user_id: i64, today: NaiveDate) -> Result<bool, StorageError>;

    /// Increment the daily and lifetime counters only if the daily counter is
    /// below `limit`. Returns the updated account, or `None` when the quota is
    /// exhausted (or the user does not exist).
    async fn consume_if_below(
        &self,
        user_id: i64,
        limit: u32,
    ) -> Result<Option<UserAccount>, StorageError>;

    /// Unconditionally zero the daily counter and stamp `today` as reset date
    async fn reset_daily(&self, user_id: i64, today: NaiveDate) -> Result<bool, StorageError>;

    /// Overwrite tier and expiry
    async fn set_subscription(
        &self,
        user_id: i64,
        tier: Tier,
        until: Option<DateTime<Utc>>,
    ) -> Result<bool, StorageError>;

    async fn get_promo(&self, code: &str) -> Result<Option<PromoCode>, StorageError>;

    /// Insert a new code. Returns `false` if the code already exists.
    async fn insert_promo(&self, promo: &PromoCode) -> Result<bool, StorageError>;

    async fn list_promos(&self) -> Result<Vec<PromoCode>, StorageError>;

    /// Delete every promo code, returning how many were removed
    async fn purge_promos(&self) -> Result<u64, StorageError>;

    /// Mark `code` used by `user_id` and grant `tier` until `until`, both or
    /// neither. The code must still be unused and the user must not hold a
    /// subscription active at `now`; both conditions are checked in the same
    /// atomic unit as the writes.
    async fn redeem_promo(
        &self,
        code: &str,
        user_id: i64,
        tier: Tier,
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<RedeemOutcome, StorageError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    users: HashMap<i64, UserAccount>,
    promos: HashMap<String, PromoCode>,
}

/// In-process store; one lock guards all records so every operation is atomic
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an account wholesale
    pub async fn put_user(&self, account: UserAccount) {
        let mut state = self.state.lock().await;
        state.users.insert(account.user_id, account);
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn get_user(&self, user_id: i64) -> Result<Option<UserAccount>, StorageError> {
        Ok(self.state.lock().await.users.get(&user_id).cloned())
    }

    async fn get_or_create_user(
        &self,
        user_id: i64,
        username: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<UserAccount, StorageError> {
        let mut state = self.state.lock().await;
        let account = state
            .users
            .entry(user_id)
            .or_insert_with(|| UserAccount::new(user_id, None, now));
        if let Some(name) = username {
            account.username = Some(name.to_string());
        }
        Ok(account.clone())
    }

    async fn reset_if_new_day(&self, user_id: i64, today: NaiveDate) -> Result<bool, StorageError> {
        let mut state = self.state.lock().await;
        match state.users.get_mut(&user_id) {
            Some(account) if account.last_reset_date < today => {
                account.daily_used = 0;
                account.last_reset_date = today;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn consume_if_below(
        &self,
        user_id: i64,
        limit: u32,
    ) -> Result<Option<UserAccount>, StorageError> {
        let mut state = self.state.lock().await;
        match state.users.get_mut(&user_id) {
            Some(account) if account.daily_used < limit => {
                account.daily_used += 1;
                account.total_analyzed += 1;
                Ok(Some(account.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn reset_daily(&self, user_id: i64, today: NaiveDate) -> Result<bool, StorageError> {
        let mut state = self.state.lock().await;
        match state.users.get_mut(&user_id) {
            Some(account) => {
                account.daily_used = 0;
                account.last_reset_date = today;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_subscription(
        &self,
        user_id: i64,
        tier: Tier,
        until: Option<DateTime<Utc>>,
    ) -> Result<bool, StorageError> {
        let mut state = self.state.lock().await;
        match state.users.get_mut(&user_id) {
            Some(account) => {
                account.tier = tier;
                account.subscription_until = until;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_promo(&self, code: &str) -> Result<Option<PromoCode>, StorageError> {
        Ok(self.state.lock().await.promos.get(code).cloned())
    }

    async fn insert_promo(&self, promo: &PromoCode) -> Result<bool, StorageError> {
        let mut state = self.state.lock().await;
        if state.promos.contains_key(&promo.code) {
            return Ok(false);
        }
        state.promos.insert(promo.code.clone(), promo.clone());
        Ok(true)
    }

    async fn list_promos(&self) -> Result<Vec<PromoCode>, StorageError> {
        let state = self.state.lock().await;
        let mut promos: Vec<PromoCode> = state.promos.values().cloned().collect();
        promos.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.code.cmp(&b.code)));
        Ok(promos)
    }

    async fn purge_promos(&self) -> Result<u64, StorageError> {
        let mut state = self.state.lock().await;
        let count = state.promos.len() as u64;
        state.promos.clear();
        Ok(count)
    }

    async fn redeem_promo(
        &self,
        code: &str,
        user_id: i64,
        tier: Tier,
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<RedeemOutcome, StorageError> {
        let mut state = self.state.lock().await;
        // Check both records before touching either
        let Some(account) = state.users.get(&user_id) else {
            return Err(StorageError::UserNotFound(user_id));
        };
        if is_subscription_active(account, now) {
            return Ok(RedeemOutcome::SubscriptionActive);
        }
        match state.promos.get(code) {
            Some(promo) if !promo.is_used => {}
            _ => return Ok(RedeemOutcome::CodeUnavailable),
        }

        if let Some(promo) = state.promos.get_mut(code) {
            promo.is_used = true;
            promo.used_by = Some(user_id);
            promo.used_at = Some(now);
        }
        if let Some(account) = state.users.get_mut(&user_id) {
            account.tier = tier;
            account.subscription_until = Some(until);
        }
        Ok(RedeemOutcome::Redeemed)
    }
}
