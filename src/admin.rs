//! # Admin Operations
//!
//! Privileged operations on accounts and promo codes. Every operation starts
//! with [`AdminService::require_admin`]; administrators are the user ids
//! listed in `ADMIN_USER_IDS`.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{BotError, BotResult, StorageError};
use crate::models::{PromoCode, PromoType, Tier, UserAccount};
use crate::promo::{PromoService, Redemption};
use crate::quota::{QuotaLedger, QuotaStatus};

/// Upper bound on codes generated by one command
pub const MAX_CODES_PER_BATCH: usize = 100;

/// Account plus derived quota figures, for `/user_info`
#[derive(Debug, Clone, PartialEq)]
pub struct UserInfo {
    pub account: UserAccount,
    pub status: QuotaStatus,
}

pub struct AdminService {
    admin_ids: HashSet<i64>,
    quota: Arc<QuotaLedger>,
    promos: Arc<PromoService>,
}

impl AdminService {
    pub fn new(admin_ids: HashSet<i64>, quota: Arc<QuotaLedger>, promos: Arc<PromoService>) -> Self {
        Self {
            admin_ids,
            quota,
            promos,
        }
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_ids.contains(&user_id)
    }

    pub fn require_admin(&self, user_id: i64) -> BotResult<()> {
        if self.is_admin(user_id) {
            Ok(())
        } else {
            warn!(user_id, "Admin operation denied");
            Err(BotError::Forbidden(user_id))
        }
    }

    pub async fn generate_promo_codes(
        &self,
        admin_id: i64,
        promo_type: PromoType,
        count: usize,
    ) -> BotResult<Vec<String>> {
        self.require_admin(admin_id)?;
        if count == 0 || count > MAX_CODES_PER_BATCH {
            return Err(BotError::Validation(format!(
                "count must be between 1 and {MAX_CODES_PER_BATCH}, got {count}"
            )));
        }

        let valid_days = self.promos.config().valid_days;
        let codes = self.promos.generate_codes(promo_type, count, valid_days).await?;
        info!(admin_id, count, promo_type = %promo_type, "Admin generated promo codes");
        Ok(codes)
    }

    pub async fn reset_user_daily_limit(&self, admin_id: i64, user_id: i64) -> BotResult<()> {
        self.require_admin(admin_id)?;
        if !self.quota.reset_daily(user_id).await? {
            return Err(StorageError::UserNotFound(user_id).into());
        }
        info!(admin_id, user_id, "Admin reset daily limit");
        Ok(())
    }

    pub async fn set_user_subscription(
        &self,
        admin_id: i64,
        user_id: i64,
        tier: Tier,
        until: Option<DateTime<Utc>>,
    ) -> BotResult<()> {
        self.require_admin(admin_id)?;
        self.quota.set_subscription(user_id, tier, until).await?;
        info!(admin_id, user_id, tier = %tier, "Admin set subscription");
        Ok(())
    }

    pub async fn list_promo_codes(&self, admin_id: i64) -> BotResult<Vec<PromoCode>> {
        self.require_admin(admin_id)?;
        Ok(self.promos.list_codes().await?)
    }

    pub async fn user_info(&self, admin_id: i64, user_id: i64) -> BotResult<UserInfo> {
        self.require_admin(admin_id)?;
        let account = self
            .quota
            .store()
            .get_user(user_id)
            .await?
            .ok_or(StorageError::UserNotFound(user_id))?;
        let status = self.quota.status(user_id).await?;
        Ok(UserInfo { account, status })
    }

    pub async fn purge_promo_codes(&self, admin_id: i64) -> BotResult<u64> {
        self.require_admin(admin_id)?;
        let deleted = self.promos.purge_codes().await?;
        warn!(admin_id, deleted, "Admin purged all promo codes");
        Ok(deleted)
    }

    /// Redeem a code on behalf of a user
    pub async fn activate_promo(&self, admin_id: i64, code: &str, user_id: i64) -> BotResult<Redemption> {
        self.require_admin(admin_id)?;
        let outcome = self.promos.redeem(code, user_id).await?;
        info!(admin_id, user_id, outcome = ?outcome, "Admin activated promo code");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PromoConfig, QuotaConfig};
    use crate::store::MemoryStore;

    fn service() -> AdminService {
        let store = Arc::new(MemoryStore::new());
        let quota = Arc::new(QuotaLedger::new(store.clone(), QuotaConfig::default()));
        let promos = Arc::new(PromoService::new(store, PromoConfig::default()));
        AdminService::new(HashSet::from([1]), quota, promos)
    }

    #[tokio::test]
    async fn test_non_admin_is_forbidden_everywhere() {
        let admin = service();
        assert!(matches!(
            admin.generate_promo_codes(2, PromoType::PremiumWeek, 1).await,
            Err(BotError::Forbidden(2))
        ));
        assert!(matches!(admin.list_promo_codes(2).await, Err(BotError::Forbidden(2))));
        assert!(matches!(admin.purge_promo_codes(2).await, Err(BotError::Forbidden(2))));
        assert!(matches!(
            admin.reset_user_daily_limit(2, 5).await,
            Err(BotError::Forbidden(2))
        ));
    }

    #[tokio::test]
    async fn test_batch_size_is_validated() {
        let admin = service();
        assert!(matches!(
            admin.generate_promo_codes(1, PromoType::PremiumWeek, 0).await,
            Err(BotError::Validation(_))
        ));
        assert!(matches!(
            admin
                .generate_promo_codes(1, PromoType::PremiumWeek, MAX_CODES_PER_BATCH + 1)
                .await,
            Err(BotError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_reset_unknown_user() {
        let admin = service();
        assert!(matches!(
            admin.reset_user_daily_limit(1, 404).await,
            Err(BotError::Storage(StorageError::UserNotFound(404)))
        ));
    }
}
