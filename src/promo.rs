//! # Promo Redemption
//!
//! Batch generation of single-use subscription codes and their redemption.
//! A code moves `unused -> used` exactly once; the store marks it and grants
//! the subscription in one atomic step, refusing users whose subscription is
//! still active.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::PromoConfig;
use crate::error::StorageError;
use crate::models::{PromoCode, PromoType, Tier};
use crate::quota::is_subscription_active;
use crate::store::{AccountStore, RedeemOutcome};

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Attempts per code before giving up on finding an unused string
const MAX_COLLISION_RETRIES: usize = 16;

/// Outcome of a redemption attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Redemption {
    Granted { tier: Tier, until: DateTime<Utc> },
    AlreadyUsed,
    Expired,
    AlreadyHasSubscription,
    NotFound,
}

impl Redemption {
    pub fn is_granted(&self) -> bool {
        matches!(self, Redemption::Granted { .. })
    }

    /// Localization key of the user-facing message for this outcome
    pub fn message_key(&self) -> &'static str {
        match self {
            Redemption::Granted { .. } => "promo-granted",
            Redemption::AlreadyUsed => "promo-already-used",
            Redemption::Expired => "promo-expired",
            Redemption::AlreadyHasSubscription => "promo-already-subscribed",
            Redemption::NotFound => "promo-not-found",
        }
    }
}

/// Trim whitespace and upper-case user input so codes match as generated
pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_uppercase()
}

fn random_code(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Generates and redeems promo codes against an [`AccountStore`]
pub struct PromoService {
    store: Arc<dyn AccountStore>,
    config: PromoConfig,
}

impl PromoService {
    pub fn new(store: Arc<dyn AccountStore>, config: PromoConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &PromoConfig {
        &self.config
    }

    /// Create `count` fresh codes valid for `valid_days` from now
    pub async fn generate_codes(
        &self,
        promo_type: PromoType,
        count: usize,
        valid_days: i64,
    ) -> Result<Vec<String>, StorageError> {
        let now = Utc::now();
        let expires_at = now + Duration::days(valid_days);
        let mut codes = Vec::with_capacity(count);

        for _ in 0..count {
            let mut inserted = None;
            for attempt in 0..MAX_COLLISION_RETRIES {
                let code = random_code(self.config.code_length);
                let promo = PromoCode::new(code.clone(), promo_type, now, Some(expires_at));
                if self.store.insert_promo(&promo).await? {
                    inserted = Some(code);
                    break;
                }
                debug!(attempt, "Promo code collision, regenerating");
            }

            match inserted {
                Some(code) => codes.push(code),
                None => {
                    return Err(StorageError::CorruptRecord(format!(
                        "could not find an unused promo code after {MAX_COLLISION_RETRIES} attempts"
                    )))
                }
            }
        }

        info!(count = codes.len(), promo_type = %promo_type, valid_days, "Promo codes generated");
        Ok(codes)
    }

    pub async fn redeem(&self, code: &str, user_id: i64) -> Result<Redemption, StorageError> {
        self.redeem_at(code, user_id, Utc::now()).await
    }

    pub async fn redeem_at(
        &self,
        code: &str,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Redemption, StorageError> {
        let code = normalize_code(code);

        let Some(promo) = self.store.get_promo(&code).await? else {
            debug!(user_id, code = %code, "Promo code not found");
            return Ok(Redemption::NotFound);
        };
        if promo.is_used {
            return Ok(Redemption::AlreadyUsed);
        }
        if promo.is_expired(now) {
            return Ok(Redemption::Expired);
        }

        let account = self.store.get_or_create_user(user_id, None, now).await?;
        if is_subscription_active(&account, now) {
            debug!(user_id, tier = %account.tier, "Redemption rejected, subscription active");
            return Ok(Redemption::AlreadyHasSubscription);
        }

        let tier = promo.promo_type.tier();
        let until = now + Duration::days(promo.promo_type.duration_days());

        match self.store.redeem_promo(&code, user_id, tier, until, now).await? {
            RedeemOutcome::Redeemed => {}
            RedeemOutcome::CodeUnavailable => {
                // Lost the race against another redeemer
                warn!(user_id, code = %code, "Promo code used concurrently");
                return Ok(Redemption::AlreadyUsed);
            }
            RedeemOutcome::SubscriptionActive => {
                warn!(user_id, code = %code, "Subscription granted concurrently, code left unused");
                return Ok(Redemption::AlreadyHasSubscription);
            }
        }

        info!(user_id, code = %code, tier = %tier, %until, "Subscription granted by promo code");
        Ok(Redemption::Granted { tier, until })
    }

    pub async fn list_codes(&self) -> Result<Vec<PromoCode>, StorageError> {
        self.store.list_promos().await
    }

    /// Delete every code; a testing aid for administrators
    pub async fn purge_codes(&self) -> Result<u64, StorageError> {
        self.store.purge_promos().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_code_shape() {
        let code = random_code(8);
        assert_eq!(code.len(), 8);
        assert!(code
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code("  abCd12 \n"), "ABCD12");
        assert_eq!(normalize_code(""), "");
    }

    #[test]
    fn test_message_keys_are_distinct() {
        let outcomes = [
            Redemption::Granted {
                tier: Tier::PremiumWeek,
                until: Utc::now(),
            },
            Redemption::AlreadyUsed,
            Redemption::Expired,
            Redemption::AlreadyHasSubscription,
            Redemption::NotFound,
        ];
        let keys: std::collections::HashSet<_> = outcomes.iter().map(|o| o.message_key()).collect();
        assert_eq!(keys.len(), outcomes.len());
    }
}
