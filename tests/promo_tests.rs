use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::sync::Arc;
use tokio::sync::Barrier;

use mealbot::config::{PromoConfig, QuotaConfig};
use mealbot::error::StorageError;
use mealbot::models::{PromoCode, PromoType, Tier, UserAccount};
use mealbot::promo::{PromoService, Redemption};
use mealbot::quota::QuotaLedger;
use mealbot::store::{AccountStore, MemoryStore, RedeemOutcome};

fn services() -> (Arc<MemoryStore>, PromoService, QuotaLedger) {
    let store = Arc::new(MemoryStore::new());
    let promos = PromoService::new(store.clone(), PromoConfig::default());
    let quota = QuotaLedger::new(store.clone(), QuotaConfig::default());
    (store, promos, quota)
}

/// A second week code is refused while the first subscription is running
#[tokio::test]
async fn test_second_code_rejected_during_subscription() -> Result<()> {
    let (store, promos, quota) = services();
    let codes = promos.generate_codes(PromoType::PremiumWeek, 2, 30).await?;
    assert_eq!(codes.len(), 2);
    assert_ne!(codes[0], codes[1]);

    let now = Utc::now();
    match promos.redeem_at(&codes[0], 77, now).await? {
        Redemption::Granted { tier, until } => {
            assert_eq!(tier, Tier::PremiumWeek);
            assert_eq!(until, now + Duration::days(7));
        }
        other => panic!("Unexpected redemption: {:?}", other),
    }
    assert_eq!(quota.status(77).await?.limit, 10);

    assert_eq!(
        promos.redeem_at(&codes[1], 77, now).await?,
        Redemption::AlreadyHasSubscription
    );
    // The refused code stays unused
    let second = store.get_promo(&codes[1]).await?.expect("code exists");
    assert!(!second.is_used);
    Ok(())
}

#[tokio::test]
async fn test_expired_code_changes_nothing() -> Result<()> {
    let (store, promos, quota) = services();
    let now = Utc::now();
    let promo = PromoCode::new(
        "OLDCODE1".to_string(),
        PromoType::PremiumMonth,
        now - Duration::days(40),
        Some(now - Duration::days(10)),
    );
    store.insert_promo(&promo).await?;

    assert_eq!(promos.redeem("OLDCODE1", 5).await?, Redemption::Expired);
    assert!(!store.get_promo("OLDCODE1").await?.expect("code exists").is_used);
    assert_eq!(quota.status(5).await?.tier, Tier::Free);
    Ok(())
}

#[tokio::test]
async fn test_code_is_single_use() -> Result<()> {
    let (store, promos, _) = services();
    let codes = promos.generate_codes(PromoType::PremiumMonth, 1, 30).await?;

    assert!(promos.redeem(&codes[0], 1).await?.is_granted());
    assert_eq!(promos.redeem(&codes[0], 2).await?, Redemption::AlreadyUsed);

    let promo = store.get_promo(&codes[0]).await?.expect("code exists");
    assert_eq!(promo.used_by, Some(1));
    assert!(promo.used_at.is_some());
    Ok(())
}

#[tokio::test]
async fn test_unknown_and_normalized_codes() -> Result<()> {
    let (_, promos, _) = services();
    assert_eq!(promos.redeem("NOSUCHCODE", 1).await?, Redemption::NotFound);

    let codes = promos.generate_codes(PromoType::PremiumWeek, 1, 30).await?;
    let typed = format!("  {}  ", codes[0].to_lowercase());
    assert!(promos.redeem(&typed, 3).await?.is_granted());
    Ok(())
}

#[tokio::test]
async fn test_generated_codes_shape() -> Result<()> {
    let (_, promos, _) = services();
    let codes = promos.generate_codes(PromoType::PremiumWeek, 20, 30).await?;

    assert_eq!(codes.len(), 20);
    for code in &codes {
        assert_eq!(code.len(), promos.config().code_length);
        assert!(code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    let listed = promos.list_codes().await?;
    assert_eq!(listed.len(), 20);
    assert!(listed.iter().all(|p| p.expires_at.is_some() && !p.is_used));

    assert_eq!(promos.purge_codes().await?, 20);
    assert!(promos.list_codes().await?.is_empty());
    Ok(())
}

/// Concurrent redemptions of one code: one grant, the rest see it used
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_redemption_grants_once() -> Result<()> {
    let (_, promos, _) = services();
    let promos = Arc::new(promos);
    let code = promos.generate_codes(PromoType::PremiumWeek, 1, 30).await?.remove(0);

    let mut handles = Vec::new();
    for user_id in 100..108 {
        let promos = Arc::clone(&promos);
        let code = code.clone();
        handles.push(tokio::spawn(async move { promos.redeem(&code, user_id).await }));
    }

    let mut granted = 0;
    for handle in handles {
        match handle.await?? {
            Redemption::Granted { .. } => granted += 1,
            Redemption::AlreadyUsed => {}
            other => panic!("Unexpected redemption: {:?}", other),
        }
    }
    assert_eq!(granted, 1);
    Ok(())
}

/// Holds every redeemer at the atomic step until all of them have passed the
/// service's own checks
struct RendezvousStore {
    inner: MemoryStore,
    barrier: Barrier,
}

#[async_trait]
impl AccountStore for RendezvousStore {
    async fn get_user(&self, user_id: i64) -> Result<Option<UserAccount>, StorageError> {
        self.inner.get_user(user_id).await
    }

    async fn get_or_create_user(
        &self,
        user_id: i64,
        username: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<UserAccount, StorageError> {
        self.inner.get_or_create_user(user_id, username, now).await
    }

    async fn reset_if_new_day(&self, user_id: i64, today: NaiveDate) -> Result<bool, StorageError> {
        self.inner.reset_if_new_day(user_id, today).await
    }

    async fn consume_if_below(
        &self,
        user_id: i64,
        limit: u32,
    ) -> Result<Option<UserAccount>, StorageError> {
        self.inner.consume_if_below(user_id, limit).await
    }

    async fn reset_daily(&self, user_id: i64, today: NaiveDate) -> Result<bool, StorageError> {
        self.inner.reset_daily(user_id, today).await
    }

    async fn set_subscription(
        &self,
        user_id: i64,
        tier: Tier,
        until: Option<DateTime<Utc>>,
    ) -> Result<bool, StorageError> {
        self.inner.set_subscription(user_id, tier, until).await
    }

    async fn get_promo(&self, code: &str) -> Result<Option<PromoCode>, StorageError> {
        self.inner.get_promo(code).await
    }

    async fn insert_promo(&self, promo: &PromoCode) -> Result<bool, StorageError> {
        self.inner.insert_promo(promo).await
    }

    async fn list_promos(&self) -> Result<Vec<PromoCode>, StorageError> {
        self.inner.list_promos().await
    }

    async fn purge_promos(&self) -> Result<u64, StorageError> {
        self.inner.purge_promos().await
    }

    async fn redeem_promo(
        &self,
        code: &str,
        user_id: i64,
        tier: Tier,
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<RedeemOutcome, StorageError> {
        self.barrier.wait().await;
        self.inner.redeem_promo(code, user_id, tier, until, now).await
    }
}

/// Two different codes redeemed by one user at the same moment grant once
#[tokio::test]
async fn test_simultaneous_codes_for_one_user_grant_once() -> Result<()> {
    let store = Arc::new(RendezvousStore {
        inner: MemoryStore::new(),
        barrier: Barrier::new(2),
    });
    let promos = PromoService::new(store.clone(), PromoConfig::default());
    let codes = promos.generate_codes(PromoType::PremiumWeek, 2, 30).await?;

    let (first, second) = tokio::join!(promos.redeem(&codes[0], 7), promos.redeem(&codes[1], 7));
    let outcomes = [first?, second?];

    assert_eq!(outcomes.iter().filter(|o| o.is_granted()).count(), 1);
    assert!(outcomes.contains(&Redemption::AlreadyHasSubscription));

    let mut used = 0;
    for code in &codes {
        if store.get_promo(code).await?.expect("code exists").is_used {
            used += 1;
        }
    }
    assert_eq!(used, 1);
    Ok(())
}
