//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use mealbot::config::{BreakerConfig, GenerationConfig, PhotoConfig, QuotaConfig, SessionConfig};
use mealbot::error::{BotResult, GenerationError, StorageError};
use mealbot::generation::{GenerationBackend, GenerationRequest, GenerationService};
use mealbot::models::{PromoCode, Tier, UserAccount};
use mealbot::orchestrator::{AnalysisOrchestrator, Reply, ReplyKind, ReplySink};
use mealbot::quota::QuotaLedger;
use mealbot::session::SessionStore;
use mealbot::store::{AccountStore, MemoryStore, RedeemOutcome};

/// Smallest byte string the photo validator accepts as PNG
pub fn png_bytes() -> Vec<u8> {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    bytes.extend_from_slice(&[0u8; 64]);
    bytes
}

/// Backend that replays queued results, then a default answer
#[derive(Default)]
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Result<String, GenerationError>>>,
    requests: Mutex<Vec<GenerationRequest>>,
    /// When set, each call signals `entered` and then waits for `release`
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
    delay: Option<Duration>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated(entered: Arc<Notify>, release: Arc<Notify>) -> Self {
        Self {
            gate: Some((entered, release)),
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn push(&self, result: Result<String, GenerationError>) {
        self.script.lock().unwrap().push_back(result);
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        self.requests.lock().unwrap().push(request.clone());

        if let Some((entered, release)) = &self.gate {
            entered.notify_one();
            release.notified().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(format!("Estimated 450 kcal ({} turns)", request.turns.len())))
    }
}

/// Sink that records every reply in order
#[derive(Default)]
pub struct RecordingSink {
    replies: Mutex<Vec<Reply>>,
}

impl RecordingSink {
    pub fn replies(&self) -> Vec<Reply> {
        self.replies.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<ReplyKind> {
        self.replies().into_iter().map(|r| r.kind).collect()
    }

    pub fn last(&self) -> Option<Reply> {
        self.replies.lock().unwrap().last().cloned()
    }

    pub fn clear(&self) {
        self.replies.lock().unwrap().clear();
    }
}

#[async_trait]
impl ReplySink for RecordingSink {
    async fn send(&self, _user_id: i64, _language: &str, reply: Reply) -> BotResult<()> {
        self.replies.lock().unwrap().push(reply);
        Ok(())
    }
}

/// Store whose every operation fails like an unreachable database
pub struct FailingStore;

fn unavailable() -> StorageError {
    StorageError::Database(sqlx::Error::PoolTimedOut)
}

#[async_trait]
impl AccountStore for FailingStore {
    async fn get_user(&self, _user_id: i64) -> Result<Option<UserAccount>, StorageError> {
        Err(unavailable())
    }

    async fn get_or_create_user(
        &self,
        _user_id: i64,
        _username: Option<&str>,
        _now: DateTime<Utc>,
    ) -> Result<UserAccount, StorageError> {
        Err(unavailable())
    }

    async fn reset_if_new_day(&self, _user_id: i64, _today: NaiveDate) -> Result<bool, StorageError> {
        Err(unavailable())
    }

    async fn consume_if_below(
        &self,
        _user_id: i64,
        _limit: u32,
    ) -> Result<Option<UserAccount>, StorageError> {
        Err(unavailable())
    }

    async fn reset_daily(&self, _user_id: i64, _today: NaiveDate) -> Result<bool, StorageError> {
        Err(unavailable())
    }

    async fn set_subscription(
        &self,
        _user_id: i64,
        _tier: Tier,
        _until: Option<DateTime<Utc>>,
    ) -> Result<bool, StorageError> {
        Err(unavailable())
    }

    async fn get_promo(&self, _code: &str) -> Result<Option<PromoCode>, StorageError> {
        Err(unavailable())
    }

    async fn insert_promo(&self, _promo: &PromoCode) -> Result<bool, StorageError> {
        Err(unavailable())
    }

    async fn list_promos(&self) -> Result<Vec<PromoCode>, StorageError> {
        Err(unavailable())
    }

    async fn purge_promos(&self) -> Result<u64, StorageError> {
        Err(unavailable())
    }

    async fn redeem_promo(
        &self,
        _code: &str,
        _user_id: i64,
        _tier: Tier,
        _until: DateTime<Utc>,
        _now: DateTime<Utc>,
    ) -> Result<RedeemOutcome, StorageError> {
        Err(unavailable())
    }
}

/// A fully wired orchestrator over in-memory doubles
pub struct Harness {
    pub orchestrator: Arc<AnalysisOrchestrator>,
    pub sink: Arc<RecordingSink>,
    pub backend: Arc<ScriptedBackend>,
    pub sessions: Arc<SessionStore>,
    pub quota: Arc<QuotaLedger>,
}

impl Harness {
    pub fn new() -> (Self, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let harness = Self::build(store.clone(), ScriptedBackend::new(), GenerationConfig::default());
        (harness, store)
    }

    pub fn build(
        store: Arc<dyn AccountStore>,
        backend: ScriptedBackend,
        generation_config: GenerationConfig,
    ) -> Self {
        let backend = Arc::new(backend);
        let sink = Arc::new(RecordingSink::default());
        let quota = Arc::new(QuotaLedger::new(store, QuotaConfig::default()));
        let sessions = Arc::new(SessionStore::new(SessionConfig::default()));
        let generation = Arc::new(GenerationService::new(
            backend.clone(),
            generation_config.breaker.clone(),
            Duration::from_secs(generation_config.timeout_secs),
        ));

        let orchestrator = Arc::new(AnalysisOrchestrator::new(
            quota.clone(),
            sessions.clone(),
            generation,
            sink.clone(),
            &generation_config,
            PhotoConfig::default(),
        ));

        Self {
            orchestrator,
            sink,
            backend,
            sessions,
            quota,
        }
    }
}

pub fn breaker_config(failure_threshold: u32) -> GenerationConfig {
    GenerationConfig {
        breaker: BreakerConfig {
            failure_threshold,
            reset_secs: 60,
        },
        ..GenerationConfig::default()
    }
}
