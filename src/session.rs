//! # Analysis Session Store
//!
//! In-memory table of active photo-analysis conversations keyed by user.
//! Each session is anchored to one uploaded image and bounded to a maximum
//! number of turns. The store is process-local and lost on restart.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::prompts;

/// What the user asked the backend to produce
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum AnalysisKind {
    #[default]
    Nutrition,
    Recipe,
}

impl AnalysisKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisKind::Nutrition => "nutrition",
            AnalysisKind::Recipe => "recipe",
        }
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnContent {
    Text(String),
    /// The session image, with the caption the user attached to it
    Image { caption: Option<String> },
}

/// One entry of the role-tagged turn log
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub content: TurnContent,
}

impl Turn {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: TurnContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: TurnContent::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: TurnContent::Text(text.into()),
        }
    }
}

/// Progress of a live session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Photo received, no analysis produced yet
    Active,
    /// At least one analysis was delivered
    Analyzed,
}

/// Per-user conversation state as the orchestrator sees it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    Idle,
    AwaitingPhoto,
    Active,
    Analyzed,
}

/// A bounded conversation anchored to one image
///
/// `turn_count` counts user turns, the image upload included, and never
/// exceeds `max_turns`. `turns[0]` is always the system instruction for the
/// current `kind`.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisSession {
    /// Unique per process; distinguishes a replacement from the session it replaced
    pub id: u64,
    pub user_id: i64,
    pub image: Arc<Vec<u8>>,
    pub turns: Vec<Turn>,
    pub turn_count: u32,
    pub max_turns: u32,
    pub kind: AnalysisKind,
    pub phase: SessionPhase,
    /// Free text received before the first analysis, sent with it
    pub pending_text: Vec<String>,
    pub last_activity: DateTime<Utc>,
}

impl AnalysisSession {
    pub fn turns_left(&self) -> u32 {
        self.max_turns.saturating_sub(self.turn_count)
    }

    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.last_activity > ttl
    }
}

/// Result of [`SessionStore::add_turn`]
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// The turn was appended at `turn_index`; carries the session as it is now
    Accepted {
        session: AnalysisSession,
        turn_index: usize,
    },
    /// The cap was already reached, nothing was appended
    LimitReached,
    NotFound,
}

#[derive(Debug, Default)]
struct SessionTable {
    sessions: HashMap<i64, AnalysisSession>,
    /// Users who asked for a new photo, with the time they asked
    awaiting_photo: HashMap<i64, DateTime<Utc>>,
}

/// Concurrent map of user id to analysis session
///
/// Shared between handlers as `Arc<SessionStore>`. Every method takes the
/// table lock once, so each operation is atomic with respect to the others.
///
/// # Expiry
///
/// A session idle longer than the TTL is treated as absent: reads and turn
/// appends purge it on contact, and [`SessionStore::sweep_expired`] removes
/// the rest in bulk.
#[derive(Debug)]
pub struct SessionStore {
    table: RwLock<SessionTable>,
    next_id: AtomicU64,
    config: SessionConfig,
}

impl SessionStore {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            table: RwLock::new(SessionTable::default()),
            next_id: AtomicU64::new(1),
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn ttl(&self) -> Duration {
        Duration::seconds(self.config.ttl_secs)
    }

    pub async fn start(&self, user_id: i64, image: Vec<u8>, caption: Option<String>) -> AnalysisSession {
        self.start_at(user_id, image, caption, Utc::now()).await
    }

    /// Open a fresh session seeded with the image, replacing any prior one
    ///
    /// The image upload is the first turn, so the counter starts at 1.
    pub async fn start_at(
        &self,
        user_id: i64,
        image: Vec<u8>,
        caption: Option<String>,
        now: DateTime<Utc>,
    ) -> AnalysisSession {
        let kind = AnalysisKind::default();
        let session = AnalysisSession {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            user_id,
            image: Arc::new(image),
            turns: vec![
                Turn::system(prompts::system_prompt(kind)),
                Turn {
                    role: Role::User,
                    content: TurnContent::Image { caption },
                },
            ],
            turn_count: 1,
            max_turns: self.config.max_turns,
            kind,
            phase: SessionPhase::Active,
            pending_text: Vec::new(),
            last_activity: now,
        };

        let mut table = self.table.write().await;
        table.awaiting_photo.remove(&user_id);
        if let Some(old) = table.sessions.insert(user_id, session.clone()) {
            debug!(user_id, replaced = old.id, "Analysis session replaced");
        }
        info!(user_id, session_id = session.id, "Analysis session started");
        session
    }

    pub async fn add_turn(&self, user_id: i64, content: impl Into<String>) -> TurnOutcome {
        self.add_turn_at(user_id, content, Utc::now()).await
    }

    /// Append a user turn if the session exists and is below its cap
    pub async fn add_turn_at(
        &self,
        user_id: i64,
        content: impl Into<String>,
        now: DateTime<Utc>,
    ) -> TurnOutcome {
        let ttl = self.ttl();
        let mut table = self.table.write().await;

        let expired = match table.sessions.get(&user_id) {
            None => return TurnOutcome::NotFound,
            Some(session) => session.is_expired(now, ttl),
        };
        if expired {
            table.sessions.remove(&user_id);
            debug!(user_id, "Expired session purged on turn");
            return TurnOutcome::NotFound;
        }

        let Some(session) = table.sessions.get_mut(&user_id) else {
            return TurnOutcome::NotFound;
        };
        if session.turn_count >= session.max_turns {
            return TurnOutcome::LimitReached;
        }

        session.turns.push(Turn::user(content));
        session.turn_count += 1;
        session.last_activity = now;
        debug!(user_id, turn = session.turn_count, max = session.max_turns, "Turn added");
        TurnOutcome::Accepted {
            turn_index: session.turns.len() - 1,
            session: session.clone(),
        }
    }

    /// Rewrite the leading system instruction; consumes no turn
    pub async fn switch_kind(&self, user_id: i64, kind: AnalysisKind) -> bool {
        let mut table = self.table.write().await;
        match table.sessions.get_mut(&user_id) {
            Some(session) => {
                session.kind = kind;
                match session.turns.first_mut() {
                    Some(first) if first.role == Role::System => {
                        *first = Turn::system(prompts::system_prompt(kind));
                    }
                    _ => session.turns.insert(0, Turn::system(prompts::system_prompt(kind))),
                }
                true
            }
            None => false,
        }
    }

    /// Hold free text until the next generation call. Consumes no turn.
    pub async fn buffer_text(&self, user_id: i64, text: impl Into<String>) -> bool {
        let mut table = self.table.write().await;
        match table.sessions.get_mut(&user_id) {
            Some(session) => {
                session.pending_text.push(text.into());
                session.last_activity = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Drain the buffered text of the user's session
    pub async fn take_pending(&self, user_id: i64) -> Vec<String> {
        let mut table = self.table.write().await;
        table
            .sessions
            .get_mut(&user_id)
            .map(|session| std::mem::take(&mut session.pending_text))
            .unwrap_or_default()
    }

    /// Put drained text back in front of anything buffered since, so the
    /// next generation call sees it again
    pub async fn restore_pending(&self, user_id: i64, session_id: u64, texts: Vec<String>) -> bool {
        if texts.is_empty() {
            return false;
        }
        let mut table = self.table.write().await;
        match table.sessions.get_mut(&user_id) {
            Some(session) if session.id == session_id => {
                let newer = std::mem::replace(&mut session.pending_text, texts);
                session.pending_text.extend(newer);
                true
            }
            _ => false,
        }
    }

    /// Append a backend reply to the session that requested it
    ///
    /// Returns `false` and drops the reply if that session was ended or
    /// replaced while the call was in flight.
    pub async fn record_reply(&self, user_id: i64, session_id: u64, reply: impl Into<String>) -> bool {
        let mut table = self.table.write().await;
        match table.sessions.get_mut(&user_id) {
            Some(session) if session.id == session_id => {
                session.turns.push(Turn::assistant(reply));
                session.phase = SessionPhase::Analyzed;
                session.last_activity = Utc::now();
                true
            }
            _ => {
                debug!(user_id, session_id, "Reply discarded for stale session");
                false
            }
        }
    }

    /// Withdraw the user turn that `accepted` appended at `turn_index`
    /// after its call failed
    ///
    /// Other turns appended since are left alone. With `keep_count` the
    /// withdrawn turn still counts toward the cap.
    pub async fn abort_turn(
        &self,
        user_id: i64,
        accepted: &AnalysisSession,
        turn_index: usize,
        keep_count: bool,
    ) -> bool {
        let Some(expected) = accepted.turns.get(turn_index) else {
            return false;
        };
        let mut table = self.table.write().await;
        match table.sessions.get_mut(&user_id) {
            Some(session) if session.id == accepted.id => {
                // Earlier withdrawals can only shift the turn toward the front;
                // the first two entries are the instruction and the image.
                let upper = turn_index.min(session.turns.len().saturating_sub(1));
                let position = (2..=upper)
                    .rev()
                    .find(|&i| session.turns[i].role == Role::User && session.turns[i] == *expected);
                match position {
                    Some(i) => {
                        session.turns.remove(i);
                    }
                    None => debug!(user_id, turn_index, "Aborted turn already gone"),
                }
                if !keep_count && session.turn_count > 1 {
                    session.turn_count -= 1;
                }
                true
            }
            _ => false,
        }
    }

    /// Remove the user's session. Returns whether one existed.
    pub async fn end(&self, user_id: i64) -> bool {
        let mut table = self.table.write().await;
        let removed = table.sessions.remove(&user_id).is_some();
        if removed {
            info!(user_id, "Analysis session ended");
        }
        removed
    }

    /// End the session and wait for the next photo
    pub async fn mark_awaiting_photo(&self, user_id: i64) {
        let mut table = self.table.write().await;
        table.sessions.remove(&user_id);
        table.awaiting_photo.insert(user_id, Utc::now());
    }

    /// Forget all state for the user
    pub async fn reset_user(&self, user_id: i64) {
        let mut table = self.table.write().await;
        table.sessions.remove(&user_id);
        table.awaiting_photo.remove(&user_id);
    }

    pub async fn snapshot(&self, user_id: i64) -> Option<AnalysisSession> {
        self.snapshot_at(user_id, Utc::now()).await
    }

    /// Copy of the user's live session, purging it first if it has expired
    pub async fn snapshot_at(&self, user_id: i64, now: DateTime<Utc>) -> Option<AnalysisSession> {
        let ttl = self.ttl();
        {
            let table = self.table.read().await;
            match table.sessions.get(&user_id) {
                None => return None,
                Some(session) if !session.is_expired(now, ttl) => return Some(session.clone()),
                Some(_) => {}
            }
        }

        let mut table = self.table.write().await;
        // Re-check under the write lock, the session may have been replaced
        if table
            .sessions
            .get(&user_id)
            .is_some_and(|s| s.is_expired(now, ttl))
        {
            table.sessions.remove(&user_id);
            debug!(user_id, "Expired session purged on read");
            return None;
        }
        table.sessions.get(&user_id).cloned()
    }

    pub async fn state(&self, user_id: i64) -> ConversationState {
        self.state_at(user_id, Utc::now()).await
    }

    pub async fn state_at(&self, user_id: i64, now: DateTime<Utc>) -> ConversationState {
        if let Some(session) = self.snapshot_at(user_id, now).await {
            return match session.phase {
                SessionPhase::Active => ConversationState::Active,
                SessionPhase::Analyzed => ConversationState::Analyzed,
            };
        }
        let table = self.table.read().await;
        match table.awaiting_photo.get(&user_id) {
            Some(since) if now - *since <= self.ttl() => ConversationState::AwaitingPhoto,
            _ => ConversationState::Idle,
        }
    }

    /// Remove every session idle past `ttl`; returns how many were removed
    pub async fn sweep_expired(&self, now: DateTime<Utc>, ttl: Duration) -> usize {
        let mut table = self.table.write().await;
        let before = table.sessions.len();
        table.sessions.retain(|_, session| !session.is_expired(now, ttl));
        table.awaiting_photo.retain(|_, since| now - *since <= ttl);
        let removed = before - table.sessions.len();
        if removed > 0 {
            info!(removed, "Expired analysis sessions swept");
        }
        removed
    }

    /// Number of live sessions, expired ones included until swept
    pub async fn active_count(&self) -> usize {
        self.table.read().await.sessions.len()
    }
}

/// Sweep expired sessions every `interval` in a background task
///
/// Returns `None` without spawning when the interval is zero.
pub fn spawn_sweeper(store: Arc<SessionStore>, interval: std::time::Duration) -> Option<JoinHandle<()>> {
    if interval.is_zero() {
        info!("Periodic session sweep disabled");
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = store.sweep_expired(Utc::now(), store.ttl()).await;
            let remaining = store.active_count().await;
            debug!(removed, remaining, "Periodic session sweep");
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SessionStore {
        SessionStore::new(SessionConfig::default())
    }

    #[tokio::test]
    async fn test_start_seeds_image_turn() {
        let store = store();
        let session = store.start(1, vec![1, 2, 3], Some("lunch".to_string())).await;

        assert_eq!(session.turn_count, 1);
        assert_eq!(session.turns.len(), 2);
        assert_eq!(session.turns[0].role, Role::System);
        assert_eq!(
            session.turns[1].content,
            TurnContent::Image {
                caption: Some("lunch".to_string())
            }
        );
        assert_eq!(store.state(1).await, ConversationState::Active);
    }

    #[tokio::test]
    async fn test_switch_kind_rewrites_system_turn_only() {
        let store = store();
        store.start(1, vec![0], None).await;

        assert!(store.switch_kind(1, AnalysisKind::Recipe).await);
        let session = store.snapshot(1).await.unwrap();
        assert_eq!(session.kind, AnalysisKind::Recipe);
        assert_eq!(session.turns.len(), 2);
        assert_eq!(session.turn_count, 1);
        assert_eq!(
            session.turns[0],
            Turn::system(prompts::system_prompt(AnalysisKind::Recipe))
        );

        assert!(!store.switch_kind(2, AnalysisKind::Recipe).await);
    }

    #[tokio::test]
    async fn test_stale_reply_is_discarded() {
        let store = store();
        let first = store.start(1, vec![0], None).await;
        let second = store.start(1, vec![1], None).await;

        assert!(!store.record_reply(1, first.id, "late").await);
        assert!(store.record_reply(1, second.id, "fresh").await);

        let session = store.snapshot(1).await.unwrap();
        assert_eq!(session.phase, SessionPhase::Analyzed);
        assert_eq!(session.turns.last(), Some(&Turn::assistant("fresh")));
    }

    fn accepted(outcome: TurnOutcome) -> (AnalysisSession, usize) {
        match outcome {
            TurnOutcome::Accepted { session, turn_index } => (session, turn_index),
            other => panic!("Turn refused: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_abort_turn_policies() {
        let store = store();
        store.start(1, vec![0], None).await;

        let (session, index) = accepted(store.add_turn(1, "first").await);
        assert!(store.abort_turn(1, &session, index, true).await);
        let after = store.snapshot(1).await.unwrap();
        assert_eq!(after.turn_count, 2);
        assert_eq!(after.turns.len(), 2);

        let (session, index) = accepted(store.add_turn(1, "second").await);
        assert!(store.abort_turn(1, &session, index, false).await);
        let after = store.snapshot(1).await.unwrap();
        assert_eq!(after.turn_count, 2);
        assert_eq!(after.turns.len(), 2);
    }

    #[tokio::test]
    async fn test_abort_removes_only_its_own_turn() {
        let store = store();
        store.start(1, vec![0], None).await;

        // Two calls in flight; the earlier one fails
        let (first, first_index) = accepted(store.add_turn(1, "first").await);
        let (_, second_index) = accepted(store.add_turn(1, "second").await);
        assert_eq!(second_index, first_index + 1);

        assert!(store.abort_turn(1, &first, first_index, false).await);
        let after = store.snapshot(1).await.unwrap();
        assert_eq!(after.turns.len(), 3);
        assert_eq!(after.turns.last(), Some(&Turn::user("second")));
        assert_eq!(after.turn_count, 2);
    }

    #[tokio::test]
    async fn test_abort_finds_turn_shifted_by_earlier_abort() {
        let store = store();
        store.start(1, vec![0], None).await;

        let (first, first_index) = accepted(store.add_turn(1, "first").await);
        let (second, second_index) = accepted(store.add_turn(1, "second").await);
        store.record_reply(1, first.id, "answer").await;

        assert!(store.abort_turn(1, &first, first_index, true).await);
        assert!(store.abort_turn(1, &second, second_index, true).await);

        let after = store.snapshot(1).await.unwrap();
        assert_eq!(after.turns.len(), 3);
        assert_eq!(after.turns.last(), Some(&Turn::assistant("answer")));
    }

    #[tokio::test]
    async fn test_restored_text_precedes_newer_text() {
        let store = store();
        let session = store.start(1, vec![0], None).await;
        store.buffer_text(1, "vegan").await;
        let drained = store.take_pending(1).await;
        store.buffer_text(1, "no nuts").await;

        assert!(store.restore_pending(1, session.id, drained).await);
        assert_eq!(store.take_pending(1).await, vec!["vegan", "no nuts"]);

        // A replaced session does not inherit the text
        store.start(1, vec![1], None).await;
        assert!(!store.restore_pending(1, session.id, vec!["old".to_string()]).await);
        assert!(store.take_pending(1).await.is_empty());
    }

    #[tokio::test]
    async fn test_pending_text_is_drained() {
        let store = store();
        store.start(1, vec![0], None).await;
        assert!(store.buffer_text(1, "no sugar").await);
        assert!(store.buffer_text(1, "two servings").await);

        assert_eq!(store.take_pending(1).await, vec!["no sugar", "two servings"]);
        assert!(store.take_pending(1).await.is_empty());
        assert!(!store.buffer_text(2, "nobody").await);
    }

    #[tokio::test]
    async fn test_awaiting_photo_state() {
        let store = store();
        store.start(1, vec![0], None).await;
        store.mark_awaiting_photo(1).await;
        assert_eq!(store.state(1).await, ConversationState::AwaitingPhoto);

        store.start(1, vec![0], None).await;
        assert_eq!(store.state(1).await, ConversationState::Active);

        store.reset_user(1).await;
        assert_eq!(store.state(1).await, ConversationState::Idle);
    }
}
