//! # Analysis Orchestrator
//!
//! Drives one user's conversation through upload, analysis, refinement and
//! termination. It consults the quota ledger before a session exists, the
//! session store for every turn, and the generation service for every
//! analysis. Transport-specific rendering happens behind [`ReplySink`].
//!
//! ```text
//! IDLE --photo, quota ok--> ACTIVE --kind button--> ANALYZED
//!  ^  <--photo, quota spent                           |  text / kind button: refine
//!  |                                                  |  "new photo" -> AWAITING_PHOTO
//!  +---------- cancel / menu / turn cap / idle timeout+
//! ```

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::{GenerationConfig, PhotoConfig};
use crate::error::{BotError, BotResult, GenerationError, LimitKind};
use crate::generation::{GenerationRequest, GenerationService};
use crate::photo::{self, PhotoRejection};
use crate::prompts;
use crate::quota::{QuotaDecision, QuotaLedger};
use crate::session::{AnalysisKind, ConversationState, SessionStore, TurnOutcome};

/// Button presses the orchestrator understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Analyze(AnalysisKind),
    NewPhoto,
    Cancel,
    Menu,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Text(String),
    Photo {
        image: Vec<u8>,
        caption: Option<String>,
    },
    Button(Action),
}

/// A transport-neutral inbound user event
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub user_id: i64,
    pub username: Option<String>,
    /// Language code used to render replies
    pub language: String,
    pub kind: EventKind,
}

impl InboundEvent {
    pub fn new(user_id: i64, language: impl Into<String>, kind: EventKind) -> Self {
        Self {
            user_id,
            username: None,
            language: language.into(),
            kind,
        }
    }

    pub fn with_username(mut self, username: Option<String>) -> Self {
        self.username = username;
        self
    }
}

/// Buttons attached to a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyboard {
    None,
    /// Nutrition / recipe / new photo / cancel
    AnalysisMenu,
    MainMenu,
}

/// What to tell the user, independent of wording and transport
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyKind {
    LimitExceeded { used: u32, limit: u32 },
    ChooseKind { used: u32, limit: u32 },
    Analyzing(AnalysisKind),
    AnalysisResult {
        kind: AnalysisKind,
        text: String,
        turns_left: u32,
    },
    AnalysisFailed,
    TurnLimitReached,
    SessionExpired,
    NewPhotoPrompt,
    Cancelled,
    MainMenu,
    TextBuffered,
    SendPhotoFirst,
    UnsupportedPhoto(PhotoRejection),
    ServiceUnavailable,
    Apology,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub kind: ReplyKind,
    pub keyboard: Keyboard,
}

impl Reply {
    pub fn new(kind: ReplyKind, keyboard: Keyboard) -> Self {
        Self { kind, keyboard }
    }

    pub fn plain(kind: ReplyKind) -> Self {
        Self::new(kind, Keyboard::None)
    }
}

/// Outbound transport: renders and delivers a reply to a user
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn send(&self, user_id: i64, language: &str, reply: Reply) -> BotResult<()>;
}

/// Per-user state machine over quota, sessions and generation
pub struct AnalysisOrchestrator {
    quota: Arc<QuotaLedger>,
    sessions: Arc<SessionStore>,
    generation: Arc<GenerationService>,
    sink: Arc<dyn ReplySink>,
    photo: PhotoConfig,
    max_tokens: u32,
    count_failed_turns: bool,
}

impl AnalysisOrchestrator {
    pub fn new(
        quota: Arc<QuotaLedger>,
        sessions: Arc<SessionStore>,
        generation: Arc<GenerationService>,
        sink: Arc<dyn ReplySink>,
        generation_config: &GenerationConfig,
        photo: PhotoConfig,
    ) -> Self {
        Self {
            quota,
            sessions,
            generation,
            sink,
            photo,
            max_tokens: generation_config.max_tokens,
            count_failed_turns: generation_config.count_failed_turns,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn quota(&self) -> &Arc<QuotaLedger> {
        &self.quota
    }

    /// Handle one inbound event
    ///
    /// Never fails: any error is logged with the user id, the user's state
    /// is reset to idle and an apology (or "service unavailable" for
    /// storage failures) is sent instead.
    pub async fn handle(&self, event: InboundEvent) {
        let user_id = event.user_id;
        let language = event.language.clone();

        if let Err(e) = self.dispatch(event).await {
            error!(user_id, error = %e, "Failed to handle event");
            self.sessions.reset_user(user_id).await;

            let kind = match e {
                BotError::Storage(_) | BotError::Generation(GenerationError::CircuitOpen) => {
                    ReplyKind::ServiceUnavailable
                }
                _ => ReplyKind::Apology,
            };
            if let Err(send_err) = self
                .sink
                .send(user_id, &language, Reply::new(kind, Keyboard::MainMenu))
                .await
            {
                error!(user_id, error = %send_err, "Failed to deliver error reply");
            }
        }
    }

    async fn dispatch(&self, event: InboundEvent) -> BotResult<()> {
        let InboundEvent {
            user_id,
            username,
            language,
            kind,
        } = event;

        let now = Utc::now();
        self.sessions.sweep_expired(now, self.sessions.ttl()).await;

        match kind {
            EventKind::Photo { image, caption } => {
                self.on_photo(user_id, username.as_deref(), &language, image, caption)
                    .await
            }
            EventKind::Text(text) => self.on_text(user_id, &language, text).await,
            EventKind::Button(action) => self.on_button(user_id, &language, action).await,
        }
    }

    async fn reply(&self, user_id: i64, language: &str, kind: ReplyKind, keyboard: Keyboard) -> BotResult<()> {
        self.sink.send(user_id, language, Reply::new(kind, keyboard)).await
    }

    async fn on_photo(
        &self,
        user_id: i64,
        username: Option<&str>,
        language: &str,
        image: Vec<u8>,
        caption: Option<String>,
    ) -> BotResult<()> {
        if let Err(rejection) = photo::validate_photo(&image, &self.photo) {
            info!(user_id, reason = %rejection, "Photo rejected before quota check");
            return self
                .reply(user_id, language, ReplyKind::UnsupportedPhoto(rejection), Keyboard::None)
                .await;
        }

        if username.is_some() {
            self.quota.account(user_id, username).await?;
        }

        match self.quota.try_consume(user_id).await? {
            QuotaDecision::Exhausted { used, limit } => {
                info!(user_id, used, limit, "Photo refused, daily quota spent");
                self.reply(
                    user_id,
                    language,
                    ReplyKind::LimitExceeded { used, limit },
                    Keyboard::MainMenu,
                )
                .await
            }
            QuotaDecision::Granted { used, limit } => {
                self.sessions.start(user_id, image, caption).await;
                self.reply(
                    user_id,
                    language,
                    ReplyKind::ChooseKind { used, limit },
                    Keyboard::AnalysisMenu,
                )
                .await
            }
        }
    }

    async fn on_text(&self, user_id: i64, language: &str, text: String) -> BotResult<()> {
        match self.sessions.state(user_id).await {
            ConversationState::Active => {
                self.sessions.buffer_text(user_id, text).await;
                self.reply(user_id, language, ReplyKind::TextBuffered, Keyboard::AnalysisMenu)
                    .await
            }
            ConversationState::Analyzed => self.run_turn(user_id, language, text, Vec::new()).await,
            ConversationState::Idle | ConversationState::AwaitingPhoto => {
                self.reply(user_id, language, ReplyKind::SendPhotoFirst, Keyboard::MainMenu)
                    .await
            }
        }
    }

    async fn on_button(&self, user_id: i64, language: &str, action: Action) -> BotResult<()> {
        match action {
            Action::Analyze(kind) => {
                if self.sessions.snapshot(user_id).await.is_none() {
                    return self.session_expired(user_id, language).await;
                }
                self.sessions.switch_kind(user_id, kind).await;
                let pending = self.sessions.take_pending(user_id).await;
                let request = prompts::compose_request(kind, &pending);
                self.run_turn(user_id, language, request, pending).await
            }
            Action::NewPhoto => {
                self.sessions.mark_awaiting_photo(user_id).await;
                self.reply(user_id, language, ReplyKind::NewPhotoPrompt, Keyboard::None)
                    .await
            }
            Action::Cancel => {
                self.sessions.reset_user(user_id).await;
                self.reply(user_id, language, ReplyKind::Cancelled, Keyboard::MainMenu)
                    .await
            }
            Action::Menu => {
                self.sessions.reset_user(user_id).await;
                self.reply(user_id, language, ReplyKind::MainMenu, Keyboard::MainMenu)
                    .await
            }
        }
    }

    async fn session_expired(&self, user_id: i64, language: &str) -> BotResult<()> {
        debug!(user_id, "{}", BotError::SessionNotFound(user_id));
        self.reply(user_id, language, ReplyKind::SessionExpired, Keyboard::MainMenu)
            .await
    }

    /// Consume one turn and run a generation call for it
    ///
    /// `pending` is the buffered text folded into `content`; it goes back to
    /// the buffer if the call fails.
    async fn run_turn(
        &self,
        user_id: i64,
        language: &str,
        content: String,
        pending: Vec<String>,
    ) -> BotResult<()> {
        let (session, turn_index) = match self.sessions.add_turn(user_id, content).await {
            TurnOutcome::Accepted { session, turn_index } => (session, turn_index),
            TurnOutcome::NotFound => return self.session_expired(user_id, language).await,
            TurnOutcome::LimitReached => {
                info!(user_id, "{}", BotError::LimitReached(LimitKind::SessionTurns));
                self.sessions.end(user_id).await;
                return self
                    .reply(user_id, language, ReplyKind::TurnLimitReached, Keyboard::MainMenu)
                    .await;
            }
        };

        self.reply(user_id, language, ReplyKind::Analyzing(session.kind), Keyboard::None)
            .await?;

        let request = GenerationRequest::from_session(&session, self.max_tokens);
        match self.generation.generate(&request).await {
            Ok(text) => {
                if !self.sessions.record_reply(user_id, session.id, text.as_str()).await {
                    info!(user_id, session_id = session.id, "Session ended during generation, result dropped");
                    return Ok(());
                }
                self.reply(
                    user_id,
                    language,
                    ReplyKind::AnalysisResult {
                        kind: session.kind,
                        text,
                        turns_left: session.turns_left(),
                    },
                    Keyboard::AnalysisMenu,
                )
                .await
            }
            Err(e) => {
                // No request left the process for these, so the turn is refunded
                let sent = !matches!(e, GenerationError::CircuitOpen | GenerationError::ImageDecode(_));
                let keep_count = sent && self.count_failed_turns;
                if !self
                    .sessions
                    .abort_turn(user_id, &session, turn_index, keep_count)
                    .await
                {
                    return Ok(());
                }
                self.sessions.restore_pending(user_id, session.id, pending).await;
                warn!(user_id, error = %e, keep_count, "Analysis turn failed");

                let kind = match e {
                    GenerationError::CircuitOpen => ReplyKind::ServiceUnavailable,
                    _ => ReplyKind::AnalysisFailed,
                };
                self.reply(user_id, language, kind, Keyboard::AnalysisMenu).await
            }
        }
    }
}
