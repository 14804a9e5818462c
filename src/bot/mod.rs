//! Bot module for handling Telegram interactions
//!
//! This module is split into several submodules:
//! - `message_handler`: commands, text, photos and image documents
//! - `callback_handler`: inline keyboard callback queries
//! - `admin_handler`: administrator commands
//! - `ui_builder`: keyboards and message formatting
//!
//! [`TelegramSink`] is the Telegram implementation of the orchestrator's
//! outbound [`ReplySink`].

pub mod admin_handler;
pub mod callback_handler;
pub mod message_handler;
pub mod ui_builder;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;
use teloxide::prelude::*;
use tracing::debug;

use crate::admin::AdminService;
use crate::config::AppConfig;
use crate::error::{BotError, BotResult};
use crate::orchestrator::{AnalysisOrchestrator, Reply, ReplySink};
use crate::promo::PromoService;
use crate::quota::QuotaLedger;

// Re-export main handler functions for use in main.rs
pub use callback_handler::callback_handler;
pub use message_handler::message_handler;

lazy_static! {
    static ref COMMAND_PATTERN: Regex =
        Regex::new(r"(?s)^/([A-Za-z_]+)(?:@[A-Za-z0-9_]+)?(?:\s+(.*))?$").expect("valid command pattern");
}

/// Services shared by every handler, injected through `dptree::deps!`
pub struct BotServices {
    pub orchestrator: Arc<AnalysisOrchestrator>,
    pub quota: Arc<QuotaLedger>,
    pub promos: Arc<PromoService>,
    pub admin: Arc<AdminService>,
    pub config: Arc<AppConfig>,
}

/// A parsed `/command arg arg` message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub args: Vec<String>,
}

/// Parse a slash command, dropping any `@botname` suffix
pub fn parse_command(text: &str) -> Option<Command> {
    let captures = COMMAND_PATTERN.captures(text.trim())?;
    let name = captures.get(1)?.as_str().to_lowercase();
    let args = captures
        .get(2)
        .map(|m| m.as_str().split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();
    Some(Command { name, args })
}

/// Delivers orchestrator replies as Telegram messages
pub struct TelegramSink {
    bot: Bot,
}

impl TelegramSink {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl ReplySink for TelegramSink {
    async fn send(&self, user_id: i64, language: &str, reply: Reply) -> BotResult<()> {
        let language_code = Some(language);
        let text = ui_builder::render_reply_text(&reply, language_code);
        let mut chunks = ui_builder::split_message(&text, ui_builder::MAX_MESSAGE_CHARS);
        let last = chunks.pop().unwrap_or_default();
        let chat_id = ChatId(user_id);

        for chunk in chunks {
            self.bot
                .send_message(chat_id, chunk)
                .await
                .map_err(|e| BotError::Transport(e.to_string()))?;
        }

        let mut request = self.bot.send_message(chat_id, last);
        if let Some(keyboard) = ui_builder::keyboard_markup(reply.keyboard, language_code) {
            request = request.reply_markup(keyboard);
        }
        request.await.map_err(|e| BotError::Transport(e.to_string()))?;

        debug!(user_id, reply = ?reply.kind, "Reply delivered");
        Ok(())
    }
}
