//! Callback Handler module for processing inline keyboard callback queries

use anyhow::Result;
use std::sync::Arc;
use teloxide::prelude::*;
use tracing::{debug, warn};

// Import localization
use crate::localization::{detect_language, t_lang};

use crate::dialogue::{BotDialogue, BotDialogueState};
use crate::orchestrator::{Action, EventKind, InboundEvent};

use super::message_handler::{send_status_message, start_promo_entry};
use super::ui_builder::{create_main_menu_keyboard, CallbackAction};
use super::BotServices;

/// Handle callback queries from inline keyboards
pub async fn callback_handler(
    bot: Bot,
    q: teloxide::types::CallbackQuery,
    services: Arc<BotServices>,
    dialogue: BotDialogue,
) -> Result<()> {
    let user_id = q.from.id.0 as i64;
    let language = detect_language(q.from.language_code.as_deref());
    let data = q.data.as_deref().unwrap_or("");
    debug!(user_id, data, "Received callback query from user");

    // Answer first to remove the loading state; analysis may take a while
    bot.answer_callback_query(q.id.clone()).await?;

    let Some(action) = CallbackAction::parse(data) else {
        warn!(user_id, data, "Unknown callback data");
        return Ok(());
    };

    match action {
        CallbackAction::Session(session_action) => {
            // Any navigation abandons a pending promo code entry
            if matches!(session_action, Action::Cancel | Action::Menu)
                && matches!(dialogue.get().await?, Some(BotDialogueState::WaitingForPromoCode { .. }))
            {
                dialogue.exit().await?;
                bot.send_message(ChatId(user_id), t_lang("promo-cancelled", Some(&language)))
                    .reply_markup(create_main_menu_keyboard(Some(&language)))
                    .await?;
                return Ok(());
            }

            let username = q.from.username.clone();
            services
                .orchestrator
                .handle(
                    InboundEvent::new(user_id, language, EventKind::Button(session_action))
                        .with_username(username),
                )
                .await;
        }
        CallbackAction::Limits => send_status_message(&bot, &services, user_id, &language, false).await?,
        CallbackAction::Profile => send_status_message(&bot, &services, user_id, &language, true).await?,
        CallbackAction::Promo => start_promo_entry(&bot, &dialogue, user_id, &language).await?,
        CallbackAction::Subscribe(tier) => {
            debug!(user_id, tier = %tier, "Subscription purchase requested");
            bot.send_message(ChatId(user_id), t_lang("subscribe-coming-soon", Some(&language)))
                .reply_markup(create_main_menu_keyboard(Some(&language)))
                .await?;
        }
    }

    Ok(())
}
