//! Message Handler module for processing incoming Telegram messages

use anyhow::{Context, Result};
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::FileId;
use tracing::{debug, error, info, warn};

// Import localization
use crate::localization::{detect_language, t_args_lang, t_lang};

use crate::dialogue::{validate_promo_input, BotDialogue, BotDialogueState};
use crate::orchestrator::{Action, EventKind, InboundEvent};

use super::admin_handler::handle_admin_command;
use super::ui_builder::{
    create_main_menu_keyboard, create_promo_keyboard, format_limits, format_profile, format_redemption,
};
use super::{parse_command, BotServices};

/// Download a Telegram file into memory
pub async fn download_file(bot: &Bot, file_id: FileId) -> Result<Vec<u8>> {
    let file = bot.get_file(file_id).await?;
    let url = format!("https://api.telegram.org/file/bot{}/{}", bot.token(), file.path);

    let response = reqwest::get(&url).await?.error_for_status()?;
    let bytes = response.bytes().await?;
    Ok(bytes.to_vec())
}

fn message_user(msg: &Message) -> (i64, Option<String>, String) {
    let user = msg.from.as_ref();
    let user_id = user.map(|u| u.id.0 as i64).unwrap_or(msg.chat.id.0);
    let username = user.and_then(|u| u.username.clone());
    let language = detect_language(user.and_then(|u| u.language_code.as_deref()));
    (user_id, username, language)
}

/// Send the `/limits` or `/profile` view of the user's quota
pub async fn send_status_message(
    bot: &Bot,
    services: &BotServices,
    user_id: i64,
    language: &str,
    profile: bool,
) -> Result<()> {
    let lang = Some(language);
    let text = match services.quota.status(user_id).await {
        Ok(status) if profile => format_profile(user_id, &status, lang),
        Ok(status) => format_limits(&status, lang),
        Err(e) => {
            error!(user_id, error = %e, "Failed to load quota status");
            t_lang("service-unavailable", lang)
        }
    };
    bot.send_message(ChatId(user_id), text)
        .reply_markup(create_main_menu_keyboard(lang))
        .await?;
    Ok(())
}

/// Switch the dialogue to promo code input and prompt for the code
pub async fn start_promo_entry(
    bot: &Bot,
    dialogue: &BotDialogue,
    user_id: i64,
    language: &str,
) -> Result<()> {
    dialogue
        .update(BotDialogueState::WaitingForPromoCode {
            language_code: Some(language.to_string()),
        })
        .await?;
    bot.send_message(ChatId(user_id), t_lang("promo-enter", Some(language)))
        .reply_markup(create_promo_keyboard(Some(language)))
        .await?;
    Ok(())
}

async fn handle_promo_input(
    bot: &Bot,
    services: &BotServices,
    dialogue: BotDialogue,
    user_id: i64,
    language: &str,
    text: &str,
) -> Result<()> {
    let lang = Some(language);
    dialogue.exit().await?;

    let code = match validate_promo_input(text) {
        Ok(code) => code,
        Err(reason) => {
            debug!(user_id, reason, "Malformed promo code input");
            bot.send_message(ChatId(user_id), t_lang("promo-not-found", lang))
                .reply_markup(create_main_menu_keyboard(lang))
                .await?;
            return Ok(());
        }
    };

    let reply = match services.promos.redeem(&code, user_id).await {
        Ok(outcome) => format_redemption(&outcome, lang),
        Err(e) => {
            error!(user_id, error = %e, "Promo redemption failed");
            t_lang("service-unavailable", lang)
        }
    };
    bot.send_message(ChatId(user_id), reply)
        .reply_markup(create_main_menu_keyboard(lang))
        .await?;
    Ok(())
}

async fn handle_command(
    bot: &Bot,
    msg: &Message,
    services: &BotServices,
    dialogue: BotDialogue,
    text: &str,
) -> Result<()> {
    let (user_id, username, language) = message_user(msg);
    let lang = Some(language.as_str());

    let Some(command) = parse_command(text) else {
        bot.send_message(msg.chat.id, t_lang("unknown-command", lang)).await?;
        return Ok(());
    };
    debug!(user_id, command = %command.name, "Received command");

    match command.name.as_str() {
        "start" => {
            dialogue.exit().await?;
            let name = msg
                .from
                .as_ref()
                .map(|u| u.first_name.clone())
                .unwrap_or_default();
            let limit = match services.quota.account(user_id, username.as_deref()).await {
                Ok(account) => services.quota.get_limit(&account),
                Err(e) => {
                    warn!(user_id, error = %e, "Could not load account for welcome");
                    services.config.quota.free_daily_limit
                }
            };
            let welcome = t_args_lang(
                "welcome",
                &[("name", &name), ("limit", &limit.to_string())],
                lang,
            );
            bot.send_message(msg.chat.id, welcome)
                .reply_markup(create_main_menu_keyboard(lang))
                .await?;
        }
        "help" => {
            let help = t_args_lang(
                "help-commands",
                &[("max_turns", &services.config.session.max_turns.to_string())],
                lang,
            );
            bot.send_message(msg.chat.id, help).await?;
        }
        "limits" => send_status_message(bot, services, user_id, &language, false).await?,
        "profile" => send_status_message(bot, services, user_id, &language, true).await?,
        "promo" => {
            if let Some(code) = command.args.first() {
                handle_promo_input(bot, services, dialogue, user_id, &language, code).await?;
            } else {
                start_promo_entry(bot, &dialogue, user_id, &language).await?;
            }
        }
        "cancel" => {
            dialogue.exit().await?;
            services
                .orchestrator
                .handle(InboundEvent::new(user_id, language, EventKind::Button(Action::Cancel)))
                .await;
        }
        _ => {
            let args: Vec<&str> = command.args.iter().map(String::as_str).collect();
            if !handle_admin_command(bot, services, user_id, &language, &command.name, &args).await? {
                bot.send_message(msg.chat.id, t_lang("unknown-command", lang)).await?;
            }
        }
    }
    Ok(())
}

async fn handle_text_message(
    bot: &Bot,
    msg: &Message,
    services: &BotServices,
    dialogue: BotDialogue,
    text: &str,
) -> Result<()> {
    let (user_id, username, language) = message_user(msg);
    debug!(user_id, message_length = text.len(), "Received text message from user");

    if text.starts_with('/') {
        return handle_command(bot, msg, services, dialogue, text).await;
    }

    // Check dialogue state first
    if let Some(BotDialogueState::WaitingForPromoCode { language_code }) = dialogue.get().await? {
        let language = language_code.unwrap_or(language);
        return handle_promo_input(bot, services, dialogue, user_id, &language, text).await;
    }

    services
        .orchestrator
        .handle(
            InboundEvent::new(user_id, language, EventKind::Text(text.to_string())).with_username(username),
        )
        .await;
    Ok(())
}

async fn handle_image(
    bot: &Bot,
    msg: &Message,
    services: &BotServices,
    dialogue: BotDialogue,
    file_id: FileId,
    file_size: u32,
) -> Result<()> {
    let (user_id, username, language) = message_user(msg);
    let lang = Some(language.as_str());

    // A photo abandons any pending promo code entry
    dialogue.exit().await?;

    let max_bytes = services.config.photo.max_bytes;
    if file_size as usize > max_bytes {
        info!(user_id, file_size, max_bytes, "Photo too large, not downloading");
        bot.send_message(
            msg.chat.id,
            t_args_lang(
                "photo-too-large",
                &[("max_mb", &(max_bytes / (1024 * 1024)).to_string())],
                lang,
            ),
        )
        .await?;
        return Ok(());
    }

    let image = match download_file(bot, file_id).await {
        Ok(bytes) => {
            debug!(user_id, size = bytes.len(), "Image downloaded successfully");
            bytes
        }
        Err(e) => {
            error!(user_id, error = %e, "Failed to download image for user");
            bot.send_message(msg.chat.id, t_lang("download-failed", lang)).await?;
            return Ok(());
        }
    };

    let caption = msg.caption().map(str::to_string);
    services
        .orchestrator
        .handle(InboundEvent::new(user_id, language, EventKind::Photo { image, caption }).with_username(username))
        .await;
    Ok(())
}

async fn handle_photo_message(bot: &Bot, msg: &Message, services: &BotServices, dialogue: BotDialogue) -> Result<()> {
    debug!(user_id = %msg.chat.id, "Received photo message from user");

    // Telegram lists sizes ascending, the last one is the original
    let largest_photo = msg
        .photo()
        .and_then(|photos| photos.last())
        .context("photo message without sizes")?;
    handle_image(
        bot,
        msg,
        services,
        dialogue,
        largest_photo.file.id.clone(),
        largest_photo.file.size,
    )
    .await
}

async fn handle_document_message(
    bot: &Bot,
    msg: &Message,
    services: &BotServices,
    dialogue: BotDialogue,
) -> Result<()> {
    let (_, _, language) = message_user(msg);
    let Some(doc) = msg.document() else {
        return Ok(());
    };

    match &doc.mime_type {
        Some(mime_type) if mime_type.to_string().starts_with("image/") => {
            debug!(user_id = %msg.chat.id, mime_type = %mime_type, "Received image document from user");
            handle_image(bot, msg, services, dialogue, doc.file.id.clone(), doc.file.size).await
        }
        other => {
            debug!(user_id = %msg.chat.id, mime_type = ?other, "Received non-image document from user");
            bot.send_message(msg.chat.id, t_lang("document-not-image", Some(&language)))
                .await?;
            Ok(())
        }
    }
}

async fn handle_unsupported_message(bot: &Bot, msg: &Message) -> Result<()> {
    let (_, _, language) = message_user(msg);
    debug!(user_id = %msg.chat.id, "Received unsupported message type from user");

    bot.send_message(msg.chat.id, t_lang("send-photo-first", Some(&language)))
        .await?;
    Ok(())
}

pub async fn message_handler(
    bot: Bot,
    msg: Message,
    services: Arc<BotServices>,
    dialogue: BotDialogue,
) -> Result<()> {
    if let Some(text) = msg.text() {
        handle_text_message(&bot, &msg, &services, dialogue, text).await?;
    } else if msg.photo().is_some() {
        handle_photo_message(&bot, &msg, &services, dialogue).await?;
    } else if msg.document().is_some() {
        handle_document_message(&bot, &msg, &services, dialogue).await?;
    } else {
        handle_unsupported_message(&bot, &msg).await?;
    }

    Ok(())
}
