//! Admin Handler module for administrator commands
//!
//! Commands are only recognised by name here; authorization happens in
//! [`AdminService`](crate::admin::AdminService) so every operation checks it.

use anyhow::Result;
use chrono::{Duration, Utc};
use teloxide::prelude::*;
use tracing::{error, info};

use crate::error::{BotError, StorageError};
use crate::localization::{t_args_lang, t_lang};
use crate::models::{PromoType, Tier};

use super::ui_builder::{
    format_promo_list, format_redemption, format_user_info, split_message, subscription_label, tier_label,
    MAX_MESSAGE_CHARS,
};
use super::BotServices;

const ADMIN_COMMANDS: &[&str] = &[
    "admin",
    "generate_promo",
    "promo_list",
    "reset_promos",
    "activate_promo",
    "reset_limits",
    "set_sub",
    "reset_sub",
    "user_info",
];

pub fn is_admin_command(name: &str) -> bool {
    ADMIN_COMMANDS.contains(&name)
}

/// Parse an optional target user id, defaulting to the caller
fn target_user(arg: Option<&&str>, caller: i64) -> Result<i64, BotError> {
    match arg {
        None => Ok(caller),
        Some(raw) => raw
            .parse()
            .map_err(|_| BotError::Validation(format!("invalid user id: {raw}"))),
    }
}

fn error_text(err: &BotError, language_code: Option<&str>) -> String {
    match err {
        BotError::Forbidden(_) => t_lang("admin-access-denied", language_code),
        BotError::Storage(StorageError::UserNotFound(_)) => t_lang("admin-user-not-found", language_code),
        other => t_args_lang("admin-error", &[("error", &other.to_string())], language_code),
    }
}

/// Handle an admin command. Returns `false` if `name` is not one.
pub async fn handle_admin_command(
    bot: &Bot,
    services: &BotServices,
    user_id: i64,
    language: &str,
    name: &str,
    args: &[&str],
) -> Result<bool> {
    if !is_admin_command(name) {
        return Ok(false);
    }
    let lang = Some(language);
    info!(user_id, command = name, "Admin command received");

    let text = match run_admin_command(services, user_id, lang, name, args).await {
        Ok(text) => text,
        Err(e) => {
            error!(user_id, command = name, error = %e, "Admin command failed");
            error_text(&e, lang)
        }
    };

    for chunk in split_message(&text, MAX_MESSAGE_CHARS) {
        bot.send_message(ChatId(user_id), chunk).await?;
    }
    Ok(true)
}

async fn run_admin_command(
    services: &BotServices,
    user_id: i64,
    lang: Option<&str>,
    name: &str,
    args: &[&str],
) -> Result<String, BotError> {
    let admin = &services.admin;

    match name {
        "admin" => {
            admin.require_admin(user_id)?;
            Ok(t_lang("admin-help", lang))
        }
        "generate_promo" => {
            admin.require_admin(user_id)?;
            let [kind, count] = args else {
                return Ok(t_lang("admin-generate-usage", lang));
            };
            let Ok(promo_type) = kind.parse::<PromoType>() else {
                return Ok(t_lang("admin-invalid-promo-type", lang));
            };
            let Ok(count) = count.parse::<usize>() else {
                return Ok(t_lang("admin-generate-usage", lang));
            };

            let codes = admin.generate_promo_codes(user_id, promo_type, count).await?;
            Ok(t_args_lang(
                "admin-codes-generated",
                &[
                    ("count", &codes.len().to_string()),
                    ("promo_type", &promo_type.to_string()),
                    ("codes", &codes.join("\n")),
                ],
                lang,
            ))
        }
        "promo_list" => {
            let promos = admin.list_promo_codes(user_id).await?;
            Ok(format_promo_list(&promos, Utc::now(), lang))
        }
        "reset_promos" => {
            let deleted = admin.purge_promo_codes(user_id).await?;
            Ok(t_args_lang("admin-promos-purged", &[("count", &deleted.to_string())], lang))
        }
        "activate_promo" => {
            admin.require_admin(user_id)?;
            let Some(code) = args.first() else {
                return Ok(t_lang("admin-activate-usage", lang));
            };
            let target = target_user(args.get(1), user_id)?;
            let outcome = admin.activate_promo(user_id, code, target).await?;
            Ok(t_args_lang(
                "admin-promo-activated",
                &[
                    ("user_id", &target.to_string()),
                    ("result", &format_redemption(&outcome, lang)),
                ],
                lang,
            ))
        }
        "reset_limits" => {
            let target = target_user(args.first(), user_id)?;
            admin.reset_user_daily_limit(user_id, target).await?;
            Ok(t_args_lang("admin-limits-reset", &[("user_id", &target.to_string())], lang))
        }
        "set_sub" => {
            admin.require_admin(user_id)?;
            let (target, tier, days) = match args {
                [target, tier] => (target, tier, None),
                [target, tier, days] => (target, tier, Some(days)),
                _ => return Ok(t_lang("admin-set-sub-usage", lang)),
            };
            let target = target_user(Some(target), user_id)?;
            let Ok(tier) = tier.parse::<Tier>() else {
                return Ok(t_lang("admin-set-sub-usage", lang));
            };
            let days = match days {
                Some(raw) => match raw.parse::<i64>() {
                    Ok(days) if days > 0 => Some(days),
                    _ => return Ok(t_lang("admin-set-sub-usage", lang)),
                },
                None => match tier {
                    Tier::Free => None,
                    Tier::PremiumWeek => Some(PromoType::PremiumWeek.duration_days()),
                    Tier::PremiumMonth => Some(PromoType::PremiumMonth.duration_days()),
                },
            };

            let now = Utc::now();
            let until = days.filter(|_| tier.is_paid()).map(|days| now + Duration::days(days));
            admin.set_user_subscription(user_id, target, tier, until).await?;
            Ok(subscription_set_text(target, tier, until, now, lang))
        }
        "reset_sub" => {
            let target = target_user(args.first(), user_id)?;
            admin.set_user_subscription(user_id, target, Tier::Free, None).await?;
            Ok(subscription_set_text(target, Tier::Free, None, Utc::now(), lang))
        }
        "user_info" => {
            let target = target_user(args.first(), user_id)?;
            let info = admin.user_info(user_id, target).await?;
            Ok(format_user_info(&info, lang))
        }
        _ => Ok(t_lang("unknown-command", lang)),
    }
}

fn subscription_set_text(
    user_id: i64,
    tier: Tier,
    until: Option<chrono::DateTime<Utc>>,
    now: chrono::DateTime<Utc>,
    lang: Option<&str>,
) -> String {
    t_args_lang(
        "admin-subscription-set",
        &[
            ("user_id", &user_id.to_string()),
            ("tier", &tier_label(tier, lang)),
            ("subscription", &subscription_label(tier, until, now, lang)),
        ],
        lang,
    )
}
