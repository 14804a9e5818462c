//! UI Builder module for creating keyboards and formatting messages

use chrono::{DateTime, NaiveDate, Utc};
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

// Import localization
use crate::localization::{t_args_lang, t_lang};

use crate::admin::UserInfo;
use crate::models::{PromoCode, Tier};
use crate::orchestrator::{Action, Keyboard, Reply, ReplyKind};
use crate::photo::PhotoRejection;
use crate::promo::Redemption;
use crate::quota::QuotaStatus;
use crate::session::AnalysisKind;

/// Telegram rejects messages longer than this many characters
pub const MAX_MESSAGE_CHARS: usize = 4096;

/// Everything an inline button can ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Session(Action),
    Limits,
    Profile,
    Promo,
    Subscribe(Tier),
}

impl CallbackAction {
    pub fn data(&self) -> &'static str {
        match self {
            CallbackAction::Session(Action::Analyze(AnalysisKind::Nutrition)) => "analyze_nutrition",
            CallbackAction::Session(Action::Analyze(AnalysisKind::Recipe)) => "analyze_recipe",
            CallbackAction::Session(Action::NewPhoto) => "new_photo",
            CallbackAction::Session(Action::Cancel) => "cancel",
            CallbackAction::Session(Action::Menu) => "menu",
            CallbackAction::Limits => "limits",
            CallbackAction::Profile => "profile",
            CallbackAction::Promo => "promo",
            CallbackAction::Subscribe(Tier::PremiumMonth) => "subscribe_month",
            CallbackAction::Subscribe(_) => "subscribe_week",
        }
    }

    pub fn parse(data: &str) -> Option<Self> {
        let action = match data {
            "analyze_nutrition" => CallbackAction::Session(Action::Analyze(AnalysisKind::Nutrition)),
            "analyze_recipe" => CallbackAction::Session(Action::Analyze(AnalysisKind::Recipe)),
            "new_photo" => CallbackAction::Session(Action::NewPhoto),
            "cancel" => CallbackAction::Session(Action::Cancel),
            "menu" => CallbackAction::Session(Action::Menu),
            "limits" => CallbackAction::Limits,
            "profile" => CallbackAction::Profile,
            "promo" => CallbackAction::Promo,
            "subscribe_week" => CallbackAction::Subscribe(Tier::PremiumWeek),
            "subscribe_month" => CallbackAction::Subscribe(Tier::PremiumMonth),
            _ => return None,
        };
        Some(action)
    }
}

fn button(key: &str, action: CallbackAction, language_code: Option<&str>) -> InlineKeyboardButton {
    InlineKeyboardButton::callback(t_lang(key, language_code), action.data())
}

/// Buttons shown while a photo is being discussed
pub fn create_analysis_keyboard(language_code: Option<&str>) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![
            button(
                "button-nutrition",
                CallbackAction::Session(Action::Analyze(AnalysisKind::Nutrition)),
                language_code,
            ),
            button(
                "button-recipe",
                CallbackAction::Session(Action::Analyze(AnalysisKind::Recipe)),
                language_code,
            ),
        ],
        vec![
            button("button-new-photo", CallbackAction::Session(Action::NewPhoto), language_code),
            button("button-cancel", CallbackAction::Session(Action::Cancel), language_code),
        ],
    ])
}

pub fn create_main_menu_keyboard(language_code: Option<&str>) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![
            button("button-limits", CallbackAction::Limits, language_code),
            button("button-profile", CallbackAction::Profile, language_code),
        ],
        vec![button("button-promo", CallbackAction::Promo, language_code)],
        vec![
            button(
                "button-subscribe-week",
                CallbackAction::Subscribe(Tier::PremiumWeek),
                language_code,
            ),
            button(
                "button-subscribe-month",
                CallbackAction::Subscribe(Tier::PremiumMonth),
                language_code,
            ),
        ],
    ])
}

/// Single cancel button under the promo code prompt
pub fn create_promo_keyboard(language_code: Option<&str>) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![button(
        "button-cancel",
        CallbackAction::Session(Action::Menu),
        language_code,
    )]])
}

pub fn keyboard_markup(keyboard: Keyboard, language_code: Option<&str>) -> Option<InlineKeyboardMarkup> {
    match keyboard {
        Keyboard::None => None,
        Keyboard::AnalysisMenu => Some(create_analysis_keyboard(language_code)),
        Keyboard::MainMenu => Some(create_main_menu_keyboard(language_code)),
    }
}

/// Render an orchestrator reply into message text
pub fn render_reply_text(reply: &Reply, language_code: Option<&str>) -> String {
    let lang = language_code;
    match &reply.kind {
        ReplyKind::LimitExceeded { used, limit } => t_args_lang(
            "limit-exceeded",
            &[("used", &used.to_string()), ("limit", &limit.to_string())],
            lang,
        ),
        ReplyKind::ChooseKind { used, limit } => t_args_lang(
            "choose-kind",
            &[("used", &used.to_string()), ("limit", &limit.to_string())],
            lang,
        ),
        ReplyKind::Analyzing(AnalysisKind::Nutrition) => t_lang("analyzing-nutrition", lang),
        ReplyKind::Analyzing(AnalysisKind::Recipe) => t_lang("analyzing-recipe", lang),
        ReplyKind::AnalysisResult { text, turns_left, .. } => {
            let footer = if *turns_left == 0 {
                t_lang("analysis-footer-last", lang)
            } else {
                t_args_lang("analysis-footer", &[("turns_left", &turns_left.to_string())], lang)
            };
            format!("{text}\n\n{footer}")
        }
        ReplyKind::AnalysisFailed => t_lang("analysis-failed", lang),
        ReplyKind::TurnLimitReached => t_lang("turn-limit-reached", lang),
        ReplyKind::SessionExpired => t_lang("session-expired", lang),
        ReplyKind::NewPhotoPrompt => t_lang("new-photo-prompt", lang),
        ReplyKind::Cancelled => t_lang("cancelled", lang),
        ReplyKind::MainMenu => t_lang("main-menu", lang),
        ReplyKind::TextBuffered => t_lang("text-buffered", lang),
        ReplyKind::SendPhotoFirst => t_lang("send-photo-first", lang),
        ReplyKind::UnsupportedPhoto(PhotoRejection::TooLarge { max, .. }) => {
            t_args_lang("photo-too-large", &[("max_mb", &(max / (1024 * 1024)).to_string())], lang)
        }
        ReplyKind::UnsupportedPhoto(_) => t_lang("photo-unsupported", lang),
        ReplyKind::ServiceUnavailable => t_lang("service-unavailable", lang),
        ReplyKind::Apology => t_lang("apology", lang),
    }
}

/// Split text into chunks Telegram accepts, preferring line breaks
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0;

    for line in text.split_inclusive('\n') {
        let line_chars = line.chars().count();
        if current_chars + line_chars > max_chars && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_chars = 0;
        }
        if line_chars > max_chars {
            // A single oversized line is cut at character boundaries
            for c in line.chars() {
                if current_chars == max_chars {
                    chunks.push(std::mem::take(&mut current));
                    current_chars = 0;
                }
                current.push(c);
                current_chars += 1;
            }
        } else {
            current.push_str(line);
            current_chars += line_chars;
        }
    }
    if !current.is_empty() || chunks.is_empty() {
        chunks.push(current);
    }
    chunks
}

pub fn format_date(date: DateTime<Utc>) -> String {
    date.format("%d.%m.%Y").to_string()
}

pub fn format_day(date: NaiveDate) -> String {
    date.format("%d.%m.%Y").to_string()
}

pub fn tier_label(tier: Tier, language_code: Option<&str>) -> String {
    let key = match tier {
        Tier::Free => "tier-free",
        Tier::PremiumWeek => "tier-premium-week",
        Tier::PremiumMonth => "tier-premium-month",
    };
    t_lang(key, language_code)
}

pub fn subscription_label(
    tier: Tier,
    until: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    language_code: Option<&str>,
) -> String {
    if !tier.is_paid() {
        return t_lang("subscription-none", language_code);
    }
    match until {
        None => t_lang("subscription-permanent", language_code),
        Some(until) if until > now => {
            t_args_lang("subscription-until", &[("date", &format_date(until))], language_code)
        }
        Some(until) => {
            t_args_lang("subscription-expired", &[("date", &format_date(until))], language_code)
        }
    }
}

pub fn format_limits(status: &QuotaStatus, language_code: Option<&str>) -> String {
    let text = t_args_lang(
        "limits-status",
        &[
            ("used", &status.used.to_string()),
            ("limit", &status.limit.to_string()),
            ("remaining", &status.remaining.to_string()),
            ("tier", &tier_label(status.tier, language_code)),
        ],
        language_code,
    );
    format!("{text}\n{}", t_lang("limits-reset-note", language_code))
}

pub fn format_profile(user_id: i64, status: &QuotaStatus, language_code: Option<&str>) -> String {
    t_args_lang(
        "profile",
        &[
            ("user_id", &user_id.to_string()),
            ("tier", &tier_label(status.tier, language_code)),
            (
                "subscription",
                &subscription_label(status.tier, status.subscription_until, Utc::now(), language_code),
            ),
            ("used", &status.used.to_string()),
            ("limit", &status.limit.to_string()),
            ("total", &status.total_analyzed.to_string()),
        ],
        language_code,
    )
}

/// User-facing message for a redemption outcome
pub fn format_redemption(outcome: &Redemption, language_code: Option<&str>) -> String {
    match outcome {
        Redemption::Granted { tier, until } => t_args_lang(
            outcome.message_key(),
            &[
                ("tier", &tier_label(*tier, language_code)),
                ("until", &format_date(*until)),
            ],
            language_code,
        ),
        _ => t_lang(outcome.message_key(), language_code),
    }
}

pub fn format_promo_list(promos: &[PromoCode], now: DateTime<Utc>, language_code: Option<&str>) -> String {
    if promos.is_empty() {
        return t_lang("admin-no-promos", language_code);
    }

    let lines: Vec<String> = promos
        .iter()
        .map(|promo| {
            let status = if promo.is_used {
                t_args_lang(
                    "admin-promo-status-used",
                    &[("user_id", &promo.used_by.map(|id| id.to_string()).unwrap_or_default())],
                    language_code,
                )
            } else if promo.is_expired(now) {
                t_lang("admin-promo-status-expired", language_code)
            } else {
                t_lang("admin-promo-status-active", language_code)
            };
            format!("{} - {} ({status})", promo.code, promo.promo_type)
        })
        .collect();

    t_args_lang(
        "admin-promo-list",
        &[("count", &promos.len().to_string()), ("codes", &lines.join("\n"))],
        language_code,
    )
}

pub fn format_user_info(info: &UserInfo, language_code: Option<&str>) -> String {
    let account = &info.account;
    t_args_lang(
        "admin-user-info",
        &[
            ("user_id", &account.user_id.to_string()),
            (
                "username",
                &account
                    .username
                    .as_deref()
                    .map(|name| format!("@{name}"))
                    .unwrap_or_else(|| "-".to_string()),
            ),
            ("tier", &tier_label(account.tier, language_code)),
            (
                "subscription",
                &subscription_label(account.tier, account.subscription_until, Utc::now(), language_code),
            ),
            ("used", &info.status.used.to_string()),
            ("limit", &info.status.limit.to_string()),
            ("total", &account.total_analyzed.to_string()),
            ("last_reset", &format_day(account.last_reset_date)),
            ("created", &format_date(account.created_at)),
        ],
        language_code,
    )
}
