//! Promo code dialogue module for handling conversation state with users.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use teloxide::dispatching::dialogue::{Dialogue, InMemStorage};

use crate::promo::normalize_code;

lazy_static! {
    static ref PROMO_CODE_PATTERN: Regex = Regex::new(r"^[A-Z0-9]{4,32}$").expect("valid promo code pattern");
}

/// Input states layered on top of the analysis conversation
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum BotDialogueState {
    #[default]
    Start,
    /// The next text message is a promo code
    WaitingForPromoCode { language_code: Option<String> },
}

/// Type alias for our bot dialogue
pub type BotDialogue = Dialogue<BotDialogueState, InMemStorage<BotDialogueState>>;

/// Normalize and validate a promo code typed by the user
pub fn validate_promo_input(input: &str) -> Result<String, &'static str> {
    let code = normalize_code(input);

    if code.is_empty() {
        return Err("empty");
    }

    if !PROMO_CODE_PATTERN.is_match(&code) {
        return Err("malformed");
    }

    Ok(code)
}
