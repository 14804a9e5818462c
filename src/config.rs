//! # Configuration Module
//!
//! Runtime settings for quotas, analysis sessions, the generation backend,
//! promo codes and photo uploads. Every section has sensible defaults and can
//! be overridden from the environment (`.env` is loaded in `main`).

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::env;
use std::str::FromStr;

// Constants for quota and session configuration
pub const FREE_DAILY_LIMIT: u32 = 3;
pub const PREMIUM_DAILY_LIMIT: u32 = 10;
pub const MAX_SESSION_TURNS: u32 = 5;
pub const SESSION_TTL_SECS: i64 = 3600; // 1 hour
pub const MAX_PHOTO_SIZE: usize = 10 * 1024 * 1024; // 10MB limit for uploaded photos
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// Daily photo-analysis allowance per tier
#[derive(Debug, Clone)]
pub struct QuotaConfig {
    pub free_daily_limit: u32,
    pub premium_daily_limit: u32,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            free_daily_limit: FREE_DAILY_LIMIT,
            premium_daily_limit: PREMIUM_DAILY_LIMIT,
        }
    }
}

/// Analysis session bounds
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum turns per session, the image upload included
    pub max_turns: u32,
    /// Idle time after which a session is purged
    pub ttl_secs: i64,
    /// Background sweep period in seconds, 0 disables the sweeper
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_turns: MAX_SESSION_TURNS,
            ttl_secs: SESSION_TTL_SECS,
            sweep_interval_secs: 600,
        }
    }
}

/// Circuit breaker settings for the generation backend
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker opens
    pub failure_threshold: u32,
    /// Seconds the breaker stays open before letting a call through
    pub reset_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_secs: 60, // 1 minute
        }
    }
}

/// Generation backend settings
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    /// Token budget for one reply
    pub max_tokens: u32,
    /// Upper bound for a single generation call
    pub timeout_secs: u64,
    /// Whether a failed call still counts toward the session turn cap
    pub count_failed_turns: bool,
    pub breaker: BreakerConfig,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 1200,
            timeout_secs: 60,
            count_failed_turns: true,
            breaker: BreakerConfig::default(),
        }
    }
}

/// Promo code generation settings
#[derive(Debug, Clone)]
pub struct PromoConfig {
    pub code_length: usize,
    /// Days a freshly generated code stays redeemable
    pub valid_days: i64,
}

impl Default for PromoConfig {
    fn default() -> Self {
        Self {
            code_length: 8,
            valid_days: 30,
        }
    }
}

/// Accepted photo uploads
#[derive(Debug, Clone)]
pub struct PhotoConfig {
    pub max_bytes: usize,
    /// Minimum bytes required for format detection
    pub min_format_bytes: usize,
}

impl Default for PhotoConfig {
    fn default() -> Self {
        Self {
            max_bytes: MAX_PHOTO_SIZE,
            min_format_bytes: 8,
        }
    }
}

/// Full application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bot_token: String,
    /// Postgres connection string; the in-memory store is used when absent
    pub database_url: Option<String>,
    pub admin_ids: HashSet<i64>,
    pub quota: QuotaConfig,
    pub session: SessionConfig,
    pub generation: GenerationConfig,
    pub promo: PromoConfig,
    pub photo: PhotoConfig,
}

impl AppConfig {
    /// Build the configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let bot_token = env::var("TELEGRAM_BOT_TOKEN").context("TELEGRAM_BOT_TOKEN must be set")?;
        let database_url = env::var("DATABASE_URL").ok().filter(|s| !s.is_empty());
        let admin_ids = parse_admin_ids(&env::var("ADMIN_USER_IDS").unwrap_or_default())?;

        let quota = QuotaConfig {
            free_daily_limit: env_or("FREE_DAILY_LIMIT", FREE_DAILY_LIMIT)?,
            premium_daily_limit: env_or("PREMIUM_DAILY_LIMIT", PREMIUM_DAILY_LIMIT)?,
        };

        let session_defaults = SessionConfig::default();
        let session = SessionConfig {
            max_turns: env_or("SESSION_MAX_TURNS", session_defaults.max_turns)?,
            ttl_secs: env_or("SESSION_TTL_SECS", session_defaults.ttl_secs)?,
            sweep_interval_secs: env_or(
                "SESSION_SWEEP_INTERVAL_SECS",
                session_defaults.sweep_interval_secs,
            )?,
        };

        let generation_defaults = GenerationConfig::default();
        let generation = GenerationConfig {
            api_base: env::var("OPENAI_API_BASE").unwrap_or(generation_defaults.api_base),
            api_key: env::var("OPENAI_API_KEY").context("OPENAI_API_KEY must be set")?,
            model: env::var("OPENAI_MODEL").unwrap_or(generation_defaults.model),
            max_tokens: env_or("OPENAI_MAX_TOKENS", generation_defaults.max_tokens)?,
            timeout_secs: env_or("GENERATION_TIMEOUT_SECS", generation_defaults.timeout_secs)?,
            count_failed_turns: env_or(
                "COUNT_FAILED_TURNS",
                generation_defaults.count_failed_turns,
            )?,
            breaker: BreakerConfig::default(),
        };

        Ok(Self {
            bot_token,
            database_url,
            admin_ids,
            quota,
            session,
            generation,
            promo: PromoConfig::default(),
            photo: PhotoConfig::default(),
        })
    }
}

/// Parse a comma separated list of numeric user ids, ignoring blanks
pub fn parse_admin_ids(raw: &str) -> Result<HashSet<i64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| {
            id.parse::<i64>()
                .with_context(|| format!("ADMIN_USER_IDS contains an invalid id: {id}"))
        })
        .collect()
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw}")),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_product_limits() {
        let quota = QuotaConfig::default();
        assert_eq!(quota.free_daily_limit, 3);
        assert_eq!(quota.premium_daily_limit, 10);

        let session = SessionConfig::default();
        assert_eq!(session.max_turns, 5);
        assert_eq!(session.ttl_secs, 3600);

        let generation = GenerationConfig::default();
        assert!(generation.count_failed_turns);
        assert!(generation.timeout_secs > 0 && generation.timeout_secs <= 300);
    }

    #[test]
    fn test_parse_admin_ids() {
        let ids = parse_admin_ids(" 1, 2,,3 ").unwrap();
        assert_eq!(ids.len(), 3);
        assert!(ids.contains(&2));

        assert!(parse_admin_ids("").unwrap().is_empty());
        assert!(parse_admin_ids("12,abc").is_err());
    }
}
