//! # Meal Analysis Telegram Bot
//!
//! A Telegram bot that analyzes meal photos with a vision-capable language
//! model. Users get a daily photo allowance by tier, and each photo opens a
//! short follow-up conversation bounded in turns and idle time. Paid tiers are
//! granted through one-time promo codes managed by administrators.

pub mod admin;
pub mod bot;
pub mod circuit_breaker;
pub mod config;
pub mod db;
pub mod dialogue;
pub mod error;
pub mod generation;
pub mod localization;
pub mod models;
pub mod orchestrator;
pub mod photo;
pub mod promo;
pub mod prompts;
pub mod quota;
pub mod session;
pub mod store;
