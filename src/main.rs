use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use teloxide::dispatching::dialogue::InMemStorage;
use teloxide::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mealbot::admin::AdminService;
use mealbot::bot::{self, BotServices, TelegramSink};
use mealbot::config::AppConfig;
use mealbot::db::{self, PgStore};
use mealbot::dialogue::BotDialogueState;
use mealbot::generation::{GenerationService, OpenAiBackend};
use mealbot::localization::init_localization;
use mealbot::orchestrator::AnalysisOrchestrator;
use mealbot::promo::PromoService;
use mealbot::quota::QuotaLedger;
use mealbot::session::{spawn_sweeper, SessionStore};
use mealbot::store::{AccountStore, MemoryStore};

/// Console logs by default, JSON lines when `LOG_FORMAT=json`
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    if env::var("LOG_FORMAT").map(|v| v.eq_ignore_ascii_case("json")).unwrap_or(false) {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn connect_store(config: &AppConfig) -> Result<Arc<dyn AccountStore>> {
    let Some(database_url) = config.database_url.as_deref() else {
        warn!("DATABASE_URL not set, accounts and promo codes will not survive a restart");
        return Ok(Arc::new(MemoryStore::new()));
    };

    info!("Connecting to Postgres");
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .context("Failed to connect to the database")?;

    // Initialize database schema
    db::init_database_schema(&pool)
        .await
        .context("Failed to initialize database schema")?;

    Ok(Arc::new(PgStore::new(pool)))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    init_tracing();
    info!("Starting Meal Analysis Telegram Bot");

    let config = Arc::new(AppConfig::from_env()?);
    init_localization().context("Failed to load translations")?;

    let store = connect_store(&config).await?;

    let quota = Arc::new(QuotaLedger::new(Arc::clone(&store), config.quota.clone()));
    let promos = Arc::new(PromoService::new(Arc::clone(&store), config.promo.clone()));
    let admin = Arc::new(AdminService::new(
        config.admin_ids.clone(),
        Arc::clone(&quota),
        Arc::clone(&promos),
    ));
    if config.admin_ids.is_empty() {
        warn!("ADMIN_USER_IDS is empty, admin commands are disabled");
    }

    let sessions = Arc::new(SessionStore::new(config.session.clone()));
    spawn_sweeper(
        Arc::clone(&sessions),
        Duration::from_secs(config.session.sweep_interval_secs),
    );

    let backend = Arc::new(OpenAiBackend::new(config.generation.clone())?);
    let generation = Arc::new(GenerationService::new(
        backend,
        config.generation.breaker.clone(),
        Duration::from_secs(config.generation.timeout_secs),
    ));

    // Initialize the bot
    let bot = Bot::new(config.bot_token.clone());

    let orchestrator = Arc::new(AnalysisOrchestrator::new(
        quota.clone(),
        sessions,
        generation,
        Arc::new(TelegramSink::new(bot.clone())),
        &config.generation,
        config.photo.clone(),
    ));

    let services = Arc::new(BotServices {
        orchestrator,
        quota,
        promos,
        admin,
        config: Arc::clone(&config),
    });

    info!(model = %config.generation.model, "Bot initialized, starting dispatcher");

    let handler = dptree::entry()
        .branch(
            Update::filter_message()
                .enter_dialogue::<Message, InMemStorage<BotDialogueState>, BotDialogueState>()
                .endpoint(bot::message_handler),
        )
        .branch(
            Update::filter_callback_query()
                .enter_dialogue::<CallbackQuery, InMemStorage<BotDialogueState>, BotDialogueState>()
                .endpoint(bot::callback_handler),
        );

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![services, InMemStorage::<BotDialogueState>::new()])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}
