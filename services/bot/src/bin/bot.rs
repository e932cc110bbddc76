//! services/bot/src/bin/bot.rs

use bot_lib::{
    adapters::{
        db::DbAdapter,
        telegram::{CommandInfo, TelegramAdapter},
    },
    bot::{
        create_router, state::AppState, state::ConversationStore, ConversationEngine, Dispatcher,
        WebhookState,
    },
    config::Config,
    error::BotError,
    i18n::I18n,
    keyboards,
};
use review_bot_core::{Authorizer, Locale};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), BotError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting bot...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize the Messaging Adapter ---
    let telegram = Arc::new(TelegramAdapter::new(
        &config.telegram_api_url,
        &config.bot_token,
    )?);
    let i18n = Arc::new(
        I18n::embedded(config.default_locale)
            .map_err(|e| BotError::Internal(format!("Broken locale table: {}", e)))?,
    );
    register_commands(&telegram, &i18n).await;

    match &config.webhook_url {
        Some(url) => {
            telegram
                .set_webhook(url, config.webhook_secret.as_deref())
                .await?;
            info!("Webhook registered at {}", url);
        }
        None => warn!("WEBHOOK_URL is not set; updates arrive only if the webhook was registered elsewhere."),
    }

    // --- 4. Build the Shared AppState and the Event Pipeline ---
    let app_state = Arc::new(AppState {
        db: db_adapter,
        messenger: telegram,
        authorizer: Arc::new(Authorizer::new(config.super_admins.iter().copied())),
        i18n,
        config: config.clone(),
    });
    let engine = Arc::new(ConversationEngine::new(app_state, ConversationStore::new()));

    let shutdown = CancellationToken::new();
    let (dispatcher, dispatcher_task) =
        Dispatcher::spawn(engine, config.media_group_window, shutdown.clone());

    // --- 5. Create the Web Router ---
    let app = create_router(Arc::new(WebhookState {
        dispatcher,
        secret: config.webhook_secret.clone(),
    }));

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped. Draining the event dispatcher...");
    shutdown.cancel();
    dispatcher_task
        .await
        .map_err(|e| BotError::Internal(format!("Dispatcher task failed: {}", e)))?;
    Ok(())
}

/// Publishes the command menu for every locale. Failures only cost the menu.
async fn register_commands(telegram: &TelegramAdapter, i18n: &I18n) {
    let languages = std::iter::once(None).chain(Locale::ALL.into_iter().map(Some));
    for locale in languages {
        let commands: Vec<CommandInfo> = keyboards::command_menu(i18n, locale)
            .into_iter()
            .map(|(command, description)| CommandInfo {
                command: command.to_string(),
                description,
            })
            .collect();
        let code = locale.map(Locale::code);
        if let Err(e) = telegram.set_my_commands(&commands, code).await {
            warn!("Failed to register the {} command menu: {}", code.unwrap_or("default"), e);
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for the shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received.");
}
