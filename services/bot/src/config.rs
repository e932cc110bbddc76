//! services/bot/src/config.rs
//!
//! Defines the bot's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::time::Duration;

use chrono::FixedOffset;
use review_bot_core::Locale;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub bot_token: String,
    pub telegram_api_url: String,
    /// Public URL the messaging provider should deliver updates to.
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    /// Identities allowed to perform super-admin actions regardless of stored roles.
    pub super_admins: Vec<i64>,
    pub media_group_window: Duration,
    pub notify_utc_offset: FixedOffset,
    pub default_locale: Locale,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // --- Server and Database Settings ---
        let bind_address_str = var("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:8080".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url = required(&var, "DATABASE_URL")?;

        let log_level_str = var("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Messaging Provider Settings ---
        let bot_token = required(&var, "BOT_TOKEN")?;
        let telegram_api_url = var("TELEGRAM_API_URL")
            .unwrap_or_else(|| "https://api.telegram.org".to_string())
            .trim_end_matches('/')
            .to_string();
        let webhook_url = non_empty(var("WEBHOOK_URL"));
        let webhook_secret = non_empty(var("WEBHOOK_SECRET"));

        // --- Conversation Settings ---
        let super_admins = parse_id_list(&var("SUPER_ADMINS").unwrap_or_default())
            .map_err(|e| ConfigError::InvalidValue("SUPER_ADMINS".to_string(), e))?;

        let window_ms: u64 = parse_or(&var, "MEDIA_GROUP_WINDOW_MS", 1000)?;
        let media_group_window = Duration::from_millis(window_ms);

        let offset_minutes: i32 = parse_or(&var, "NOTIFY_UTC_OFFSET_MINUTES", 300)?;
        let notify_utc_offset = FixedOffset::east_opt(offset_minutes * 60).ok_or_else(|| {
            ConfigError::InvalidValue(
                "NOTIFY_UTC_OFFSET_MINUTES".to_string(),
                format!("{} is out of range", offset_minutes),
            )
        })?;

        let default_locale = match var("DEFAULT_LOCALE") {
            Some(code) => Locale::from_code(&code).ok_or_else(|| {
                ConfigError::InvalidValue(
                    "DEFAULT_LOCALE".to_string(),
                    format!("'{}' is not a supported locale", code),
                )
            })?,
            None => Locale::default(),
        };

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            bot_token,
            telegram_api_url,
            webhook_url,
            webhook_secret,
            super_admins,
            media_group_window,
            notify_utc_offset,
            default_locale,
        })
    }
}

fn required(var: &impl Fn(&str) -> Option<String>, name: &str) -> Result<String, ConfigError> {
    non_empty(var(name)).ok_or_else(|| ConfigError::MissingVar(name.to_string()))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_or<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match var(name) {
        Some(raw) => raw.trim().parse::<T>().map_err(|_| {
            ConfigError::InvalidValue(name.to_string(), format!("'{}' is not a number", raw))
        }),
        None => Ok(default),
    }
}

fn parse_id_list(raw: &str) -> Result<Vec<i64>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<i64>().map_err(|_| format!("'{}' is not an id", s)))
        .collect()
}
