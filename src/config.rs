//! Configuration loading for FXPulse.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Get the FXPulse home directory (~/.fxpulse).
pub fn get_home_dir() -> Result<PathBuf> {
    let home = directories::UserDirs::new()
        .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;

    Ok(home.home_dir().join(".fxpulse"))
}

/// Get the settings file path.
pub fn get_settings_path() -> Result<PathBuf> {
    Ok(get_home_dir()?.join("settings.json"))
}

/// Load settings from ~/.fxpulse/settings.json
pub fn load_settings() -> Result<Settings> {
    let path = get_settings_path()?;

    if !path.exists() {
        return Err(Error::Config(format!(
            "Settings file not found at {}. Run 'fxpulse setup' first.",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(&path)?;
    let mut settings: Settings = serde_json::from_str(&content)?;

    // FXPULSE_BOT_TOKEN overrides the file, matching the usual .env workflow.
    if let Ok(token) = std::env::var("FXPULSE_BOT_TOKEN") {
        if !token.trim().is_empty() {
            settings.telegram.bot_token = Some(token.trim().to_string());
        }
    }

    validate_settings(&settings)?;

    tracing::debug!("Loaded settings from {}", path.display());
    Ok(settings)
}

fn validate_settings(settings: &Settings) -> Result<()> {
    if let Some(token) = settings.telegram.bot_token.as_deref() {
        if !token.is_empty() && !token.contains(':') {
            return Err(Error::Config(
                "telegram.bot_token is malformed (expected '<bot id>:<secret>')".to_string(),
            ));
        }
    }
    if settings.notify.global_per_second == 0 || settings.notify.per_chat_per_minute == 0 {
        return Err(Error::Config(
            "notify ceilings must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Resolve the bot token or fail. Serving without valid credentials is a
/// startup error, never a runtime one.
pub fn require_bot_token(settings: &Settings) -> Result<String> {
    match settings.telegram.bot_token.as_deref() {
        Some(token) if !token.is_empty() && token.contains(':') => Ok(token.to_string()),
        _ => Err(Error::Config(
            "telegram.bot_token missing or malformed. Set it in settings.json or FXPULSE_BOT_TOKEN."
                .to_string(),
        )),
    }
}

/// Write a default settings file, refusing to clobber an existing one.
pub fn save_default_settings() -> Result<PathBuf> {
    let path = get_settings_path()?;
    if path.exists() {
        return Err(Error::Config(format!(
            "Settings file already exists at {}",
            path.display()
        )));
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let settings = Settings::default();
    std::fs::write(&path, serde_json::to_string_pretty(&settings)?)?;
    Ok(path)
}

/// Telegram bot configuration.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct TelegramSettings {
    pub bot_token: Option<String>,
}

/// Web server configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Database configuration.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct DatabaseSettings {
    /// Defaults to ~/.fxpulse/fxpulse.sqlite when unset.
    pub path: Option<PathBuf>,
}

impl DatabaseSettings {
    pub fn resolve_path(&self) -> Result<PathBuf> {
        match &self.path {
            Some(p) => Ok(p.clone()),
            None => Ok(get_home_dir()?.join("fxpulse.sqlite")),
        }
    }
}

/// Outbound notification pipeline configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct NotifySettings {
    /// Telegram allows ~30 messages per second across all chats.
    #[serde(default = "default_global_per_second")]
    pub global_per_second: u32,
    /// Telegram allows ~20 messages per minute into a single chat.
    #[serde(default = "default_per_chat_per_minute")]
    pub per_chat_per_minute: u32,
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_global_per_second() -> u32 {
    30
}

fn default_per_chat_per_minute() -> u32 {
    20
}

fn default_send_timeout_secs() -> u64 {
    10
}

fn default_sweep_interval_secs() -> u64 {
    300
}

impl Default for NotifySettings {
    fn default() -> Self {
        Self {
            global_per_second: default_global_per_second(),
            per_chat_per_minute: default_per_chat_per_minute(),
            send_timeout_secs: default_send_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// Alert watcher configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct WatchSettings {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Reports older than this mark the account as quiet.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// Minimum spacing between threshold alerts to the same user.
    #[serde(default = "default_alert_cooldown_secs")]
    pub alert_cooldown_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_heartbeat_secs() -> u64 {
    90
}

fn default_alert_cooldown_secs() -> u64 {
    900
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            heartbeat_secs: default_heartbeat_secs(),
            alert_cooldown_secs: default_alert_cooldown_secs(),
        }
    }
}

/// FXPulse settings.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Settings {
    #[serde(default)]
    pub telegram: TelegramSettings,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub notify: NotifySettings,

    #[serde(default)]
    pub watch: WatchSettings,
}
