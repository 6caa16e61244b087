//! CLI commands for FXPulse using clap.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::config::{load_settings, require_bot_token, save_default_settings};
use crate::notify::{self, NotifyConfig};
use crate::store::Store;
use crate::telegram::{run_bot, BotContext, TelegramTransport};
use crate::watch::{run_watcher, WatchConfig};
use crate::web::{run_server, AppState, WebServerConfig};

/// FXPulse - trading account monitor with rate-limited Telegram alerts.
#[derive(Parser)]
#[command(name = "fxpulse")]
#[command(version = "0.1.0")]
#[command(about = "FXPulse - watch trading terminals, alert over Telegram", long_about = None)]
pub struct Commands {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Write a default settings file
    Setup,

    /// Run everything: web server, Telegram bot and the alert watcher
    Serve,

    /// Show a quick store summary
    Status,
}

impl Commands {
    /// Run the command.
    pub async fn run(&self) -> Result<()> {
        match &self.command {
            Command::Setup => cmd_setup().await,
            Command::Serve => cmd_serve().await,
            Command::Status => cmd_status().await,
        }
    }
}

// Command implementations

async fn cmd_setup() -> Result<()> {
    let path = save_default_settings()?;
    println!("✓ Wrote default settings to {}", path.display());
    println!("\nNext steps:");
    println!("  1. Put your bot token into the file (or export FXPULSE_BOT_TOKEN)");
    println!("  2. Run 'fxpulse serve'");
    println!("  3. Send /start to the bot to get an API key");
    Ok(())
}

async fn cmd_serve() -> Result<()> {
    let settings = load_settings()?;
    // Fail before anything spawns when the token is missing or malformed.
    let token = require_bot_token(&settings)?;

    let store = Store::open(settings.database.resolve_path()?)?;
    let bot = teloxide::Bot::new(token);
    let transport = Arc::new(TelegramTransport::new(bot.clone()));
    let notifier = notify::spawn(transport, NotifyConfig::from(&settings.notify));

    let display_host = if settings.server.host == "0.0.0.0" {
        "127.0.0.1"
    } else {
        settings.server.host.as_str()
    };
    let ctx = BotContext {
        store: store.clone(),
        notifier: notifier.clone(),
        ingest_url: format!("http://{}:{}", display_host, settings.server.port),
        stale_after_secs: settings.watch.heartbeat_secs as i64,
    };

    let state = AppState {
        store: store.clone(),
        notifier: notifier.clone(),
    };
    let web_config = WebServerConfig {
        host: settings.server.host.clone(),
        port: settings.server.port,
    };
    let watch_config = WatchConfig::from(&settings.watch);

    tokio::select! {
        result = run_server(web_config, state) => {
            if let Err(e) = result {
                tracing::error!("Web server error: {}", e);
            }
        }
        result = run_bot(bot, ctx) => {
            if let Err(e) = result {
                tracing::error!("Telegram bot error: {}", e);
            }
        }
        _ = run_watcher(store, notifier, watch_config) => {}
    }

    Ok(())
}

async fn cmd_status() -> Result<()> {
    let settings = load_settings()?;
    let store = Store::open(settings.database.resolve_path()?)?;
    let summary = store.summary()?;

    println!("Users:     {}", summary.users);
    println!("Accounts:  {}", summary.accounts);
    println!("Positions: {}", summary.positions);
    Ok(())
}
