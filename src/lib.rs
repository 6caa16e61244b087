//! FXPulse library root.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod notify;
pub mod store;
pub mod telegram;
pub mod watch;
pub mod web;

pub use cli::Commands;
pub use config::{load_settings, Settings};
pub use error::{Error, Result};
pub use notify::{Notifier, NotifyConfig, OutboundMessage, RenderMode, Transport};
pub use store::Store;
pub use telegram::{run_bot, BotContext, TelegramTransport};
pub use web::{run_server, AppState, WebServerConfig};
