//! Telegram bot integration.

pub mod client;
pub mod format;
pub mod transport;

pub use client::{run_bot, BotContext};
pub use transport::TelegramTransport;
