//! Outbound notification pipeline.
//!
//! Every Telegram message FXPulse produces, whether a command reply, a
//! threshold alert or an admin broadcast, is enqueued on a [`Notifier`] and
//! sent by a single background worker. Enqueueing never blocks and never
//! fails; the worker owns all pacing against Telegram's send ceilings, so
//! producers stay oblivious to rate limits.

mod limiter;
mod worker;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;

/// How a message body should be interpreted by Telegram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    #[default]
    Plain,
    Html,
}

/// One message waiting to be delivered.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub chat_id: String,
    pub text: String,
    pub mode: RenderMode,
}

/// Something that can push a message out to a chat. The production
/// implementation wraps the Telegram bot client.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, message: &OutboundMessage) -> Result<()>;
}

/// Ceilings and timing knobs for the delivery worker.
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    /// Sends allowed across all chats per rolling second.
    pub global_per_second: u32,
    /// Sends allowed into one chat per rolling minute.
    pub per_chat_per_minute: u32,
    /// A transport call slower than this is abandoned.
    pub send_timeout: Duration,
    /// How often idle per-chat windows are dropped.
    pub sweep_interval: Duration,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            global_per_second: 30,
            per_chat_per_minute: 20,
            send_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(300),
        }
    }
}

impl From<&crate::config::NotifySettings> for NotifyConfig {
    fn from(settings: &crate::config::NotifySettings) -> Self {
        Self {
            global_per_second: settings.global_per_second,
            per_chat_per_minute: settings.per_chat_per_minute,
            send_timeout: Duration::from_secs(settings.send_timeout_secs),
            sweep_interval: Duration::from_secs(settings.sweep_interval_secs),
        }
    }
}

/// Cheap cloneable handle for enqueueing outbound messages.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl Notifier {
    /// Queue a plain-text message. Returns immediately.
    pub fn queue(&self, chat_id: impl Into<String>, text: impl Into<String>) {
        self.queue_message(OutboundMessage {
            chat_id: chat_id.into(),
            text: text.into(),
            mode: RenderMode::Plain,
        });
    }

    /// Queue an HTML-formatted message. Returns immediately.
    pub fn queue_html(&self, chat_id: impl Into<String>, text: impl Into<String>) {
        self.queue_message(OutboundMessage {
            chat_id: chat_id.into(),
            text: text.into(),
            mode: RenderMode::Html,
        });
    }

    pub fn queue_message(&self, message: OutboundMessage) {
        // Only fails when the worker is gone, i.e. during shutdown.
        if let Err(e) = self.tx.send(message) {
            tracing::warn!(
                "Delivery worker is gone, dropping message for chat {}",
                e.0.chat_id
            );
        }
    }
}

/// Build an unwired queue. Used by tests and by [`spawn`].
pub fn channel() -> (Notifier, mpsc::UnboundedReceiver<OutboundMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Notifier { tx }, rx)
}

/// Start the delivery worker on the current runtime and hand back the
/// producer side.
pub fn spawn(transport: Arc<dyn Transport>, config: NotifyConfig) -> Notifier {
    let (notifier, rx) = channel();
    tokio::spawn(worker::run(rx, transport, config));
    notifier
}
