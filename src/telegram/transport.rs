//! Telegram send path used by the delivery worker.

use async_trait::async_trait;
use teloxide::payloads::SendMessageSetters;
use teloxide::prelude::*;
use teloxide::types::ParseMode;

use crate::error::Error;
use crate::notify::{OutboundMessage, RenderMode, Transport};

pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn deliver(&self, message: &OutboundMessage) -> crate::error::Result<()> {
        let chat_id: i64 = message
            .chat_id
            .parse()
            .map_err(|_| Error::Telegram(format!("bad chat id: {}", message.chat_id)))?;

        let request = self.bot.send_message(ChatId(chat_id), &message.text);
        let request = match message.mode {
            RenderMode::Plain => request,
            RenderMode::Html => request.parse_mode(ParseMode::Html),
        };
        request
            .await
            .map_err(|e| Error::Telegram(format!("send to chat {}: {}", chat_id, e)))?;
        Ok(())
    }
}
