//! Telegram adapter (teloxide).
//!
//! Implements the `tgpulse-core` fetch and send ports over the Bot API.

use std::time::Duration;

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{AllowedUpdate, KeyboardButton, KeyboardMarkup, UpdateKind},
    RequestError,
};

use tgpulse_core::{
    domain::{ChatId, FetchBatch, InboundMessage, MessageId, OutgoingMessage},
    errors::{Error, TransportError, TransportErrorKind},
    ports::{MessageSink, UpdateSource},
    utils::chunk_text,
    Result,
};

#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
    chat_id: ChatId,
    message_limit: usize,
}

impl TelegramTransport {
    /// Build a transport whose HTTP timeout covers the longest pulse plus `grace`.
    pub fn new(
        token: &str,
        chat_id: ChatId,
        longest_pulse: Duration,
        grace: Duration,
        message_limit: usize,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(longest_pulse + grace)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| Error::Config(format!("http client: {e}")))?;

        Ok(Self {
            bot: Bot::with_client(token, http),
            chat_id,
            message_limit,
        })
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    fn tg_chat(&self) -> teloxide::types::ChatId {
        teloxide::types::ChatId(self.chat_id.0)
    }

    /// `@username` of the bot, for startup logs.
    pub async fn identify(&self) -> std::result::Result<String, TransportError> {
        let me = self.bot.get_me().await.map_err(classify)?;
        Ok(me.username().to_string())
    }
}

#[async_trait]
impl UpdateSource for TelegramTransport {
    async fn fetch(
        &self,
        since: i64,
        timeout: Duration,
    ) -> std::result::Result<FetchBatch, TransportError> {
        let offset = i32::try_from(since + 1).map_err(|_| {
            TransportError::malformed(format!("offset {since} does not fit the Bot API"))
        })?;
        let secs = u32::try_from(timeout.as_secs()).unwrap_or(u32::MAX);

        let updates = self
            .bot
            .get_updates()
            .offset(offset)
            .timeout(secs)
            .allowed_updates(vec![AllowedUpdate::Message])
            .await
            .map_err(classify)?;

        let batch = to_batch(updates, self.chat_id);
        tracing::debug!(
            since,
            kept = batch.messages.len(),
            high_water = ?batch.high_water,
            "getUpdates"
        );
        Ok(batch)
    }
}

#[async_trait]
impl MessageSink for TelegramTransport {
    async fn send(&self, msg: &OutgoingMessage) -> Result<Vec<MessageId>> {
        let chunks = chunk_text(&msg.text, self.message_limit);
        let last = chunks.len().saturating_sub(1);
        let mut ids = Vec::with_capacity(chunks.len());

        for (idx, chunk) in chunks.into_iter().enumerate() {
            let mut req = self.bot.send_message(self.tg_chat(), chunk);
            if idx == last && !msg.choices.is_empty() {
                req = req.reply_markup(reply_keyboard(&msg.choices));
            }
            let sent = req
                .await
                .map_err(|e| Error::Send(format!("telegram error: {e}")))?;
            ids.push(MessageId(sent.id.0));
        }

        tracing::info!(chunks = ids.len(), "message sent");
        Ok(ids)
    }
}

/// One button per row, hidden after the first tap.
fn reply_keyboard(choices: &[String]) -> KeyboardMarkup {
    let rows: Vec<Vec<KeyboardButton>> = choices
        .iter()
        .map(|c| vec![KeyboardButton::new(c.clone())])
        .collect();
    KeyboardMarkup::new(rows)
        .one_time_keyboard(true)
        .resize_keyboard(true)
}

/// Keep destination messages; remember the highest update id seen overall.
fn to_batch(updates: Vec<Update>, chat_id: ChatId) -> FetchBatch {
    let mut high_water: Option<i64> = None;
    let mut messages = Vec::new();

    for update in updates {
        let update_id = i64::from(update.id);
        high_water = Some(high_water.map_or(update_id, |h| h.max(update_id)));

        let UpdateKind::Message(m) = update.kind else {
            continue;
        };
        if m.chat.id.0 != chat_id.0 {
            tracing::debug!(update_id, chat = m.chat.id.0, "skipping foreign chat");
            continue;
        }

        messages.push(InboundMessage {
            update_id,
            chat_id: m.chat.id.0.to_string(),
            text: m.text().or_else(|| m.caption()).unwrap_or("").to_string(),
            from: m.from().and_then(|u| u.username.clone()),
            received_at: m.date,
        });
    }

    FetchBatch::new(messages, high_water)
}

fn classify(e: RequestError) -> TransportError {
    let kind = match &e {
        RequestError::Network(inner) if inner.is_timeout() => TransportErrorKind::Timeout,
        RequestError::Network(inner) => inner
            .status()
            .map(|s| TransportErrorKind::Http(s.as_u16()))
            .unwrap_or(TransportErrorKind::Network),
        RequestError::InvalidJson { .. } => TransportErrorKind::Malformed,
        RequestError::Api(_) | RequestError::RetryAfter(_) | RequestError::MigrateToChatId(_) => {
            TransportErrorKind::Api
        }
        _ => TransportErrorKind::Network,
    };
    TransportError::new(kind, e.to_string())
}
