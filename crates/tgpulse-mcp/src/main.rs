//! tgpulse MCP server.
//!
//! JSON-RPC over stdio (newline-delimited). Exposes `send_message`,
//! `wait_for_reply`, `interact` and `status` for one Telegram chat.

use std::sync::Arc;

use anyhow::Context;

use tgpulse_core::{bridge::Bridge, config::Config, logging};
use tgpulse_telegram::TelegramTransport;

mod rpc;
mod server;
mod tools;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init("tgpulse-mcp")?;

    let cfg = Arc::new(Config::load().context("load config")?);
    let transport = Arc::new(TelegramTransport::new(
        &cfg.telegram_bot_token,
        cfg.telegram_chat_id,
        cfg.pulse_interval,
        cfg.fetch_grace,
        cfg.message_limit,
    )?);

    match transport.identify().await {
        Ok(username) => tracing::info!(bot = %username, chat = %cfg.telegram_chat_id, "tgpulse MCP server running on stdio"),
        Err(e) => tracing::warn!(error = %e, "could not reach Telegram at startup; continuing"),
    }

    let bridge = Arc::new(Bridge::new(cfg, transport.clone(), transport));
    server::serve(bridge, tokio::io::stdin(), tokio::io::stdout()).await
}
