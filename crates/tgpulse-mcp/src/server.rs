//! Stdio JSON-RPC loop.
//!
//! Requests are read line by line. `tools/call` runs on its own task so a long
//! `wait_for_reply` never blocks `ping` or a cancellation; every outgoing line
//! goes through one writer task.

use std::{collections::HashMap, sync::Arc};

use serde::Serialize;
use serde_json::json;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    sync::{mpsc, Mutex},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;

use tgpulse_core::{bridge::Bridge, pulse::PulseTick};

use crate::{
    rpc::{notification, respond_err, respond_ok, RpcRequest, RpcResponse, INVALID_PARAMS, METHOD_NOT_FOUND},
    tools::{self, ToolError},
};

type Inflight = Arc<Mutex<HashMap<String, CancellationToken>>>;

pub async fn serve<R, W>(bridge: Arc<Bridge>, reader: R, mut writer: W) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let writer_task = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    });

    let inflight: Inflight = Arc::default();
    let mut calls = JoinSet::new();
    let mut lines = BufReader::new(reader).lines();

    let mut read_error = None;

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                tracing::warn!(error = %e, "ignoring line that is not valid UTF-8");
                continue;
            }
            Err(e) => {
                read_error = Some(e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unparsable line");
                continue;
            }
        };

        let method = req.method.clone();
        match method.as_str() {
            "notifications/cancelled" => cancel(&inflight, req.params.as_ref()).await,
            "tools/call" => {
                let Some(id) = req.id else {
                    continue;
                };
                let token = CancellationToken::new();
                let key = id.to_string();
                inflight.lock().await.insert(key.clone(), token.clone());

                let bridge = bridge.clone();
                let tx = tx.clone();
                let inflight = inflight.clone();
                let params = req.params;
                calls.spawn(async move {
                    let on_tick = progress_reporter(&tx, params.as_ref());
                    let out = tools::call(&bridge, params.as_ref(), &token, &*on_tick).await;
                    inflight.lock().await.remove(&key);

                    match out {
                        Ok(result) => emit(&tx, &respond_ok(id, result)),
                        Err(ToolError::InvalidParams(msg)) => {
                            emit(&tx, &respond_err(id, INVALID_PARAMS, &msg))
                        }
                        Err(ToolError::Cancelled) => {
                            tracing::info!(request = %key, "tool call cancelled");
                        }
                    }
                });
            }
            _ => {
                if let Some(resp) = handle_rpc(req) {
                    emit(&tx, &resp);
                }
            }
        }

        // Reap finished calls so the set does not grow with the session.
        while calls.try_join_next().is_some() {}
    }

    match &read_error {
        Some(e) => tracing::error!(error = %e, "stdin failed, shutting down"),
        None => tracing::info!("stdin closed, shutting down"),
    }
    for token in inflight.lock().await.values() {
        token.cancel();
    }
    while calls.join_next().await.is_some() {}

    drop(tx);
    writer_task.await??;
    match read_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

/// Methods answered inline. Notifications (no id) get no response.
pub fn handle_rpc(req: RpcRequest) -> Option<RpcResponse<'static>> {
    let id = req.id?;

    match req.method.as_str() {
        "initialize" => {
            let proto = req
                .params
                .as_ref()
                .and_then(|p| p.get("protocolVersion"))
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");

            Some(respond_ok(
                id,
                json!({
                  "protocolVersion": proto,
                  "serverInfo": { "name": "tgpulse", "version": env!("CARGO_PKG_VERSION") },
                  "capabilities": { "tools": {} },
                  "instructions": tools::INSTRUCTIONS
                }),
            ))
        }

        "ping" => Some(respond_ok(id, json!({}))),

        "tools/list" => Some(respond_ok(id, tools::list())),

        _ => Some(respond_err(id, METHOD_NOT_FOUND, "Method not found")),
    }
}

async fn cancel(inflight: &Inflight, params: Option<&serde_json::Value>) {
    let Some(request_id) = params.and_then(|p| p.get("requestId")) else {
        return;
    };
    if let Some(token) = inflight.lock().await.get(&request_id.to_string()) {
        tracing::debug!(request = %request_id, "cancelling tool call");
        token.cancel();
    }
}

/// Heartbeat sink for a call; silent unless the client sent a progress token.
fn progress_reporter(
    tx: &mpsc::UnboundedSender<String>,
    params: Option<&serde_json::Value>,
) -> Box<dyn Fn(PulseTick) + Send + Sync> {
    let token = params
        .and_then(|p| p.get("_meta"))
        .and_then(|m| m.get("progressToken"))
        .cloned();

    match token {
        Some(token) => {
            let tx = tx.clone();
            Box::new(move |tick: PulseTick| {
                let n = notification(
                    "notifications/progress",
                    json!({
                        "progressToken": token.clone(),
                        "progress": tick.pulse,
                        "message": tools::progress_message(&tick),
                    }),
                );
                emit(&tx, &n);
            })
        }
        None => Box::new(|_| {}),
    }
}

fn emit<T: Serialize>(tx: &mpsc::UnboundedSender<String>, msg: &T) {
    match serde_json::to_string(msg) {
        Ok(line) => {
            // Writer gone means the client is gone.
            let _ = tx.send(line);
        }
        Err(e) => tracing::error!(error = %e, "failed to encode outgoing message"),
    }
}
