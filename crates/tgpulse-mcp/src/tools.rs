//! MCP tools over the bridge façade.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use tgpulse_core::{
    bridge::{Bridge, WaitReply},
    domain::OutgoingMessage,
    errors::Error,
    pulse::PulseTick,
    utils::{session_header, truncate_text},
};

pub const INSTRUCTIONS: &str = "Use this to talk to the user over Telegram.\n\
1. 'send_message' sends text, optionally with reply buttons.\n\
2. 'wait_for_reply' blocks until the user answers or the wait runs out; call it again in a loop \
after 'timed_out' to keep waiting.\n\
3. 'interact' sends a message tagged with project and session and can wait for the answer.\n\
4. 'status' shows the destination and the current read offset.";

/// `interact` waits this long when the caller gives no `max_wait_seconds`.
const INTERACT_DEFAULT_WAIT_SECS: u64 = 60;

#[derive(Debug)]
pub enum ToolError {
    InvalidParams(String),
    Cancelled,
}

pub fn list() -> Value {
    json!({
      "tools": [
        {
          "name": "send_message",
          "description": "Send a message to the user on Telegram. Optional choices are shown as one-tap reply buttons; the tapped choice arrives as the user's next message.",
          "inputSchema": {
            "type": "object",
            "properties": {
              "text": { "type": "string", "description": "Message text" },
              "choices": {
                "type": "array",
                "items": { "type": "string" },
                "description": "Optional reply buttons"
              }
            },
            "required": ["text"]
          }
        },
        {
          "name": "wait_for_reply",
          "description": "Wait for the next message from the user. Returns status 'received' with messages, 'timed_out' when nothing arrived in time (call again to keep waiting), or 'error' when Telegram is unreachable.",
          "inputSchema": {
            "type": "object",
            "properties": {
              "max_wait_seconds": {
                "type": "integer",
                "minimum": 1,
                "description": "Upper bound for this wait; clamped to the server maximum"
              }
            }
          }
        },
        {
          "name": "interact",
          "description": "Send a message prefixed with [project | session] and optionally wait for the reply.",
          "inputSchema": {
            "type": "object",
            "properties": {
              "project_name": { "type": "string" },
              "session_name": { "type": "string" },
              "message": { "type": "string" },
              "choices": { "type": "array", "items": { "type": "string" } },
              "wait_for_reply": { "type": "boolean", "default": false },
              "max_wait_seconds": {
                "type": "integer",
                "minimum": 1,
                "description": "Defaults to 60 when waiting; clamped to the server maximum"
              }
            },
            "required": ["project_name", "session_name"]
          }
        },
        {
          "name": "status",
          "description": "Show the configured chat, state file and last consumed update id.",
          "inputSchema": { "type": "object", "properties": {} }
        }
      ]
    })
}

#[derive(Debug, Deserialize)]
struct SendArgs {
    text: String,
    #[serde(default)]
    choices: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WaitArgs {
    max_wait_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct InteractArgs {
    project_name: String,
    session_name: String,
    message: Option<String>,
    #[serde(default)]
    choices: Vec<String>,
    #[serde(default)]
    wait_for_reply: bool,
    max_wait_seconds: Option<u64>,
}

/// Dispatch one `tools/call`.
pub async fn call(
    bridge: &Bridge,
    params: Option<&Value>,
    cancel: &CancellationToken,
    on_tick: &(dyn Fn(PulseTick) + Send + Sync),
) -> Result<Value, ToolError> {
    let Some(params) = params else {
        return Err(ToolError::InvalidParams("Missing params".to_string()));
    };
    let name = params.get("name").and_then(|v| v.as_str()).unwrap_or("");
    let args = params
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| json!({}));

    tracing::debug!(tool = name, "tools/call");

    match name {
        "send_message" => {
            let a: SendArgs = parse_args(args)?;
            let msg = OutgoingMessage::text(a.text).with_choices(a.choices);
            Ok(send_result(bridge, &msg).await.0)
        }
        "wait_for_reply" => {
            let a: WaitArgs = parse_args(args)?;
            let reply = wait(bridge, a.max_wait_seconds, cancel, on_tick).await?;
            let is_error = matches!(reply, WaitReply::Error { .. });
            Ok(content(json!(reply), is_error))
        }
        "interact" => {
            let a: InteractArgs = parse_args(args)?;
            let text = session_header(&a.project_name, &a.session_name, a.message.as_deref());
            let msg = OutgoingMessage::text(text).with_choices(a.choices);

            let (sent, ok) = send_result(bridge, &msg).await;
            if !ok || !a.wait_for_reply {
                return Ok(sent);
            }
            let max_wait = a.max_wait_seconds.unwrap_or(INTERACT_DEFAULT_WAIT_SECS);
            let reply = wait(bridge, Some(max_wait), cancel, on_tick).await?;
            let is_error = matches!(reply, WaitReply::Error { .. });
            Ok(content(json!(reply), is_error))
        }
        "status" => {
            let cfg = bridge.config();
            Ok(content(
                json!({
                    "chat_id": cfg.telegram_chat_id.to_string(),
                    "token_configured": !cfg.telegram_bot_token.is_empty(),
                    "state_file": cfg.state_file.display().to_string(),
                    "last_update_id": bridge.offset(),
                    "pulse_interval_secs": cfg.pulse_interval.as_secs(),
                    "max_wait_secs": cfg.max_wait.as_secs(),
                }),
                false,
            ))
        }
        other => Err(ToolError::InvalidParams(format!("Unknown tool: {other}"))),
    }
}

async fn send_result(bridge: &Bridge, msg: &OutgoingMessage) -> (Value, bool) {
    match bridge.send(msg).await {
        Ok(ack) => (
            content(
                json!({ "status": "sent", "message_ids": ack.message_ids }),
                false,
            ),
            true,
        ),
        Err(e) => {
            tracing::warn!(error = %e, text = %truncate_text(&msg.text, 80), "send failed");
            (
                content(
                    json!({ "status": "error", "detail": e.to_string() }),
                    true,
                ),
                false,
            )
        }
    }
}

async fn wait(
    bridge: &Bridge,
    max_wait_seconds: Option<u64>,
    cancel: &CancellationToken,
    on_tick: &(dyn Fn(PulseTick) + Send + Sync),
) -> Result<WaitReply, ToolError> {
    let max_wait = max_wait_seconds.map(Duration::from_secs);
    match bridge.wait(max_wait, cancel, on_tick).await {
        Ok(reply) => Ok(reply),
        Err(Error::Cancelled) => Err(ToolError::Cancelled),
        Err(e) => Ok(WaitReply::Error {
            detail: e.to_string(),
        }),
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::InvalidParams(format!("Invalid arguments: {e}")))
}

/// MCP tool result wrapping a JSON payload as text content.
fn content(payload: Value, is_error: bool) -> Value {
    json!({
      "content": [ { "type": "text", "text": payload.to_string() } ],
      "isError": is_error
    })
}

/// Heartbeat text for `notifications/progress`.
pub fn progress_message(tick: &PulseTick) -> String {
    let mut msg = format!(
        "still waiting for a reply ({}s elapsed, {}s left)",
        tick.elapsed.as_secs(),
        tick.remaining.as_secs()
    );
    if tick.errors > 0 {
        msg.push_str(&format!(", {} failed polls", tick.errors));
    }
    msg
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tgpulse_core::{
        config::Config,
        domain::{ChatId, FetchBatch, InboundMessage, MessageId},
        errors::TransportError,
        ports::{MessageSink, UpdateSource},
    };

    pub(crate) struct ScriptedSource {
        pub(crate) script: Mutex<VecDeque<Result<FetchBatch, TransportError>>>,
    }

    #[async_trait]
    impl UpdateSource for ScriptedSource {
        async fn fetch(&self, _since: i64, _timeout: Duration) -> Result<FetchBatch, TransportError> {
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(FetchBatch::empty()))
        }
    }

    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub(crate) sent: Mutex<Vec<OutgoingMessage>>,
    }

    #[async_trait]
    impl MessageSink for RecordingSink {
        async fn send(&self, msg: &OutgoingMessage) -> tgpulse_core::Result<Vec<MessageId>> {
            if msg.text.contains("explode") {
                return Err(Error::Send("telegram error: Bad Request: chat not found".into()));
            }
            self.sent.lock().unwrap().push(msg.clone());
            Ok(vec![MessageId(100)])
        }
    }

    pub(crate) fn inbound(id: i64, text: &str) -> InboundMessage {
        InboundMessage {
            update_id: id,
            chat_id: "42".to_string(),
            text: text.to_string(),
            from: Some("ada".to_string()),
            received_at: chrono::Utc::now(),
        }
    }

    pub(crate) fn bridge_with(
        name: &str,
        script: Vec<Result<FetchBatch, TransportError>>,
    ) -> (Arc<Bridge>, Arc<RecordingSink>, std::path::PathBuf) {
        let dir = std::path::PathBuf::from(format!(
            "/tmp/tgpulse-mcp-{name}-{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        let cfg = Config {
            telegram_bot_token: "secret".to_string(),
            telegram_chat_id: ChatId(42),
            state_file: dir.join("tg_state.json"),
            pulse_interval: Duration::from_millis(50),
            pulse_pause: Duration::from_millis(5),
            error_budget: 10,
            default_wait: Duration::from_secs(1),
            max_wait: Duration::from_secs(2),
            fetch_grace: Duration::from_millis(200),
            message_limit: 4096,
        };
        let source = Arc::new(ScriptedSource {
            script: Mutex::new(script.into()),
        });
        let sink = Arc::new(RecordingSink::default());
        let bridge = Arc::new(Bridge::new(Arc::new(cfg), source, sink.clone()));
        (bridge, sink, dir)
    }

    fn payload(result: &Value) -> Value {
        let text = result["content"][0]["text"].as_str().unwrap();
        serde_json::from_str(text).unwrap()
    }

    fn no_ticks(_: PulseTick) {}

    #[test]
    fn lists_all_tools() {
        let tools = list();
        let names: Vec<&str> = tools["tools"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|t| t["name"].as_str())
            .collect();
        assert_eq!(names, vec!["send_message", "wait_for_reply", "interact", "status"]);
    }

    #[tokio::test]
    async fn wait_for_reply_returns_received_messages() {
        let (bridge, _sink, dir) = bridge_with(
            "wait",
            vec![Ok(FetchBatch::new(vec![inbound(3, "ship it")], None))],
        );
        let params = json!({ "name": "wait_for_reply", "arguments": { "max_wait_seconds": 1 } });

        let result = call(&bridge, Some(&params), &CancellationToken::new(), &no_ticks)
            .await
            .unwrap();
        assert_eq!(result["isError"], false);
        let p = payload(&result);
        assert_eq!(p["status"], "received");
        assert_eq!(p["messages"][0]["text"], "ship it");
        assert_eq!(bridge.offset(), 3);

        let again = call(&bridge, Some(&params), &CancellationToken::new(), &no_ticks)
            .await
            .unwrap();
        assert_eq!(payload(&again), json!({ "status": "timed_out" }));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn interact_prefixes_header_and_waits() {
        let (bridge, sink, dir) = bridge_with(
            "interact",
            vec![Ok(FetchBatch::new(vec![inbound(9, "yes")], None))],
        );
        let params = json!({
            "name": "interact",
            "arguments": {
                "project_name": "athena",
                "session_name": "deploy",
                "message": "Proceed?",
                "choices": ["yes", "no"],
                "wait_for_reply": true
            }
        });

        let result = call(&bridge, Some(&params), &CancellationToken::new(), &no_ticks)
            .await
            .unwrap();
        assert_eq!(payload(&result)["status"], "received");

        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent[0].text, "[athena | deploy]\nProceed?");
        assert_eq!(sent[0].choices, vec!["yes".to_string(), "no".to_string()]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn interact_waits_longer_than_the_plain_default() {
        // default_wait is 1s and max_wait 2s; interact asks for 60s, clamped to 2s.
        let (bridge, _sink, dir) = bridge_with("interact-default", vec![]);
        let params = json!({
            "name": "interact",
            "arguments": {
                "project_name": "athena",
                "session_name": "deploy",
                "message": "Anyone there?",
                "wait_for_reply": true
            }
        });

        let started = std::time::Instant::now();
        let result = call(&bridge, Some(&params), &CancellationToken::new(), &no_ticks)
            .await
            .unwrap();
        assert_eq!(payload(&result), json!({ "status": "timed_out" }));
        assert!(started.elapsed() >= Duration::from_millis(1_900));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn send_failure_is_reported_as_tool_error() {
        let (bridge, _sink, dir) = bridge_with("sendfail", vec![]);
        let params = json!({ "name": "send_message", "arguments": { "text": "explode" } });

        let result = call(&bridge, Some(&params), &CancellationToken::new(), &no_ticks)
            .await
            .unwrap();
        assert_eq!(result["isError"], true);
        let p = payload(&result);
        assert_eq!(p["status"], "error");
        assert!(p["detail"].as_str().unwrap().contains("chat not found"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn bad_arguments_are_invalid_params() {
        let (bridge, _sink, dir) = bridge_with("badargs", vec![]);

        let missing_text = json!({ "name": "send_message", "arguments": {} });
        let err = call(&bridge, Some(&missing_text), &CancellationToken::new(), &no_ticks)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(_)));

        let unknown = json!({ "name": "get_weather" });
        let err = call(&bridge, Some(&unknown), &CancellationToken::new(), &no_ticks)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(ref m) if m.contains("get_weather")));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn status_never_leaks_the_token() {
        let (bridge, _sink, dir) = bridge_with("status", vec![]);
        let params = json!({ "name": "status" });

        let result = call(&bridge, Some(&params), &CancellationToken::new(), &no_ticks)
            .await
            .unwrap();
        let text = result["content"][0]["text"].as_str().unwrap();
        assert!(!text.contains("secret"));
        let p = payload(&result);
        assert_eq!(p["chat_id"], "42");
        assert_eq!(p["token_configured"], true);
        assert_eq!(p["last_update_id"], 0);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn progress_message_mentions_failures() {
        let tick = PulseTick {
            pulse: 4,
            elapsed: Duration::from_secs(30),
            remaining: Duration::from_secs(70),
            errors: 2,
        };
        assert_eq!(
            progress_message(&tick),
            "still waiting for a reply (30s elapsed, 70s left), 2 failed polls"
        );
    }
}
