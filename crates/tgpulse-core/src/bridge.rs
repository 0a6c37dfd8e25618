//! Dispatch façade: the two operations an agent can call.

use std::{sync::Arc, time::Duration};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    domain::{InboundMessage, MessageId, OutgoingMessage},
    errors::Error,
    ports::{MessageSink, UpdateSource},
    pulse::{PulseTick, PulseWaiter, WaitOutcome},
    state::OffsetStore,
    Result,
};

/// Caller-visible result of a wait.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WaitReply {
    Received { messages: Vec<InboundMessage> },
    TimedOut,
    Error { detail: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SendAck {
    pub message_ids: Vec<MessageId>,
}

pub struct Bridge {
    cfg: Arc<Config>,
    waiter: PulseWaiter,
    sink: Arc<dyn MessageSink>,
}

impl Bridge {
    pub fn new(
        cfg: Arc<Config>,
        source: Arc<dyn UpdateSource>,
        sink: Arc<dyn MessageSink>,
    ) -> Self {
        let store = OffsetStore::new(cfg.state_file.clone());
        let waiter = PulseWaiter::new(source, store, cfg.fetch_grace);
        Self { cfg, waiter, sink }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Currently committed offset (diagnostics only).
    pub fn offset(&self) -> i64 {
        self.waiter.store().read()
    }

    /// Send to the destination. Failures are surfaced as `Error::Send`, never retried.
    pub async fn send(&self, msg: &OutgoingMessage) -> Result<SendAck> {
        if msg.text.trim().is_empty() {
            return Err(Error::Send("message text is empty".to_string()));
        }
        let message_ids = self.sink.send(msg).await.map_err(|e| match e {
            Error::Send(_) => e,
            other => Error::Send(other.to_string()),
        })?;
        Ok(SendAck { message_ids })
    }

    /// Wait for the next human reply.
    ///
    /// Only cancellation is returned as `Err`; every other outcome is a `WaitReply`.
    pub async fn wait(
        &self,
        max_wait: Option<Duration>,
        cancel: &CancellationToken,
        on_tick: &(dyn Fn(PulseTick) + Send + Sync),
    ) -> Result<WaitReply> {
        let req = self.cfg.wait_request(max_wait);
        match self.waiter.wait(&req, cancel, on_tick).await {
            Ok(WaitOutcome::Found(messages)) => Ok(WaitReply::Received { messages }),
            Ok(WaitOutcome::Exhausted) => Ok(WaitReply::TimedOut),
            Ok(WaitOutcome::Failed(e)) => Ok(WaitReply::Error {
                detail: e.to_string(),
            }),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                tracing::error!(error = %e, "wait aborted");
                Ok(WaitReply::Error {
                    detail: e.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::tests::sample,
        domain::FetchBatch,
        errors::TransportError,
        pulse::tests::{msg, Backlog, FakeSource},
        state::tests::scratch_dir,
    };
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeSink {
        sends: Mutex<Vec<OutgoingMessage>>,
        fail_with: Option<String>,
    }

    #[async_trait]
    impl MessageSink for FakeSink {
        async fn send(&self, msg: &OutgoingMessage) -> Result<Vec<MessageId>> {
            if let Some(reason) = &self.fail_with {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    reason.clone(),
                )));
            }
            let mut sends = self.sends.lock().unwrap();
            sends.push(msg.clone());
            Ok(vec![MessageId(sends.len() as i32)])
        }
    }

    fn cfg(name: &str) -> (Arc<Config>, std::path::PathBuf) {
        let dir = scratch_dir(name);
        let mut cfg = sample();
        cfg.state_file = dir.join("tg_state.json");
        cfg.pulse_interval = Duration::from_millis(50);
        cfg.pulse_pause = Duration::from_millis(5);
        cfg.fetch_grace = Duration::from_millis(200);
        (Arc::new(cfg), dir)
    }

    fn no_ticks(_: PulseTick) {}

    #[tokio::test]
    async fn wait_maps_outcomes_to_statuses() {
        let (cfg, dir) = cfg("bridge-statuses");
        let source = Arc::new(FakeSource::new(vec![Ok(FetchBatch::new(
            vec![msg(1, "hi")],
            None,
        ))]));
        let mut tight = (*cfg).clone();
        tight.error_budget = 1;
        let bridge = Bridge::new(Arc::new(tight), source.clone(), Arc::new(FakeSink::default()));
        let cancel = CancellationToken::new();

        let first = bridge
            .wait(Some(Duration::from_secs(1)), &cancel, &no_ticks)
            .await
            .unwrap();
        assert!(matches!(first, WaitReply::Received { ref messages } if messages.len() == 1));

        let second = bridge
            .wait(Some(Duration::from_secs(1)), &cancel, &no_ticks)
            .await
            .unwrap();
        assert_eq!(second, WaitReply::TimedOut);

        // Failing for more than one 50ms pulse slot spends a budget of 1.
        source
            .script
            .lock()
            .unwrap()
            .extend((0..1_000).map(|_| Err(TransportError::network("down"))));
        let third = bridge
            .wait(Some(Duration::from_secs(1)), &cancel, &no_ticks)
            .await
            .unwrap();
        assert_eq!(
            third,
            WaitReply::Error {
                detail: "network: down".to_string()
            }
        );
        assert_eq!(bridge.offset(), 1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn wait_reply_serializes_with_status_tag() {
        let timed_out = serde_json::to_value(WaitReply::TimedOut).unwrap();
        assert_eq!(timed_out, serde_json::json!({ "status": "timed_out" }));

        let err = serde_json::to_value(WaitReply::Error {
            detail: "x".to_string(),
        })
        .unwrap();
        assert_eq!(err, serde_json::json!({ "status": "error", "detail": "x" }));

        let received = serde_json::to_value(WaitReply::Received {
            messages: vec![msg(5, "yo")],
        })
        .unwrap();
        assert_eq!(received["status"], "received");
        assert_eq!(received["messages"][0]["update_id"], 5);
        assert_eq!(received["messages"][0]["text"], "yo");
    }

    #[tokio::test]
    async fn send_rejects_empty_and_wraps_failures() {
        let (cfg, dir) = cfg("bridge-send");
        let failing = Arc::new(FakeSink {
            fail_with: Some("chat not found".to_string()),
            ..Default::default()
        });
        let bridge = Bridge::new(cfg, Arc::new(FakeSource::default()), failing);

        let empty = bridge.send(&OutgoingMessage::text("   ")).await.unwrap_err();
        assert!(matches!(empty, Error::Send(_)));

        let err = bridge
            .send(&OutgoingMessage::text("hello"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "send failed: i/o error: chat not found");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn send_during_wait_leaves_offset_alone() {
        let (cfg, dir) = cfg("bridge-concurrent");
        let backlog = Arc::new(Backlog {
            updates: Mutex::new(vec![]),
        });
        let sink = Arc::new(FakeSink::default());
        let bridge = Arc::new(Bridge::new(cfg, backlog.clone(), sink.clone()));

        let waiting = {
            let bridge = bridge.clone();
            tokio::spawn(async move {
                bridge
                    .wait(
                        Some(Duration::from_secs(2)),
                        &CancellationToken::new(),
                        &no_ticks,
                    )
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        let ack = bridge
            .send(&OutgoingMessage::text("question?").with_choices(vec!["yes".into()]))
            .await
            .unwrap();
        assert_eq!(ack.message_ids, vec![MessageId(1)]);
        assert_eq!(bridge.offset(), 0);

        backlog.updates.lock().unwrap().push(msg(8, "answer"));
        let reply = waiting.await.unwrap().unwrap();
        let WaitReply::Received { messages } = reply else {
            panic!("expected reply, got {reply:?}");
        };
        assert_eq!(messages[0].text, "answer");
        assert_eq!(bridge.offset(), 8);
        assert_eq!(sink.sends.lock().unwrap()[0].choices, vec!["yes".to_string()]);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
