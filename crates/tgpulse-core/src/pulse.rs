//! Pulsing wait coordinator.
//!
//! A wait is a loop of short long-polls ("pulses") bounded by the caller's
//! deadline. Each pulse boundary is reported to an observer so the host can
//! see liveness, and the offset is committed before messages are handed back.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::Mutex,
    time::{sleep, sleep_until, timeout, Instant},
};
use tokio_util::sync::CancellationToken;

use crate::{
    domain::InboundMessage,
    errors::{Error, TransportError},
    ports::UpdateSource,
    state::OffsetStore,
    Result,
};

/// Per-invocation wait parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaitRequest {
    /// Total budget for the wait, queueing included.
    pub deadline: Duration,
    /// Long-poll timeout of a single pulse.
    pub pulse_interval: Duration,
    /// Sleep between empty pulses.
    pub pulse_pause: Duration,
    /// Pulse slots a failure streak may span before the wait escalates.
    pub error_budget: u32,
}

impl WaitRequest {
    /// Pulse interval clamped strictly below the deadline.
    pub fn effective_pulse_interval(&self) -> Duration {
        if self.pulse_interval < self.deadline {
            self.pulse_interval
        } else {
            self.deadline / 2
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PulseState {
    Idle,
    Polling,
    Found,
    Exhausted,
    Error,
}

/// Heartbeat emitted at every pulse boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PulseTick {
    pub pulse: u32,
    pub elapsed: Duration,
    pub remaining: Duration,
    pub errors: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// New destination messages, ascending by `update_id`; offset already committed.
    Found(Vec<InboundMessage>),
    /// Deadline reached with nothing new.
    Exhausted,
    /// Error budget spent; carries the last transport failure.
    Failed(TransportError),
}

impl WaitOutcome {
    pub fn state(&self) -> PulseState {
        match self {
            Self::Found(_) => PulseState::Found,
            Self::Exhausted => PulseState::Exhausted,
            Self::Failed(_) => PulseState::Error,
        }
    }
}

/// Owns the offset read-modify-write for one destination.
pub struct PulseWaiter {
    source: Arc<dyn UpdateSource>,
    store: OffsetStore,
    fetch_grace: Duration,
    lock: Mutex<()>,
}

impl PulseWaiter {
    pub fn new(source: Arc<dyn UpdateSource>, store: OffsetStore, fetch_grace: Duration) -> Self {
        Self {
            source,
            store,
            fetch_grace,
            lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &OffsetStore {
        &self.store
    }

    /// Run one wait.
    ///
    /// Returns `Err(Error::Cancelled)` if `cancel` fires; nothing is committed in
    /// that case. A failed offset commit is returned as an error and the
    /// messages stay unacknowledged on the transport.
    pub async fn wait(
        &self,
        req: &WaitRequest,
        cancel: &CancellationToken,
        on_tick: &(dyn Fn(PulseTick) + Send + Sync),
    ) -> Result<WaitOutcome> {
        let started = Instant::now();
        let deadline_at = started + req.deadline;

        // Only one waiter may hold `since` between read and commit.
        let _guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            g = self.lock.lock() => g,
            _ = sleep_until(deadline_at) => {
                tracing::info!("offset held by another wait for the whole deadline");
                return Ok(WaitOutcome::Exhausted);
            }
        };

        let pulse_interval = req.effective_pulse_interval();
        let mut since = self.store.read();
        let mut state = PulseState::Idle;
        let mut pulse = 0u32;
        let mut errors = 0u32;
        let mut failing_since: Option<Instant> = None;
        let mut final_poll = false;

        tracing::debug!(since, deadline = ?req.deadline, pulse = ?pulse_interval, "wait started");

        loop {
            let remaining = deadline_at.saturating_duration_since(Instant::now());
            if state != PulseState::Idle && remaining.is_zero() {
                // An outage that reaches the deadline still gets one short poll.
                if failing_since.is_none() || final_poll {
                    tracing::debug!(pulse, since, "wait exhausted");
                    return Ok(WaitOutcome::Exhausted);
                }
                final_poll = true;
            }
            state = PulseState::Polling;
            pulse += 1;

            let poll_for = pulse_interval.min(remaining);
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                r = timeout(poll_for + self.fetch_grace, self.source.fetch(since, poll_for)) => r,
            };
            let result = fetched.unwrap_or_else(|_| {
                Err(TransportError::timeout(format!(
                    "poll did not finish within {:?}",
                    poll_for + self.fetch_grace
                )))
            });

            match result {
                Ok(batch) => {
                    errors = 0;
                    failing_since = None;
                    let top = batch.messages.iter().map(|m| m.update_id).max();
                    let fresh: Vec<InboundMessage> = batch
                        .messages
                        .into_iter()
                        .filter(|m| m.update_id > since)
                        .collect();
                    if let Some(high) = batch.high_water.max(top).filter(|h| *h > since) {
                        if cancel.is_cancelled() {
                            return Err(Error::Cancelled);
                        }
                        self.store.write(high)?;
                        since = high;
                    }
                    if !fresh.is_empty() {
                        tracing::info!(count = fresh.len(), offset = since, pulse, "reply received");
                        return Ok(WaitOutcome::Found(fresh));
                    }
                }
                Err(e) => {
                    let now = Instant::now();
                    let streak_started = *failing_since.get_or_insert(now);
                    errors = failed_slots(now.duration_since(streak_started), pulse_interval);
                    tracing::warn!(error = %e, errors, budget = req.error_budget, "poll failed");
                    if errors > req.error_budget {
                        return Ok(WaitOutcome::Failed(e));
                    }
                }
            }

            let now = Instant::now();
            let remaining = deadline_at.saturating_duration_since(now);
            on_tick(PulseTick {
                pulse,
                elapsed: now.duration_since(started),
                remaining,
                errors,
            });
            if remaining.is_zero() {
                continue;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = sleep(req.pulse_pause.min(remaining)) => {}
            }
        }
    }
}

/// Pulse slots touched by a failure streak that has lasted `streak`.
fn failed_slots(streak: Duration, pulse_interval: Duration) -> u32 {
    let slots = streak.as_nanos() / pulse_interval.as_nanos().max(1);
    u32::try_from(slots).unwrap_or(u32::MAX).saturating_add(1)
}
