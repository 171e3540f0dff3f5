//! Poll loop controller - drives one waiting-room session to a terminal state.
//!
//! State machine, one instance per guarded flow:
//! - `Idle` → `Polling` on start
//! - `Polling` → `Allowed` when a probe reports `is_allowed`
//! - `Polling` → `Failed` when a probe errors (no retry)
//! - `Idle`/`Polling` → `Cancelled` on teardown (nothing downstream runs)
//!
//! Snapshots live in a watch channel. Every mutation, including cancel, goes
//! through `send_if_modified`, so once `cancel()` returns no tick can apply.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::GateError;
use crate::status::QueueStatus;

/// Shortest tick the loop will run with; shorter intervals are raised to this.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PollState {
    #[default]
    Idle,
    Polling,
    Allowed,
    Failed,
    Cancelled,
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Allowed | Self::Failed | Self::Cancelled)
    }
}

/// Latest state of a session, as seen by presentation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PollSnapshot {
    pub state: PollState,
    /// Most recent status from the server. Replaced, never merged.
    pub status: Option<QueueStatus>,
    /// Number of probe responses applied.
    pub ticks: u32,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A single poll session. Consumed by [`PollLoop::run`], so a flow can never
/// own two timers.
pub struct PollLoop {
    id: Uuid,
    interval: Duration,
    cancel: CancellationToken,
    state: Arc<watch::Sender<PollSnapshot>>,
}

impl PollLoop {
    pub fn new(interval: Duration) -> Self {
        let (state, _) = watch::channel(PollSnapshot::default());
        Self {
            id: Uuid::new_v4(),
            interval: interval.max(MIN_POLL_INTERVAL),
            cancel: CancellationToken::new(),
            state: Arc::new(state),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Handle for the owning view: cancellation and presentation.
    pub fn handle(&self) -> PollHandle {
        PollHandle {
            id: self.id,
            cancel: self.cancel.clone(),
            state: Arc::clone(&self.state),
        }
    }

    /// Mark the session failed before it ever started (admission request failed).
    pub(crate) fn fail_before_start(&self) {
        self.state.send_if_modified(|snap| {
            if snap.state != PollState::Idle {
                return false;
            }
            snap.state = PollState::Failed;
            snap.updated_at = Some(Utc::now());
            true
        });
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Poll `probe` every interval until admitted, failed, or cancelled.
    ///
    /// The first probe fires one interval after start; ticks never overlap.
    /// Returns the admitting status, the probe's error, or
    /// [`GateError::Cancelled`]. The timer is gone once this returns.
    pub async fn run<P, Fut>(self, mut probe: P) -> Result<QueueStatus, GateError>
    where
        P: FnMut() -> Fut,
        Fut: Future<Output = Result<QueueStatus, GateError>>,
    {
        let started = self.state.send_if_modified(|snap| {
            if snap.state != PollState::Idle {
                return false;
            }
            snap.state = PollState::Polling;
            true
        });
        if !started {
            return Err(GateError::Cancelled);
        }

        tracing::debug!(flow_id = %self.id, interval_ms = self.interval.as_millis(), "Polling started");

        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(self.cancelled()),
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(self.cancelled()),
                result = probe() => result,
            };

            match result {
                Ok(status) => {
                    let mut applied = false;
                    self.state.send_if_modified(|snap| {
                        if snap.state != PollState::Polling {
                            return false;
                        }
                        snap.ticks += 1;
                        snap.updated_at = Some(Utc::now());
                        if status.is_allowed {
                            snap.state = PollState::Allowed;
                        }
                        snap.status = Some(status.clone());
                        applied = true;
                        true
                    });

                    if !applied {
                        return Err(self.cancelled());
                    }

                    if status.is_allowed {
                        tracing::info!(flow_id = %self.id, "Admission granted");
                        return Ok(status);
                    }

                    tracing::debug!(
                        flow_id = %self.id,
                        rank = status.rank,
                        "Still waiting for admission"
                    );
                }
                Err(e) => {
                    let failed = self.state.send_if_modified(|snap| {
                        if snap.state != PollState::Polling {
                            return false;
                        }
                        snap.state = PollState::Failed;
                        snap.updated_at = Some(Utc::now());
                        true
                    });

                    if !failed {
                        return Err(self.cancelled());
                    }

                    tracing::warn!(flow_id = %self.id, error = %e, "Status poll failed, abandoning flow");
                    return Err(e);
                }
            }
        }
    }

    fn cancelled(&self) -> GateError {
        tracing::debug!(flow_id = %self.id, "Polling cancelled");
        GateError::Cancelled
    }
}

/// Cloneable view-side handle to a poll session.
#[derive(Clone)]
pub struct PollHandle {
    id: Uuid,
    cancel: CancellationToken,
    state: Arc<watch::Sender<PollSnapshot>>,
}

impl PollHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Tear the session down. Synchronous: no snapshot mutation happens after
    /// this returns, and any in-flight probe response is discarded.
    ///
    /// Returns `false` if the session had already reached a terminal state.
    pub fn cancel(&self) -> bool {
        let cancelled = self.state.send_if_modified(|snap| {
            if snap.state.is_terminal() {
                return false;
            }
            snap.state = PollState::Cancelled;
            true
        });
        self.cancel.cancel();
        cancelled
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn state(&self) -> PollState {
        self.state.borrow().state
    }

    pub fn snapshot(&self) -> PollSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PollSnapshot> {
        self.state.subscribe()
    }

    /// Guard that cancels the session when the owning view goes away.
    pub fn teardown_guard(&self) -> TeardownGuard {
        TeardownGuard {
            handle: Some(self.clone()),
        }
    }
}

/// Cancels its session on drop unless disarmed.
pub struct TeardownGuard {
    handle: Option<PollHandle>,
}

impl TeardownGuard {
    pub fn disarm(&mut self) {
        self.handle = None;
    }
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        if let Some(ref handle) = self.handle
            && handle.cancel()
        {
            tracing::debug!(flow_id = %handle.id(), "View torn down while waiting");
        }
    }
}
