//! Guarded actions - run a protected operation only after admission.
//!
//! Flow:
//! 1. Register (Entry Gate) or enter (Capacity Gate)
//! 2. Drive a `PollLoop` until the server allows the caller through
//! 3. Invoke the action exactly once and hand back its result untouched
//! 4. Capacity Gate only: release the slot once the action settles, on every path

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::client::{HttpQueueClient, QueueApi};
use crate::config::{DEFAULT_POLL_INTERVAL, GateConfig};
use crate::error::{GateError, GuardedError, ReleaseError};
use crate::poll::{PollHandle, PollLoop};
use crate::release::CapacityReservation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gate {
    /// Rate limiter in front of cart and order flows.
    Entry,
    /// Concurrency limiter in front of checkout/payment; requires exit.
    Capacity,
}

impl Gate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entry => "entry",
            Self::Capacity => "capacity",
        }
    }
}

impl std::fmt::Display for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entry point for guarded flows against one queue service.
#[derive(Clone)]
pub struct Waitroom {
    api: Arc<dyn QueueApi>,
    poll_interval: Duration,
    release_failures: broadcast::Sender<ReleaseError>,
}

impl Waitroom {
    pub fn new(api: Arc<dyn QueueApi>) -> Self {
        let (release_failures, _) = broadcast::channel(16);
        Self {
            api,
            poll_interval: DEFAULT_POLL_INTERVAL,
            release_failures,
        }
    }

    /// Build an HTTP-backed waitroom from configuration.
    pub fn connect(config: GateConfig) -> Result<Self, reqwest::Error> {
        let poll_interval = config.poll_interval;
        let client = HttpQueueClient::new(config)?;
        Ok(Self::new(Arc::new(client)).with_poll_interval(poll_interval))
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Failed exit signals, for surfacing as non-blocking warnings.
    pub fn subscribe_release_failures(&self) -> broadcast::Receiver<ReleaseError> {
        self.release_failures.subscribe()
    }

    pub fn entry_flow(&self) -> EntryFlow {
        EntryFlow {
            api: Arc::clone(&self.api),
            poll: PollLoop::new(self.poll_interval),
        }
    }

    pub fn capacity_flow(&self) -> CapacityFlow {
        CapacityFlow {
            api: Arc::clone(&self.api),
            poll: PollLoop::new(self.poll_interval),
            release_failures: self.release_failures.clone(),
        }
    }

    /// Run `action` behind the chosen gate, without a view-side handle.
    pub async fn run_guarded<T, E, F, Fut>(
        &self,
        gate: Gate,
        action: F,
    ) -> Result<T, GuardedError<E>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        match gate {
            Gate::Entry => self.entry_flow().run(action).await,
            Gate::Capacity => self.capacity_flow().run(action).await,
        }
    }
}

/// One attempt through the Entry Gate.
pub struct EntryFlow {
    api: Arc<dyn QueueApi>,
    poll: PollLoop,
}

impl EntryFlow {
    pub fn handle(&self) -> PollHandle {
        self.poll.handle()
    }

    pub async fn run<T, E, F, Fut>(self, action: F) -> Result<T, GuardedError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let flow_id = self.poll.id();
        if self.poll.is_cancelled() {
            return Err(GateError::Cancelled.into());
        }

        let token = match self.api.register_entry().await {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(flow_id = %flow_id, gate = "entry", error = %e, "Registration failed");
                self.poll.fail_before_start();
                return Err(e.into());
            }
        };

        tracing::debug!(flow_id = %flow_id, gate = "entry", "Registered, waiting for admission");

        let api = Arc::clone(&self.api);
        self.poll
            .run(move || {
                let api = Arc::clone(&api);
                let token = token.clone();
                async move { api.query_entry_status(&token).await }
            })
            .await?;

        action().await.map_err(GuardedError::Action)
    }
}

/// One attempt through the Capacity Gate.
pub struct CapacityFlow {
    api: Arc<dyn QueueApi>,
    poll: PollLoop,
    release_failures: broadcast::Sender<ReleaseError>,
}

impl CapacityFlow {
    pub fn handle(&self) -> PollHandle {
        self.poll.handle()
    }

    /// The action runs on its own task that owns the reservation: if the
    /// caller stops awaiting, the action still settles and the slot is still
    /// released exactly once.
    pub async fn run<T, E, F, Fut>(self, action: F) -> Result<T, GuardedError<E>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let flow_id = self.poll.id();
        if self.poll.is_cancelled() {
            return Err(GateError::Cancelled.into());
        }

        // Enter on its own task: if this future is dropped mid-request, a late
        // success still yields a reservation whose drop releases the slot.
        let enter = {
            let api = Arc::clone(&self.api);
            let failures = self.release_failures.clone();
            tokio::spawn(async move {
                api.enter_capacity().await?;
                Ok::<_, GateError>(CapacityReservation::new(api, flow_id, failures))
            })
        };

        let reservation = match enter.await {
            Ok(Ok(reservation)) => reservation,
            Ok(Err(e)) => {
                tracing::warn!(flow_id = %flow_id, gate = "capacity", error = %e, "Enter failed");
                self.poll.fail_before_start();
                return Err(e.into());
            }
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => return Err(GateError::Cancelled.into()),
        };

        tracing::debug!(flow_id = %flow_id, gate = "capacity", "Entered, waiting for a vacancy");

        // Torn down while enter was in flight.
        if self.poll.is_cancelled() {
            let _ = reservation.release().await;
            return Err(GateError::Cancelled.into());
        }

        let api = Arc::clone(&self.api);
        let admitted = self
            .poll
            .run(move || {
                let api = Arc::clone(&api);
                async move { api.query_capacity_status().await }
            })
            .await;

        if let Err(e) = admitted {
            // Failure is already logged and broadcast by the reservation.
            let _ = reservation.release().await;
            return Err(e.into());
        }

        let task = tokio::spawn(async move {
            let result = action().await;
            let _ = reservation.release().await;
            result
        });

        match task.await {
            Ok(result) => result.map_err(GuardedError::Action),
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(GateError::Cancelled.into()),
        }
    }
}
