//! CapacityReservation - scoped ownership of a Capacity Gate slot.
//!
//! Exactly one exit is attempted per successful enter:
//! - `release()` consumes the reservation and calls exit once
//! - dropping an unreleased reservation releases in the background
//!   (spawned on the current runtime, or blocking when there is none; a
//!   runtime that shuts down before running the exit hands it to a thread)
//! - a failed exit is logged and broadcast, never retried

use std::sync::Arc;

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::client::QueueApi;
use crate::error::{GateError, ReleaseError};

/// Holds the caller's server-side capacity slot until released.
#[must_use = "dropping a reservation releases it in the background"]
pub struct CapacityReservation {
    api: Arc<dyn QueueApi>,
    flow_id: Uuid,
    failures: broadcast::Sender<ReleaseError>,
    released: bool,
}

impl CapacityReservation {
    /// Only constructed once `enter_capacity` has succeeded.
    pub(crate) fn new(
        api: Arc<dyn QueueApi>,
        flow_id: Uuid,
        failures: broadcast::Sender<ReleaseError>,
    ) -> Self {
        Self {
            api,
            flow_id,
            failures,
            released: false,
        }
    }

    pub fn flow_id(&self) -> Uuid {
        self.flow_id
    }

    /// Send the exit signal. Consumes the reservation, so it can only happen once.
    pub async fn release(mut self) -> Result<(), ReleaseError> {
        self.released = true;

        match self.api.exit_capacity().await {
            Ok(()) => {
                tracing::debug!(flow_id = %self.flow_id, "Capacity released");
                Ok(())
            }
            Err(e) => Err(report_failure(self.flow_id, &self.failures, e)),
        }
    }
}

impl Drop for CapacityReservation {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        tracing::warn!(
            flow_id = %self.flow_id,
            "Reservation dropped before release - releasing in background"
        );

        let exit = PendingExit {
            api: Some(Arc::clone(&self.api)),
            flow_id: self.flow_id,
            failures: self.failures.clone(),
        };

        match tokio::runtime::Handle::try_current() {
            // A runtime that is shutting down drops the task unpolled;
            // PendingExit then falls back to a thread.
            Ok(handle) => {
                handle.spawn(exit.send());
            }
            Err(_) => exit.send_blocking(),
        }
    }
}

/// An exit owed by a dropped reservation. Sent exactly once: asynchronously
/// when polled, otherwise from a plain thread when dropped unpolled.
struct PendingExit {
    api: Option<Arc<dyn QueueApi>>,
    flow_id: Uuid,
    failures: broadcast::Sender<ReleaseError>,
}

impl PendingExit {
    async fn send(mut self) {
        let Some(api) = self.api.take() else {
            return;
        };
        if let Err(e) = api.exit_capacity().await {
            report_failure(self.flow_id, &self.failures, e);
        }
    }

    fn send_blocking(mut self) {
        if let Some(api) = self.api.take()
            && let Err(e) = api.exit_capacity_blocking()
        {
            report_failure(self.flow_id, &self.failures, e);
        }
    }
}

impl Drop for PendingExit {
    fn drop(&mut self) {
        let Some(api) = self.api.take() else {
            return;
        };

        let flow_id = self.flow_id;
        let failures = self.failures.clone();
        let spawned = std::thread::Builder::new()
            .name("waitroom-release".to_string())
            .spawn(move || {
                if let Err(e) = api.exit_capacity_blocking() {
                    report_failure(flow_id, &failures, e);
                }
            });

        if let Err(e) = spawned {
            tracing::error!(flow_id = %flow_id, error = %e, "Could not start release thread, capacity slot leaked");
        }
    }
}
