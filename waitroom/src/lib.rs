//! waitroom: client for storefront waiting-room admission gates.

mod config;
mod error;
mod status;

pub mod client;
pub mod gate;
pub mod poll;
pub mod presentation;
pub mod release;
pub mod storefront;

#[cfg(test)]
mod test_support;

pub use client::{HttpQueueClient, QueueApi};
pub use config::{ConfigError, DEFAULT_POLL_INTERVAL, Endpoints, GateConfig};
pub use error::{GateError, GateOperation, GuardedError, ReleaseError};
pub use gate::{CapacityFlow, EntryFlow, Gate, Waitroom};
pub use poll::{PollHandle, PollLoop, PollSnapshot, PollState, TeardownGuard};
pub use presentation::{WaitView, follow};
pub use release::CapacityReservation;
pub use status::{GateToken, QueueStatus};
pub use storefront::{GatedStorefront, Storefront};

/// waitroom version from Cargo.toml
pub const WAITROOM_VERSION: &str = env!("CARGO_PKG_VERSION");
