//! Wire types exchanged with the queue service.

use serde::{Deserialize, Serialize};

/// Opaque per-attempt identifier issued by the Entry Gate.
///
/// Never reused across registrations; sent out-of-band on every status query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GateToken(String);

impl GateToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Snapshot of a caller's place in a queue.
///
/// Each poll replaces the previous snapshot entirely. `rank` is informational;
/// `is_allowed` is the only signal that ends the wait.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub rank: u64,
    pub is_allowed: bool,
}

impl QueueStatus {
    pub fn waiting(rank: u64, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            rank,
            is_allowed: false,
        }
    }

    pub fn allowed() -> Self {
        Self {
            message: String::new(),
            rank: 0,
            is_allowed: true,
        }
    }
}

/// Body of a successful entry registration.
#[derive(Debug, Deserialize)]
pub(crate) struct RegisterResponse {
    pub token: String,
}
