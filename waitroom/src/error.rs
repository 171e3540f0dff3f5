//! Error taxonomy for admission flows.

use std::fmt;

/// Queue service operation, for error context and log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GateOperation {
    RegisterEntry,
    QueryEntryStatus,
    EnterCapacity,
    QueryCapacityStatus,
    ExitCapacity,
}

impl GateOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RegisterEntry => "register_entry",
            Self::QueryEntryStatus => "query_entry_status",
            Self::EnterCapacity => "enter_capacity",
            Self::QueryCapacityStatus => "query_capacity_status",
            Self::ExitCapacity => "exit_capacity",
        }
    }
}

impl fmt::Display for GateOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    /// A register/enter/query/exit call failed at the transport or server level.
    /// Never retried; a fresh flow is required.
    #[error("admission failed, try again ({operation}: {reason})")]
    Unavailable {
        operation: GateOperation,
        status: Option<u16>,
        reason: String,
    },

    /// The owning view was torn down before admission was granted.
    #[error("admission cancelled")]
    Cancelled,
}

impl GateError {
    pub fn unavailable(operation: GateOperation, reason: impl fmt::Display) -> Self {
        Self::Unavailable {
            operation,
            status: None,
            reason: reason.to_string(),
        }
    }

    pub fn rejected(operation: GateOperation, status: u16) -> Self {
        Self::Unavailable {
            operation,
            status: Some(status),
            reason: format!("server responded with status {status}"),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Result of a guarded action: either admission never completed, or the
/// action ran and failed with its own error.
#[derive(Debug, thiserror::Error)]
pub enum GuardedError<E> {
    #[error(transparent)]
    Admission(#[from] GateError),

    #[error("{0}")]
    Action(E),
}

impl<E> GuardedError<E> {
    pub fn is_admission(&self) -> bool {
        matches!(self, Self::Admission(_))
    }

    pub fn into_action(self) -> Option<E> {
        match self {
            Self::Action(e) => Some(e),
            Self::Admission(_) => None,
        }
    }
}

/// Exit-capacity failed after the protected action settled.
///
/// Reported on a side channel; never replaces the action's own outcome.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to release checkout capacity: {source}")]
pub struct ReleaseError {
    #[source]
    pub source: GateError,
}
