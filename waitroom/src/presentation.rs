//! Wait indicator state, derived from poll snapshots. Strictly downstream:
//! nothing here feeds back into the gate logic.

use serde::Serialize;
use tokio::sync::watch;

use crate::poll::{PollSnapshot, PollState};
use crate::status::QueueStatus;

/// What a blocking wait modal needs to render.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitView {
    pub is_open: bool,
    pub status: Option<QueueStatus>,
}

impl WaitView {
    pub fn from_snapshot(snapshot: &PollSnapshot) -> Self {
        Self {
            is_open: snapshot.state == PollState::Polling,
            status: snapshot.status.clone(),
        }
    }

    /// Text for the modal body, or `None` when the modal is closed.
    pub fn headline(&self) -> Option<String> {
        if !self.is_open {
            return None;
        }

        let Some(ref status) = self.status else {
            return Some("Joining the queue...".to_string());
        };

        let mut line = format!("You are number {} in line.", status.rank);
        if !status.message.trim().is_empty() {
            line.push(' ');
            line.push_str(status.message.trim());
        }
        Some(line)
    }
}

impl From<&PollSnapshot> for WaitView {
    fn from(snapshot: &PollSnapshot) -> Self {
        Self::from_snapshot(snapshot)
    }
}

/// Render every published snapshot until the session ends.
///
/// Intermediate snapshots may be coalesced; the terminal one is always rendered.
pub async fn follow<F>(mut updates: watch::Receiver<PollSnapshot>, mut render: F) -> PollState
where
    F: FnMut(&WaitView),
{
    loop {
        let snapshot = updates.borrow_and_update().clone();
        render(&WaitView::from(&snapshot));

        if snapshot.state.is_terminal() {
            return snapshot.state;
        }

        if updates.changed().await.is_err() {
            return updates.borrow().state;
        }
    }
}
