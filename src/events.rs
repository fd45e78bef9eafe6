//! Progress events for a cleanup run
//!
//! The runner publishes one event per completed step on a
//! `tokio::sync::broadcast` channel. Presentation code subscribes and renders;
//! it never touches the run's own counters.

use crate::cleanup::{CleanupReport, Phase};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Event receiver type alias
pub type EventReceiver = broadcast::Receiver<ProgressEvent>;

/// Event bus for distributing progress events
///
/// Emitting never blocks. Events are dropped when nobody is subscribed, and
/// lagging subscribers lose the oldest events first.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ProgressEvent>,
}

impl EventBus {
    /// Create a new event bus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ProgressEvent) {
        // Err only means there are no receivers
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Counters were reset and a run began
    RunStarted { dry_run: bool },

    /// The account was fetched; `total` is its reported note count
    AccountFetched { status: String, total: u64 },

    ItemUnpinned { note_id: String, unpinned: u64 },

    ItemDeleted {
        note_id: String,
        deleted: u64,
        total: u64,
    },

    /// A single unpin or delete failed; the run carries on
    ItemFailed {
        note_id: String,
        phase: Phase,
        message: String,
    },

    PageFetched { offset: usize, size: usize },

    RunFinished {
        status: String,
        report: CleanupReport,
    },

    /// The run stopped early; `message` is what the user should see
    RunFailed { message: String },
}
