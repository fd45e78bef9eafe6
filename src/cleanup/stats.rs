use crate::error::MisskeyError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which bulk operation an item belonged to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Unpin,
    Delete,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Unpin => f.write_str("unpin"),
            Phase::Delete => f.write_str("delete"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub note_id: String,
    pub phase: Phase,
    pub message: String,
}

/// Counters for one run. Reset at the start, discarded at the end.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressState {
    pub unpinned: u64,
    pub deleted: u64,
    /// Note count reported by the account; set once the first delete succeeds
    pub total: u64,
    pub would_unpin: u64,
    pub would_delete: u64,
    pub pages: u64,
    /// Sum of the sizes of all pages fetched so far
    pub offset: usize,
    pub failures: Vec<ItemFailure>,
}

impl ProgressState {
    pub fn record_failure(
        &mut self,
        phase: Phase,
        note_id: &str,
        error: &MisskeyError,
    ) -> ItemFailure {
        let failure = ItemFailure {
            note_id: note_id.to_string(),
            phase,
            message: error.to_string(),
        };
        self.failures.push(failure.clone());
        failure
    }

    pub fn failed(&self, phase: Phase) -> usize {
        self.failures.iter().filter(|f| f.phase == phase).count()
    }
}

/// Outcome of a finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// `@username` of the cleaned account
    pub account: String,
    pub dry_run: bool,
    pub progress: ProgressState,
}

impl CleanupReport {
    pub fn status_line(&self) -> String {
        let progress = &self.progress;
        if self.dry_run {
            return format!(
                "Dry run complete: would unpin {} notes and delete {} notes.",
                progress.would_unpin, progress.would_delete
            );
        }

        let mut status = format!(
            "Completed! Unpinned {} notes and deleted {} notes.",
            progress.unpinned, progress.deleted
        );
        if !progress.failures.is_empty() {
            status.push_str(&format!(
                " {} unpins and {} deletions failed.",
                progress.failed(Phase::Unpin),
                progress.failed(Phase::Delete)
            ));
        }
        status
    }
}
