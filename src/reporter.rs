use crate::events::{EventReceiver, ProgressEvent};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// What the terminal shows, rebuilt purely from events
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressView {
    pub status: Option<String>,
    pub error: Option<String>,
    pub unpinned: u64,
    pub deleted: u64,
    pub total: u64,
    pub failed: u64,
    pub running: bool,
}

impl ProgressView {
    pub fn apply(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::RunStarted { dry_run } => {
                *self = ProgressView {
                    running: true,
                    status: dry_run.then(|| "Dry run: nothing will be changed".to_string()),
                    ..ProgressView::default()
                };
            }
            ProgressEvent::AccountFetched { status, .. } => {
                self.status = Some(status.clone());
            }
            ProgressEvent::ItemUnpinned { unpinned, .. } => {
                self.unpinned = *unpinned;
            }
            ProgressEvent::ItemDeleted { deleted, total, .. } => {
                self.deleted = *deleted;
                self.total = *total;
            }
            ProgressEvent::ItemFailed { .. } => {
                self.failed += 1;
            }
            ProgressEvent::PageFetched { .. } => {}
            ProgressEvent::RunFinished { status, .. } => {
                self.status = Some(status.clone());
                self.running = false;
            }
            ProgressEvent::RunFailed { message } => {
                self.error = Some(message.clone());
                self.running = false;
            }
        }
    }

    /// `deleted / total` line, once a non-zero total is known
    pub fn progress_line(&self) -> Option<String> {
        (self.total > 0).then(|| {
            format!("Progress: {} / {} notes deleted", self.deleted, self.total)
        })
    }
}

/// Renders events to the terminal with an indicatif bar for the delete phase
pub struct ConsoleReporter {
    view: ProgressView,
    bar: Option<ProgressBar>,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self {
            view: ProgressView::default(),
            bar: None,
        }
    }

    pub fn view(&self) -> &ProgressView {
        &self.view
    }

    pub fn handle(&mut self, event: &ProgressEvent) {
        self.view.apply(event);

        match event {
            ProgressEvent::RunStarted { .. } => {
                if let Some(status) = &self.view.status {
                    self.print(status);
                }
            }
            ProgressEvent::AccountFetched { status, .. } => self.print(status),
            ProgressEvent::ItemUnpinned { note_id, unpinned } => {
                self.print(&format!("Unpinned note {note_id} ({unpinned})"));
            }
            ProgressEvent::ItemDeleted { deleted, total, .. } => {
                self.update_bar(*deleted, *total);
            }
            ProgressEvent::ItemFailed {
                note_id,
                phase,
                message,
            } => {
                self.print(&format!("Failed to {phase} note {note_id}: {message}"));
            }
            ProgressEvent::PageFetched { offset, size } => {
                debug!("Page at offset {} has {} notes", offset, size);
            }
            ProgressEvent::RunFinished { status, .. } => {
                if let Some(bar) = self.bar.take() {
                    bar.finish();
                }
                println!("{status}");
            }
            ProgressEvent::RunFailed { message } => {
                if let Some(bar) = self.bar.take() {
                    bar.abandon();
                }
                eprintln!("Error: {message}");
            }
        }
    }

    fn update_bar(&mut self, deleted: u64, total: u64) {
        if total == 0 {
            return;
        }
        let bar = self.bar.get_or_insert_with(|| {
            let pb = ProgressBar::new(total);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{msg} [{bar:40.cyan/blue}] {pos}/{len} notes deleted ({eta})")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            pb.set_message("Progress");
            pb
        });
        // The server count can grow while we delete
        if total > bar.length().unwrap_or(0) {
            bar.set_length(total);
        }
        bar.set_position(deleted);
    }

    fn print(&self, line: &str) {
        match &self.bar {
            Some(bar) => bar.println(line),
            None => println!("{line}"),
        }
    }
}

impl Default for ConsoleReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Render events until the bus closes, then hand back the final view
pub fn spawn_console_reporter(mut receiver: EventReceiver) -> JoinHandle<ProgressView> {
    tokio::spawn(async move {
        let mut reporter = ConsoleReporter::new();
        loop {
            match receiver.recv().await {
                Ok(event) => reporter.handle(&event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Progress display skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
        reporter.view().clone()
    })
}
