use crate::cleanup::stats::{CleanupReport, Phase, ProgressState};
use crate::error::NotepurgeError;
use crate::events::{EventBus, ProgressEvent};
use crate::misskey::MisskeyApi;
use crate::types::User;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct CleanupOptions {
    /// List what would be unpinned and deleted without changing anything
    pub dry_run: bool,
}

/// Drives one cleanup run at a time: account, unpins, then paged deletion
pub struct CleanupRunner {
    options: CleanupOptions,
    events: EventBus,
    running: AtomicBool,
}

/// Clears the running flag however the run ends
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl CleanupRunner {
    pub fn new(options: CleanupOptions, events: EventBus) -> Self {
        Self {
            options,
            events,
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run the whole cleanup against `api`.
    ///
    /// A second call while a run is active is rejected with
    /// [`NotepurgeError::RunInProgress`].
    pub async fn run(&self, api: &impl MisskeyApi) -> Result<CleanupReport, NotepurgeError> {
        let _guard = RunGuard::acquire(&self.running).ok_or(NotepurgeError::RunInProgress)?;

        self.events.emit(ProgressEvent::RunStarted {
            dry_run: self.options.dry_run,
        });

        match self.execute(api).await {
            Ok(report) => {
                let status = report.status_line();
                info!("{}", status);
                self.events.emit(ProgressEvent::RunFinished {
                    status,
                    report: report.clone(),
                });
                Ok(report)
            }
            Err(e) => {
                error!("Cleanup run failed: {}", e);
                self.events.emit(ProgressEvent::RunFailed {
                    message: e.user_message(),
                });
                Err(e)
            }
        }
    }

    async fn execute(&self, api: &impl MisskeyApi) -> Result<CleanupReport, NotepurgeError> {
        let mut progress = ProgressState::default();

        let account = api.fetch_account().await?;
        let status = format!(
            "Found account: {} (@{})",
            account.display_name(),
            account.username()
        );
        info!("{}", status);
        self.events.emit(ProgressEvent::AccountFetched {
            status,
            total: account.notes_count(),
        });

        let user_id = account
            .id
            .clone()
            .ok_or_else(|| NotepurgeError::InvalidData("account has no id".to_string()))?;

        self.unpin_all(api, &account, &mut progress).await;
        self.delete_all(api, &account, &user_id, &mut progress).await?;

        Ok(CleanupReport {
            account: format!("@{}", account.username()),
            dry_run: self.options.dry_run,
            progress,
        })
    }

    /// Unpin every pinned note in server order; failures are collected, not fatal
    async fn unpin_all(&self, api: &impl MisskeyApi, account: &User, progress: &mut ProgressState) {
        let pinned = account.pinned_notes();
        if pinned.is_empty() {
            debug!("No pinned notes");
            return;
        }
        info!("Unpinning {} notes", pinned.len());

        for note in pinned {
            let Some(note_id) = note.id.as_deref() else {
                debug!("Skipping pinned note without id");
                continue;
            };

            if self.options.dry_run {
                info!("Would unpin note {}: {}", note_id, note.summary());
                progress.would_unpin += 1;
                continue;
            }

            match api.unpin(note_id).await {
                Ok(()) => {
                    progress.unpinned += 1;
                    debug!("Unpinned note {}", note_id);
                    self.events.emit(ProgressEvent::ItemUnpinned {
                        note_id: note_id.to_string(),
                        unpinned: progress.unpinned,
                    });
                }
                Err(e) => {
                    warn!("Failed to unpin note {}: {}", note_id, e);
                    let failure = progress.record_failure(Phase::Unpin, note_id, &e);
                    self.events.emit(ProgressEvent::ItemFailed {
                        note_id: failure.note_id,
                        phase: failure.phase,
                        message: failure.message,
                    });
                }
            }
        }
    }

    /// Page through the account's notes until an empty page, deleting each one.
    ///
    /// The offset advances by the size of each page, whatever happened to its notes.
    async fn delete_all(
        &self,
        api: &impl MisskeyApi,
        account: &User,
        user_id: &str,
        progress: &mut ProgressState,
    ) -> Result<(), NotepurgeError> {
        let expected_total = account.notes_count();

        loop {
            let offset = progress.offset;
            let page = api.list_notes(user_id, offset).await?;
            progress.pages += 1;
            debug!("Fetched {} notes at offset {}", page.len(), offset);
            self.events.emit(ProgressEvent::PageFetched {
                offset,
                size: page.len(),
            });

            if page.is_empty() {
                break;
            }

            for note in &page {
                let Some(note_id) = note.id.as_deref() else {
                    debug!("Skipping note without id");
                    continue;
                };

                if self.options.dry_run {
                    let posted = note
                        .created_at
                        .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_else(|| "unknown date".to_string());
                    info!("Would delete note {} ({}): {}", note_id, posted, note.summary());
                    progress.would_delete += 1;
                    continue;
                }

                match api.delete(note_id).await {
                    Ok(()) => {
                        progress.deleted += 1;
                        progress.total = expected_total;
                        debug!("Deleted note {}: {}", note_id, note.summary());
                        self.events.emit(ProgressEvent::ItemDeleted {
                            note_id: note_id.to_string(),
                            deleted: progress.deleted,
                            total: progress.total,
                        });
                    }
                    Err(e) => {
                        warn!("Failed to delete note {}: {}", note_id, e);
                        let failure = progress.record_failure(Phase::Delete, note_id, &e);
                        self.events.emit(ProgressEvent::ItemFailed {
                            note_id: failure.note_id,
                            phase: failure.phase,
                            message: failure.message,
                        });
                    }
                }
            }

            progress.offset += page.len();
        }

        Ok(())
    }
}
