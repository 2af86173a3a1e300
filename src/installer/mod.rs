//! Language pack installation.
//!
//! An [`Installer`] waits for the destination root, then extracts the lingware archive
//! on one background thread. The process-wide [`InstallState`] makes sure only a single
//! extraction runs at a time and that a successful install is not repeated.

pub mod extract;
pub mod state;

pub use extract::{
    extract_archive, ArchiveReader, ArchiveSource, BundledArchive, ExtractSummary, FileArchive,
};
pub use state::{InstallOutcome, InstallState};

use crate::error::InstallError;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Completion signal broadcast to whoever asked for the voice data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStatus {
    Success,
    Error,
}

#[cfg_attr(test, mockall::automock)]
pub trait CompletionNotifier: Send + Sync {
    fn data_installed(&self, status: InstallStatus);
}

/// The front end driving an install (a window, a console prompt).
#[cfg_attr(test, mockall::automock)]
pub trait InstallerHost: Send + Sync {
    /// Extraction started.
    fn show_installing(&self);
    /// Extraction failed while the host is still around; the user may call
    /// [`Installer::retry`].
    fn offer_retry(&self);
    /// Install finished, the host should go away.
    fn close(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallerPhase {
    AwaitingRoot,
    Installing,
    AwaitingRetry,
    Completed,
    Failed,
}

/// Phase plus the host's closing flag. Kept under one lock so that a failure and a
/// concurrent `close` agree on who reports the error.
struct Progress {
    phase: InstallerPhase,
    closing: bool,
}

/// What to tell the host and notifier once the progress lock is released.
enum Report {
    Installed,
    Abandoned,
    OfferRetry,
}

pub struct Installer {
    state: Arc<InstallState>,
    archive: Arc<dyn ArchiveSource>,
    host: Arc<dyn InstallerHost>,
    notifier: Arc<dyn CompletionNotifier>,
    root: Mutex<Option<PathBuf>>,
    progress: Mutex<Progress>,
}

impl Installer {
    pub fn new(
        state: Arc<InstallState>,
        archive: Arc<dyn ArchiveSource>,
        host: Arc<dyn InstallerHost>,
        notifier: Arc<dyn CompletionNotifier>,
    ) -> Arc<Self> {
        Arc::new(Self {
            state,
            archive,
            host,
            notifier,
            root: Mutex::new(None),
            progress: Mutex::new(Progress {
                phase: InstallerPhase::AwaitingRoot,
                closing: false,
            }),
        })
    }

    fn progress(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn phase(&self) -> InstallerPhase {
        self.progress().phase
    }

    /// The data root arrived; remember it and start installing.
    pub fn on_root_resolved(self: &Arc<Self>, root: PathBuf) -> Option<JoinHandle<InstallOutcome>> {
        info!("Voice data root: {}", root.display());
        *self.root.lock().unwrap_or_else(|e| e.into_inner()) = Some(root.clone());
        self.begin_install(&root)
    }

    /// Starts one background extraction into `root`. Returns `None` when another install
    /// is running or a previous one already succeeded.
    pub fn begin_install(self: &Arc<Self>, root: &Path) -> Option<JoinHandle<InstallOutcome>> {
        if !self.state.try_begin() {
            debug!("Install already running or done, ignoring request");
            return None;
        }

        self.progress().phase = InstallerPhase::Installing;
        self.host.show_installing();

        let this = Arc::clone(self);
        let root = root.to_path_buf();
        let spawned = std::thread::Builder::new()
            .name("langpack-unzip".into())
            .spawn(move || {
                let outcome = this.run(&root);
                this.complete(outcome);
                outcome
            });

        match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!("Failed to start extraction thread: {}", e);
                self.complete(InstallOutcome::Failure);
                None
            }
        }
    }

    /// User asked to try again after a failure.
    pub fn retry(self: &Arc<Self>) -> Option<JoinHandle<InstallOutcome>> {
        let root = self.root.lock().unwrap_or_else(|e| e.into_inner()).clone();
        match root {
            Some(root) => self.begin_install(&root),
            None => {
                warn!("Retry requested before the data root is known");
                None
            }
        }
    }

    /// Host teardown. A failure from here on is reported as an error instead of being
    /// offered for retry.
    pub fn close(&self) {
        let abandoned = {
            let mut progress = self.progress();
            progress.closing = true;
            if progress.phase == InstallerPhase::AwaitingRetry {
                progress.phase = InstallerPhase::Failed;
                true
            } else {
                false
            }
        };
        if abandoned {
            self.notifier.data_installed(InstallStatus::Error);
        }
    }

    fn run(&self, root: &Path) -> InstallOutcome {
        info!("Extracting {} into {}", self.archive.describe(), root.display());
        let result = self
            .archive
            .open()
            .map_err(InstallError::from)
            .and_then(|reader| extract_archive(reader, root));

        match result {
            Ok(summary) => {
                info!(
                    "Installed {} files and {} directories",
                    summary.files, summary.directories
                );
                InstallOutcome::Success
            }
            Err(e) => {
                error!("Language pack install failed: {}", e);
                InstallOutcome::Failure
            }
        }
    }

    fn complete(&self, outcome: InstallOutcome) {
        self.state.finish(outcome);

        let report = {
            let mut progress = self.progress();
            if outcome == InstallOutcome::Success {
                progress.phase = InstallerPhase::Completed;
                progress.closing = true;
                Report::Installed
            } else if progress.closing {
                progress.phase = InstallerPhase::Failed;
                Report::Abandoned
            } else {
                progress.phase = InstallerPhase::AwaitingRetry;
                Report::OfferRetry
            }
        };

        match report {
            Report::Installed => {
                self.notifier.data_installed(InstallStatus::Success);
                self.host.close();
            }
            Report::Abandoned => self.notifier.data_installed(InstallStatus::Error),
            Report::OfferRetry => self.host.offer_retry(),
        }
    }
}
