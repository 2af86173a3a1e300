use lazy_static::lazy_static;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    Unknown,
    Success,
    Failure,
}

#[derive(Debug)]
struct Inner {
    is_installing: bool,
    last_result: InstallOutcome,
}

/// Install bookkeeping shared by every installer in the process.
///
/// Both fields are only read or written while holding the one lock, and the lock is
/// never held across extraction I/O.
#[derive(Debug)]
pub struct InstallState {
    inner: Mutex<Inner>,
}

lazy_static! {
    static ref SHARED: Arc<InstallState> = Arc::new(InstallState::new());
}

impl Default for InstallState {
    fn default() -> Self {
        Self::new()
    }
}

impl InstallState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                is_installing: false,
                last_result: InstallOutcome::Unknown,
            }),
        }
    }

    /// The process-wide instance.
    pub fn shared() -> Arc<Self> {
        SHARED.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // plain flags, nothing to repair after a panic elsewhere
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claims the single install slot. Fails while another install is running or
    /// after one has already succeeded.
    pub fn try_begin(&self) -> bool {
        let mut inner = self.lock();
        if inner.is_installing || inner.last_result == InstallOutcome::Success {
            return false;
        }
        inner.is_installing = true;
        true
    }

    pub fn finish(&self, outcome: InstallOutcome) {
        let mut inner = self.lock();
        inner.last_result = outcome;
        inner.is_installing = false;
    }

    pub fn is_installing(&self) -> bool {
        self.lock().is_installing
    }

    pub fn last_result(&self) -> InstallOutcome {
        self.lock().last_result
    }

    /// Forgets the previous outcome so that a new install may run. No effect while
    /// an install is in flight.
    pub fn reset(&self) {
        let mut inner = self.lock();
        if !inner.is_installing {
            inner.last_result = InstallOutcome::Unknown;
        }
    }
}
