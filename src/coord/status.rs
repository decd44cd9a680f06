#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

/// What the host UI should tell the viewer while no graphics app covers the
/// screen (or why the screen went dark).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Nothing on screen yet; the host shows its idle logo.
    Loading,
    Blanked,
    NoGraphicsAppsExecuting,
    CantLaunchDefault,
    DefaultCantConnect,
    DefaultCrashed,
}

#[derive(Debug)]
struct StatusInner {
    stop_requested: bool,
    stopped: bool,
    error_mode: bool,
    error_code: ErrorCode,
}

/// The few flags the worker shares with the host UI thread. Everything goes
/// through these accessors; no raw booleans cross the thread boundary.
#[derive(Debug, Clone)]
pub struct SharedStatus {
    inner: Arc<Mutex<StatusInner>>,
}

impl SharedStatus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StatusInner {
                stop_requested: false,
                stopped: false,
                error_mode: true,
                error_code: ErrorCode::Loading,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StatusInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn request_stop(&self) {
        self.lock().stop_requested = true;
    }

    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.lock().stop_requested
    }

    pub fn mark_stopped(&self) {
        self.lock().stopped = true;
    }

    #[must_use]
    pub fn stopped(&self) -> bool {
        self.lock().stopped
    }

    pub fn set_error(&self, mode: bool, code: ErrorCode) {
        let mut inner = self.lock();
        inner.error_mode = mode;
        inner.error_code = code;
    }

    /// Turn the error indicator on without forgetting which condition it
    /// last showed.
    pub fn flag_error(&self) {
        self.lock().error_mode = true;
    }

    #[must_use]
    pub fn error(&self) -> (bool, ErrorCode) {
        let inner = self.lock();
        (inner.error_mode, inner.error_code)
    }
}

impl Default for SharedStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_loading_with_the_indicator_on() {
        let status = SharedStatus::new();
        assert_eq!(status.error(), (true, ErrorCode::Loading));
        assert!(!status.stop_requested());
        assert!(!status.stopped());
    }

    #[test]
    fn flag_error_keeps_the_last_code() {
        let status = SharedStatus::new();
        status.set_error(false, ErrorCode::DefaultCantConnect);
        status.flag_error();
        assert_eq!(status.error(), (true, ErrorCode::DefaultCantConnect));
    }

    #[test]
    fn stop_round_trips_across_clones() {
        let status = SharedStatus::new();
        let other = status.clone();
        other.request_stop();
        assert!(status.stop_requested());
        status.mark_stopped();
        assert!(other.stopped());
    }
}
