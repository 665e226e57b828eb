//! Fire-once teardown guard for the viewer host process.
//!
//! The routine runs exactly once no matter how many exit paths race to it:
//! an explicit `trigger`, a second guard handle, or `Drop`. Avoid calling
//! `std::process::exit` without triggering first, since `Drop` would be
//! skipped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared state behind every handle to one cleanup routine.
struct CleanupInner {
    /// Ensures the cleanup runs only once.
    fired: AtomicBool,
    /// The teardown routine. Must be fast and resilient.
    cleanup: Arc<dyn Fn() + Send + Sync + 'static>,
}

impl CleanupInner {
    fn fire_once(&self) {
        if !self.fired.swap(true, Ordering::SeqCst) {
            log::info!("cleanup: running teardown routine");
            (self.cleanup)();
            log::info!("cleanup: teardown completed");
        }
    }
}

/// Guard owning a teardown routine; clone-free, share via `Arc` if needed.
pub struct CleanupGuard {
    state: Arc<CleanupInner>,
}

impl CleanupGuard {
    pub fn new<F>(cleanup_fn: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        CleanupGuard {
            state: Arc::new(CleanupInner {
                fired: AtomicBool::new(false),
                cleanup: Arc::new(cleanup_fn),
            }),
        }
    }

    /// Manually trigger cleanup (idempotent).
    pub fn trigger(&self) {
        self.state.fire_once();
    }

    /// Whether the cleanup has run already.
    pub fn was_triggered(&self) -> bool {
        self.state.fired.load(Ordering::SeqCst)
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if !self.was_triggered() {
            log::debug!("cleanup: triggering from Drop");
            self.state.fire_once();
        }
    }
}
