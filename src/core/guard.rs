//! Deferred cleanup guard

use std::panic::{self, AssertUnwindSafe};

/// Runs a cleanup closure exactly once when dropped
///
/// A panic raised by the closure is caught and logged so that cleanup never
/// unwinds past the guard.
pub struct ScopeGuard<F: FnOnce()> {
    cleanup: Option<F>,
}

impl<F: FnOnce()> ScopeGuard<F> {
    /// Create a guard that runs `cleanup` on drop
    pub fn new(cleanup: F) -> Self {
        Self { cleanup: Some(cleanup) }
    }

    /// Disarm the guard without running the closure
    pub fn dismiss(mut self) {
        self.cleanup = None;
    }
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            if panic::catch_unwind(AssertUnwindSafe(cleanup)).is_err() {
                tracing::warn!("[ScopeGuard] cleanup closure panicked, ignored");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_runs_once_on_drop() {
        let count = Cell::new(0);
        {
            let _guard = ScopeGuard::new(|| count.set(count.get() + 1));
        }
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_runs_on_early_return() {
        fn body(flag: &Cell<bool>) -> Option<()> {
            let _guard = ScopeGuard::new(|| flag.set(true));
            None?;
            Some(())
        }
        let flag = Cell::new(false);
        assert!(body(&flag).is_none());
        assert!(flag.get());
    }

    #[test]
    fn test_dismiss() {
        let count = Cell::new(0);
        let guard = ScopeGuard::new(|| count.set(1));
        guard.dismiss();
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn test_panicking_cleanup_is_swallowed() {
        let guard = ScopeGuard::new(|| panic!("cleanup failure"));
        drop(guard);
    }
}
