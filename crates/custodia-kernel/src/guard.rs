//! Reentrancy guard for sweeps and periodic jobs.
//!
//! [`InFlight`] is an atomic flag. `try_enter` succeeds only when no other
//! holder exists; the returned guard clears the flag on drop, including when
//! the holding future is cancelled or panics.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// An in-flight flag guarding one logical operation.
#[derive(Debug, Default)]
pub struct InFlight {
    running: AtomicBool,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a holder currently exists.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Claim the flag, or `None` if it is already held.
    pub fn try_enter(&self) -> Option<InFlightGuard<'_>> {
        self.claim().then(|| InFlightGuard { flag: self })
    }

    /// Claim the flag through an `Arc`, yielding a `'static` guard that can
    /// move into a spawned task.
    pub fn try_enter_owned(self: &Arc<Self>) -> Option<OwnedInFlightGuard> {
        self.claim().then(|| OwnedInFlightGuard {
            flag: Arc::clone(self),
        })
    }

    fn claim(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn release(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Borrowing guard returned by [`InFlight::try_enter`].
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    flag: &'a InFlight,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.release();
    }
}

/// Owning guard returned by [`InFlight::try_enter_owned`].
#[derive(Debug)]
pub struct OwnedInFlightGuard {
    flag: Arc<InFlight>,
}

impl Drop for OwnedInFlightGuard {
    fn drop(&mut self) {
        self.flag.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_entry_is_refused_until_drop() {
        let flag = InFlight::new();
        let guard = flag.try_enter();
        assert!(guard.is_some());
        assert!(flag.is_running());
        assert!(flag.try_enter().is_none());

        drop(guard);
        assert!(!flag.is_running());
        assert!(flag.try_enter().is_some());
    }

    #[test]
    fn owned_guard_releases_on_drop() {
        let flag = Arc::new(InFlight::new());
        let guard = flag.try_enter_owned();
        assert!(guard.is_some());
        assert!(flag.try_enter_owned().is_none());
        drop(guard);
        assert!(!flag.is_running());
    }

    #[tokio::test]
    async fn guard_released_when_future_is_dropped() {
        let flag = Arc::new(InFlight::new());
        let f = Arc::clone(&flag);
        let handle = tokio::spawn(async move {
            let _guard = f.try_enter_owned();
            std::future::pending::<()>().await;
        });
        tokio::task::yield_now().await;
        handle.abort();
        let _ = handle.await;
        assert!(!flag.is_running());
    }
}
