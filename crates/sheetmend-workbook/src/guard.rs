//! Per-workbook mutex with a hard hold timeout.
//!
//! Each workbook's lock is either `Free` (no entry in the map) or
//! `Held { deadline, token }`. Waiters sleep until either a release
//! notification or the holder's deadline; a waiter that wakes past the
//! deadline performs the forced `Held -> Free` transition itself, so a hung
//! holder can never block other callers for longer than the timeout.

use crate::config::GuardConfig;
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Held {
    deadline: Instant,
    token: u64,
}

#[derive(Default)]
struct GuardInner {
    /// Held locks only; release removes the entry.
    locks: Mutex<FxHashMap<String, Held>>,
    released: Condvar,
    next_token: Mutex<u64>,
}

impl GuardInner {
    fn release(&self, workbook_id: &str, token: u64) {
        let mut locks = self.locks.lock();
        match locks.get(workbook_id) {
            Some(held) if held.token == token => {
                locks.remove(workbook_id);
                self.released.notify_all();
            }
            // Already force-released, possibly re-acquired by someone else.
            _ => debug!(workbook = workbook_id, "release of an expired lock ignored"),
        }
    }
}

#[derive(Clone)]
pub struct ConcurrencyGuard {
    timeout: Duration,
    inner: Arc<GuardInner>,
}

impl Default for ConcurrencyGuard {
    fn default() -> Self {
        Self::new(GuardConfig::default())
    }
}

impl ConcurrencyGuard {
    pub fn new(config: GuardConfig) -> Self {
        Self {
            timeout: config.timeout(),
            inner: Arc::default(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Block until the workbook's lock is free (or its holder's deadline has
    /// passed) and take it. Not FIFO.
    pub fn acquire(&self, workbook_id: &str) -> WorkbookLock {
        let mut locks = self.inner.locks.lock();
        loop {
            let now = Instant::now();
            match locks.get(workbook_id).copied() {
                Some(Held { deadline, .. }) if deadline > now => {
                    let _ = self.inner.released.wait_until(&mut locks, deadline);
                }
                Some(Held { token, .. }) => {
                    warn!(
                        workbook = workbook_id,
                        token,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "force-releasing workbook lock held past its timeout"
                    );
                    locks.remove(workbook_id);
                    self.inner.released.notify_all();
                }
                None => {
                    let token = {
                        let mut next = self.inner.next_token.lock();
                        *next += 1;
                        *next
                    };
                    locks.insert(
                        workbook_id.to_string(),
                        Held {
                            deadline: now + self.timeout,
                            token,
                        },
                    );
                    return WorkbookLock {
                        inner: Arc::clone(&self.inner),
                        workbook_id: workbook_id.to_string(),
                        token,
                        released: false,
                    };
                }
            }
        }
    }

    /// Whether a live (unexpired) lock is held for the workbook.
    pub fn is_held(&self, workbook_id: &str) -> bool {
        matches!(
            self.inner.locks.lock().get(workbook_id),
            Some(held) if held.deadline > Instant::now()
        )
    }

    /// Workbooks with an entry in the lock table, expired holders included.
    pub fn tracked_workbooks(&self) -> usize {
        self.inner.locks.lock().len()
    }
}

/// Held lock. Released on `release()` or drop; releasing twice, or after a
/// forced release, does nothing.
pub struct WorkbookLock {
    inner: Arc<GuardInner>,
    workbook_id: String,
    token: u64,
    released: bool,
}

impl WorkbookLock {
    pub fn workbook_id(&self) -> &str {
        &self.workbook_id
    }

    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.inner.release(&self.workbook_id, self.token);
    }
}

impl Drop for WorkbookLock {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn guard(timeout_ms: u64) -> ConcurrencyGuard {
        ConcurrencyGuard::new(GuardConfig { timeout_ms })
    }

    #[test]
    fn release_is_idempotent() {
        let guard = guard(60_000);
        let mut lock = guard.acquire("wb");
        assert!(guard.is_held("wb"));
        lock.release();
        lock.release();
        assert!(!guard.is_held("wb"));
        let _again = guard.acquire("wb");
        assert!(guard.is_held("wb"));
    }

    #[test]
    fn waiter_proceeds_after_release() {
        let guard = guard(60_000);
        let lock = guard.acquire("wb");
        let acquired = Arc::new(AtomicBool::new(false));
        let waiter = {
            let guard = guard.clone();
            let acquired = Arc::clone(&acquired);
            std::thread::spawn(move || {
                let _lock = guard.acquire("wb");
                acquired.store(true, Ordering::SeqCst);
            })
        };
        std::thread::sleep(Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst));
        drop(lock);
        waiter.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn other_workbooks_are_independent() {
        let guard = guard(60_000);
        let _a = guard.acquire("a");
        let _b = guard.acquire("b");
        assert!(guard.is_held("a") && guard.is_held("b"));
    }

    #[test]
    fn stale_release_does_not_free_the_next_holder() {
        let guard = guard(300);
        let mut first = guard.acquire("wb");
        let _second = guard.acquire("wb");
        first.release();
        assert!(guard.is_held("wb"));
    }

    #[test]
    fn released_workbooks_leave_no_entry_behind() {
        let long = guard(60_000);
        for n in 0..50 {
            let mut lock = long.acquire(&format!("wb-{n}"));
            lock.release();
        }
        assert_eq!(long.tracked_workbooks(), 0);

        let short = guard(50);
        let mut stale = short.acquire("wb");
        let mut next = short.acquire("wb");
        next.release();
        stale.release();
        assert_eq!(short.tracked_workbooks(), 0);
    }
}
