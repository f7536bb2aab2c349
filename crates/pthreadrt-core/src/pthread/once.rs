//! One-time initialization.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::PthreadResult;
use crate::pthread::mutex::PthreadMutex;
use crate::pthread::tcb::{self, Tcb};

/// Runs an initializer at most once to completion. An initializer that is
/// cancelled or panics does not count; the next caller runs it again.
pub struct PthreadOnce {
    done: AtomicBool,
    lock: PthreadMutex,
}

/// Pops and runs the unlock handler unless a cancellation already did.
struct UnlockOnExit<'a> {
    me: &'a Arc<Tcb>,
    depth: usize,
}

impl Drop for UnlockOnExit<'_> {
    fn drop(&mut self) {
        if self.me.cleanup_depth() == self.depth {
            if let Some(unlock) = self.me.pop_cleanup() {
                unlock();
            }
        }
    }
}

impl PthreadOnce {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            done: AtomicBool::new(false),
            lock: PthreadMutex::initializer(),
        }
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Runs `init` unless some earlier call already completed it. Callers
    /// racing with the first one wait for it to finish.
    pub fn call_once<F: FnOnce()>(&self, init: F) -> PthreadResult<()> {
        if self.is_done() {
            return Ok(());
        }
        // Ignores the global locking switch: this lock is the once guarantee.
        let core = self.lock.core()?;
        let me = tcb::current();
        core.lock(&me, None)?;

        let held = Arc::clone(&core);
        me.push_cleanup(Box::new(move || {
            if let Err(err) = held.unlock(&tcb::current()) {
                tracing::error!(error = %err, "once-control unlock failed");
            }
        }));
        let _unlock = UnlockOnExit {
            me: &me,
            depth: me.cleanup_depth(),
        };
        if !self.is_done() {
            init();
            self.done.store(true, Ordering::Release);
        }
        Ok(())
    }
}

impl Default for PthreadOnce {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PthreadOnce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PthreadOnce")
            .field("done", &self.is_done())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn runs_once_across_threads() {
        static ONCE: PthreadOnce = PthreadOnce::new();
        static RUNS: AtomicUsize = AtomicUsize::new(0);
        let workers: Vec<_> = (0..4)
            .map(|_| {
                std::thread::spawn(|| {
                    ONCE.call_once(|| {
                        RUNS.fetch_add(1, Ordering::SeqCst);
                    })
                    .unwrap();
                    assert!(ONCE.is_done());
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(RUNS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_initializer_can_be_retried() {
        static ONCE: PthreadOnce = PthreadOnce::new();
        let first = std::thread::spawn(|| ONCE.call_once(|| panic!("init failed"))).join();
        assert!(first.is_err());
        assert!(!ONCE.is_done());
        std::thread::spawn(|| ONCE.call_once(|| {}).unwrap())
            .join()
            .unwrap();
        assert!(ONCE.is_done());
    }
}
