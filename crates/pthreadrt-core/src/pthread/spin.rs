//! Spinlocks: one word, bit 0 is the lock. No substrate involvement.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::atomic;
use crate::error::{PthreadError, PthreadResult};
use crate::pthread::mutex::{PTHREAD_PROCESS_PRIVATE, PTHREAD_PROCESS_SHARED};

const HELD_BIT: usize = 0;
/// Word value of a destroyed or never-initialized lock.
const INVALID: usize = 2;

pub struct PthreadSpinlock {
    word: [AtomicUsize; 1],
}

impl PthreadSpinlock {
    /// An unlocked spinlock.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            word: [AtomicUsize::new(0)],
        }
    }

    #[must_use]
    pub const fn uninit() -> Self {
        Self {
            word: [AtomicUsize::new(INVALID)],
        }
    }

    pub fn init(&self, pshared: i32) -> PthreadResult<()> {
        match pshared {
            PTHREAD_PROCESS_PRIVATE => {}
            PTHREAD_PROCESS_SHARED => return Err(PthreadError::NotSupported),
            _ => return Err(PthreadError::Invalid),
        }
        self.word[0]
            .compare_exchange(INVALID, 0, Ordering::AcqRel, Ordering::Acquire)
            .map(drop)
            .map_err(|_| PthreadError::Busy)
    }

    /// `Busy` while held.
    pub fn destroy(&self) -> PthreadResult<()> {
        match self.word[0].compare_exchange(0, INVALID, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => Ok(()),
            Err(INVALID) => Err(PthreadError::Invalid),
            Err(_) => Err(PthreadError::Busy),
        }
    }

    fn check(&self) -> PthreadResult<()> {
        if self.word[0].load(Ordering::Acquire) == INVALID {
            return Err(PthreadError::Invalid);
        }
        Ok(())
    }

    pub fn lock(&self) -> PthreadResult<()> {
        self.check()?;
        while atomic::test_and_set_bit(HELD_BIT, &self.word) {
            while atomic::test_bit(HELD_BIT, &self.word) {
                std::hint::spin_loop();
            }
        }
        Ok(())
    }

    pub fn try_lock(&self) -> PthreadResult<()> {
        self.check()?;
        if atomic::test_and_set_bit(HELD_BIT, &self.word) {
            return Err(PthreadError::Busy);
        }
        Ok(())
    }

    /// `Permission` when not held.
    pub fn unlock(&self) -> PthreadResult<()> {
        self.check()?;
        if !atomic::test_and_clear_bit(HELD_BIT, &self.word) {
            return Err(PthreadError::Permission);
        }
        Ok(())
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        atomic::test_bit(HELD_BIT, &self.word)
    }
}

impl Default for PthreadSpinlock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PthreadSpinlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PthreadSpinlock")
            .field("locked", &self.is_locked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn lock_cycle() {
        let lock = PthreadSpinlock::new();
        lock.lock().unwrap();
        assert_eq!(lock.try_lock(), Err(PthreadError::Busy));
        assert_eq!(lock.destroy(), Err(PthreadError::Busy));
        lock.unlock().unwrap();
        assert_eq!(lock.unlock(), Err(PthreadError::Permission));
        lock.destroy().unwrap();
        assert_eq!(lock.lock(), Err(PthreadError::Invalid));
        lock.init(PTHREAD_PROCESS_PRIVATE).unwrap();
        assert_eq!(lock.init(PTHREAD_PROCESS_PRIVATE), Err(PthreadError::Busy));
        assert_eq!(
            PthreadSpinlock::uninit().init(PTHREAD_PROCESS_SHARED),
            Err(PthreadError::NotSupported)
        );
    }

    #[test]
    fn excludes_across_threads() {
        let lock = Arc::new(PthreadSpinlock::new());
        let total = Arc::new(AtomicUsize::new(0));
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let total = Arc::clone(&total);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        lock.lock().unwrap();
                        let seen = total.load(Ordering::Relaxed);
                        total.store(seen + 1, Ordering::Relaxed);
                        lock.unlock().unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(total.load(Ordering::Relaxed), 4000);
    }
}
