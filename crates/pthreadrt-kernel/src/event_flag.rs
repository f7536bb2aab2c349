//! Event flags: a 32-bit pattern threads can wait on.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{KernelError, KernelResult};
use crate::thread::{self, Interrupt};

/// How a wait pattern is matched against the flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitMode {
    /// Every bit of the pattern must be set.
    And,
    /// Any bit of the pattern is enough.
    Or,
}

/// What a satisfied wait does to the flag bits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClearMode {
    #[default]
    Keep,
    /// Clear every bit.
    All,
    /// Clear the bits of the wait pattern.
    Pattern,
}

const fn satisfied(bits: u32, pattern: u32, mode: WaitMode) -> bool {
    match mode {
        WaitMode::And => bits & pattern == pattern,
        WaitMode::Or => bits & pattern != 0,
    }
}

const fn apply_clear(bits: u32, pattern: u32, clear: ClearMode) -> u32 {
    match clear {
        ClearMode::Keep => bits,
        ClearMode::All => 0,
        ClearMode::Pattern => bits & !pattern,
    }
}

#[derive(Debug, Default)]
struct FlagState {
    bits: u32,
    waiters: usize,
    deleted: bool,
}

struct FlagShared {
    multiple_waiters: bool,
    state: Mutex<FlagState>,
    cv: Condvar,
}

impl Interrupt for FlagShared {
    fn interrupt(&self) {
        let _state = self.state.lock();
        self.cv.notify_all();
    }
}

#[derive(Clone)]
pub struct EventFlag {
    shared: Arc<FlagShared>,
}

impl EventFlag {
    #[must_use]
    pub fn new(init: u32, multiple_waiters: bool) -> Self {
        Self {
            shared: Arc::new(FlagShared {
                multiple_waiters,
                state: Mutex::new(FlagState {
                    bits: init,
                    ..FlagState::default()
                }),
                cv: Condvar::new(),
            }),
        }
    }

    #[must_use]
    pub fn bits(&self) -> u32 {
        self.shared.state.lock().bits
    }

    /// ORs `bits` into the pattern and wakes waiters.
    pub fn set(&self, bits: u32) -> KernelResult<()> {
        let mut state = self.shared.state.lock();
        if state.deleted {
            return Err(KernelError::UnknownObject);
        }
        state.bits |= bits;
        self.shared.cv.notify_all();
        Ok(())
    }

    /// Clears every bit set in `mask`.
    pub fn clear(&self, mask: u32) -> KernelResult<()> {
        let mut state = self.shared.state.lock();
        if state.deleted {
            return Err(KernelError::UnknownObject);
        }
        state.bits &= !mask;
        Ok(())
    }

    /// Checks the pattern without blocking. Returns the bits as they were
    /// before any clearing.
    pub fn poll(&self, pattern: u32, mode: WaitMode, clear: ClearMode) -> KernelResult<u32> {
        if pattern == 0 {
            return Err(KernelError::IllegalAttr);
        }
        let mut state = self.shared.state.lock();
        if state.deleted {
            return Err(KernelError::UnknownObject);
        }
        if !satisfied(state.bits, pattern, mode) {
            return Err(KernelError::EventFlagCond);
        }
        let seen = state.bits;
        state.bits = apply_clear(seen, pattern, clear);
        Ok(seen)
    }

    pub fn wait(
        &self,
        pattern: u32,
        mode: WaitMode,
        clear: ClearMode,
        timeout: Option<Duration>,
    ) -> KernelResult<u32> {
        if pattern == 0 {
            return Err(KernelError::IllegalAttr);
        }
        let me = thread::current();
        if me.is_killed() {
            return Err(KernelError::ThreadDeleted);
        }
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let _blocked = me.block_on(Arc::clone(&self.shared) as Arc<dyn Interrupt>);
        let mut state = self.shared.state.lock();
        if state.deleted {
            return Err(KernelError::UnknownObject);
        }
        if !self.shared.multiple_waiters && state.waiters > 0 {
            return Err(KernelError::MultipleWaiters);
        }
        state.waiters += 1;
        let outcome = loop {
            if state.deleted {
                break Err(KernelError::WaitDelete);
            }
            if satisfied(state.bits, pattern, mode) {
                let seen = state.bits;
                state.bits = apply_clear(seen, pattern, clear);
                break Ok(seen);
            }
            if me.is_killed() {
                break Err(KernelError::ThreadDeleted);
            }
            match deadline {
                Some(deadline) if Instant::now() >= deadline => break Err(KernelError::WaitTimeout),
                Some(deadline) => {
                    let _ = self.shared.cv.wait_until(&mut state, deadline);
                }
                None => self.shared.cv.wait(&mut state),
            }
        };
        state.waiters -= 1;
        outcome
    }

    pub fn delete(&self) -> KernelResult<()> {
        let mut state = self.shared.state.lock();
        if state.deleted {
            return Err(KernelError::UnknownObject);
        }
        state.deleted = true;
        self.shared.cv.notify_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn and_or_matching() {
        assert!(satisfied(0b110, 0b010, WaitMode::And));
        assert!(!satisfied(0b100, 0b110, WaitMode::And));
        assert!(satisfied(0b100, 0b110, WaitMode::Or));
        assert!(!satisfied(0b001, 0b110, WaitMode::Or));
    }

    #[test]
    fn clear_modes() {
        assert_eq!(apply_clear(0b111, 0b010, ClearMode::Keep), 0b111);
        assert_eq!(apply_clear(0b111, 0b010, ClearMode::All), 0);
        assert_eq!(apply_clear(0b111, 0b010, ClearMode::Pattern), 0b101);
    }

    #[test]
    fn wait_wakes_on_set() {
        let flag = EventFlag::new(0, true);
        let setter = flag.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            setter.set(0b11).unwrap();
        });
        let seen = flag
            .wait(0b11, WaitMode::And, ClearMode::Pattern, Some(Duration::from_secs(5)))
            .unwrap();
        handle.join().unwrap();
        assert_eq!(seen, 0b11);
        assert_eq!(flag.bits(), 0);
    }

    #[test]
    fn poll_and_timeout() {
        let flag = EventFlag::new(0b100, false);
        assert_eq!(
            flag.poll(0b001, WaitMode::Or, ClearMode::Keep),
            Err(KernelError::EventFlagCond)
        );
        assert_eq!(
            flag.wait(0b001, WaitMode::Or, ClearMode::Keep, Some(Duration::from_millis(5))),
            Err(KernelError::WaitTimeout)
        );
        assert_eq!(flag.poll(0b100, WaitMode::And, ClearMode::All), Ok(0b100));
        assert_eq!(flag.bits(), 0);
        assert_eq!(flag.poll(0, WaitMode::Or, ClearMode::Keep), Err(KernelError::IllegalAttr));
    }
}
