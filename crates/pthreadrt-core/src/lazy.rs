//! Lazily constructed primitive state.
//!
//! A primitive's fully built state lives behind a tagged slot. Objects made
//! from a static initializer start as a sentinel and are promoted on first
//! use: one caller wins the `Sentinel -> Initializing` transition and builds
//! the state, everyone else backs off until it is `Ready`. A failed build
//! puts the sentinel back so a later call can retry.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::RwLock;

use crate::backoff::Backoff;
use crate::error::{PthreadError, PthreadResult};

const INVALID: u8 = 0;
const SENTINEL: u8 = 1;
const INITIALIZING: u8 = 2;
const READY: u8 = 3;

/// Observable phase of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotPhase {
    /// Never initialized, or destroyed.
    Invalid,
    /// Static initializer not yet promoted.
    Sentinel,
    Initializing,
    Ready,
}

pub(crate) struct LazySlot<T> {
    state: AtomicU8,
    value: RwLock<Option<Arc<T>>>,
}

impl<T> LazySlot<T> {
    pub(crate) const fn invalid() -> Self {
        Self {
            state: AtomicU8::new(INVALID),
            value: parking_lot::const_rwlock(None),
        }
    }

    pub(crate) const fn sentinel() -> Self {
        Self {
            state: AtomicU8::new(SENTINEL),
            value: parking_lot::const_rwlock(None),
        }
    }

    pub(crate) fn ready(value: T) -> Self {
        Self {
            state: AtomicU8::new(READY),
            value: RwLock::new(Some(Arc::new(value))),
        }
    }

    pub(crate) fn phase(&self) -> SlotPhase {
        match self.state.load(Ordering::Acquire) {
            SENTINEL => SlotPhase::Sentinel,
            INITIALIZING => SlotPhase::Initializing,
            READY => SlotPhase::Ready,
            _ => SlotPhase::Invalid,
        }
    }

    /// Built state, without promoting a sentinel.
    pub(crate) fn get(&self) -> PthreadResult<Arc<T>> {
        if self.state.load(Ordering::Acquire) != READY {
            return Err(PthreadError::Invalid);
        }
        self.value.read().clone().ok_or(PthreadError::Invalid)
    }

    /// Built state, promoting a sentinel with `build` exactly once.
    pub(crate) fn get_or_promote(
        &self,
        build: impl FnOnce() -> PthreadResult<T>,
    ) -> PthreadResult<Arc<T>> {
        self.promote(build, Backoff::new())
    }

    fn promote(
        &self,
        build: impl FnOnce() -> PthreadResult<T>,
        mut backoff: Backoff,
    ) -> PthreadResult<Arc<T>> {
        let mut build = Some(build);
        loop {
            match self.state.load(Ordering::Acquire) {
                READY => return self.value.read().clone().ok_or(PthreadError::Invalid),
                INVALID => return Err(PthreadError::Invalid),
                SENTINEL => {
                    if self
                        .state
                        .compare_exchange(SENTINEL, INITIALIZING, Ordering::AcqRel, Ordering::Acquire)
                        .is_err()
                    {
                        continue;
                    }
                    let Some(build) = build.take() else {
                        self.state.store(SENTINEL, Ordering::Release);
                        return Err(PthreadError::Invalid);
                    };
                    return match build() {
                        Ok(value) => {
                            let value = Arc::new(value);
                            *self.value.write() = Some(Arc::clone(&value));
                            self.state.store(READY, Ordering::Release);
                            Ok(value)
                        }
                        Err(err) => {
                            self.state.store(SENTINEL, Ordering::Release);
                            Err(err)
                        }
                    };
                }
                _ => {
                    if backoff.snooze().is_err() {
                        tracing::warn!(
                            steps = backoff.steps(),
                            "gave up waiting for lazy initialization"
                        );
                        return Err(PthreadError::Busy);
                    }
                }
            }
        }
    }

    /// Installs freshly built state into an invalid or sentinel slot.
    pub(crate) fn install(&self, value: T) -> PthreadResult<()> {
        for from in [INVALID, SENTINEL] {
            if self
                .state
                .compare_exchange(from, INITIALIZING, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                *self.value.write() = Some(Arc::new(value));
                self.state.store(READY, Ordering::Release);
                return Ok(());
            }
        }
        Err(PthreadError::Busy)
    }

    /// Invalidates the slot and hands back the built state, if any.
    pub(crate) fn take(&self) -> PthreadResult<Option<Arc<T>>> {
        if self
            .state
            .compare_exchange(SENTINEL, INVALID, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            return Ok(None);
        }
        match self
            .state
            .compare_exchange(READY, INITIALIZING, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                let value = self.value.write().take();
                self.state.store(INVALID, Ordering::Release);
                Ok(value)
            }
            Err(INITIALIZING) => Err(PthreadError::Busy),
            Err(_) => Err(PthreadError::Invalid),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn sentinel_promotes_once_under_contention() {
        static SLOT: LazySlot<usize> = LazySlot::sentinel();
        static BUILDS: AtomicUsize = AtomicUsize::new(0);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                std::thread::spawn(|| {
                    *SLOT
                        .get_or_promote(|| {
                            BUILDS.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(5));
                            Ok(42)
                        })
                        .unwrap()
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), 42);
        }
        assert_eq!(BUILDS.load(Ordering::SeqCst), 1);
        assert_eq!(SLOT.phase(), SlotPhase::Ready);
    }

    #[test]
    fn failed_promotion_restores_sentinel() {
        let slot: LazySlot<u8> = LazySlot::sentinel();
        assert_eq!(slot.get_or_promote(|| Err(PthreadError::NoMemory)), Err(PthreadError::NoMemory));
        assert_eq!(slot.phase(), SlotPhase::Sentinel);
        assert_eq!(*slot.get_or_promote(|| Ok(3)).unwrap(), 3);
    }

    #[test]
    fn stuck_initialization_gives_up_after_limit() {
        let slot: LazySlot<u8> = LazySlot::sentinel();
        slot.state.store(INITIALIZING, Ordering::SeqCst);
        let res = slot.promote(|| Ok(1), Backoff::with_limit(16));
        assert_eq!(res, Err(PthreadError::Busy));
        assert_eq!(slot.phase(), SlotPhase::Initializing);
    }

    #[test]
    fn install_take_cycle() {
        let slot: LazySlot<u8> = LazySlot::invalid();
        assert_eq!(slot.get(), Err(PthreadError::Invalid));
        assert_eq!(slot.get_or_promote(|| Ok(1)), Err(PthreadError::Invalid));
        slot.install(7).unwrap();
        assert_eq!(slot.install(8), Err(PthreadError::Busy));
        assert_eq!(slot.take().unwrap().as_deref(), Some(&7));
        assert_eq!(slot.take(), Err(PthreadError::Invalid));
        slot.install(9).unwrap();
        assert_eq!(*slot.get().unwrap(), 9);
    }
}
