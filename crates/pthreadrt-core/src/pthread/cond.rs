//! Condition variables over a counting semaphore.
//!
//! `waiters` counts threads between "registered" and "consumed a wakeup".
//! Signalers decrement it under the same lock they signal under, so the
//! semaphore never receives more units than there are waiters. A waiter
//! releases its mutex from inside the semaphore's queue-registration
//! callback: by the time another thread can take the mutex and signal,
//! the waiter is already queued and cannot miss the unit.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use pthreadrt_kernel::{KernelError, QueueOrder, Semaphore};

use crate::config;
use crate::errno;
use crate::error::{PthreadError, PthreadResult, check_kernel};
use crate::lazy::{LazySlot, SlotPhase};
use crate::pthread::cancel;
use crate::pthread::mutex::{MutexCore, PTHREAD_PROCESS_PRIVATE, PTHREAD_PROCESS_SHARED, PthreadMutex};
use crate::pthread::tcb::{self, Tcb};
use crate::runtime;
use crate::time::{self, Timespec};

const COND_SEMA_MAX: i64 = i32::MAX as i64;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CondAttr {
    _private: (),
}

impl CondAttr {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_pshared(&mut self, pshared: i32) -> PthreadResult<()> {
        match pshared {
            PTHREAD_PROCESS_PRIVATE => Ok(()),
            PTHREAD_PROCESS_SHARED => Err(PthreadError::NotSupported),
            _ => Err(PthreadError::Invalid),
        }
    }

    #[must_use]
    pub fn pshared(&self) -> i32 {
        PTHREAD_PROCESS_PRIVATE
    }
}

// ---------------------------------------------------------------------------
// Semantics contract
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondvarContractState {
    Uninitialized,
    /// Initialized, nobody waiting.
    Idle,
    Waiting,
    Destroyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondvarContractOp {
    Init,
    Destroy,
    Wait,
    TimedWait,
    Signal,
    Broadcast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CondvarContractOutcome {
    pub next: CondvarContractState,
    pub errno: i32,
    pub blocks: bool,
}

/// Transition table. `others_waiting` tells whether waiters remain after
/// a signal takes one.
#[must_use]
pub const fn condvar_contract_transition(
    state: CondvarContractState,
    op: CondvarContractOp,
    others_waiting: bool,
) -> CondvarContractOutcome {
    use CondvarContractOp as Op;
    use CondvarContractState as St;

    let (next, errno, blocks) = match state {
        St::Uninitialized | St::Destroyed => match op {
            Op::Init => (St::Idle, 0, false),
            _ => (state, errno::EINVAL, false),
        },
        St::Idle => match op {
            Op::Init => (St::Idle, errno::EBUSY, false),
            Op::Destroy => (St::Destroyed, 0, false),
            Op::Wait | Op::TimedWait => (St::Waiting, 0, true),
            Op::Signal | Op::Broadcast => (St::Idle, 0, false),
        },
        St::Waiting => match op {
            Op::Init | Op::Destroy => (St::Waiting, errno::EBUSY, false),
            Op::Wait | Op::TimedWait => (St::Waiting, 0, true),
            Op::Signal if others_waiting => (St::Waiting, 0, false),
            Op::Signal | Op::Broadcast => (St::Idle, 0, false),
        },
    };
    CondvarContractOutcome {
        next,
        errno,
        blocks,
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub(crate) struct CondCore {
    sema: Semaphore,
    waiters: Mutex<u32>,
}

impl CondCore {
    fn new() -> PthreadResult<Self> {
        Ok(Self {
            sema: Semaphore::new(0, COND_SEMA_MAX, QueueOrder::Fifo)?,
            waiters: Mutex::new(0),
        })
    }

    /// A waiter gave up without a signaler consuming its slot. A unit that
    /// raced in for it is taken instead, and the wait counts as signaled.
    fn retire(&self) -> bool {
        let mut waiters = self.waiters.lock();
        if self.sema.poll(1).is_ok() {
            return true;
        }
        *waiters = waiters.saturating_sub(1);
        false
    }
}

/// Mutex hand-back shared between a waiter and its cleanup handler.
struct Relock {
    mutex: Option<Arc<MutexCore>>,
    /// Extra recursion levels released; -1 while the mutex is still held.
    depth: AtomicI64,
    error: Mutex<Option<PthreadError>>,
}

impl Relock {
    fn release(&self, me: &Tcb) {
        let Some(mutex) = &self.mutex else {
            return;
        };
        match mutex.release_all(me) {
            Ok(depth) => self.depth.store(i64::from(depth), Ordering::Release),
            Err(err) => {
                tracing::error!(error = %err, "condition wait could not release its mutex");
                *self.error.lock() = Some(err);
            }
        }
    }

    fn restore(&self) {
        let depth = self.depth.swap(-1, Ordering::AcqRel);
        let (Some(mutex), Ok(depth)) = (&self.mutex, u32::try_from(depth)) else {
            return;
        };
        if let Err(err) = mutex.reacquire(&tcb::current(), depth) {
            *self.error.lock() = Some(err);
        }
    }
}

/// A POSIX condition variable.
pub struct PthreadCond {
    slot: LazySlot<CondCore>,
    destroyed: AtomicBool,
}

impl PthreadCond {
    /// Condition variable built on first use.
    #[must_use]
    pub const fn initializer() -> Self {
        Self {
            slot: LazySlot::sentinel(),
            destroyed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub const fn uninit() -> Self {
        Self {
            slot: LazySlot::invalid(),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn new(_attr: Option<&CondAttr>) -> PthreadResult<Self> {
        Ok(Self {
            slot: LazySlot::ready(CondCore::new()?),
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn init(&self, _attr: Option<&CondAttr>) -> PthreadResult<()> {
        let core = CondCore::new()?;
        runtime::critical(|| {
            self.slot.install(core)?;
            self.destroyed.store(false, Ordering::Release);
            Ok(())
        })
    }

    /// Fails with `Busy` while threads wait.
    pub fn destroy(&self) -> PthreadResult<()> {
        runtime::critical(|| {
            if let Ok(core) = self.slot.get() {
                if *core.waiters.lock() > 0 {
                    return Err(PthreadError::Busy);
                }
            }
            if let Some(core) = self.slot.take()? {
                check_kernel(core.sema.delete(), "condvar semaphore delete");
            }
            self.destroyed.store(true, Ordering::Release);
            Ok(())
        })
    }

    fn core(&self) -> PthreadResult<Arc<CondCore>> {
        self.slot.get_or_promote(CondCore::new)
    }

    /// Releases `mutex`, waits for a signal, and relocks `mutex` to the
    /// depth it had. A cancellation point.
    pub fn wait(&self, mutex: &PthreadMutex) -> PthreadResult<()> {
        self.wait_inner(mutex, None)
    }

    /// Like [`wait`](Self::wait), giving up with `TimedOut` at `deadline`.
    /// The mutex is relocked either way.
    pub fn timed_wait(&self, mutex: &PthreadMutex, deadline: &Timespec) -> PthreadResult<()> {
        let timeout = time::relative_timeout(deadline)?;
        self.wait_inner(mutex, Some(timeout))
    }

    fn wait_inner(&self, mutex: &PthreadMutex, timeout: Option<Duration>) -> PthreadResult<()> {
        let core = self.core()?;
        let me = tcb::current();
        let held = if config::locking_enabled() {
            let held = mutex.core()?;
            if !held.is_owner(&me) {
                return Err(PthreadError::Permission);
            }
            Some(held)
        } else {
            None
        };
        cancel::testcancel_for(&me);

        let relock = Arc::new(Relock {
            mutex: held,
            depth: AtomicI64::new(-1),
            error: Mutex::new(None),
        });
        let on_cancel = Arc::clone(&relock);
        me.push_cleanup(Box::new(move || on_cancel.restore()));

        *core.waiters.lock() += 1;
        let waited = core.sema.wait_notify(1, timeout, || {
            relock.release(&me);
            me.enter_wait();
        });
        me.leave_wait();

        let result = match waited {
            Ok(()) => {
                cancel::absorb_delivery();
                Ok(())
            }
            Err(KernelError::ThreadDeleted) => {
                core.retire();
                cancel::on_deleted(&me)
            }
            Err(KernelError::WaitTimeout) => {
                if core.retire() {
                    Ok(())
                } else {
                    Err(PthreadError::TimedOut)
                }
            }
            Err(err) => {
                core.retire();
                Err(err.into())
            }
        };

        if let Some(restore) = me.pop_cleanup() {
            restore();
        }
        if let Some(err) = relock.error.lock().take() {
            return Err(err);
        }
        result
    }

    /// Wakes one waiter; a no-op when nobody waits.
    pub fn signal(&self) -> PthreadResult<()> {
        let core = self.core()?;
        let mut waiters = core.waiters.lock();
        if *waiters > 0 {
            core.sema.signal(1)?;
            *waiters -= 1;
        }
        Ok(())
    }

    /// Wakes every waiter registered at the time of the call.
    pub fn broadcast(&self) -> PthreadResult<()> {
        let core = self.core()?;
        let mut waiters = core.waiters.lock();
        if *waiters > 0 {
            core.sema.signal(i64::from(*waiters))?;
            *waiters = 0;
        }
        Ok(())
    }

    /// Threads registered and not yet woken.
    #[must_use]
    pub fn waiter_count(&self) -> u32 {
        self.slot.get().map_or(0, |core| *core.waiters.lock())
    }

    #[must_use]
    pub fn contract_state(&self) -> CondvarContractState {
        match self.slot.phase() {
            SlotPhase::Invalid if self.destroyed.load(Ordering::Acquire) => {
                CondvarContractState::Destroyed
            }
            SlotPhase::Invalid => CondvarContractState::Uninitialized,
            _ if self.waiter_count() > 0 => CondvarContractState::Waiting,
            _ => CondvarContractState::Idle,
        }
    }
}

impl Default for PthreadCond {
    fn default() -> Self {
        Self::initializer()
    }
}

impl fmt::Debug for PthreadCond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PthreadCond")
            .field("waiters", &self.waiter_count())
            .finish()
    }
}
