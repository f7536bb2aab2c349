//! Reader/writer locks on one weighted semaphore.
//!
//! The semaphore starts with `RWLOCK_MAX_COUNT` units. A reader takes one,
//! a writer takes all of them. The semaphore grants requests strictly in
//! queue order, so a queued writer holds back every reader that arrives
//! after it: writers cannot starve.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use pthreadrt_kernel::{KernelError, QueueOrder, Semaphore};

use crate::errno;
use crate::error::{PthreadError, PthreadResult, check_kernel};
use crate::lazy::{LazySlot, SlotPhase};
use crate::pthread::cancel;
use crate::pthread::mutex::{PTHREAD_PROCESS_PRIVATE, PTHREAD_PROCESS_SHARED};
use crate::pthread::tcb;
use crate::runtime;
use crate::time::{self, Timespec};

/// Units in a free lock; also the writer's weight.
pub const RWLOCK_MAX_COUNT: i64 = 0x7fff_ffff;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RwlockAttr {
    _private: (),
}

impl RwlockAttr {
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
}

// ---------------------------------------------------------------------------
// Semantics contract
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RwlockContractState {
    Uninitialized,
    Unlocked,
    ReadLocked,
    WriteLocked,
    Destroyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RwlockContractOp {
    Init,
    RdLock,
    TryRdLock,
    WrLock,
    TryWrLock,
    Unlock,
    Destroy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RwlockContractOutcome {
    pub next: RwlockContractState,
    pub errno: i32,
    pub blocks: bool,
}

/// Transition table with no writer queued. `last_reader` tells whether an
/// unlock of a read-locked lock drops the final read hold.
#[must_use]
pub const fn rwlock_contract_transition(
    state: RwlockContractState,
    op: RwlockContractOp,
    last_reader: bool,
) -> RwlockContractOutcome {
    use RwlockContractOp as Op;
    use RwlockContractState as St;

    let (next, errno, blocks) = match state {
        St::Uninitialized | St::Destroyed => match op {
            Op::Init => (St::Unlocked, 0, false),
            _ => (state, errno::EINVAL, false),
        },
        St::Unlocked => match op {
            Op::Init => (St::Unlocked, errno::EBUSY, false),
            Op::RdLock | Op::TryRdLock => (St::ReadLocked, 0, false),
            Op::WrLock | Op::TryWrLock => (St::WriteLocked, 0, false),
            Op::Unlock => (St::Unlocked, errno::EPERM, false),
            Op::Destroy => (St::Destroyed, 0, false),
        },
        St::ReadLocked => match op {
            Op::Init | Op::Destroy | Op::TryWrLock => (state, errno::EBUSY, false),
            Op::RdLock | Op::TryRdLock => (state, 0, false),
            Op::WrLock => (state, 0, true),
            Op::Unlock if last_reader => (St::Unlocked, 0, false),
            Op::Unlock => (state, 0, false),
        },
        St::WriteLocked => match op {
            Op::Init | Op::Destroy | Op::TryRdLock | Op::TryWrLock => {
                (state, errno::EBUSY, false)
            }
            Op::RdLock | Op::WrLock => (state, 0, true),
            Op::Unlock => (St::Unlocked, 0, false),
        },
    };
    RwlockContractOutcome {
        next,
        errno,
        blocks,
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

struct RwCore {
    sema: Semaphore,
    /// Set while a writer holds every unit.
    writelock: AtomicBool,
}

impl RwCore {
    fn new() -> PthreadResult<Self> {
        Ok(Self {
            sema: Semaphore::new(RWLOCK_MAX_COUNT, RWLOCK_MAX_COUNT, QueueOrder::Fifo)?,
            writelock: AtomicBool::new(false),
        })
    }

    fn in_use(&self) -> bool {
        self.sema.count() != RWLOCK_MAX_COUNT || self.sema.waiting() > 0
    }
}

#[derive(Clone, Copy)]
enum Acquire {
    Try,
    Block(Option<Duration>),
}

/// A POSIX reader/writer lock.
pub struct PthreadRwlock {
    slot: LazySlot<RwCore>,
    destroyed: AtomicBool,
}

impl PthreadRwlock {
    /// Lock built on first use.
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

    pub fn new(_attr: Option<&RwlockAttr>) -> PthreadResult<Self> {
        Ok(Self {
            slot: LazySlot::ready(RwCore::new()?),
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn init(&self, _attr: Option<&RwlockAttr>) -> PthreadResult<()> {
        let core = RwCore::new()?;
        runtime::critical(|| {
            self.slot.install(core)?;
            self.destroyed.store(false, Ordering::Release);
            Ok(())
        })
    }

    pub fn destroy(&self) -> PthreadResult<()> {
        runtime::critical(|| {
            if let Ok(core) = self.slot.get() {
                if core.in_use() {
                    return Err(PthreadError::Busy);
                }
            }
            if let Some(core) = self.slot.take()? {
                check_kernel(core.sema.delete(), "rwlock semaphore delete");
            }
            self.destroyed.store(true, Ordering::Release);
            Ok(())
        })
    }

    fn core(&self) -> PthreadResult<Arc<RwCore>> {
        self.slot.get_or_promote(RwCore::new)
    }

    fn acquire(&self, weight: i64, how: Acquire) -> PthreadResult<()> {
        let core = self.core()?;
        let taken = match how {
            Acquire::Try => core.sema.poll(weight),
            Acquire::Block(timeout) => core.sema.wait(weight, timeout),
        };
        match taken {
            Ok(()) => {
                if weight == RWLOCK_MAX_COUNT {
                    core.writelock.store(true, Ordering::Release);
                }
                Ok(())
            }
            Err(KernelError::SemaZero) => Err(PthreadError::Busy),
            Err(KernelError::WaitTimeout) => Err(PthreadError::TimedOut),
            Err(KernelError::ThreadDeleted) => cancel::on_deleted(&tcb::current()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn rdlock(&self) -> PthreadResult<()> {
        self.acquire(1, Acquire::Block(None))
    }

    /// `Busy` while a writer holds the lock or anyone is queued.
    pub fn try_rdlock(&self) -> PthreadResult<()> {
        self.acquire(1, Acquire::Try)
    }

    pub fn timed_rdlock(&self, deadline: &Timespec) -> PthreadResult<()> {
        let timeout = time::relative_timeout(deadline)?;
        self.acquire(1, Acquire::Block(Some(timeout)))
    }

    pub fn wrlock(&self) -> PthreadResult<()> {
        self.acquire(RWLOCK_MAX_COUNT, Acquire::Block(None))
    }

    pub fn try_wrlock(&self) -> PthreadResult<()> {
        self.acquire(RWLOCK_MAX_COUNT, Acquire::Try)
    }

    pub fn timed_wrlock(&self, deadline: &Timespec) -> PthreadResult<()> {
        let timeout = time::relative_timeout(deadline)?;
        self.acquire(RWLOCK_MAX_COUNT, Acquire::Block(Some(timeout)))
    }

    /// Releases a read or write hold. `Permission` when nothing is held.
    pub fn unlock(&self) -> PthreadResult<()> {
        let core = self.core()?;
        let weight = if core.writelock.swap(false, Ordering::AcqRel) {
            RWLOCK_MAX_COUNT
        } else {
            1
        };
        core.sema.signal(weight).map_err(|err| match err {
            KernelError::IllegalCount => PthreadError::Permission,
            other => other.into(),
        })
    }

    /// Threads queued for the lock.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.slot.get().map_or(0, |core| core.sema.waiting())
    }

    #[must_use]
    pub fn contract_state(&self) -> RwlockContractState {
        match self.slot.phase() {
            SlotPhase::Invalid if self.destroyed.load(Ordering::Acquire) => {
                RwlockContractState::Destroyed
            }
            SlotPhase::Invalid => RwlockContractState::Uninitialized,
            _ => match self.slot.get() {
                Ok(core) if core.writelock.load(Ordering::Acquire) => {
                    RwlockContractState::WriteLocked
                }
                Ok(core) if core.sema.count() < RWLOCK_MAX_COUNT => {
                    RwlockContractState::ReadLocked
                }
                _ => RwlockContractState::Unlocked,
            },
        }
    }
}

impl Default for PthreadRwlock {
    fn default() -> Self {
        Self::initializer()
    }
}

impl fmt::Debug for PthreadRwlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PthreadRwlock")
            .field("state", &self.contract_state())
            .field("waiting", &self.waiting())
            .finish()
    }
}
