//! Barriers: a party of `needed` threads meets, one of them is elected
//! the serial thread, and the barrier resets for the next round.
//!
//! A waiter cancelled while parked withdraws its arrival. If the round
//! completes between its withdrawal from the queue and that bookkeeping,
//! the release unit meant for it is reclaimed when still unclaimed; when a
//! thread of the next round has already taken it, that thread passes
//! early. Cancelling barrier waiters mid-round is best-effort.

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use pthreadrt_kernel::{KernelError, QueueOrder, Semaphore};

use crate::error::{PthreadError, PthreadResult, check_kernel};
use crate::pthread::cancel;
use crate::pthread::mutex::{PTHREAD_PROCESS_PRIVATE, PTHREAD_PROCESS_SHARED};
use crate::pthread::tcb;
use crate::runtime;

/// Raw value returned to the serial thread.
pub const PTHREAD_BARRIER_SERIAL_THREAD: i32 = -2;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BarrierAttr {
    _private: (),
}

impl BarrierAttr {
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

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarrierWaitResult {
    /// Completed the rendezvous.
    Serial,
    Waiter,
}

impl BarrierWaitResult {
    #[must_use]
    pub const fn is_serial(self) -> bool {
        matches!(self, Self::Serial)
    }

    #[must_use]
    pub const fn as_raw(self) -> i32 {
        match self {
            Self::Serial => PTHREAD_BARRIER_SERIAL_THREAD,
            Self::Waiter => 0,
        }
    }
}

#[derive(Default)]
struct Round {
    /// Arrivals in the current round.
    arrived: u32,
    generation: u64,
}

struct BarrierCore {
    needed: u32,
    count: Mutex<Round>,
    queue: Semaphore,
}

pub struct PthreadBarrier {
    core: RwLock<Option<Arc<BarrierCore>>>,
}

impl PthreadBarrier {
    /// A barrier for `count` parties.
    pub fn new(count: u32, _attr: Option<&BarrierAttr>) -> PthreadResult<Self> {
        Ok(Self {
            core: RwLock::new(Some(Arc::new(Self::build(count)?))),
        })
    }

    #[must_use]
    pub const fn uninit() -> Self {
        Self {
            core: parking_lot::const_rwlock(None),
        }
    }

    fn build(count: u32) -> PthreadResult<BarrierCore> {
        if count < 1 || i32::try_from(count).is_err() {
            return Err(PthreadError::Invalid);
        }
        Ok(BarrierCore {
            needed: count,
            count: Mutex::new(Round::default()),
            queue: Semaphore::new(0, i64::from(count), QueueOrder::Fifo)?,
        })
    }

    pub fn init(&self, count: u32, _attr: Option<&BarrierAttr>) -> PthreadResult<()> {
        let built = Self::build(count)?;
        runtime::critical(|| {
            let mut core = self.core.write();
            if core.is_some() {
                return Err(PthreadError::Busy);
            }
            *core = Some(Arc::new(built));
            Ok(())
        })
    }

    /// `Busy` while a round is in progress.
    pub fn destroy(&self) -> PthreadResult<()> {
        runtime::critical(|| {
            let mut core = self.core.write();
            let Some(built) = core.as_ref() else {
                return Err(PthreadError::Invalid);
            };
            if built.count.lock().arrived > 0 {
                return Err(PthreadError::Busy);
            }
            check_kernel(built.queue.delete(), "barrier semaphore delete");
            *core = None;
            Ok(())
        })
    }

    /// Blocks until `count` threads have arrived.
    pub fn wait(&self) -> PthreadResult<BarrierWaitResult> {
        let core = self.core.read().clone().ok_or(PthreadError::Invalid)?;

        let mut count = core.count.lock();
        count.arrived += 1;
        if count.arrived == core.needed {
            count.arrived = 0;
            count.generation = count.generation.wrapping_add(1);
            if core.needed > 1 {
                core.queue.signal(i64::from(core.needed - 1))?;
            }
            return Ok(BarrierWaitResult::Serial);
        }
        let generation = count.generation;
        // Arrival and enqueue must look atomic to the last arriver.
        let mut count = Some(count);
        match core.queue.wait_notify(1, None, || drop(count.take())) {
            Ok(()) => Ok(BarrierWaitResult::Waiter),
            Err(KernelError::ThreadDeleted) => {
                drop(count.take());
                let mut count = core.count.lock();
                if count.generation == generation {
                    count.arrived = count.arrived.saturating_sub(1);
                } else {
                    // The round closed on our arrival; take back our unit.
                    let _ = core.queue.poll(1);
                }
                drop(count);
                cancel::on_deleted(&tcb::current())
            }
            Err(err) => {
                drop(count.take());
                Err(err.into())
            }
        }
    }

    /// Threads parked in the current round.
    #[must_use]
    pub fn arrived(&self) -> u32 {
        self.core
            .read()
            .as_ref()
            .map_or(0, |core| core.count.lock().arrived)
    }
}

impl fmt::Debug for PthreadBarrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.core.read();
        f.debug_struct("PthreadBarrier")
            .field("needed", &core.as_ref().map(|core| core.needed))
            .field("arrived", &core.as_ref().map(|core| core.count.lock().arrived))
            .finish()
    }
}
