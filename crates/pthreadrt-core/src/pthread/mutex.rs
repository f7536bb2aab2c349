//! POSIX mutexes over a capacity-N substrate semaphore.
//!
//! The owner is recorded as a bare native handle and only ever compared,
//! never followed. Priority-inherit mutexes keep a per-level count of
//! blocked waiters so the holder can be boosted to the most urgent one;
//! priority-protect mutexes raise the holder to the ceiling through the
//! per-level hold counts in its TCB.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use pthreadrt_kernel::{
    self as kernel, KernelError, PRIORITY_LEVELS, QueueOrder, Semaphore, ThreadUid,
    USER_LOWEST_PRIORITY, valid_priority,
};

use crate::config;
use crate::errno;
use crate::error::{PthreadError, PthreadResult, check_kernel};
use crate::lazy::{LazySlot, SlotPhase};
use crate::pthread::cancel;
use crate::pthread::tcb::{self, Tcb};
use crate::runtime;
use crate::time::{self, Timespec};

// ---------------------------------------------------------------------------
// Attribute constants
// ---------------------------------------------------------------------------

/// Normal mutex: self-relock blocks forever.
pub const PTHREAD_MUTEX_NORMAL: i32 = 0;
/// The owner may lock again; each lock needs its own unlock.
pub const PTHREAD_MUTEX_RECURSIVE: i32 = 1;
/// Self-relock and foreign unlock are reported as errors.
pub const PTHREAD_MUTEX_ERRORCHECK: i32 = 2;
pub const PTHREAD_MUTEX_DEFAULT: i32 = PTHREAD_MUTEX_NORMAL;

pub const PTHREAD_PRIO_NONE: i32 = 0;
pub const PTHREAD_PRIO_INHERIT: i32 = 1;
pub const PTHREAD_PRIO_PROTECT: i32 = 2;

pub const PTHREAD_PROCESS_PRIVATE: i32 = 0;
pub const PTHREAD_PROCESS_SHARED: i32 = 1;

/// Waiters are served in arrival order.
pub const PTHREAD_MUTEX_Q_FIFO_NP: i32 = 0;
/// Waiters are served by thread priority.
pub const PTHREAD_MUTEX_Q_PRIO_NP: i32 = 1;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutexKind {
    #[default]
    Normal,
    Recursive,
    ErrorCheck,
}

impl MutexKind {
    #[must_use]
    pub const fn as_raw(self) -> i32 {
        match self {
            Self::Normal => PTHREAD_MUTEX_NORMAL,
            Self::Recursive => PTHREAD_MUTEX_RECURSIVE,
            Self::ErrorCheck => PTHREAD_MUTEX_ERRORCHECK,
        }
    }

    pub const fn from_raw(raw: i32) -> PthreadResult<Self> {
        match raw {
            PTHREAD_MUTEX_NORMAL => Ok(Self::Normal),
            PTHREAD_MUTEX_RECURSIVE => Ok(Self::Recursive),
            PTHREAD_MUTEX_ERRORCHECK => Ok(Self::ErrorCheck),
            _ => Err(PthreadError::Invalid),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutexProtocol {
    #[default]
    None,
    Inherit,
    Protect,
}

impl MutexProtocol {
    #[must_use]
    pub const fn as_raw(self) -> i32 {
        match self {
            Self::None => PTHREAD_PRIO_NONE,
            Self::Inherit => PTHREAD_PRIO_INHERIT,
            Self::Protect => PTHREAD_PRIO_PROTECT,
        }
    }

    pub const fn from_raw(raw: i32) -> PthreadResult<Self> {
        match raw {
            PTHREAD_PRIO_NONE => Ok(Self::None),
            PTHREAD_PRIO_INHERIT => Ok(Self::Inherit),
            PTHREAD_PRIO_PROTECT => Ok(Self::Protect),
            _ => Err(PthreadError::NotSupported),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutexAttr {
    kind: MutexKind,
    protocol: MutexProtocol,
    prioceiling: u8,
    queue: QueueOrder,
    max_count: u32,
}

impl Default for MutexAttr {
    fn default() -> Self {
        Self {
            kind: MutexKind::Normal,
            protocol: MutexProtocol::None,
            prioceiling: USER_LOWEST_PRIORITY,
            queue: QueueOrder::Fifo,
            max_count: 1,
        }
    }
}

impl MutexAttr {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn kind(&self) -> MutexKind {
        self.kind
    }

    pub fn set_kind(&mut self, kind: MutexKind) {
        self.kind = kind;
    }

    #[must_use]
    pub fn protocol(&self) -> MutexProtocol {
        self.protocol
    }

    pub fn set_protocol(&mut self, protocol: MutexProtocol) {
        self.protocol = protocol;
    }

    #[must_use]
    pub fn prioceiling(&self) -> u8 {
        self.prioceiling
    }

    pub fn set_prioceiling(&mut self, ceiling: u8) -> PthreadResult<()> {
        if !valid_priority(ceiling) {
            return Err(PthreadError::Invalid);
        }
        self.prioceiling = ceiling;
        Ok(())
    }

    #[must_use]
    pub fn queue_order(&self) -> QueueOrder {
        self.queue
    }

    pub fn set_queue_order(&mut self, order: QueueOrder) {
        self.queue = order;
    }

    /// Raw queueing policy (`PTHREAD_MUTEX_Q_*_NP`).
    pub fn set_queue_policy_raw(&mut self, raw: i32) -> PthreadResult<()> {
        self.queue = match raw {
            PTHREAD_MUTEX_Q_FIFO_NP => QueueOrder::Fifo,
            PTHREAD_MUTEX_Q_PRIO_NP => QueueOrder::Priority,
            _ => return Err(PthreadError::Invalid),
        };
        Ok(())
    }

    #[must_use]
    pub fn max_count(&self) -> u32 {
        self.max_count
    }

    /// Lets up to `count` holders in at once.
    pub fn set_max_count(&mut self, count: u32) -> PthreadResult<()> {
        if count == 0 || i32::try_from(count).is_err() {
            return Err(PthreadError::Invalid);
        }
        self.max_count = count;
        Ok(())
    }

    /// Only process-private mutexes exist.
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

/// Abstract mutex state as seen by the calling thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutexContractState {
    Uninitialized,
    Unlocked,
    LockedBySelf,
    LockedByOther,
    /// Destroyed; must be initialized again before use.
    Destroyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutexContractOp {
    Init,
    Lock,
    TryLock,
    Unlock,
    Destroy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutexContractOutcome {
    pub next: MutexContractState,
    /// errno-style result, 0 on success.
    pub errno: i32,
    /// The operation waits for another thread to make progress.
    pub blocks: bool,
}

const fn outcome(next: MutexContractState, errno: i32, blocks: bool) -> MutexContractOutcome {
    MutexContractOutcome {
        next,
        errno,
        blocks,
    }
}

/// Transition table for capacity-1 mutexes of each kind.
#[must_use]
pub const fn mutex_contract_transition(
    kind: MutexKind,
    state: MutexContractState,
    op: MutexContractOp,
) -> MutexContractOutcome {
    use MutexContractOp as Op;
    use MutexContractState as St;

    match state {
        St::Uninitialized | St::Destroyed => match op {
            Op::Init => outcome(St::Unlocked, 0, false),
            _ => outcome(state, errno::EINVAL, false),
        },
        St::Unlocked => match op {
            Op::Init => outcome(St::Unlocked, errno::EBUSY, false),
            Op::Lock | Op::TryLock => outcome(St::LockedBySelf, 0, false),
            Op::Unlock => outcome(St::Unlocked, errno::EPERM, false),
            Op::Destroy => outcome(St::Destroyed, 0, false),
        },
        St::LockedByOther => match op {
            Op::Init | Op::TryLock | Op::Destroy => outcome(state, errno::EBUSY, false),
            Op::Lock => outcome(state, 0, true),
            Op::Unlock => outcome(state, errno::EPERM, false),
        },
        St::LockedBySelf => match op {
            Op::Init | Op::Destroy => outcome(state, errno::EBUSY, false),
            Op::Unlock => outcome(St::Unlocked, 0, false),
            Op::TryLock => match kind {
                MutexKind::Recursive => outcome(state, 0, false),
                _ => outcome(state, errno::EBUSY, false),
            },
            Op::Lock => match kind {
                MutexKind::Recursive => outcome(state, 0, false),
                MutexKind::ErrorCheck => outcome(state, errno::EDEADLK, false),
                MutexKind::Normal => outcome(state, 0, true),
            },
        },
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub(crate) struct MutexCore {
    sema: Semaphore,
    owner: AtomicU32,
    recursion: AtomicU32,
    kind: MutexKind,
    protocol: MutexProtocol,
    counted: bool,
    prioceiling: AtomicU8,
    /// Ceiling taken by the current protect holder.
    held_ceiling: AtomicU8,
    /// Blocked waiters per priority level (inherit protocol).
    priowait: Arc<PrioWaiters>,
}

/// Per-level counts of threads blocked on one inherit mutex. Ownership
/// changes happen under this lock so boosts never target a stale owner.
pub(crate) struct PrioWaiters {
    levels: Mutex<[u16; PRIORITY_LEVELS]>,
}

impl PrioWaiters {
    fn new() -> Self {
        Self {
            levels: Mutex::new([0; PRIORITY_LEVELS]),
        }
    }
}

fn top_waiter(levels: &[u16; PRIORITY_LEVELS]) -> Option<u8> {
    levels.iter().position(|&n| n > 0).map(|level| level as u8)
}

/// Moves `uid` to the most urgent of its base priority, its held ceilings
/// and the top waiter of every inherit mutex it still holds. The waiter
/// tables stay locked across the change so a concurrent boost is not lost.
pub(crate) fn settle_priority(tcb: &Tcb, uid: ThreadUid) -> kernel::KernelResult<()> {
    tcb.with_inherit_held(|held| {
        let tables: Vec<_> = held.iter().map(|waiters| waiters.levels.lock()).collect();
        let floor = tcb.ceiling_priority();
        let target = tables
            .iter()
            .filter_map(|levels| top_waiter(levels))
            .fold(floor, u8::min);
        kernel::thread::change_priority(uid, target)
    })
}

#[derive(Clone, Copy)]
enum Acquire {
    Try,
    Block(Option<Duration>),
}

impl MutexCore {
    fn new(attr: &MutexAttr) -> PthreadResult<Self> {
        let max = i64::from(attr.max_count);
        let sema = Semaphore::new(max, max, attr.queue).map_err(PthreadError::from)?;
        Ok(Self {
            sema,
            owner: AtomicU32::new(0),
            recursion: AtomicU32::new(0),
            kind: attr.kind,
            protocol: attr.protocol,
            counted: attr.max_count > 1,
            prioceiling: AtomicU8::new(attr.prioceiling),
            held_ceiling: AtomicU8::new(attr.prioceiling),
            priowait: Arc::new(PrioWaiters::new()),
        })
    }

    pub(crate) fn owner(&self) -> Option<ThreadUid> {
        ThreadUid::from_raw(self.owner.load(Ordering::Acquire))
    }

    pub(crate) fn is_owner(&self, me: &Tcb) -> bool {
        let raw = me.native_raw();
        raw != 0 && self.owner.load(Ordering::Acquire) == raw
    }

    /// Extra levels held beyond the first.
    pub(crate) fn recursion(&self) -> u32 {
        self.recursion.load(Ordering::Acquire)
    }

    fn in_use(&self) -> bool {
        self.owner().is_some() || self.sema.count() < self.sema.max() || self.sema.waiting() > 0
    }

    pub(crate) fn lock(&self, me: &Arc<Tcb>, timeout: Option<Duration>) -> PthreadResult<()> {
        self.acquire(me, Acquire::Block(timeout))
    }

    pub(crate) fn try_lock(&self, me: &Arc<Tcb>) -> PthreadResult<()> {
        self.acquire(me, Acquire::Try)
    }

    fn acquire(&self, me: &Arc<Tcb>, how: Acquire) -> PthreadResult<()> {
        if self.is_owner(me) {
            match self.kind {
                MutexKind::Recursive => {
                    self.recursion.fetch_add(1, Ordering::AcqRel);
                    return Ok(());
                }
                MutexKind::ErrorCheck => {
                    return Err(match how {
                        Acquire::Try => PthreadError::Busy,
                        Acquire::Block(_) => PthreadError::Deadlock,
                    });
                }
                // Blocks on itself.
                MutexKind::Normal => {}
            }
        }

        let ceiling = match self.protocol {
            MutexProtocol::Protect => Some(self.enter_ceiling(me)?),
            _ => None,
        };
        let registered = match (self.protocol, how) {
            (MutexProtocol::Inherit, Acquire::Block(_)) => Some(self.register_waiter()),
            _ => None,
        };

        let taken = match how {
            Acquire::Try => self.sema.poll(1),
            Acquire::Block(timeout) => self.sema.wait(1, timeout),
        };
        match taken {
            Ok(()) => {
                if self.protocol == MutexProtocol::Inherit {
                    self.settle_inherited(me, registered);
                } else {
                    self.owner.store(me.native_raw(), Ordering::Release);
                }
                self.recursion.store(0, Ordering::Release);
                if let Some(ceiling) = ceiling {
                    self.held_ceiling.store(ceiling, Ordering::Release);
                }
                Ok(())
            }
            Err(err) => {
                if let Some(level) = registered {
                    let mut waits = self.priowait.levels.lock();
                    let slot = &mut waits[usize::from(level)];
                    *slot = slot.saturating_sub(1);
                }
                if let Some(ceiling) = ceiling {
                    Self::leave_ceiling(me, ceiling);
                }
                match err {
                    KernelError::ThreadDeleted => cancel::on_deleted(me),
                    KernelError::SemaZero => Err(PthreadError::Busy),
                    KernelError::WaitTimeout => Err(PthreadError::TimedOut),
                    other => Err(other.into()),
                }
            }
        }
    }

    /// Raises the caller to the ceiling. Callers more urgent than the
    /// ceiling are refused.
    fn enter_ceiling(&self, me: &Tcb) -> PthreadResult<u8> {
        let ceiling = self.prioceiling.load(Ordering::Acquire);
        if me.base_priority() < ceiling {
            return Err(PthreadError::Invalid);
        }
        me.hold_ceiling(ceiling);
        let effective = me.ceiling_priority();
        if effective < kernel::thread::current_priority() {
            check_kernel(
                kernel::thread::change_priority(kernel::thread::current_uid(), effective),
                "ceiling priority raise",
            );
        }
        Ok(ceiling)
    }

    fn leave_ceiling(me: &Tcb, ceiling: u8) {
        me.release_ceiling(ceiling);
        check_kernel(
            settle_priority(me, kernel::thread::current_uid()),
            "ceiling priority restore",
        );
    }

    /// Counts the caller as a blocked waiter and lends its priority to the
    /// current owner when that is more urgent.
    fn register_waiter(&self) -> u8 {
        let mine = kernel::thread::current_priority();
        let mut waits = self.priowait.levels.lock();
        waits[usize::from(mine)] += 1;
        if let Some(owner) = self.owner() {
            if let Ok(theirs) = kernel::thread::priority(owner) {
                if mine < theirs {
                    tracing::trace!(owner = %owner, from = theirs, to = mine, "inheriting priority");
                    // The owner may be gone by now; nothing left to boost then.
                    let _ = kernel::thread::change_priority(owner, mine);
                }
            }
        }
        mine
    }

    /// New owner under the inherit protocol: publish ownership, drop our
    /// waiter count, and take on the most urgent remaining waiter.
    fn settle_inherited(&self, me: &Tcb, registered: Option<u8>) {
        me.hold_inherit(Arc::clone(&self.priowait));
        let mut waits = self.priowait.levels.lock();
        self.owner.store(me.native_raw(), Ordering::Release);
        if let Some(level) = registered {
            let slot = &mut waits[usize::from(level)];
            *slot = slot.saturating_sub(1);
        }
        if let Some(top) = top_waiter(&waits) {
            if top < kernel::thread::current_priority() {
                check_kernel(
                    kernel::thread::change_priority(kernel::thread::current_uid(), top),
                    "inherited priority boost",
                );
            }
        }
    }

    pub(crate) fn unlock(&self, me: &Tcb) -> PthreadResult<()> {
        let owned = self.is_owner(me);
        match self.kind {
            MutexKind::Recursive | MutexKind::ErrorCheck if !owned => {
                return Err(PthreadError::Permission);
            }
            MutexKind::Normal if !owned && !self.counted => return Err(PthreadError::Permission),
            _ => {}
        }
        if self.kind == MutexKind::Recursive && self.recursion() > 0 {
            self.recursion.fetch_sub(1, Ordering::AcqRel);
            return Ok(());
        }

        match self.protocol {
            MutexProtocol::Inherit => {
                {
                    let _waits = self.priowait.levels.lock();
                    self.owner.store(0, Ordering::Release);
                    self.release()?;
                }
                me.release_inherit(&self.priowait);
                // Boosts owed through other inherit mutexes still held survive.
                check_kernel(
                    settle_priority(me, kernel::thread::current_uid()),
                    "inherited priority restore",
                );
            }
            MutexProtocol::Protect => {
                self.owner.store(0, Ordering::Release);
                self.release()?;
                Self::leave_ceiling(me, self.held_ceiling.load(Ordering::Acquire));
            }
            MutexProtocol::None => {
                self.owner.store(0, Ordering::Release);
                self.release()?;
            }
        }
        Ok(())
    }

    fn release(&self) -> PthreadResult<()> {
        self.sema.signal(1).map_err(|err| match err {
            KernelError::IllegalCount => PthreadError::Permission,
            other => other.into(),
        })
    }

    /// Releases every level the caller holds and reports how many extra
    /// levels there were, for a condition wait to restore later.
    pub(crate) fn release_all(&self, me: &Tcb) -> PthreadResult<u32> {
        let depth = self.recursion.swap(0, Ordering::AcqRel);
        match self.unlock(me) {
            Ok(()) => Ok(depth),
            Err(err) => {
                self.recursion.store(depth, Ordering::Release);
                Err(err)
            }
        }
    }

    /// Relocks and restores `depth` extra levels.
    pub(crate) fn reacquire(&self, me: &Arc<Tcb>, depth: u32) -> PthreadResult<()> {
        self.lock(me, None)?;
        self.recursion.store(depth, Ordering::Release);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Public handle
// ---------------------------------------------------------------------------

/// A POSIX mutex. Usable from a `static` through the const initializers.
pub struct PthreadMutex {
    slot: LazySlot<MutexCore>,
    static_kind: MutexKind,
    destroyed: AtomicBool,
}

impl PthreadMutex {
    const fn lazy(kind: MutexKind) -> Self {
        Self {
            slot: LazySlot::sentinel(),
            static_kind: kind,
            destroyed: AtomicBool::new(false),
        }
    }

    /// Normal mutex built on first use.
    #[must_use]
    pub const fn initializer() -> Self {
        Self::lazy(MutexKind::Normal)
    }

    #[must_use]
    pub const fn recursive_initializer() -> Self {
        Self::lazy(MutexKind::Recursive)
    }

    #[must_use]
    pub const fn errorcheck_initializer() -> Self {
        Self::lazy(MutexKind::ErrorCheck)
    }

    /// An object that must be [`init`](Self::init)ed before use.
    #[must_use]
    pub const fn uninit() -> Self {
        Self {
            slot: LazySlot::invalid(),
            static_kind: MutexKind::Normal,
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn new(attr: Option<&MutexAttr>) -> PthreadResult<Self> {
        let attr = attr.copied().unwrap_or_default();
        Ok(Self {
            slot: LazySlot::ready(MutexCore::new(&attr)?),
            static_kind: attr.kind,
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn init(&self, attr: Option<&MutexAttr>) -> PthreadResult<()> {
        let attr = attr.copied().unwrap_or_default();
        let core = MutexCore::new(&attr)?;
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
                check_kernel(core.sema.delete(), "mutex semaphore delete");
            }
            self.destroyed.store(true, Ordering::Release);
            Ok(())
        })
    }

    pub(crate) fn core(&self) -> PthreadResult<Arc<MutexCore>> {
        let kind = self.static_kind;
        self.slot.get_or_promote(|| {
            MutexCore::new(&MutexAttr {
                kind,
                ..MutexAttr::default()
            })
        })
    }

    pub fn lock(&self) -> PthreadResult<()> {
        if !config::locking_enabled() {
            return Ok(());
        }
        self.core()?.lock(&tcb::current(), None)
    }

    pub fn try_lock(&self) -> PthreadResult<()> {
        if !config::locking_enabled() {
            return Ok(());
        }
        self.core()?.try_lock(&tcb::current())
    }

    /// Like [`lock`](Self::lock), giving up with `TimedOut` at `deadline`.
    pub fn timed_lock(&self, deadline: &Timespec) -> PthreadResult<()> {
        if !config::locking_enabled() {
            return Ok(());
        }
        let core = self.core()?;
        let timeout = time::relative_timeout(deadline)?;
        core.lock(&tcb::current(), Some(timeout))
    }

    pub fn unlock(&self) -> PthreadResult<()> {
        if !config::locking_enabled() {
            return Ok(());
        }
        self.core()?.unlock(&tcb::current())
    }

    pub fn prioceiling(&self) -> PthreadResult<u8> {
        Ok(self.core()?.prioceiling.load(Ordering::Acquire))
    }

    /// Changes the ceiling, locking the mutex around the change unless the
    /// caller already holds it. Returns the previous ceiling.
    pub fn set_prioceiling(&self, ceiling: u8) -> PthreadResult<u8> {
        if !valid_priority(ceiling) {
            return Err(PthreadError::Invalid);
        }
        let core = self.core()?;
        let me = tcb::current();
        if core.is_owner(&me) {
            return Ok(core.prioceiling.swap(ceiling, Ordering::AcqRel));
        }
        match core.sema.wait(1, None) {
            Ok(()) => {}
            Err(KernelError::ThreadDeleted) => cancel::on_deleted(&me),
            Err(err) => return Err(err.into()),
        }
        let old = core.prioceiling.swap(ceiling, Ordering::AcqRel);
        core.release()?;
        Ok(old)
    }

    /// Current holder, if the mutex has been built and is held.
    #[must_use]
    pub fn owner(&self) -> Option<ThreadUid> {
        self.slot.get().ok().and_then(|core| core.owner())
    }

    /// Extra levels held by a recursive owner.
    #[must_use]
    pub fn recursion_depth(&self) -> u32 {
        self.slot.get().map_or(0, |core| core.recursion())
    }

    #[must_use]
    pub fn kind(&self) -> MutexKind {
        self.slot.get().map_or(self.static_kind, |core| core.kind)
    }

    /// Abstract state relative to the calling thread.
    #[must_use]
    pub fn contract_state(&self) -> MutexContractState {
        match self.slot.phase() {
            SlotPhase::Invalid if self.destroyed.load(Ordering::Acquire) => {
                MutexContractState::Destroyed
            }
            SlotPhase::Invalid => MutexContractState::Uninitialized,
            SlotPhase::Sentinel | SlotPhase::Initializing => MutexContractState::Unlocked,
            SlotPhase::Ready => match self.slot.get() {
                Ok(core) if core.is_owner(&tcb::current()) => MutexContractState::LockedBySelf,
                Ok(core) if core.owner().is_some() => MutexContractState::LockedByOther,
                _ => MutexContractState::Unlocked,
            },
        }
    }
}

impl Default for PthreadMutex {
    fn default() -> Self {
        Self::initializer()
    }
}

impl fmt::Debug for PthreadMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PthreadMutex")
            .field("kind", &self.kind())
            .field("owner", &self.owner())
            .finish()
    }
}
