//! Thread control blocks and the registry mapping native handles to them.
//!
//! A TCB is shared through `Arc`: the registry holds one reference while the
//! thread is registered, handles held by other threads keep it readable
//! after that. Fields that several threads touch together sit behind the
//! TCB's own `control` lock; single flags are atomics.

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{
    AtomicBool, AtomicIsize, AtomicU8, AtomicU16, AtomicU32, AtomicUsize, Ordering,
};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};
use pthreadrt_kernel::{self as kernel, DEFAULT_PRIORITY, PRIORITY_LEVELS, ThreadUid};

use crate::atomic;
use crate::backoff::Backoff;
use crate::config::{self, ForeignThreadPolicy};
use crate::error::consistency_failure;
use crate::pthread::cancel::{CancelState, CancelType};
use crate::pthread::mutex::PrioWaiters;
use crate::pthread::tls::{self, PTHREAD_KEYS_MAX};
use crate::runtime;

/// How a thread ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitStatus {
    /// Returned this value from its start routine, or passed it to `exit`.
    Value(usize),
    /// Acted on a cancellation request.
    Canceled,
    /// The start routine panicked.
    Panicked,
}

pub(crate) type CleanupHandler = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Default)]
pub(crate) struct TcbControl {
    /// A cancellation has been delivered; teardown belongs to the target.
    pub(crate) cancel_delivered: bool,
    /// A canceller is between marking the TCB and interrupting the thread.
    pub(crate) delivering: bool,
    pub(crate) join_waiters: u32,
    /// Removed from the registry; the handle is dead.
    pub(crate) reaped: bool,
    pub(crate) status: Option<ExitStatus>,
}

pub(crate) struct Specific {
    pub(crate) values: [usize; PTHREAD_KEYS_MAX],
    /// Number of non-zero entries in `values`.
    pub(crate) live: usize,
}

impl Specific {
    const fn new() -> Self {
        Self {
            values: [0; PTHREAD_KEYS_MAX],
            live: 0,
        }
    }
}

const DETACHED_BIT: usize = 0;

pub(crate) struct Tcb {
    native: AtomicU32,
    name: Mutex<String>,
    pub(crate) control: Mutex<TcbControl>,
    joinable: AtomicBool,
    detached: [AtomicUsize; 1],
    cancel_state: AtomicIsize,
    cancel_type: AtomicIsize,
    cancel_pending: AtomicBool,
    in_wait: AtomicBool,
    terminated: AtomicBool,
    finished: AtomicBool,
    foreign: AtomicBool,
    storage_claimed: AtomicBool,
    base_priority: AtomicU8,
    /// Count of held priority-protect mutexes per ceiling level.
    prio_mutex: [AtomicU16; PRIORITY_LEVELS],
    /// Waiter tables of the priority-inherit mutexes currently held.
    inherit_held: Mutex<Vec<Arc<PrioWaiters>>>,
    cleanup: Mutex<Vec<CleanupHandler>>,
    pub(crate) specific: Mutex<Specific>,
}

impl Tcb {
    pub(crate) fn new() -> Self {
        Self {
            native: AtomicU32::new(0),
            name: Mutex::new(String::new()),
            control: Mutex::new(TcbControl::default()),
            joinable: AtomicBool::new(true),
            detached: [AtomicUsize::new(0)],
            cancel_state: AtomicIsize::new(CancelState::Enable.as_raw()),
            cancel_type: AtomicIsize::new(CancelType::Deferred.as_raw()),
            cancel_pending: AtomicBool::new(false),
            in_wait: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            foreign: AtomicBool::new(false),
            storage_claimed: AtomicBool::new(false),
            base_priority: AtomicU8::new(DEFAULT_PRIORITY),
            prio_mutex: std::array::from_fn(|_| AtomicU16::new(0)),
            inherit_held: Mutex::new(Vec::new()),
            cleanup: Mutex::new(Vec::new()),
            specific: Mutex::new(Specific::new()),
        }
    }

    /// Puts a reaped TCB back into its freshly created state.
    pub(crate) fn reset(&self) {
        self.native.store(0, Ordering::Release);
        self.name.lock().clear();
        *self.control.lock() = TcbControl::default();
        self.joinable.store(true, Ordering::Release);
        self.detached[0].store(0, Ordering::Release);
        self.cancel_state
            .store(CancelState::Enable.as_raw(), Ordering::Release);
        self.cancel_type
            .store(CancelType::Deferred.as_raw(), Ordering::Release);
        self.cancel_pending.store(false, Ordering::Release);
        self.in_wait.store(false, Ordering::Release);
        self.terminated.store(false, Ordering::Release);
        self.finished.store(false, Ordering::Release);
        self.foreign.store(false, Ordering::Release);
        self.base_priority.store(DEFAULT_PRIORITY, Ordering::Release);
        for level in &self.prio_mutex {
            level.store(0, Ordering::Release);
        }
        self.inherit_held.lock().clear();
        self.cleanup.lock().clear();
        *self.specific.lock() = Specific::new();
    }

    pub(crate) fn native(&self) -> Option<ThreadUid> {
        ThreadUid::from_raw(self.native.load(Ordering::Acquire))
    }

    pub(crate) fn native_raw(&self) -> u32 {
        self.native.load(Ordering::Acquire)
    }

    pub(crate) fn bind(&self, uid: ThreadUid) {
        self.native.store(uid.as_raw(), Ordering::Release);
    }

    pub(crate) fn name(&self) -> String {
        self.name.lock().clone()
    }

    pub(crate) fn set_name(&self, name: &str) {
        let mut slot = self.name.lock();
        slot.clear();
        slot.push_str(name);
    }

    pub(crate) fn joinable(&self) -> bool {
        self.joinable.load(Ordering::Acquire)
    }

    pub(crate) fn set_joinable(&self, joinable: bool) {
        self.joinable.store(joinable, Ordering::Release);
    }

    pub(crate) fn is_detached(&self) -> bool {
        atomic::test_bit(DETACHED_BIT, &self.detached)
    }

    /// Sets the detached flag; returns whether it was already set.
    pub(crate) fn mark_detached(&self) -> bool {
        atomic::test_and_set_bit(DETACHED_BIT, &self.detached)
    }

    pub(crate) fn cancel_state(&self) -> CancelState {
        CancelState::from_raw_lossy(self.cancel_state.load(Ordering::SeqCst))
    }

    pub(crate) fn swap_cancel_state(&self, state: CancelState) -> CancelState {
        CancelState::from_raw_lossy(atomic::exchange(&self.cancel_state, state.as_raw()))
    }

    pub(crate) fn cancel_type(&self) -> CancelType {
        CancelType::from_raw_lossy(self.cancel_type.load(Ordering::SeqCst))
    }

    pub(crate) fn swap_cancel_type(&self, kind: CancelType) -> CancelType {
        CancelType::from_raw_lossy(atomic::exchange(&self.cancel_type, kind.as_raw()))
    }

    pub(crate) fn cancel_enabled(&self) -> bool {
        self.cancel_state() == CancelState::Enable
    }

    pub(crate) fn cancel_pending(&self) -> bool {
        self.cancel_pending.load(Ordering::SeqCst)
    }

    pub(crate) fn set_cancel_pending(&self, pending: bool) {
        self.cancel_pending.store(pending, Ordering::SeqCst);
    }

    pub(crate) fn in_wait(&self) -> bool {
        self.in_wait.load(Ordering::SeqCst)
    }

    /// Marks the thread as blocked at a cancellation point. A cancellation
    /// that is already pending and enabled cuts the coming wait short.
    pub(crate) fn enter_wait(&self) {
        let _control = self.control.lock();
        self.in_wait.store(true, Ordering::SeqCst);
        if self.cancel_enabled() && self.cancel_pending() {
            if let Some(uid) = self.native() {
                let _ = kernel::thread::delete(uid);
            }
        }
    }

    /// Clears the in-wait flag, then waits out any canceller still working
    /// on this TCB.
    pub(crate) fn leave_wait(&self) {
        {
            let _control = self.control.lock();
            self.in_wait.store(false, Ordering::SeqCst);
        }
        let mut backoff = Backoff::new();
        while self.control.lock().delivering {
            if backoff.snooze().is_err() {
                tracing::warn!(
                    thread = self.native_raw(),
                    "cancellation delivery still in progress; continuing"
                );
                break;
            }
        }
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_terminated(&self) {
        self.terminated.store(true, Ordering::SeqCst);
    }

    /// True for the first caller only.
    pub(crate) fn begin_finish(&self) -> bool {
        !self.finished.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_foreign(&self) -> bool {
        self.foreign.load(Ordering::Acquire)
    }

    pub(crate) fn claim_storage(&self) -> bool {
        self.storage_claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn storage_claimed(&self) -> bool {
        self.storage_claimed.load(Ordering::Acquire)
    }

    pub(crate) fn release_storage(&self) {
        self.storage_claimed.store(false, Ordering::Release);
    }

    pub(crate) fn base_priority(&self) -> u8 {
        self.base_priority.load(Ordering::Acquire)
    }

    pub(crate) fn set_base_priority(&self, priority: u8) {
        self.base_priority.store(priority, Ordering::Release);
    }

    pub(crate) fn hold_ceiling(&self, ceiling: u8) {
        if let Some(level) = self.prio_mutex.get(usize::from(ceiling)) {
            level.fetch_add(1, Ordering::AcqRel);
        }
    }

    pub(crate) fn release_ceiling(&self, ceiling: u8) {
        if let Some(level) = self.prio_mutex.get(usize::from(ceiling)) {
            let _ = level.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        }
    }

    /// Most urgent of the base priority and every held ceiling.
    pub(crate) fn ceiling_priority(&self) -> u8 {
        let base = self.base_priority();
        self.prio_mutex[..usize::from(base)]
            .iter()
            .position(|held| held.load(Ordering::Acquire) > 0)
            .map_or(base, |level| level as u8)
    }

    pub(crate) fn hold_inherit(&self, waiters: Arc<PrioWaiters>) {
        self.inherit_held.lock().push(waiters);
    }

    pub(crate) fn release_inherit(&self, waiters: &Arc<PrioWaiters>) {
        let mut held = self.inherit_held.lock();
        if let Some(at) = held.iter().position(|w| Arc::ptr_eq(w, waiters)) {
            held.swap_remove(at);
        }
    }

    pub(crate) fn with_inherit_held<R>(&self, f: impl FnOnce(&[Arc<PrioWaiters>]) -> R) -> R {
        f(&self.inherit_held.lock())
    }

    pub(crate) fn push_cleanup(&self, handler: CleanupHandler) {
        self.cleanup.lock().push(handler);
    }

    pub(crate) fn pop_cleanup(&self) -> Option<CleanupHandler> {
        self.cleanup.lock().pop()
    }

    pub(crate) fn cleanup_depth(&self) -> usize {
        self.cleanup.lock().len()
    }

    pub(crate) fn status(&self) -> Option<ExitStatus> {
        self.control.lock().status
    }

    pub(crate) fn set_status(&self, status: ExitStatus) {
        self.control.lock().status = Some(status);
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

type Registry = RwLock<HashMap<ThreadUid, Arc<Tcb>>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

pub(crate) fn register(uid: ThreadUid, tcb: &Arc<Tcb>) {
    registry().write().insert(uid, Arc::clone(tcb));
}

pub(crate) fn deregister(uid: ThreadUid) -> Option<Arc<Tcb>> {
    registry().write().remove(&uid)
}

pub(crate) fn lookup(uid: ThreadUid) -> Option<Arc<Tcb>> {
    registry().read().get(&uid).cloned()
}

/// Every registered TCB at this instant.
pub(crate) fn snapshot() -> Vec<Arc<Tcb>> {
    registry().read().values().cloned().collect()
}

static BOOTSTRAPPED: AtomicBool = AtomicBool::new(false);

// Deregisters an adopted thread when it exits.
struct AdoptedGuard(Cell<Option<ThreadUid>>);

impl Drop for AdoptedGuard {
    fn drop(&mut self) {
        if let Some(uid) = self.0.take() {
            if let Some(tcb) = deregister(uid) {
                tls::run_destructors(&tcb);
                tcb.mark_terminated();
            }
        }
    }
}

thread_local! {
    static ADOPTED: AdoptedGuard = const { AdoptedGuard(Cell::new(None)) };
}

/// TCB of the calling thread.
pub(crate) fn current() -> Arc<Tcb> {
    let uid = kernel::thread::current_uid();
    lookup(uid).unwrap_or_else(|| adopt(uid))
}

fn adopt(uid: ThreadUid) -> Arc<Tcb> {
    if config::foreign_thread_policy() == ForeignThreadPolicy::Reject
        && BOOTSTRAPPED.load(Ordering::Acquire)
    {
        consistency_failure("thread-local call from a thread not created by the runtime");
    }
    runtime::critical(|| {
        if let Some(tcb) = lookup(uid) {
            return tcb;
        }
        let tcb = Arc::new(Tcb::new());
        tcb.bind(uid);
        tcb.foreign.store(true, Ordering::Release);
        tcb.set_joinable(false);
        tcb.mark_detached();
        tcb.set_base_priority(kernel::thread::priority(uid).unwrap_or(DEFAULT_PRIORITY));
        tcb.set_name(&kernel::thread::name(uid).unwrap_or_default());
        register(uid, &tcb);
        let _ = ADOPTED.try_with(|guard| guard.0.set(Some(uid)));
        let bootstrap = !BOOTSTRAPPED.swap(true, Ordering::AcqRel);
        tracing::debug!(thread = %uid, bootstrap, "registered foreign thread");
        tcb
    })
}
