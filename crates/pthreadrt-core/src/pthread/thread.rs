//! Thread lifecycle: attributes, create/join/detach/exit, identity and
//! scheduling.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use pthreadrt_kernel::{self as kernel, DEFAULT_PRIORITY, KernelError, ThreadUid, valid_priority};

use crate::error::{PthreadError, PthreadResult};
use crate::pthread::cancel;
use crate::pthread::mutex;
use crate::pthread::tcb::{self, ExitStatus, Tcb};
use crate::pthread::tls;
use crate::runtime;

pub const PTHREAD_CREATE_JOINABLE: i32 = 0;
pub const PTHREAD_CREATE_DETACHED: i32 = 1;

/// Smallest stack a thread may request.
pub const PTHREAD_STACK_MIN: usize = kernel::thread::MIN_STACK_SIZE;
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024;
/// Longest thread name kept, in bytes.
pub const THREAD_NAME_MAX: usize = 22;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetachState {
    #[default]
    Joinable,
    Detached,
}

impl DetachState {
    #[must_use]
    pub const fn as_raw(self) -> i32 {
        match self {
            Self::Joinable => PTHREAD_CREATE_JOINABLE,
            Self::Detached => PTHREAD_CREATE_DETACHED,
        }
    }

    pub const fn from_raw(raw: i32) -> PthreadResult<Self> {
        match raw {
            PTHREAD_CREATE_JOINABLE => Ok(Self::Joinable),
            PTHREAD_CREATE_DETACHED => Ok(Self::Detached),
            _ => Err(PthreadError::Invalid),
        }
    }
}

/// Preallocated thread state that a [`ThreadAttr`] can carry so thread
/// creation does not allocate. One thread at a time may use it.
#[derive(Clone)]
pub struct ThreadStorage {
    tcb: Arc<Tcb>,
}

impl ThreadStorage {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tcb: Arc::new(Tcb::new()),
        }
    }

    /// True while a thread created with this storage has not been reaped.
    #[must_use]
    pub fn in_use(&self) -> bool {
        self.tcb.storage_claimed()
    }
}

impl Default for ThreadStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ThreadStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadStorage")
            .field("in_use", &self.in_use())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ThreadAttr {
    detach: DetachState,
    stack_size: usize,
    priority: u8,
    name: String,
    storage: Option<ThreadStorage>,
}

impl Default for ThreadAttr {
    fn default() -> Self {
        Self {
            detach: DetachState::Joinable,
            stack_size: DEFAULT_STACK_SIZE,
            priority: DEFAULT_PRIORITY,
            name: String::new(),
            storage: None,
        }
    }
}

impl ThreadAttr {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn detach_state(&self) -> DetachState {
        self.detach
    }

    pub fn set_detach_state(&mut self, state: DetachState) {
        self.detach = state;
    }

    #[must_use]
    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    pub fn set_stack_size(&mut self, size: usize) -> PthreadResult<()> {
        if size < PTHREAD_STACK_MIN {
            return Err(PthreadError::Invalid);
        }
        self.stack_size = size;
        Ok(())
    }

    #[must_use]
    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn set_priority(&mut self, priority: u8) -> PthreadResult<()> {
        if !valid_priority(priority) {
            return Err(PthreadError::Invalid);
        }
        self.priority = priority;
        Ok(())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Longer names are cut at [`THREAD_NAME_MAX`] bytes.
    pub fn set_name(&mut self, name: &str) {
        self.name = truncate_name(name).to_owned();
    }

    #[must_use]
    pub fn storage(&self) -> Option<&ThreadStorage> {
        self.storage.as_ref()
    }

    pub fn set_storage(&mut self, storage: Option<ThreadStorage>) {
        self.storage = storage;
    }
}

fn truncate_name(name: &str) -> &str {
    let mut end = name.len().min(THREAD_NAME_MAX);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// Handle to a thread known to the runtime.
#[derive(Clone)]
pub struct Pthread {
    tcb: Arc<Tcb>,
}

impl Pthread {
    pub(crate) fn tcb(&self) -> &Arc<Tcb> {
        &self.tcb
    }

    /// Native handle, if the thread was ever bound to one.
    #[must_use]
    pub fn id(&self) -> Option<ThreadUid> {
        self.tcb.native()
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.tcb.name()
    }

    pub fn set_name(&self, name: &str) {
        self.tcb.set_name(truncate_name(name));
    }

    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.tcb.is_terminated()
    }

    /// True while the thread is parked at a cancellation point.
    #[must_use]
    pub fn is_waiting(&self) -> bool {
        self.tcb.in_wait()
    }
}

impl PartialEq for Pthread {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.tcb, &other.tcb)
    }
}

impl Eq for Pthread {}

impl Hash for Pthread {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.tcb).hash(state);
    }
}

impl fmt::Debug for Pthread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pthread")
            .field("id", &self.tcb.native_raw())
            .field("name", &self.tcb.name())
            .finish()
    }
}

/// Unwind payload carrying a thread out of its start routine.
pub(crate) struct ThreadExit;

static NEXT_SEQ: AtomicU64 = AtomicU64::new(1);

/// Creates and starts a thread running `start`. Its return value becomes
/// the exit status seen by [`join`].
pub fn create<F>(attr: Option<&ThreadAttr>, start: F) -> PthreadResult<Pthread>
where
    F: FnOnce() -> usize + Send + 'static,
{
    let default_attr;
    let attr = match attr {
        Some(attr) => attr,
        None => {
            default_attr = ThreadAttr::default();
            &default_attr
        }
    };
    // The creator must be known before its child can name it as a peer.
    let _ = tcb::current();

    let tcb = match &attr.storage {
        Some(storage) => {
            if !storage.tcb.claim_storage() {
                return Err(PthreadError::Busy);
            }
            storage.tcb.reset();
            Arc::clone(&storage.tcb)
        }
        None => Arc::new(Tcb::new()),
    };
    if attr.detach == DetachState::Detached {
        tcb.mark_detached();
    }
    tcb.set_base_priority(attr.priority);
    let name = if attr.name.is_empty() {
        format!("pthread-{}", NEXT_SEQ.fetch_add(1, Ordering::Relaxed))
    } else {
        attr.name.clone()
    };
    tcb.set_name(&name);

    let entry = Arc::clone(&tcb);
    let created = kernel::thread::create(
        &name,
        attr.priority,
        attr.stack_size,
        Box::new(move || trampoline(&entry, start)),
    );
    let uid = match created {
        Ok(uid) => uid,
        Err(err) => {
            tcb.release_storage();
            tracing::warn!(error = %err, name, "thread creation failed");
            return Err(match err {
                KernelError::NoMemory => PthreadError::ResourceExhausted,
                _ => PthreadError::Invalid,
            });
        }
    };
    tcb.bind(uid);
    tcb::register(uid, &tcb);
    if let Err(err) = kernel::thread::start(uid) {
        tcb::deregister(uid);
        let _ = kernel::thread::delete(uid);
        tcb.release_storage();
        tracing::warn!(thread = %uid, error = %err, "thread start failed");
        return Err(PthreadError::ResourceExhausted);
    }
    tracing::debug!(thread = %uid, name, "created thread");
    Ok(Pthread { tcb })
}

fn trampoline<F>(me: &Arc<Tcb>, start: F)
where
    F: FnOnce() -> usize,
{
    if let Some(uid) = me.native() {
        runtime::thread_added(uid);
    }
    match panic::catch_unwind(AssertUnwindSafe(start)) {
        Ok(value) => me.set_status(ExitStatus::Value(value)),
        Err(payload) if payload.is::<ThreadExit>() => {}
        Err(_) => {
            tracing::error!(thread = me.native_raw(), "start routine panicked");
            me.set_status(ExitStatus::Panicked);
        }
    }
    finish(me);
}

/// Ends the calling thread with `value`, running its cleanup handlers and
/// TSD destructors first.
///
/// On a thread the runtime did not start (the bootstrap thread or another
/// adopted one) there is no start routine to return to: after the cleanup
/// and destructors run, the thread unwinds with a panic naming it. The same
/// applies when such a thread acts on a cancellation request.
pub fn exit(value: usize) -> ! {
    let me = tcb::current();
    me.set_status(ExitStatus::Value(value));
    tracing::debug!(thread = me.native_raw(), value, "thread exit");
    terminate(&me)
}

pub(crate) fn terminate(me: &Arc<Tcb>) -> ! {
    cancel::run_cleanup_stack(me);
    finish(me);
    if me.is_foreign() {
        tracing::warn!(thread = me.native_raw(), "adopted thread ended by the runtime");
        panic!("adopted thread {} ended without a start routine to return to", me.native_raw());
    }
    panic::resume_unwind(Box::new(ThreadExit))
}

/// End-of-life bookkeeping; runs once per thread.
pub(crate) fn finish(me: &Arc<Tcb>) {
    if !me.begin_finish() {
        return;
    }
    tls::run_destructors(me);
    if let Some(uid) = me.native() {
        runtime::thread_deleted(uid);
    }
    me.mark_terminated();
    let unwatched = me.control.lock().join_waiters == 0;
    if me.is_detached() && (unwatched || me.is_foreign()) {
        reap(me);
    }
}

pub(crate) fn reap(tcb: &Arc<Tcb>) {
    {
        let mut control = tcb.control.lock();
        if control.reaped {
            return;
        }
        control.reaped = true;
    }
    if let Some(uid) = tcb.native() {
        tcb::deregister(uid);
    }
    tcb.release_storage();
}

/// Waits for `thread` to end and returns how it ended. A cancellation point.
pub fn join(thread: &Pthread) -> PthreadResult<ExitStatus> {
    let target = &thread.tcb;
    let me = tcb::current();
    if Arc::ptr_eq(&me, target) {
        return Err(PthreadError::Deadlock);
    }
    if !target.joinable() || target.is_detached() {
        return Err(PthreadError::Invalid);
    }
    let Some(uid) = target.native() else {
        return Err(PthreadError::NoSuchThread);
    };
    {
        let mut control = target.control.lock();
        if control.reaped {
            return Err(PthreadError::NoSuchThread);
        }
        control.join_waiters += 1;
    }
    let watched = Arc::clone(target);
    me.push_cleanup(Box::new(move || {
        let mut control = watched.control.lock();
        control.join_waiters = control.join_waiters.saturating_sub(1);
    }));

    cancel::testcancel_for(&me);
    me.enter_wait();
    let ended = kernel::thread::wait_end(uid, None);
    me.leave_wait();
    match ended {
        Ok(()) => cancel::absorb_delivery(),
        Err(KernelError::ThreadDeleted) => cancel::on_deleted(&me),
        Err(err) => {
            if let Some(undo) = me.pop_cleanup() {
                undo();
            }
            return Err(err.into());
        }
    }
    drop(me.pop_cleanup());

    let mut control = target.control.lock();
    control.join_waiters = control.join_waiters.saturating_sub(1);
    let status = control.status.unwrap_or(ExitStatus::Value(0));
    let last = control.join_waiters == 0;
    drop(control);
    if last {
        reap(target);
    }
    Ok(status)
}

/// Marks `thread` detached; its state is reclaimed as soon as it ends.
pub fn detach(thread: &Pthread) -> PthreadResult<()> {
    let target = &thread.tcb;
    if !target.joinable() {
        return Err(PthreadError::Invalid);
    }
    if target.control.lock().reaped {
        return Err(PthreadError::NoSuchThread);
    }
    if target.mark_detached() {
        return Err(PthreadError::Invalid);
    }
    let unwatched = target.control.lock().join_waiters == 0;
    if target.is_terminated() && unwatched {
        reap(target);
    }
    Ok(())
}

/// Handle of the calling thread.
#[must_use]
pub fn self_thread() -> Pthread {
    Pthread {
        tcb: tcb::current(),
    }
}

#[must_use]
pub fn equal(a: &Pthread, b: &Pthread) -> bool {
    a == b
}

/// Changes the base priority of `thread`. Held priority ceilings still
/// apply on top of it.
pub fn setschedprio(thread: &Pthread, priority: u8) -> PthreadResult<()> {
    if !valid_priority(priority) {
        return Err(PthreadError::Invalid);
    }
    let target = &thread.tcb;
    let uid = target.native().ok_or(PthreadError::NoSuchThread)?;
    if target.control.lock().reaped {
        return Err(PthreadError::NoSuchThread);
    }
    target.set_base_priority(priority);
    mutex::settle_priority(target, uid).map_err(|err| match err {
        KernelError::UnknownThread => PthreadError::NoSuchThread,
        _ => PthreadError::Invalid,
    })
}

/// Base priority of `thread`.
pub fn getschedparam(thread: &Pthread) -> PthreadResult<u8> {
    if thread.tcb.control.lock().reaped {
        return Err(PthreadError::NoSuchThread);
    }
    Ok(thread.tcb.base_priority())
}

pub fn sched_yield() {
    kernel::thread::yield_now();
}

pub fn getthreadid_np(thread: &Pthread) -> PthreadResult<ThreadUid> {
    if thread.tcb.control.lock().reaped {
        return Err(PthreadError::NoSuchThread);
    }
    thread.tcb.native().ok_or(PthreadError::NoSuchThread)
}
