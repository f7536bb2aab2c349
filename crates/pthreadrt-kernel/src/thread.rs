//! Native threads.
//!
//! Every thread that touches the substrate owns a [`NativeThread`] record,
//! either because it was created here or because it was adopted on its first
//! call. Records live in a process-wide table keyed by [`ThreadUid`].
//!
//! Deleting a thread does not stop it outright: it marks the thread killed
//! and interrupts whatever substrate wait it is blocked in. The thread sees
//! [`KernelError::ThreadDeleted`] from that wait (or from its next one) and
//! is expected to tear itself down.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};

use crate::error::{KernelError, KernelResult};
use crate::{DEFAULT_PRIORITY, valid_priority};

/// Smallest stack size accepted by [`create`].
pub const MIN_STACK_SIZE: usize = 4 * 1024;

// Host threads need more room than console stacks; requested sizes are
// raised to at least this much.
const HOST_STACK_FLOOR: usize = 256 * 1024;

/// Native thread handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadUid(u32);

impl ThreadUid {
    #[must_use]
    pub const fn as_raw(self) -> u32 {
        self.0
    }

    /// Rebuilds a handle from its raw value; zero is never a valid handle.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Option<Self> {
        if raw == 0 { None } else { Some(Self(raw)) }
    }
}

impl fmt::Display for ThreadUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Something a thread can be blocked on and woken out of by a deletion.
pub(crate) trait Interrupt: Send + Sync {
    fn interrupt(&self);
}

#[derive(Default)]
struct Lifecycle {
    started: bool,
    ended: bool,
    deleted: bool,
}

pub(crate) struct NativeThread {
    uid: ThreadUid,
    name: String,
    priority: AtomicU8,
    killed: AtomicBool,
    lifecycle: Mutex<Lifecycle>,
    cv: Condvar,
    blocked_on: Mutex<Option<Arc<dyn Interrupt>>>,
}

impl NativeThread {
    fn new(uid: ThreadUid, name: String, priority: u8, started: bool) -> Self {
        Self {
            uid,
            name,
            priority: AtomicU8::new(priority),
            killed: AtomicBool::new(false),
            lifecycle: Mutex::new(Lifecycle {
                started,
                ..Lifecycle::default()
            }),
            cv: Condvar::new(),
            blocked_on: Mutex::new(None),
        }
    }

    pub(crate) fn uid(&self) -> ThreadUid {
        self.uid
    }

    pub(crate) fn priority(&self) -> u8 {
        self.priority.load(Ordering::Acquire)
    }

    pub(crate) fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    /// Records what this thread is about to block on until the guard drops.
    pub(crate) fn block_on(&self, waitable: Arc<dyn Interrupt>) -> BlockGuard<'_> {
        *self.blocked_on.lock() = Some(waitable);
        BlockGuard { thread: self }
    }

    fn await_start(&self) -> bool {
        let mut life = self.lifecycle.lock();
        while !life.started && !life.deleted {
            self.cv.wait(&mut life);
        }
        !life.deleted
    }

    fn mark_ended(&self) {
        let mut life = self.lifecycle.lock();
        life.ended = true;
        self.cv.notify_all();
    }

    fn kill(&self) {
        self.killed.store(true, Ordering::SeqCst);
        {
            let mut life = self.lifecycle.lock();
            life.deleted = true;
            self.cv.notify_all();
        }
        let waitable = self.blocked_on.lock().clone();
        if let Some(waitable) = waitable {
            waitable.interrupt();
        }
    }
}

impl Interrupt for NativeThread {
    fn interrupt(&self) {
        let _life = self.lifecycle.lock();
        self.cv.notify_all();
    }
}

pub(crate) struct BlockGuard<'a> {
    thread: &'a NativeThread,
}

impl Drop for BlockGuard<'_> {
    fn drop(&mut self) {
        *self.thread.blocked_on.lock() = None;
    }
}

// ---------------------------------------------------------------------------
// Thread table
// ---------------------------------------------------------------------------

static NEXT_UID: AtomicU32 = AtomicU32::new(1);

fn table() -> &'static RwLock<HashMap<ThreadUid, Arc<NativeThread>>> {
    static TABLE: OnceLock<RwLock<HashMap<ThreadUid, Arc<NativeThread>>>> = OnceLock::new();
    TABLE.get_or_init(|| RwLock::new(HashMap::new()))
}

fn allocate_uid() -> ThreadUid {
    ThreadUid(NEXT_UID.fetch_add(1, Ordering::Relaxed))
}

fn lookup(uid: ThreadUid) -> KernelResult<Arc<NativeThread>> {
    table()
        .read()
        .get(&uid)
        .cloned()
        .ok_or(KernelError::UnknownThread)
}

struct CurrentSlot(RefCell<Option<Arc<NativeThread>>>);

impl Drop for CurrentSlot {
    fn drop(&mut self) {
        if let Some(thread) = self.0.borrow_mut().take() {
            table().write().remove(&thread.uid);
            thread.mark_ended();
        }
    }
}

thread_local! {
    static CURRENT: CurrentSlot = const { CurrentSlot(RefCell::new(None)) };
}

fn adopt() -> Arc<NativeThread> {
    let uid = allocate_uid();
    let name = std::thread::current()
        .name()
        .map_or_else(|| format!("adopted-{}", uid.0), str::to_owned);
    let thread = Arc::new(NativeThread::new(uid, name, DEFAULT_PRIORITY, true));
    table().write().insert(uid, Arc::clone(&thread));
    tracing::trace!(thread = %uid, "adopted native thread");
    thread
}

/// Record of the calling thread, adopting it on first use.
pub(crate) fn current() -> Arc<NativeThread> {
    CURRENT
        .try_with(|slot| {
            let mut slot = slot.0.borrow_mut();
            Arc::clone(slot.get_or_insert_with(adopt))
        })
        // Thread-local storage is already torn down: hand out a detached record.
        .unwrap_or_else(|_| {
            Arc::new(NativeThread::new(
                allocate_uid(),
                String::from("exiting"),
                DEFAULT_PRIORITY,
                true,
            ))
        })
}

// ---------------------------------------------------------------------------
// Public operations
// ---------------------------------------------------------------------------

/// Creates a thread in the dormant state; it runs `entry` once [`start`]ed.
pub fn create(
    name: &str,
    priority: u8,
    stack_size: usize,
    entry: Box<dyn FnOnce() + Send + 'static>,
) -> KernelResult<ThreadUid> {
    if !valid_priority(priority) {
        return Err(KernelError::IllegalPriority);
    }
    if stack_size < MIN_STACK_SIZE {
        return Err(KernelError::IllegalAttr);
    }
    let uid = allocate_uid();
    let name: String = name.chars().filter(|&c| c != '\0').collect();
    let record = Arc::new(NativeThread::new(uid, name.clone(), priority, false));
    table().write().insert(uid, Arc::clone(&record));

    let spawned = std::thread::Builder::new()
        .name(name)
        .stack_size(stack_size.max(HOST_STACK_FLOOR))
        .spawn(move || {
            let _ = CURRENT.try_with(|slot| *slot.0.borrow_mut() = Some(Arc::clone(&record)));
            if record.await_start() && panic::catch_unwind(AssertUnwindSafe(entry)).is_err() {
                tracing::warn!(thread = %record.uid, "native thread entry unwound");
            }
            // Unlisted before waking joiners, so `wait_end` never sees it alive.
            table().write().remove(&record.uid);
            record.mark_ended();
        });
    if let Err(err) = spawned {
        table().write().remove(&uid);
        tracing::warn!(thread = %uid, error = %err, "host thread spawn failed");
        return Err(KernelError::NoMemory);
    }
    Ok(uid)
}

/// Lets a dormant thread run.
pub fn start(uid: ThreadUid) -> KernelResult<()> {
    let thread = lookup(uid)?;
    let mut life = thread.lifecycle.lock();
    if life.deleted {
        return Err(KernelError::UnknownThread);
    }
    life.started = true;
    thread.cv.notify_all();
    Ok(())
}

/// Marks `uid` deleted and interrupts its current wait.
pub fn delete(uid: ThreadUid) -> KernelResult<()> {
    let thread = lookup(uid)?;
    thread.kill();
    Ok(())
}

/// Clears the calling thread's deleted mark after it has accepted it.
pub fn acknowledge_delete() {
    current().killed.store(false, Ordering::SeqCst);
}

/// True when the calling thread has been deleted and not yet acknowledged it.
#[must_use]
pub fn current_deleted() -> bool {
    current().is_killed()
}

#[must_use]
pub fn current_uid() -> ThreadUid {
    current().uid
}

#[must_use]
pub fn current_priority() -> u8 {
    current().priority()
}

pub fn priority(uid: ThreadUid) -> KernelResult<u8> {
    Ok(lookup(uid)?.priority())
}

pub fn change_priority(uid: ThreadUid, priority: u8) -> KernelResult<()> {
    if !valid_priority(priority) {
        return Err(KernelError::IllegalPriority);
    }
    lookup(uid)?.priority.store(priority, Ordering::Release);
    Ok(())
}

pub fn name(uid: ThreadUid) -> KernelResult<String> {
    Ok(lookup(uid)?.name.clone())
}

#[must_use]
pub fn exists(uid: ThreadUid) -> bool {
    table().read().contains_key(&uid)
}

/// Blocks until `uid` has finished running. A thread that is no longer in
/// the table has already ended.
pub fn wait_end(uid: ThreadUid, timeout: Option<Duration>) -> KernelResult<()> {
    let me = current();
    if me.is_killed() {
        return Err(KernelError::ThreadDeleted);
    }
    let Ok(target) = lookup(uid) else {
        return Ok(());
    };
    let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
    let _blocked = me.block_on(Arc::clone(&target) as Arc<dyn Interrupt>);
    let mut life = target.lifecycle.lock();
    loop {
        if life.ended {
            return Ok(());
        }
        if me.is_killed() {
            return Err(KernelError::ThreadDeleted);
        }
        match deadline {
            Some(deadline) if Instant::now() >= deadline => return Err(KernelError::WaitTimeout),
            Some(deadline) => {
                let _ = target.cv.wait_until(&mut life, deadline);
            }
            None => target.cv.wait(&mut life),
        }
    }
}

/// Sleeps for `duration`; a deletion cuts the sleep short.
pub fn delay(duration: Duration) -> KernelResult<()> {
    let me = current();
    if me.is_killed() {
        return Err(KernelError::ThreadDeleted);
    }
    let Some(deadline) = Instant::now().checked_add(duration) else {
        return Err(KernelError::IllegalAttr);
    };
    let _blocked = me.block_on(Arc::clone(&me) as Arc<dyn Interrupt>);
    let mut life = me.lifecycle.lock();
    loop {
        if me.is_killed() {
            return Err(KernelError::ThreadDeleted);
        }
        if Instant::now() >= deadline {
            return Ok(());
        }
        let _ = me.cv.wait_until(&mut life, deadline);
    }
}

pub fn yield_now() {
    std::thread::yield_now();
}
