//! Cancellation and the cleanup-handler stack.
//!
//! A cancel request marks the target's TCB as pending. When the target can
//! act on it (enabled, and either asynchronous or parked at a cancellation
//! point) the canceller interrupts the target's substrate wait; the target
//! then tears itself down: it runs its cleanup handlers newest first, runs
//! TSD destructors, and unwinds out of its start routine.
//!
//! # Hazard
//!
//! Asynchronous cancellation of a thread that is running rather than
//! blocked only lands at the target's next substrate wait or cancellation
//! point. Code between those points can observe the request late; the
//! cleanup and destructor contract holds only once the target gets there.

use std::sync::Arc;

use pthreadrt_kernel::{self as kernel, KernelError};

use crate::error::{PthreadError, PthreadResult};
use crate::pthread::tcb::{self, ExitStatus, Tcb};
use crate::pthread::thread::{self, Pthread};

pub const PTHREAD_CANCEL_ENABLE: i32 = 0;
pub const PTHREAD_CANCEL_DISABLE: i32 = 1;
pub const PTHREAD_CANCEL_DEFERRED: i32 = 0;
pub const PTHREAD_CANCEL_ASYNCHRONOUS: i32 = 1;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelState {
    #[default]
    Enable,
    Disable,
}

impl CancelState {
    #[must_use]
    pub const fn as_raw(self) -> isize {
        match self {
            Self::Enable => PTHREAD_CANCEL_ENABLE as isize,
            Self::Disable => PTHREAD_CANCEL_DISABLE as isize,
        }
    }

    pub const fn from_raw(raw: i32) -> PthreadResult<Self> {
        match raw {
            PTHREAD_CANCEL_ENABLE => Ok(Self::Enable),
            PTHREAD_CANCEL_DISABLE => Ok(Self::Disable),
            _ => Err(PthreadError::Invalid),
        }
    }

    pub(crate) const fn from_raw_lossy(raw: isize) -> Self {
        if raw == PTHREAD_CANCEL_DISABLE as isize {
            Self::Disable
        } else {
            Self::Enable
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelType {
    #[default]
    Deferred,
    Asynchronous,
}

impl CancelType {
    #[must_use]
    pub const fn as_raw(self) -> isize {
        match self {
            Self::Deferred => PTHREAD_CANCEL_DEFERRED as isize,
            Self::Asynchronous => PTHREAD_CANCEL_ASYNCHRONOUS as isize,
        }
    }

    pub const fn from_raw(raw: i32) -> PthreadResult<Self> {
        match raw {
            PTHREAD_CANCEL_DEFERRED => Ok(Self::Deferred),
            PTHREAD_CANCEL_ASYNCHRONOUS => Ok(Self::Asynchronous),
            _ => Err(PthreadError::Invalid),
        }
    }

    pub(crate) const fn from_raw_lossy(raw: isize) -> Self {
        if raw == PTHREAD_CANCEL_ASYNCHRONOUS as isize {
            Self::Asynchronous
        } else {
            Self::Deferred
        }
    }
}

/// Sets the caller's cancel state and returns the previous one. Enabling
/// with an asynchronous type and a pending request acts on it at once.
pub fn setcancelstate(state: CancelState) -> PthreadResult<CancelState> {
    let me = tcb::current();
    let old = me.swap_cancel_state(state);
    act_if_asynchronous(&me);
    Ok(old)
}

/// Sets the caller's cancel type and returns the previous one.
pub fn setcanceltype(kind: CancelType) -> PthreadResult<CancelType> {
    let me = tcb::current();
    let old = me.swap_cancel_type(kind);
    act_if_asynchronous(&me);
    Ok(old)
}

fn act_if_asynchronous(me: &Arc<Tcb>) {
    if me.cancel_enabled()
        && me.cancel_type() == CancelType::Asynchronous
        && me.cancel_pending()
    {
        act_on_cancel(me);
    }
}

/// Cancellation point: acts on a pending, enabled request.
pub fn testcancel() {
    let me = tcb::current();
    testcancel_for(&me);
}

pub(crate) fn testcancel_for(me: &Arc<Tcb>) {
    if me.cancel_enabled() && (me.cancel_pending() || kernel::thread::current_deleted()) {
        act_on_cancel(me);
    }
}

/// Requests cancellation of `thread`.
///
/// Succeeds without effect when the target already ended or a request was
/// already delivered.
pub fn cancel(thread: &Pthread) -> PthreadResult<()> {
    let target = thread.tcb();
    let Some(uid) = target.native() else {
        return Err(PthreadError::NoSuchThread);
    };
    let mut control = target.control.lock();
    if control.reaped {
        return Err(PthreadError::NoSuchThread);
    }
    if control.cancel_delivered || target.is_terminated() {
        return Ok(());
    }
    target.set_cancel_pending(true);
    if !target.cancel_enabled() {
        return Ok(());
    }
    let asynchronous = target.cancel_type() == CancelType::Asynchronous;
    if !asynchronous && !target.in_wait() {
        return Ok(());
    }
    if uid == kernel::thread::current_uid() {
        drop(control);
        act_on_cancel(target);
    }
    control.cancel_delivered = true;
    control.delivering = true;
    drop(control);

    tracing::debug!(thread = %uid, asynchronous, "delivering cancellation");
    let delivered = kernel::thread::delete(uid);
    target.control.lock().delivering = false;
    match delivered {
        // Already gone; its own exit path covers the rest.
        Ok(()) | Err(KernelError::UnknownThread) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Pushes a cleanup handler onto the caller's stack.
pub fn cleanup_push<F>(handler: F)
where
    F: FnOnce() + Send + 'static,
{
    tcb::current().push_cleanup(Box::new(handler));
}

/// Pops the newest cleanup handler, running it when `execute` is set.
/// Returns false when the stack was empty.
pub fn cleanup_pop(execute: bool) -> bool {
    let handler = tcb::current().pop_cleanup();
    match handler {
        Some(handler) => {
            if execute {
                handler();
            }
            true
        }
        None => false,
    }
}

pub(crate) fn run_cleanup_stack(me: &Tcb) {
    // Handlers may push or pop themselves; never hold the stack lock across one.
    while let Some(handler) = me.pop_cleanup() {
        handler();
    }
}

/// Accepts the cancellation on the calling thread and never returns.
pub(crate) fn act_on_cancel(me: &Arc<Tcb>) -> ! {
    me.swap_cancel_state(CancelState::Disable);
    me.leave_wait();
    kernel::thread::acknowledge_delete();
    {
        let mut control = me.control.lock();
        control.cancel_delivered = true;
        control.status = Some(ExitStatus::Canceled);
    }
    me.set_cancel_pending(false);
    tracing::debug!(thread = me.native_raw(), "acting on cancellation");
    thread::terminate(me)
}

/// A substrate wait reported that the caller was deleted.
pub(crate) fn on_deleted(me: &Arc<Tcb>) -> ! {
    act_on_cancel(me)
}

/// Drops a delivery that raced with a normal wakeup. The request stays
/// pending for the next cancellation point.
pub(crate) fn absorb_delivery() {
    if kernel::thread::current_deleted() {
        kernel::thread::acknowledge_delete();
    }
}
