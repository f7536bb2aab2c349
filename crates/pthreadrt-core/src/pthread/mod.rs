//! POSIX threads surface.

pub mod barrier;
pub mod cancel;
pub mod cond;
pub mod mutex;
pub mod once;
pub mod rwlock;
pub mod spin;
pub mod thread;
pub mod tls;

pub(crate) mod tcb;

pub use barrier::{BarrierAttr, BarrierWaitResult, PTHREAD_BARRIER_SERIAL_THREAD, PthreadBarrier};
pub use cancel::{
    CancelState, CancelType, cancel, cleanup_pop, cleanup_push, setcancelstate, setcanceltype,
    testcancel,
};
pub use cond::{CondAttr, PthreadCond};
pub use mutex::{MutexAttr, MutexKind, MutexProtocol, PthreadMutex};
pub use once::PthreadOnce;
pub use rwlock::{PthreadRwlock, RwlockAttr};
pub use spin::PthreadSpinlock;
pub use tcb::ExitStatus;
pub use thread::{
    DetachState, Pthread, ThreadAttr, ThreadStorage, create, detach, equal, exit, getschedparam,
    getthreadid_np, join, sched_yield, self_thread, setschedprio,
};
pub use tls::{PthreadKey, getspecific, key_create, key_delete, setspecific};
