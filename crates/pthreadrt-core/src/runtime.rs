//! Process-wide runtime state: the global critical section and thread hooks.

use parking_lot::{ReentrantMutex, RwLock};
use pthreadrt_kernel::ThreadUid;

// Guards primitive creation/destruction and one-time registry setup only.
static GLOBAL: ReentrantMutex<()> = parking_lot::const_reentrant_mutex(());

pub(crate) fn critical<R>(f: impl FnOnce() -> R) -> R {
    let _guard = GLOBAL.lock();
    f()
}

/// Callback told about runtime threads starting or terminating.
pub type ThreadHook = fn(ThreadUid);

static ADD_HOOK: RwLock<Option<ThreadHook>> = parking_lot::const_rwlock(None);
static DELETE_HOOK: RwLock<Option<ThreadHook>> = parking_lot::const_rwlock(None);

/// Installs the hook run by each new thread before its start routine.
/// Returns the previous hook.
pub fn set_add_thread_callback(hook: Option<ThreadHook>) -> Option<ThreadHook> {
    std::mem::replace(&mut *ADD_HOOK.write(), hook)
}

/// Installs the hook run by each thread as it terminates.
pub fn set_delete_thread_callback(hook: Option<ThreadHook>) -> Option<ThreadHook> {
    std::mem::replace(&mut *DELETE_HOOK.write(), hook)
}

pub(crate) fn thread_added(uid: ThreadUid) {
    let hook = *ADD_HOOK.read();
    if let Some(hook) = hook {
        hook(uid);
    }
}

pub(crate) fn thread_deleted(uid: ThreadUid) {
    let hook = *DELETE_HOOK.read();
    if let Some(hook) = hook {
        hook(uid);
    }
}
