//! Error space of the native kernel.

/// Errors reported by substrate calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum KernelError {
    #[error("wait timed out")]
    WaitTimeout,
    #[error("semaphore count is not sufficient")]
    SemaZero,
    #[error("illegal count")]
    IllegalCount,
    #[error("object deleted while waiting")]
    WaitDelete,
    #[error("wait canceled")]
    WaitCancel,
    /// The calling thread was deleted (interrupted) by another thread.
    #[error("calling thread was deleted")]
    ThreadDeleted,
    #[error("unknown thread id")]
    UnknownThread,
    #[error("unknown or deleted object")]
    UnknownObject,
    #[error("illegal priority")]
    IllegalPriority,
    #[error("not enough memory")]
    NoMemory,
    #[error("illegal attribute")]
    IllegalAttr,
    #[error("event flag condition not satisfied")]
    EventFlagCond,
    #[error("event flag does not allow multiple waiters")]
    MultipleWaiters,
}

pub type KernelResult<T> = Result<T, KernelError>;
