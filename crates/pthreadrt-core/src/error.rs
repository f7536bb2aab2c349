//! Error taxonomy shared by every runtime operation.

use std::panic::Location;

use pthreadrt_kernel::{KernelError, KernelResult};

use crate::errno;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum PthreadError {
    /// Object uninitialized or invalid, or argument out of range.
    #[error("invalid argument or object")]
    Invalid,
    /// A try-operation could not proceed, or the object is in use.
    #[error("resource busy")]
    Busy,
    #[error("timed out")]
    TimedOut,
    /// Self-relock of an error-checking mutex, or join on the caller.
    #[error("resource deadlock would occur")]
    Deadlock,
    /// Unlock by a non-owner, or insufficient privilege.
    #[error("operation not permitted")]
    Permission,
    #[error("out of memory")]
    NoMemory,
    #[error("resource temporarily unavailable")]
    ResourceExhausted,
    #[error("operation not supported")]
    NotSupported,
    #[error("no such thread")]
    NoSuchThread,
}

pub type PthreadResult<T> = Result<T, PthreadError>;

impl PthreadError {
    /// POSIX errno for this error.
    #[must_use]
    pub const fn errno(self) -> i32 {
        match self {
            Self::Invalid => errno::EINVAL,
            Self::Busy => errno::EBUSY,
            Self::TimedOut => errno::ETIMEDOUT,
            Self::Deadlock => errno::EDEADLK,
            Self::Permission => errno::EPERM,
            Self::NoMemory => errno::ENOMEM,
            Self::ResourceExhausted => errno::EAGAIN,
            Self::NotSupported => errno::ENOTSUP,
            Self::NoSuchThread => errno::ESRCH,
        }
    }

    #[must_use]
    pub const fn from_errno(code: i32) -> Option<Self> {
        match code {
            errno::EINVAL => Some(Self::Invalid),
            errno::EBUSY => Some(Self::Busy),
            errno::ETIMEDOUT => Some(Self::TimedOut),
            errno::EDEADLK => Some(Self::Deadlock),
            errno::EPERM => Some(Self::Permission),
            errno::ENOMEM => Some(Self::NoMemory),
            errno::EAGAIN => Some(Self::ResourceExhausted),
            errno::ENOTSUP => Some(Self::NotSupported),
            errno::ESRCH => Some(Self::NoSuchThread),
            _ => None,
        }
    }
}

impl From<KernelError> for PthreadError {
    fn from(err: KernelError) -> Self {
        match err {
            KernelError::WaitTimeout => Self::TimedOut,
            KernelError::NoMemory => Self::NoMemory,
            KernelError::IllegalAttr => Self::Permission,
            KernelError::SemaZero | KernelError::EventFlagCond | KernelError::MultipleWaiters => {
                Self::Busy
            }
            KernelError::UnknownThread => Self::NoSuchThread,
            _ => Self::Invalid,
        }
    }
}

/// Converts an errno-style return into a result.
pub fn errno_result(code: i32) -> PthreadResult<()> {
    match code {
        0 => Ok(()),
        other => Err(PthreadError::from_errno(other).unwrap_or(PthreadError::Invalid)),
    }
}

/// Logs a substrate call that is not expected to fail and carries on.
#[track_caller]
pub(crate) fn check_kernel(res: KernelResult<()>, what: &str) {
    if let Err(err) = res {
        let at = Location::caller();
        tracing::error!(
            file = at.file(),
            line = at.line(),
            error = %err,
            code = PthreadError::from(err).errno(),
            "{what} failed"
        );
    }
}

/// Internal state is corrupt or a usage contract was broken; unrecoverable.
#[track_caller]
pub(crate) fn consistency_failure(what: &str) -> ! {
    let at = Location::caller();
    tracing::error!(file = at.file(), line = at.line(), "consistency failure: {what}");
    panic!("pthreadrt consistency failure at {}:{}: {what}", at.file(), at.line());
}
