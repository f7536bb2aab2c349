//! Non-portable extensions: time helpers, processor count, event flags
//! and the message-pipe surface.

pub mod eventflag;
pub mod msgpipe;

use std::time::Duration;

use pthreadrt_kernel::{self as kernel, KernelError};

use crate::error::{PthreadError, PthreadResult};
use crate::pthread::cancel;
use crate::pthread::tcb;
use crate::time::{self, Timespec};

pub use eventflag::{EventFlagAttr, PthreadEventFlag};
pub use kernel::{ClearMode, WaitMode};
pub use msgpipe::{MsgPipeAttr, MsgPipeWaitMode, PthreadMsgPipe};

/// Logical processors available to the runtime.
#[must_use]
pub const fn num_processors_np() -> u32 {
    1
}

/// Process clock as seconds and nanoseconds.
#[must_use]
pub fn getsystemtime_np() -> Timespec {
    Timespec::now()
}

/// Sleeps the caller for `usec` microseconds. A cancellation point on
/// both sides of the sleep and during it.
pub fn sleep_np(usec: u64) -> PthreadResult<()> {
    let me = tcb::current();
    cancel::testcancel_for(&me);
    me.enter_wait();
    let slept = kernel::thread::delay(Duration::from_micros(usec));
    me.leave_wait();
    match slept {
        Ok(()) => {}
        Err(KernelError::ThreadDeleted) => cancel::on_deleted(&me),
        Err(err) => return Err(err.into()),
    }
    cancel::testcancel_for(&me);
    Ok(())
}

/// Sleeps for a relative interval.
pub fn delay_np(interval: &Timespec) -> PthreadResult<()> {
    if !interval.is_valid() {
        return Err(PthreadError::Invalid);
    }
    sleep_np(u64::try_from(interval.as_micros()).unwrap_or(0))
}

/// Sleeps until `deadline`; a deadline in the past returns at once.
pub fn delay_until_np(deadline: &Timespec) -> PthreadResult<()> {
    sleep_np(time::relative_micros(deadline)?)
}
