//! Event flags: a 32-bit pattern threads wait on in AND or OR mode.

use std::sync::Arc;
use std::time::Duration;

use pthreadrt_kernel::{ClearMode, EventFlag, KernelError, WaitMode};

use crate::error::{PthreadError, PthreadResult, check_kernel};
use crate::lazy::LazySlot;
use crate::pthread::cancel;
use crate::pthread::tcb;
use crate::runtime;
use crate::time::{self, Timespec};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EventFlagAttr {
    multiple_waiters: bool,
}

impl EventFlagAttr {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn multiple_waiters(&self) -> bool {
        self.multiple_waiters
    }

    /// When unset, a second concurrent waiter is refused with `Busy`.
    pub fn set_multiple_waiters(&mut self, allowed: bool) {
        self.multiple_waiters = allowed;
    }
}

pub struct PthreadEventFlag {
    slot: LazySlot<EventFlag>,
}

impl PthreadEventFlag {
    #[must_use]
    pub fn new(attr: Option<&EventFlagAttr>, bits: u32) -> Self {
        let attr = attr.copied().unwrap_or_default();
        Self {
            slot: LazySlot::ready(EventFlag::new(bits, attr.multiple_waiters)),
        }
    }

    #[must_use]
    pub const fn uninit() -> Self {
        Self {
            slot: LazySlot::invalid(),
        }
    }

    pub fn init(&self, attr: Option<&EventFlagAttr>, bits: u32) -> PthreadResult<()> {
        let attr = attr.copied().unwrap_or_default();
        let flag = EventFlag::new(bits, attr.multiple_waiters);
        runtime::critical(|| self.slot.install(flag))
    }

    /// Waiters still blocked are woken with `Invalid`.
    pub fn destroy(&self) -> PthreadResult<()> {
        runtime::critical(|| {
            if let Some(flag) = self.slot.take()? {
                check_kernel(flag.delete(), "event flag delete");
            }
            Ok(())
        })
    }

    fn flag(&self) -> PthreadResult<Arc<EventFlag>> {
        self.slot.get()
    }

    pub fn set(&self, bits: u32) -> PthreadResult<()> {
        Ok(self.flag()?.set(bits)?)
    }

    /// Clears the bits in `mask`.
    pub fn clear(&self, mask: u32) -> PthreadResult<()> {
        Ok(self.flag()?.clear(mask)?)
    }

    #[must_use]
    pub fn bits(&self) -> u32 {
        self.flag().map_or(0, |flag| flag.bits())
    }

    /// Blocks until `pattern` matches; returns the bits seen before any
    /// clearing. A cancellation point.
    pub fn wait(&self, pattern: u32, mode: WaitMode, clear: ClearMode) -> PthreadResult<u32> {
        self.wait_inner(pattern, mode, clear, None)
    }

    pub fn timed_wait(
        &self,
        pattern: u32,
        mode: WaitMode,
        clear: ClearMode,
        deadline: &Timespec,
    ) -> PthreadResult<u32> {
        let timeout = time::relative_timeout(deadline)?;
        self.wait_inner(pattern, mode, clear, Some(timeout))
    }

    /// `Busy` when the pattern does not match right now.
    pub fn try_wait(&self, pattern: u32, mode: WaitMode, clear: ClearMode) -> PthreadResult<u32> {
        self.flag()?
            .poll(pattern, mode, clear)
            .map_err(|err| match err {
                KernelError::IllegalAttr => PthreadError::Invalid,
                other => other.into(),
            })
    }

    fn wait_inner(
        &self,
        pattern: u32,
        mode: WaitMode,
        clear: ClearMode,
        timeout: Option<Duration>,
    ) -> PthreadResult<u32> {
        let flag = self.flag()?;
        let me = tcb::current();
        cancel::testcancel_for(&me);
        me.enter_wait();
        let waited = flag.wait(pattern, mode, clear, timeout);
        me.leave_wait();
        match waited {
            Ok(bits) => {
                cancel::absorb_delivery();
                Ok(bits)
            }
            Err(KernelError::ThreadDeleted) => cancel::on_deleted(&me),
            Err(KernelError::IllegalAttr) => Err(PthreadError::Invalid),
            Err(err) => Err(err.into()),
        }
    }
}

impl Default for PthreadEventFlag {
    fn default() -> Self {
        Self::new(None, 0)
    }
}

impl std::fmt::Debug for PthreadEventFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PthreadEventFlag")
            .field("bits", &self.bits())
            .finish()
    }
}
