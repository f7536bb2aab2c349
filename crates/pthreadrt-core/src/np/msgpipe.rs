//! Message pipes: data passed by copy between threads.
//!
//! Declared for source compatibility only. Every operation fails with
//! `NotSupported`.

use crate::error::{PthreadError, PthreadResult};
use crate::time::Timespec;

/// How much of a request must complete before a send or receive returns.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgPipeWaitMode {
    /// Whatever fits right away.
    #[default]
    Asap,
    /// The whole buffer.
    Full,
}

impl MsgPipeWaitMode {
    pub const RAW_ASAP: i32 = 0x0000_0000;
    pub const RAW_FULL: i32 = 0x0000_0001;

    pub const fn from_raw(raw: i32) -> PthreadResult<Self> {
        match raw {
            Self::RAW_ASAP => Ok(Self::Asap),
            Self::RAW_FULL => Ok(Self::Full),
            _ => Err(PthreadError::Invalid),
        }
    }
}

#[derive(Debug)]
pub struct MsgPipeAttr {
    _private: (),
}

impl MsgPipeAttr {
    pub fn new() -> PthreadResult<Self> {
        Err(PthreadError::NotSupported)
    }

    pub fn destroy(self) -> PthreadResult<()> {
        Err(PthreadError::NotSupported)
    }
}

#[derive(Debug)]
pub struct PthreadMsgPipe {
    _private: (),
}

impl PthreadMsgPipe {
    pub fn new(_attr: Option<&MsgPipeAttr>) -> PthreadResult<Self> {
        Err(PthreadError::NotSupported)
    }

    pub fn destroy(&self) -> PthreadResult<()> {
        Err(PthreadError::NotSupported)
    }

    /// Bytes sent.
    pub fn send(&self, _data: &[u8], _mode: MsgPipeWaitMode) -> PthreadResult<usize> {
        Err(PthreadError::NotSupported)
    }

    pub fn try_send(&self, _data: &[u8], _mode: MsgPipeWaitMode) -> PthreadResult<usize> {
        Err(PthreadError::NotSupported)
    }

    pub fn timed_send(
        &self,
        _data: &[u8],
        _mode: MsgPipeWaitMode,
        _deadline: &Timespec,
    ) -> PthreadResult<usize> {
        Err(PthreadError::NotSupported)
    }

    /// Bytes received.
    pub fn receive(&self, _buf: &mut [u8], _mode: MsgPipeWaitMode) -> PthreadResult<usize> {
        Err(PthreadError::NotSupported)
    }

    pub fn try_receive(&self, _buf: &mut [u8], _mode: MsgPipeWaitMode) -> PthreadResult<usize> {
        Err(PthreadError::NotSupported)
    }

    pub fn timed_receive(
        &self,
        _buf: &mut [u8],
        _mode: MsgPipeWaitMode,
        _deadline: &Timespec,
    ) -> PthreadResult<usize> {
        Err(PthreadError::NotSupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_mode_raw_values() {
        assert_eq!(MsgPipeWaitMode::from_raw(1), Ok(MsgPipeWaitMode::Full));
        assert_eq!(MsgPipeWaitMode::from_raw(0), Ok(MsgPipeWaitMode::Asap));
        assert_eq!(MsgPipeWaitMode::from_raw(2), Err(PthreadError::Invalid));
    }
}
