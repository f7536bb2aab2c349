//! # pthreadrt-core
//!
//! POSIX threads runtime layered over the native kernel substrate in
//! `pthreadrt-kernel`: thread lifecycle and cancellation, mutexes with
//! priority inheritance and ceilings, condition variables, reader/writer
//! locks, barriers, spinlocks, once-control, thread-specific data, and the
//! non-portable `_np` extensions.
//!
//! Every operation reports failures through [`PthreadError`].

#![deny(unsafe_code)]

pub mod atomic;
pub mod config;
pub mod errno;
pub mod error;
pub mod np;
pub mod pthread;
pub mod time;

mod backoff;
mod lazy;
mod runtime;

pub use error::{PthreadError, PthreadResult};
pub use runtime::{ThreadHook, set_add_thread_callback, set_delete_thread_callback};
pub use time::Timespec;
