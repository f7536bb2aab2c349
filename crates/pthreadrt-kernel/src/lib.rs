//! Native kernel substrate for pthreadrt.
//!
//! Models the console kernel's capability set that the POSIX runtime sits on:
//! threads with numeric priorities, weighted counting semaphores whose wait
//! can run a registration callback once the caller is queued, event flags,
//! and a process clock. This host implementation is built on `parking_lot`
//! and `std::thread`.
//!
//! Priorities follow the console convention: a smaller number is more urgent.

pub mod clock;
pub mod error;
pub mod event_flag;
pub mod sema;
pub mod thread;

pub use error::{KernelError, KernelResult};
pub use event_flag::{ClearMode, EventFlag, WaitMode};
pub use sema::{QueueOrder, Semaphore};
pub use thread::ThreadUid;

/// Number of distinct priority levels.
pub const PRIORITY_LEVELS: usize = 128;
/// Most urgent priority.
pub const HIGHEST_PRIORITY: u8 = 0;
/// Least urgent priority.
pub const LOWEST_PRIORITY: u8 = (PRIORITY_LEVELS - 1) as u8;
/// Most urgent priority available to application threads.
pub const USER_HIGHEST_PRIORITY: u8 = 16;
/// Least urgent priority available to application threads.
pub const USER_LOWEST_PRIORITY: u8 = LOWEST_PRIORITY - 1;
/// Priority given to threads that do not request one.
pub const DEFAULT_PRIORITY: u8 = 64;

/// Returns true when `priority` names a valid level.
#[must_use]
pub const fn valid_priority(priority: u8) -> bool {
    (priority as usize) < PRIORITY_LEVELS
}
