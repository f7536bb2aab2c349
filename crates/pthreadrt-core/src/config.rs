//! Runtime configuration.
//!
//! Read once from the environment and cached:
//! - `PTHREADRT_LOCKING`: `on` (default) or `off`. When off, mutex operations
//!   (including the hand-off inside condition waits) succeed without locking.
//! - `PTHREADRT_FOREIGN_THREADS`: `adopt` (default) or `reject`. Decides what
//!   happens when a thread the runtime did not create calls a thread-local API.
//! - `PTHREADRT_SPIN_LIMIT`: number of backoff steps a polling loop may take
//!   before it gives up.

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

pub const ENV_LOCKING: &str = "PTHREADRT_LOCKING";
pub const ENV_FOREIGN_THREADS: &str = "PTHREADRT_FOREIGN_THREADS";
pub const ENV_SPIN_LIMIT: &str = "PTHREADRT_SPIN_LIMIT";

/// Backoff steps allowed when nothing is configured.
pub const DEFAULT_SPIN_LIMIT: u64 = 1 << 20;

/// Policy for threads that were not created through the runtime.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ForeignThreadPolicy {
    /// Register lazily as a detached, non-joinable thread.
    #[default]
    Adopt,
    /// Treat as a broken usage contract.
    Reject,
}

impl ForeignThreadPolicy {
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "reject" | "strict" | "deny" => Self::Reject,
            _ => Self::Adopt,
        }
    }
}

#[must_use]
fn parse_switch(s: &str) -> bool {
    !matches!(
        s.to_ascii_lowercase().as_str(),
        "off" | "0" | "false" | "no" | "disabled"
    )
}

// 0=unresolved, 1=on, 2=off.
static LOCKING: AtomicU8 = AtomicU8::new(0);
// 0=unresolved, 1=adopt, 2=reject.
static FOREIGN: AtomicU8 = AtomicU8::new(0);
// 0=unresolved.
static SPIN_LIMIT: AtomicU64 = AtomicU64::new(0);

const UNRESOLVED: u8 = 0;
const ON: u8 = 1;
const OFF: u8 = 2;

/// Whether mutexes actually lock.
#[must_use]
pub fn locking_enabled() -> bool {
    let cached = LOCKING.load(Ordering::Acquire);
    if cached != UNRESOLVED {
        return cached == ON;
    }
    let enabled = std::env::var(ENV_LOCKING)
        .map(|v| parse_switch(&v))
        .unwrap_or(true);
    // A concurrent explicit setting wins over the environment.
    let _ = LOCKING.compare_exchange(
        UNRESOLVED,
        if enabled { ON } else { OFF },
        Ordering::AcqRel,
        Ordering::Acquire,
    );
    LOCKING.load(Ordering::Acquire) == ON
}

pub fn set_locking_enabled(enabled: bool) {
    LOCKING.store(if enabled { ON } else { OFF }, Ordering::Release);
}

#[must_use]
pub fn foreign_thread_policy() -> ForeignThreadPolicy {
    match FOREIGN.load(Ordering::Acquire) {
        ON => return ForeignThreadPolicy::Adopt,
        OFF => return ForeignThreadPolicy::Reject,
        _ => {}
    }
    let policy = std::env::var(ENV_FOREIGN_THREADS)
        .map(|v| ForeignThreadPolicy::from_str_loose(&v))
        .unwrap_or_default();
    let encoded = match policy {
        ForeignThreadPolicy::Adopt => ON,
        ForeignThreadPolicy::Reject => OFF,
    };
    let _ = FOREIGN.compare_exchange(UNRESOLVED, encoded, Ordering::AcqRel, Ordering::Acquire);
    policy
}

/// Maximum backoff steps for polling loops.
#[must_use]
pub fn spin_limit() -> u64 {
    let cached = SPIN_LIMIT.load(Ordering::Acquire);
    if cached != 0 {
        return cached;
    }
    let limit = std::env::var(ENV_SPIN_LIMIT)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|&n| n > 0)
        .unwrap_or(DEFAULT_SPIN_LIMIT);
    let _ = SPIN_LIMIT.compare_exchange(0, limit, Ordering::AcqRel, Ordering::Acquire);
    SPIN_LIMIT.load(Ordering::Acquire)
}

/// Overrides the backoff limit; zero restores the default.
pub fn set_spin_limit(limit: u64) {
    let limit = if limit == 0 { DEFAULT_SPIN_LIMIT } else { limit };
    SPIN_LIMIT.store(limit, Ordering::Release);
}
