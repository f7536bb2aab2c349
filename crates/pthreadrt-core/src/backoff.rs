//! Bounded exponential backoff for polling loops.

use std::hint;
use std::thread;
use std::time::Duration;

use crate::config;

const SPIN_STEPS: u32 = 6;
const YIELD_STEPS: u32 = 10;
const MAX_SLEEP_MICROS: u64 = 1_000;

/// The configured step limit was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Exhausted;

pub(crate) struct Backoff {
    step: u32,
    taken: u64,
    limit: u64,
}

impl Backoff {
    pub(crate) fn new() -> Self {
        Self::with_limit(config::spin_limit())
    }

    pub(crate) fn with_limit(limit: u64) -> Self {
        Self {
            step: 0,
            taken: 0,
            limit,
        }
    }

    /// Waits a little longer than last time: busy spins first, then yields,
    /// then short sleeps capped at a millisecond.
    pub(crate) fn snooze(&mut self) -> Result<(), Exhausted> {
        if self.taken >= self.limit {
            return Err(Exhausted);
        }
        self.taken += 1;
        if self.step < SPIN_STEPS {
            for _ in 0..(1u32 << self.step) {
                hint::spin_loop();
            }
        } else if self.step < YIELD_STEPS {
            thread::yield_now();
        } else {
            let micros = (1u64 << (self.step - YIELD_STEPS).min(10)).min(MAX_SLEEP_MICROS);
            thread::sleep(Duration::from_micros(micros));
        }
        self.step = self.step.saturating_add(1);
        Ok(())
    }

    pub(crate) fn steps(&self) -> u64 {
        self.taken
    }
}
