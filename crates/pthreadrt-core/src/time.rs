//! Absolute deadlines.
//!
//! Timed operations take an absolute [`Timespec`] on the process clock and
//! turn it into a relative wait in whole microseconds at the call boundary.
//! A deadline already in the past becomes a zero wait: the operation still
//! tries once and then reports a timeout.

use std::time::Duration;

use pthreadrt_kernel::clock;

use crate::error::{PthreadError, PthreadResult};

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Seconds plus nanoseconds on the process clock.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timespec {
    pub sec: i64,
    pub nsec: i64,
}

impl Timespec {
    #[must_use]
    pub const fn new(sec: i64, nsec: i64) -> Self {
        Self { sec, nsec }
    }

    /// Current process time.
    #[must_use]
    pub fn now() -> Self {
        Self::from_duration(clock::process_time())
    }

    /// Deadline `after` from now.
    #[must_use]
    pub fn after(after: Duration) -> Self {
        Self::from_duration(clock::process_time().saturating_add(after))
    }

    #[must_use]
    pub fn from_duration(d: Duration) -> Self {
        Self {
            sec: i64::try_from(d.as_secs()).unwrap_or(i64::MAX),
            nsec: i64::from(d.subsec_nanos()),
        }
    }

    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.nsec >= 0 && self.nsec < NANOS_PER_SEC
    }

    /// Whole microseconds, saturating.
    #[must_use]
    pub const fn as_micros(&self) -> i64 {
        self.sec
            .saturating_mul(1_000_000)
            .saturating_add(self.nsec / 1_000)
    }
}

/// Microseconds from now until `deadline`, clamped at zero.
pub fn relative_micros(deadline: &Timespec) -> PthreadResult<u64> {
    if !deadline.is_valid() {
        return Err(PthreadError::Invalid);
    }
    let now = Timespec::now().as_micros();
    let delta = deadline.as_micros().saturating_sub(now);
    Ok(u64::try_from(delta).unwrap_or(0))
}

/// Relative wait for a timed operation.
pub fn relative_timeout(deadline: &Timespec) -> PthreadResult<Duration> {
    relative_micros(deadline).map(Duration::from_micros)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn past_deadline_clamps_to_zero() {
        assert_eq!(relative_micros(&Timespec::new(0, 0)), Ok(0));
        assert_eq!(relative_micros(&Timespec::new(-5, 0)), Ok(0));
    }

    #[test]
    fn future_deadline_is_positive() {
        let us = relative_micros(&Timespec::after(Duration::from_secs(2))).unwrap();
        assert!(us > 1_000_000 && us <= 2_000_000, "{us}");
    }

    #[test]
    fn bad_nanoseconds_rejected() {
        assert_eq!(relative_micros(&Timespec::new(1, -1)), Err(PthreadError::Invalid));
        assert_eq!(
            relative_timeout(&Timespec::new(1, NANOS_PER_SEC)),
            Err(PthreadError::Invalid)
        );
    }

    #[test]
    fn micros_saturate() {
        assert_eq!(Timespec::new(i64::MAX, 0).as_micros(), i64::MAX);
        assert_eq!(Timespec::new(2, 5_000).as_micros(), 2_000_005);
    }
}
