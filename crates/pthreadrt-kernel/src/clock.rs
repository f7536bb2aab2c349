//! Process clock.
//!
//! All absolute deadlines handed to the runtime are expressed on this clock:
//! time elapsed since the substrate was first touched by the process.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

static EPOCH: OnceLock<Instant> = OnceLock::new();

fn epoch() -> Instant {
    *EPOCH.get_or_init(Instant::now)
}

/// Time elapsed since process start.
#[must_use]
pub fn process_time() -> Duration {
    epoch().elapsed()
}

/// Relative duration from now until `deadline` on the process clock,
/// clamped at zero when the deadline has already passed.
#[must_use]
pub fn until(deadline: Duration) -> Duration {
    deadline.saturating_sub(process_time())
}
