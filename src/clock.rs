//! Wall-clock reading for deadline arithmetic.
//!
//! Deadlines are absolute Unix timestamps in seconds; they are never reset by
//! redirects or waits, so a single monotonic-enough wall clock reading is all
//! the lifecycle core needs.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix time in whole seconds.
#[must_use]
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}
