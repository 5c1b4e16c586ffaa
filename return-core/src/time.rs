//! Monotonic instant abstractions.
//!
//! The state machine never reads a clock itself; callers pass `now` into every
//! entry point. Any type that is `Copy + Ord` and can be advanced by a
//! [`Duration`] works, which keeps the logic testable with plain integers.

use core::ops::Add;
use core::time::Duration;

/// Monotonic timestamp accepted by the controller.
pub trait MonotonicInstant: Copy + Ord + Add<Duration, Output = Self> {
    /// Returns the duration from `earlier` to `self`, or zero if `earlier` is later.
    fn saturating_duration_since(&self, earlier: Self) -> Duration;
}

/// Instant that can be losslessly stored as microseconds since an epoch.
///
/// Required by [`StatusBoard`](crate::status::StatusBoard), which keeps its
/// timestamps in atomics.
pub trait MicrosInstant: MonotonicInstant {
    /// Microseconds since the instant's epoch.
    fn as_micros(self) -> u64;

    /// Rebuilds an instant from microseconds since the epoch.
    fn from_micros(micros: u64) -> Self;
}

/// Saturating conversion used when durations are squeezed into `u64` micros.
#[must_use]
pub fn duration_micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}
