//! Host monotonic time.

use std::ops::Add;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use return_core::time::{MicrosInstant, MonotonicInstant, duration_micros};

/// Microseconds since the owning clock was created.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct HostInstant(u64);

impl HostInstant {
    /// Instant at the clock origin.
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub fn from_duration(since_origin: Duration) -> Self {
        Self(duration_micros(since_origin))
    }

    /// Time elapsed between the clock origin and this instant.
    #[must_use]
    pub const fn since_origin(self) -> Duration {
        Duration::from_micros(self.0)
    }
}

impl Add<Duration> for HostInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0.saturating_add(duration_micros(rhs)))
    }
}

impl MonotonicInstant for HostInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }
}

impl MicrosInstant for HostInstant {
    fn as_micros(self) -> u64 {
        self.0
    }

    fn from_micros(micros: u64) -> Self {
        Self(micros)
    }
}

/// Source of [`HostInstant`]s shared between the tick loop and the signaler.
pub trait Clock: Send + Sync {
    fn now(&self) -> HostInstant;

    /// Lets `duration` pass on this clock.
    fn sleep(&self, duration: Duration);
}

/// Wall-clock backed by [`Instant`].
#[derive(Clone, Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> HostInstant {
        HostInstant::from_duration(self.origin.elapsed())
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Virtual clock that only moves when told to.
///
/// Used by the scenario replay and by tests so runs are deterministic and
/// take no wall time.
#[derive(Debug, Default)]
pub struct ManualClock {
    micros: AtomicU64,
}

impl ManualClock {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            micros: AtomicU64::new(0),
        }
    }

    /// Moves the clock forward by `duration`.
    pub fn advance(&self, duration: Duration) {
        self.micros
            .fetch_add(duration_micros(duration), Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> HostInstant {
        HostInstant::from_micros(self.micros.load(Ordering::Acquire))
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_moves_only_on_sleep() {
        let clock = ManualClock::new();
        assert_eq!(clock.now(), HostInstant::ZERO);

        clock.sleep(Duration::from_millis(250));
        assert_eq!(clock.now().since_origin(), Duration::from_millis(250));
    }

    #[test]
    fn host_instant_addition_saturates() {
        let late = HostInstant::from_micros(u64::MAX - 1);
        assert_eq!((late + Duration::from_secs(1)).as_micros(), u64::MAX);
    }
}
