//! Shared status storage read by the feedback signaler.
//!
//! The controller is the only writer. It publishes the state and its
//! timestamps after every transition; readers (the LED thread, the `status`
//! command) take consistent snapshots without locking. A sequence counter
//! guards the multi-word publish: odd values mark a write in progress and
//! readers retry until they observe the same even value on both sides of
//! their loads.

use core::marker::PhantomData;

use portable_atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering, fence};

use crate::machine::{SystemState, Timestamps};
use crate::time::MicrosInstant;

/// Consistent copy of the published status.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StatusSnapshot<I> {
    pub state: SystemState,
    pub timestamps: Timestamps<I>,
    /// Number of publishes so far; changes on every transition.
    pub revision: u32,
}

impl<I> StatusSnapshot<I> {
    /// Snapshot describing a freshly booted, idle controller.
    #[must_use]
    pub const fn idle() -> Self {
        Self {
            state: SystemState::Idle,
            timestamps: Timestamps::empty(),
            revision: 0,
        }
    }
}

/// Anything that can hand out status snapshots.
pub trait StatusSource<I> {
    fn snapshot(&self) -> StatusSnapshot<I>;
}

/// Lock-free single-writer status cell.
pub struct StatusBoard<I> {
    sequence: AtomicU32,
    state: AtomicU8,
    long_up_start: AtomicU64,
    long_press_start: AtomicU64,
    mission_load_start: AtomicU64,
    takeoff_time: AtomicU64,
    _instant: PhantomData<fn() -> I>,
}

fn encode(stamp: Option<u64>) -> u64 {
    stamp.map_or(0, |micros| micros.saturating_add(1))
}

fn decode<I: MicrosInstant>(raw: u64) -> Option<I> {
    if raw == 0 {
        None
    } else {
        Some(I::from_micros(raw - 1))
    }
}

impl<I> StatusBoard<I>
where
    I: MicrosInstant,
{
    /// Creates a board reporting [`SystemState::Idle`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            sequence: AtomicU32::new(0),
            state: AtomicU8::new(0),
            long_up_start: AtomicU64::new(0),
            long_press_start: AtomicU64::new(0),
            mission_load_start: AtomicU64::new(0),
            takeoff_time: AtomicU64::new(0),
            _instant: PhantomData,
        }
    }

    /// Publishes a new state. Must only be called from the owning controller.
    pub fn publish(&self, state: SystemState, timestamps: &Timestamps<I>) {
        let start = self.sequence.load(Ordering::Relaxed);
        self.sequence.store(start.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        self.state.store(state.as_index(), Ordering::Relaxed);
        self.long_up_start.store(
            encode(timestamps.long_up_start.map(I::as_micros)),
            Ordering::Relaxed,
        );
        self.long_press_start.store(
            encode(timestamps.long_press_start.map(I::as_micros)),
            Ordering::Relaxed,
        );
        self.mission_load_start.store(
            encode(timestamps.mission_load_start.map(I::as_micros)),
            Ordering::Relaxed,
        );
        self.takeoff_time.store(
            encode(timestamps.takeoff_time.map(I::as_micros)),
            Ordering::Relaxed,
        );

        self.sequence.store(start.wrapping_add(2), Ordering::Release);
    }

    /// Current state without the timestamps.
    #[must_use]
    pub fn state(&self) -> SystemState {
        SystemState::from_index(self.state.load(Ordering::Acquire)).unwrap_or(SystemState::Idle)
    }

    /// Number of completed publishes.
    #[must_use]
    pub fn revision(&self) -> u32 {
        self.sequence.load(Ordering::Acquire) / 2
    }

    fn read_once(&self) -> StatusSnapshot<I> {
        StatusSnapshot {
            state: SystemState::from_index(self.state.load(Ordering::Relaxed))
                .unwrap_or(SystemState::Idle),
            timestamps: Timestamps {
                long_up_start: decode(self.long_up_start.load(Ordering::Relaxed)),
                long_press_start: decode(self.long_press_start.load(Ordering::Relaxed)),
                mission_load_start: decode(self.mission_load_start.load(Ordering::Relaxed)),
                takeoff_time: decode(self.takeoff_time.load(Ordering::Relaxed)),
            },
            revision: 0,
        }
    }
}

impl<I> Default for StatusBoard<I>
where
    I: MicrosInstant,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<I> StatusSource<I> for StatusBoard<I>
where
    I: MicrosInstant,
{
    fn snapshot(&self) -> StatusSnapshot<I> {
        loop {
            let before = self.sequence.load(Ordering::Acquire);
            if before % 2 == 1 {
                core::hint::spin_loop();
                continue;
            }
            let mut snapshot = self.read_once();
            fence(Ordering::Acquire);
            let after = self.sequence.load(Ordering::Relaxed);
            if before == after {
                snapshot.revision = before / 2;
                return snapshot;
            }
            core::hint::spin_loop();
        }
    }
}

impl<I, S> StatusSource<I> for &S
where
    S: StatusSource<I> + ?Sized,
{
    fn snapshot(&self) -> StatusSnapshot<I> {
        (**self).snapshot()
    }
}
