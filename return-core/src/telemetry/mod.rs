//! In-memory event history for the return trigger.
//!
//! Every transition, filtered edge and mission-load outcome is appended to a
//! fixed-size ring so the `status` command and the host transcripts can show
//! what happened recently without an allocator.

use core::fmt;
use core::time::Duration;

use heapless::HistoryBuf;

use crate::button::Edge;
use crate::machine::{SystemState, Transition, TransitionCause};
use crate::mission::{LoadRejection, MissionLoadResult};
use crate::time::MonotonicInstant;

/// Number of records retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 64;

/// Monotonic identifier assigned to each record.
pub type EventId = u32;

/// Event kinds captured by the recorder.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TelemetryEvent {
    /// The machine entered a new state.
    StateEntered {
        from: SystemState,
        to: SystemState,
        cause: TransitionCause,
    },
    /// An edge was dropped by the software filter.
    EdgeFiltered(Edge),
    /// A mission load request was accepted by the bridge.
    MissionLoadRequested,
    /// A mission load request was refused before it started.
    MissionLoadRejected(LoadRejection),
    /// The mission load window lapsed with the given outcome.
    MissionLoadFinished(MissionLoadResult),
    /// The execute trigger fired.
    ExecuteFired,
}

impl fmt::Display for TelemetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEvent::StateEntered { from, to, cause } => {
                write!(f, "{from} -> {to} ({cause})")
            }
            TelemetryEvent::EdgeFiltered(edge) => write!(f, "filtered {edge} edge"),
            TelemetryEvent::MissionLoadRequested => f.write_str("mission load requested"),
            TelemetryEvent::MissionLoadRejected(reason) => {
                write!(f, "mission load rejected: {reason}")
            }
            TelemetryEvent::MissionLoadFinished(result) => {
                write!(f, "mission load {result}")
            }
            TelemetryEvent::ExecuteFired => f.write_str("execute fired"),
        }
    }
}

/// Entry stored in the ring.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TelemetryRecord<I> {
    pub id: EventId,
    pub timestamp: I,
    pub event: TelemetryEvent,
    /// Time spent in the state that was just left, for transitions.
    pub dwell: Option<Duration>,
}

/// Records telemetry events into a fixed-size ring buffer.
pub struct TelemetryRecorder<I, const CAPACITY: usize = TELEMETRY_RING_CAPACITY> {
    ring: HistoryBuf<TelemetryRecord<I>, CAPACITY>,
    state_entered_at: Option<I>,
    next_event_id: EventId,
}

impl<I, const CAPACITY: usize> TelemetryRecorder<I, CAPACITY>
where
    I: MonotonicInstant,
{
    /// Creates a recorder with an empty history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            state_entered_at: None,
            next_event_id: 0,
        }
    }

    /// Records in chronological order.
    pub fn oldest_first(&self) -> impl Iterator<Item = &TelemetryRecord<I>> + '_ {
        self.ring.oldest_ordered()
    }

    /// Most recent record, if any.
    #[must_use]
    pub fn latest(&self) -> Option<&TelemetryRecord<I>> {
        self.ring.recent()
    }

    /// Number of records currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// `true` when nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Total number of records written, including ones that were overwritten.
    #[must_use]
    pub const fn total_recorded(&self) -> EventId {
        self.next_event_id
    }

    /// Records a state transition along with the dwell time of the previous state.
    pub fn record_transition(&mut self, transition: &Transition<I>) -> EventId {
        let dwell = self
            .state_entered_at
            .map(|entered| transition.at.saturating_duration_since(entered));
        self.state_entered_at = Some(transition.at);

        self.push(
            TelemetryEvent::StateEntered {
                from: transition.from,
                to: transition.to,
                cause: transition.cause,
            },
            transition.at,
            dwell,
        )
    }

    /// Records an arbitrary event.
    pub fn record(&mut self, event: TelemetryEvent, timestamp: I) -> EventId {
        self.push(event, timestamp, None)
    }

    fn push(&mut self, event: TelemetryEvent, timestamp: I, dwell: Option<Duration>) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);
        self.ring.write(TelemetryRecord {
            id,
            timestamp,
            event,
            dwell,
        });
        id
    }
}

impl<I, const CAPACITY: usize> Default for TelemetryRecorder<I, CAPACITY>
where
    I: MonotonicInstant,
{
    fn default() -> Self {
        Self::new()
    }
}
