//! Gesture and mission state machine.
//!
//! The operator arms the return flight with a short tap followed by a
//! qualifying long press. Releasing the long press requests a mission load;
//! once the load window lapses with a fresh completion the machine arms a
//! countdown that fires the execute trigger unless the button is pressed
//! again. Every failure path lands back in [`SystemState::Idle`].
//!
//! The transition function is a total `match` over `(state, event)`: every
//! combination that does not appear in the table below is ignored.

use core::fmt;
use core::time::Duration;

use crate::button::Edge;
use crate::mission::{LoadRejection, MissionLoadResult};
use crate::time::MonotonicInstant;

/// Delay between confirming the mission and firing the execute trigger.
pub const TIME_TO_TAKEOFF: Duration = Duration::from_secs(20);
/// Minimum hold (exclusive) for a long press to qualify.
pub const LONG_PRESS_REQUIRED_TIME: Duration = Duration::from_secs(4);
/// Time allowed between the first release and the start of the long press.
pub const WAITING_FOR_LONG_PRESS_TIMEOUT: Duration = Duration::from_secs(2);
/// Time the waypoint collaborator gets to confirm the mission load.
pub const MISSION_LOAD_TIMEOUT: Duration = Duration::from_secs(5);

/// Timing knobs for the gesture and mission sequence.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ReturnTimings {
    pub long_press_required: Duration,
    pub long_press_window: Duration,
    pub mission_load_window: Duration,
    pub time_to_takeoff: Duration,
}

impl ReturnTimings {
    /// Timings used by the fielded module.
    #[must_use]
    pub const fn reference() -> Self {
        Self {
            long_press_required: LONG_PRESS_REQUIRED_TIME,
            long_press_window: WAITING_FOR_LONG_PRESS_TIMEOUT,
            mission_load_window: MISSION_LOAD_TIMEOUT,
            time_to_takeoff: TIME_TO_TAKEOFF,
        }
    }

    /// Overrides the qualifying hold duration.
    #[must_use]
    pub const fn with_long_press_required(mut self, value: Duration) -> Self {
        self.long_press_required = value;
        self
    }

    /// Overrides the gap allowed before the long press starts.
    #[must_use]
    pub const fn with_long_press_window(mut self, value: Duration) -> Self {
        self.long_press_window = value;
        self
    }

    /// Overrides the mission load window.
    #[must_use]
    pub const fn with_mission_load_window(mut self, value: Duration) -> Self {
        self.mission_load_window = value;
        self
    }

    /// Overrides the countdown length.
    #[must_use]
    pub const fn with_time_to_takeoff(mut self, value: Duration) -> Self {
        self.time_to_takeoff = value;
        self
    }
}

impl Default for ReturnTimings {
    fn default() -> Self {
        Self::reference()
    }
}

/// Phase of the return trigger.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SystemState {
    Idle,
    WaitingRelease,
    WaitingLongPressStart,
    WaitingLongPressRelease,
    LoadingMission,
    ArmedCountdown,
}

impl SystemState {
    /// All states, in declaration order.
    pub const ALL: [SystemState; 6] = [
        SystemState::Idle,
        SystemState::WaitingRelease,
        SystemState::WaitingLongPressStart,
        SystemState::WaitingLongPressRelease,
        SystemState::LoadingMission,
        SystemState::ArmedCountdown,
    ];

    /// Compact discriminant used by the status board.
    #[must_use]
    pub const fn as_index(self) -> u8 {
        match self {
            SystemState::Idle => 0,
            SystemState::WaitingRelease => 1,
            SystemState::WaitingLongPressStart => 2,
            SystemState::WaitingLongPressRelease => 3,
            SystemState::LoadingMission => 4,
            SystemState::ArmedCountdown => 5,
        }
    }

    /// Inverse of [`as_index`](Self::as_index).
    #[must_use]
    pub const fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(SystemState::Idle),
            1 => Some(SystemState::WaitingRelease),
            2 => Some(SystemState::WaitingLongPressStart),
            3 => Some(SystemState::WaitingLongPressRelease),
            4 => Some(SystemState::LoadingMission),
            5 => Some(SystemState::ArmedCountdown),
            _ => None,
        }
    }

    /// States a fresh press cancels back to idle.
    #[must_use]
    pub const fn is_cancellable(self) -> bool {
        matches!(
            self,
            SystemState::LoadingMission | SystemState::ArmedCountdown
        )
    }

    /// Short kebab-case label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            SystemState::Idle => "idle",
            SystemState::WaitingRelease => "waiting-release",
            SystemState::WaitingLongPressStart => "waiting-long-press-start",
            SystemState::WaitingLongPressRelease => "waiting-long-press-release",
            SystemState::LoadingMission => "loading-mission",
            SystemState::ArmedCountdown => "armed-countdown",
        }
    }
}

impl fmt::Display for SystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Instants captured on entry into the timed states.
///
/// Only the stamp belonging to the current state is ever populated; every
/// transition rebuilds the set so a previous occupancy cannot leak through.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Timestamps<I> {
    pub long_up_start: Option<I>,
    pub long_press_start: Option<I>,
    pub mission_load_start: Option<I>,
    pub takeoff_time: Option<I>,
}

impl<I> Timestamps<I> {
    /// No stamps captured.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            long_up_start: None,
            long_press_start: None,
            mission_load_start: None,
            takeoff_time: None,
        }
    }
}

impl<I> Default for Timestamps<I> {
    fn default() -> Self {
        Self::empty()
    }
}

/// Deadline-driven event raised by the timeout monitor.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Expiry {
    /// The long press did not start in time.
    LongPressWindow,
    /// The mission load window lapsed; carries the polled outcome.
    MissionLoadWindow(MissionLoadResult),
    /// The countdown reached the takeoff time.
    Countdown,
}

/// Input to the transition function.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Event {
    Edge(Edge),
    Expired(Expiry),
}

/// Why a transition happened.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TransitionCause {
    /// The operator advanced the gesture.
    Gesture(Edge),
    /// The long press was released before the qualifying time.
    HoldTooShort,
    /// The long press never started.
    LongPressWindowLapsed,
    /// The mission load was requested.
    LoadRequested,
    /// The bridge refused to start a load.
    LoadRejected(LoadRejection),
    /// The load window lapsed without a fresh completion.
    LoadUnconfirmed(MissionLoadResult),
    /// The load was confirmed and the countdown armed.
    CountdownArmed,
    /// A press cancelled a load or countdown.
    OperatorCancel,
    /// The module was stopped while a load or countdown was in flight.
    ModuleStopped,
    /// The countdown elapsed and the execute trigger fired.
    ExecuteFired,
}

impl fmt::Display for TransitionCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionCause::Gesture(edge) => write!(f, "button {edge}"),
            TransitionCause::HoldTooShort => f.write_str("button was not held long enough"),
            TransitionCause::LongPressWindowLapsed => {
                f.write_str("waited too long for the long press")
            }
            TransitionCause::LoadRequested => f.write_str("mission load requested"),
            TransitionCause::LoadRejected(reason) => write!(f, "mission load rejected: {reason}"),
            TransitionCause::LoadUnconfirmed(result) => {
                write!(f, "mission load not confirmed: {result}")
            }
            TransitionCause::CountdownArmed => f.write_str("mission loaded, countdown armed"),
            TransitionCause::OperatorCancel => f.write_str("cancelled by button press"),
            TransitionCause::ModuleStopped => f.write_str("cancelled because the module stopped"),
            TransitionCause::ExecuteFired => f.write_str("return mission executed"),
        }
    }
}

/// Record of an applied transition.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Transition<I> {
    pub from: SystemState,
    pub to: SystemState,
    pub cause: TransitionCause,
    pub at: I,
}

/// Side effects the machine needs from its collaborators.
pub trait ReturnPorts<I> {
    /// Starts a non-blocking mission load; fails fast when it cannot start.
    fn begin_mission_load(&mut self) -> Result<(), LoadRejection>;

    /// Polls the outcome of the load requested at `load_started`.
    fn mission_load_result(&self, load_started: I) -> MissionLoadResult;

    /// Signals the vehicle to start the return flight now.
    fn execute_return(&mut self);
}

/// Single-writer owner of [`SystemState`] and its [`Timestamps`].
#[derive(Clone, Debug)]
pub struct ReturnStateMachine<I> {
    state: SystemState,
    timestamps: Timestamps<I>,
    timings: ReturnTimings,
}

impl<I> ReturnStateMachine<I>
where
    I: MonotonicInstant,
{
    /// Creates an idle machine.
    #[must_use]
    pub const fn new(timings: ReturnTimings) -> Self {
        Self {
            state: SystemState::Idle,
            timestamps: Timestamps::empty(),
            timings,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SystemState {
        self.state
    }

    /// Stamps captured for the current state.
    #[must_use]
    pub const fn timestamps(&self) -> &Timestamps<I> {
        &self.timestamps
    }

    /// Configured timings.
    #[must_use]
    pub const fn timings(&self) -> &ReturnTimings {
        &self.timings
    }

    /// Forces the machine back to idle, dropping all stamps.
    pub fn reset(&mut self) {
        self.state = SystemState::Idle;
        self.timestamps = Timestamps::empty();
    }

    /// Deadline after which the pending long press is abandoned.
    #[must_use]
    pub fn long_press_window_deadline(&self) -> Option<I> {
        self.gated(SystemState::WaitingLongPressStart, self.timestamps.long_up_start)
            .map(|start| start + self.timings.long_press_window)
    }

    /// Deadline after which the mission load outcome is evaluated.
    #[must_use]
    pub fn mission_load_deadline(&self) -> Option<I> {
        self.gated(SystemState::LoadingMission, self.timestamps.mission_load_start)
            .map(|start| start + self.timings.mission_load_window)
    }

    /// Instant at which the execute trigger fires.
    #[must_use]
    pub fn takeoff_time(&self) -> Option<I> {
        self.gated(SystemState::ArmedCountdown, self.timestamps.takeoff_time)
    }

    /// `true` once the held button has crossed the qualifying duration.
    #[must_use]
    pub fn hold_qualifies(&self, now: I) -> bool {
        self.gated(
            SystemState::WaitingLongPressRelease,
            self.timestamps.long_press_start,
        )
        .is_some_and(|start| now > start + self.timings.long_press_required)
    }

    fn gated(&self, state: SystemState, stamp: Option<I>) -> Option<I> {
        if self.state == state { stamp } else { None }
    }

    /// Applies `event` at `now`, returning the transition if one happened.
    pub fn apply<P>(&mut self, event: Event, now: I, ports: &mut P) -> Option<Transition<I>>
    where
        P: ReturnPorts<I> + ?Sized,
    {
        use Edge::{Pressed, Released};
        use SystemState::{
            ArmedCountdown, Idle, LoadingMission, WaitingLongPressRelease, WaitingLongPressStart,
            WaitingRelease,
        };

        let (to, cause) = match (self.state, event) {
            (Idle, Event::Edge(Pressed)) => (WaitingRelease, TransitionCause::Gesture(Pressed)),
            (WaitingRelease, Event::Edge(Released)) => {
                (WaitingLongPressStart, TransitionCause::Gesture(Released))
            }
            (WaitingLongPressStart, Event::Edge(Pressed)) => {
                (WaitingLongPressRelease, TransitionCause::Gesture(Pressed))
            }
            (WaitingLongPressStart, Event::Expired(Expiry::LongPressWindow)) => {
                (Idle, TransitionCause::LongPressWindowLapsed)
            }
            (WaitingLongPressRelease, Event::Edge(Released)) => {
                if self.hold_qualifies(now) {
                    match ports.begin_mission_load() {
                        Ok(()) => (LoadingMission, TransitionCause::LoadRequested),
                        Err(reason) => (Idle, TransitionCause::LoadRejected(reason)),
                    }
                } else {
                    (Idle, TransitionCause::HoldTooShort)
                }
            }
            (LoadingMission | ArmedCountdown, Event::Edge(Pressed)) => {
                (Idle, TransitionCause::OperatorCancel)
            }
            (LoadingMission, Event::Expired(Expiry::MissionLoadWindow(result))) => {
                if result.is_success() {
                    (ArmedCountdown, TransitionCause::CountdownArmed)
                } else {
                    (Idle, TransitionCause::LoadUnconfirmed(result))
                }
            }
            (ArmedCountdown, Event::Expired(Expiry::Countdown)) => {
                ports.execute_return();
                (Idle, TransitionCause::ExecuteFired)
            }
            (Idle | WaitingLongPressStart, Event::Edge(Released))
            | (WaitingRelease | WaitingLongPressRelease, Event::Edge(Pressed))
            | (LoadingMission | ArmedCountdown, Event::Edge(Released))
            | (Idle | WaitingRelease | WaitingLongPressRelease, Event::Expired(_))
            | (
                WaitingLongPressStart,
                Event::Expired(Expiry::MissionLoadWindow(_) | Expiry::Countdown),
            )
            | (
                LoadingMission,
                Event::Expired(Expiry::LongPressWindow | Expiry::Countdown),
            )
            | (
                ArmedCountdown,
                Event::Expired(Expiry::LongPressWindow | Expiry::MissionLoadWindow(_)),
            ) => return None,
        };

        Some(self.enter(to, cause, now))
    }

    /// Abandons an in-flight load or countdown without firing the execute
    /// trigger. Returns `None` when nothing cancellable is in progress.
    pub fn cancel(&mut self, now: I) -> Option<Transition<I>> {
        self.state
            .is_cancellable()
            .then(|| self.enter(SystemState::Idle, TransitionCause::ModuleStopped, now))
    }

    fn enter(&mut self, to: SystemState, cause: TransitionCause, now: I) -> Transition<I> {
        let from = self.state;
        let mut stamps = Timestamps::empty();
        match to {
            SystemState::WaitingLongPressStart => stamps.long_up_start = Some(now),
            SystemState::WaitingLongPressRelease => stamps.long_press_start = Some(now),
            SystemState::LoadingMission => stamps.mission_load_start = Some(now),
            SystemState::ArmedCountdown => {
                stamps.takeoff_time = Some(now + self.timings.time_to_takeoff);
            }
            SystemState::Idle | SystemState::WaitingRelease => {}
        }

        self.state = to;
        self.timestamps = stamps;

        Transition {
            from,
            to,
            cause,
            at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mission::LoadFailure;
    use crate::time::test_support::MockInstant;

    #[derive(Default)]
    struct MockPorts {
        reject: Option<LoadRejection>,
        load_requests: u32,
        executes: u32,
    }

    impl ReturnPorts<MockInstant> for MockPorts {
        fn begin_mission_load(&mut self) -> Result<(), LoadRejection> {
            self.load_requests += 1;
            match self.reject {
                Some(reason) => Err(reason),
                None => Ok(()),
            }
        }

        fn mission_load_result(&self, _load_started: MockInstant) -> MissionLoadResult {
            MissionLoadResult::Succeeded
        }

        fn execute_return(&mut self) {
            self.executes += 1;
        }
    }

    fn press() -> Event {
        Event::Edge(Edge::Pressed)
    }

    fn release() -> Event {
        Event::Edge(Edge::Released)
    }

    fn machine_in(
        state: SystemState,
        ports: &mut MockPorts,
    ) -> ReturnStateMachine<MockInstant> {
        let script = [
            (press(), 0),
            (release(), 100),
            (press(), 200),
            (release(), 4_300),
            (
                Event::Expired(Expiry::MissionLoadWindow(MissionLoadResult::Succeeded)),
                9_400,
            ),
        ];
        let mut machine = ReturnStateMachine::new(ReturnTimings::reference());
        for (event, at) in script {
            if machine.state() == state {
                break;
            }
            machine.apply(event, MockInstant::millis(at), ports);
        }
        assert_eq!(machine.state(), state);
        machine
    }

    #[test]
    fn press_cancels_load_and_countdown() {
        for state in [SystemState::LoadingMission, SystemState::ArmedCountdown] {
            let mut ports = MockPorts::default();
            let mut machine = machine_in(state, &mut ports);
            let transition = machine
                .apply(press(), MockInstant::secs(10), &mut ports)
                .expect("press must cancel");
            assert_eq!(transition.to, SystemState::Idle);
            assert_eq!(transition.cause, TransitionCause::OperatorCancel);
            assert_eq!(*machine.timestamps(), Timestamps::empty());
            assert_eq!(ports.executes, 0);
        }
    }

    #[test]
    fn stop_cancels_only_load_and_countdown() {
        for state in [SystemState::LoadingMission, SystemState::ArmedCountdown] {
            let mut ports = MockPorts::default();
            let mut machine = machine_in(state, &mut ports);
            let transition = machine
                .cancel(MockInstant::secs(10))
                .expect("stop must cancel");
            assert_eq!(transition.from, state);
            assert_eq!(transition.to, SystemState::Idle);
            assert_eq!(transition.cause, TransitionCause::ModuleStopped);
            assert_eq!(*machine.timestamps(), Timestamps::empty());
            assert_eq!(ports.executes, 0);
        }

        for state in [
            SystemState::Idle,
            SystemState::WaitingRelease,
            SystemState::WaitingLongPressStart,
            SystemState::WaitingLongPressRelease,
        ] {
            let mut ports = MockPorts::default();
            let mut machine = machine_in(state, &mut ports);
            assert!(!state.is_cancellable());
            assert!(machine.cancel(MockInstant::secs(10)).is_none());
            assert_eq!(machine.state(), state);
        }
    }

    #[test]
    fn release_is_ignored_only_where_nothing_is_held() {
        let mut ports = MockPorts::default();
        let mut machine = machine_in(SystemState::Idle, &mut ports);
        assert!(machine.apply(release(), MockInstant::millis(0), &mut ports).is_none());

        let mut machine = machine_in(SystemState::WaitingLongPressStart, &mut ports);
        assert!(machine.apply(release(), MockInstant::millis(150), &mut ports).is_none());
        assert_eq!(machine.state(), SystemState::WaitingLongPressStart);

        let mut machine = machine_in(SystemState::WaitingRelease, &mut ports);
        let transition = machine
            .apply(release(), MockInstant::millis(100), &mut ports)
            .expect("release after the first press advances the gesture");
        assert_eq!(transition.to, SystemState::WaitingLongPressStart);
    }

    #[test]
    fn short_hold_returns_idle_without_loading() {
        let mut ports = MockPorts::default();
        let mut machine = machine_in(SystemState::WaitingLongPressRelease, &mut ports);
        let transition = machine
            .apply(release(), MockInstant::millis(1_200), &mut ports)
            .expect("release must transition");
        assert_eq!(transition.to, SystemState::Idle);
        assert_eq!(transition.cause, TransitionCause::HoldTooShort);
        assert_eq!(ports.load_requests, 0);
    }

    #[test]
    fn hold_equal_to_required_time_does_not_qualify() {
        let mut ports = MockPorts::default();
        let mut machine = machine_in(SystemState::WaitingLongPressRelease, &mut ports);
        machine.apply(release(), MockInstant::millis(4_200), &mut ports);
        assert_eq!(machine.state(), SystemState::Idle);
        assert_eq!(ports.load_requests, 0);
    }

    #[test]
    fn rejected_load_returns_idle_without_stamp() {
        let mut ports = MockPorts {
            reject: Some(LoadRejection::MissionFileMissing),
            ..MockPorts::default()
        };
        let mut machine = machine_in(SystemState::WaitingLongPressRelease, &mut ports);
        let transition = machine
            .apply(release(), MockInstant::millis(4_300), &mut ports)
            .expect("release must transition");
        assert_eq!(transition.to, SystemState::Idle);
        assert_eq!(
            transition.cause,
            TransitionCause::LoadRejected(LoadRejection::MissionFileMissing)
        );
        assert_eq!(machine.timestamps().mission_load_start, None);
        assert_eq!(ports.load_requests, 1);
    }

    #[test]
    fn confirmed_load_arms_countdown_from_check_time() {
        let mut ports = MockPorts::default();
        let mut machine = machine_in(SystemState::LoadingMission, &mut ports);
        let check = MockInstant::millis(9_400);
        machine.apply(
            Event::Expired(Expiry::MissionLoadWindow(MissionLoadResult::Succeeded)),
            check,
            &mut ports,
        );
        assert_eq!(machine.state(), SystemState::ArmedCountdown);
        assert_eq!(machine.takeoff_time(), Some(check + TIME_TO_TAKEOFF));
    }

    #[test]
    fn unconfirmed_load_returns_idle() {
        for result in [
            MissionLoadResult::Pending,
            MissionLoadResult::Failed(LoadFailure::NoFreshCompletion),
        ] {
            let mut ports = MockPorts::default();
            let mut machine = machine_in(SystemState::LoadingMission, &mut ports);
            let transition = machine
                .apply(
                    Event::Expired(Expiry::MissionLoadWindow(result)),
                    MockInstant::secs(10),
                    &mut ports,
                )
                .expect("window lapse must transition");
            assert_eq!(transition.to, SystemState::Idle);
            assert_eq!(transition.cause, TransitionCause::LoadUnconfirmed(result));
        }
    }

    #[test]
    fn countdown_expiry_fires_execute_once() {
        let mut ports = MockPorts::default();
        let mut machine = machine_in(SystemState::ArmedCountdown, &mut ports);
        let transition = machine
            .apply(
                Event::Expired(Expiry::Countdown),
                MockInstant::secs(30),
                &mut ports,
            )
            .expect("countdown must fire");
        assert_eq!(transition.cause, TransitionCause::ExecuteFired);
        assert_eq!(machine.state(), SystemState::Idle);
        assert!(
            machine
                .apply(Event::Expired(Expiry::Countdown), MockInstant::secs(30), &mut ports)
                .is_none()
        );
        assert_eq!(ports.executes, 1);
    }

    #[test]
    fn unrelated_events_are_ignored() {
        for state in SystemState::ALL {
            let mut ports = MockPorts::default();
            let mut machine = machine_in(state, &mut ports);
            let stamps = *machine.timestamps();
            let ignored = [
                Event::Expired(Expiry::LongPressWindow),
                Event::Expired(Expiry::Countdown),
                Event::Expired(Expiry::MissionLoadWindow(MissionLoadResult::Succeeded)),
                press(),
                release(),
            ];
            for event in ignored {
                let expected_match = matches!(
                    (state, event),
                    (SystemState::Idle, Event::Edge(Edge::Pressed))
                        | (SystemState::WaitingRelease, Event::Edge(Edge::Released))
                        | (SystemState::WaitingLongPressStart, Event::Edge(Edge::Pressed))
                        | (
                            SystemState::WaitingLongPressStart,
                            Event::Expired(Expiry::LongPressWindow)
                        )
                        | (SystemState::WaitingLongPressRelease, Event::Edge(Edge::Released))
                        | (SystemState::LoadingMission, Event::Edge(Edge::Pressed))
                        | (
                            SystemState::LoadingMission,
                            Event::Expired(Expiry::MissionLoadWindow(_))
                        )
                        | (SystemState::ArmedCountdown, Event::Edge(Edge::Pressed))
                        | (SystemState::ArmedCountdown, Event::Expired(Expiry::Countdown))
                );
                if expected_match {
                    continue;
                }
                assert!(
                    machine
                        .apply(event, MockInstant::secs(1), &mut ports)
                        .is_none(),
                    "{state} should ignore {event:?}"
                );
                assert_eq!(machine.state(), state);
                assert_eq!(*machine.timestamps(), stamps);
            }
        }
    }

    #[test]
    fn state_index_round_trips() {
        for state in SystemState::ALL {
            assert_eq!(SystemState::from_index(state.as_index()), Some(state));
        }
        assert_eq!(SystemState::from_index(6), None);
    }
}
