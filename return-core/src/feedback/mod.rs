//! LED cadences for each state.
//!
//! The feedback signaler runs on its own thread and only ever reads the
//! published [`StatusSnapshot`]. This module holds the portable half: the
//! per-state cadence table, the programs derived from live timestamps, and a
//! cursor that turns the active program into one LED command at a time so the
//! thread can re-check state between every step.

use core::time::Duration;

use crate::machine::{LONG_PRESS_REQUIRED_TIME, ReturnTimings, SystemState};
use crate::status::StatusSnapshot;
use crate::time::MonotonicInstant;

/// On time of a single pulse.
pub const BLINK_LENGTH: Duration = Duration::from_millis(100);
/// Gap between the pulses of a set.
pub const BLINK_BETWEEN_INTERVAL: Duration = Duration::from_millis(100);
/// Pause after each set of idle pulses.
pub const BLINK_SET_INTERVAL: Duration = Duration::from_millis(1_500);
/// Half period of the blink shown while the long press is still too short.
pub const BLINK_LONG_PRESS_TIMER_INTERVAL: Duration = Duration::from_millis(150);
/// Half period of the countdown blink while takeoff is still far away.
pub const BLINK_WARNING_INTERVAL: Duration = Duration::from_millis(100);
/// Half period of the countdown blink close to takeoff.
pub const BLINK_DANGER_INTERVAL: Duration = Duration::from_millis(50);
/// Remaining countdown below which the danger cadence is used.
pub const BLINK_DANGER_TIME_TO_TAKEOFF: Duration = Duration::from_secs(15);
/// Poll interval used when no program drives the LED.
pub const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Maximum number of steps in a single program.
pub const MAX_BLINK_STEPS: usize = 8;

/// Logical LED output, independent of wiring polarity.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LedState {
    On,
    Off,
}

/// One on/off pair of a program.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BlinkStep {
    pub on: Duration,
    pub off: Duration,
}

impl BlinkStep {
    #[must_use]
    pub const fn new(on: Duration, off: Duration) -> Self {
        Self { on, off }
    }

    /// Symmetric on/off step.
    #[must_use]
    pub const fn square(half_period: Duration) -> Self {
        Self::new(half_period, half_period)
    }

    const ZERO: Self = Self::new(Duration::ZERO, Duration::ZERO);
}

/// What happens after the last step of a program.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Repeat {
    /// Run once, then leave the LED untouched.
    Once,
    /// Hold the LED off for `pause`, then start over.
    Cycle { pause: Duration },
}

/// Declarative LED cadence.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BlinkProgram {
    steps: [BlinkStep; MAX_BLINK_STEPS],
    len: usize,
    repeat: Repeat,
}

impl BlinkProgram {
    /// Program made of `count` identical steps.
    ///
    /// `count` is clamped to `1..=MAX_BLINK_STEPS`.
    #[must_use]
    pub const fn repeated(step: BlinkStep, count: usize, repeat: Repeat) -> Self {
        let len = if count == 0 {
            1
        } else if count > MAX_BLINK_STEPS {
            MAX_BLINK_STEPS
        } else {
            count
        };
        Self {
            steps: [step; MAX_BLINK_STEPS],
            len,
            repeat,
        }
    }

    /// Program built from explicit steps. Returns `None` when `steps` is empty
    /// or longer than [`MAX_BLINK_STEPS`].
    #[must_use]
    pub fn from_steps(steps: &[BlinkStep], repeat: Repeat) -> Option<Self> {
        if steps.is_empty() || steps.len() > MAX_BLINK_STEPS {
            return None;
        }
        let mut storage = [BlinkStep::ZERO; MAX_BLINK_STEPS];
        storage[..steps.len()].copy_from_slice(steps);
        Some(Self {
            steps: storage,
            len: steps.len(),
            repeat,
        })
    }

    /// Steps in execution order.
    #[must_use]
    pub fn steps(&self) -> &[BlinkStep] {
        &self.steps[..self.len]
    }

    #[must_use]
    pub const fn repeat(&self) -> Repeat {
        self.repeat
    }
}

/// Timing knobs for the built-in cadences.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FeedbackTimings {
    pub pulse: Duration,
    pub pulse_gap: Duration,
    pub set_pause: Duration,
    pub hold_blink: Duration,
    pub warning_blink: Duration,
    pub danger_blink: Duration,
    pub danger_threshold: Duration,
    pub idle_poll: Duration,
    /// Hold duration after which the hold cadence switches to solid pulses.
    pub long_press_required: Duration,
}

impl FeedbackTimings {
    /// Timings used by the fielded module.
    #[must_use]
    pub const fn reference() -> Self {
        Self {
            pulse: BLINK_LENGTH,
            pulse_gap: BLINK_BETWEEN_INTERVAL,
            set_pause: BLINK_SET_INTERVAL,
            hold_blink: BLINK_LONG_PRESS_TIMER_INTERVAL,
            warning_blink: BLINK_WARNING_INTERVAL,
            danger_blink: BLINK_DANGER_INTERVAL,
            danger_threshold: BLINK_DANGER_TIME_TO_TAKEOFF,
            idle_poll: IDLE_POLL_INTERVAL,
            long_press_required: LONG_PRESS_REQUIRED_TIME,
        }
    }

    /// Reference cadences with the hold threshold taken from `timings`.
    #[must_use]
    pub const fn for_return(timings: &ReturnTimings) -> Self {
        let mut feedback = Self::reference();
        feedback.long_press_required = timings.long_press_required;
        feedback
    }

    /// Two short pulses followed by a long pause.
    #[must_use]
    pub const fn breathing(&self) -> BlinkProgram {
        BlinkProgram::repeated(
            BlinkStep::new(self.pulse, self.pulse_gap),
            2,
            Repeat::Cycle {
                pause: self.set_pause,
            },
        )
    }

    /// Solid-on pulses shown once the hold qualifies.
    #[must_use]
    pub const fn hold_qualified(&self) -> BlinkProgram {
        BlinkProgram::repeated(
            BlinkStep::new(self.pulse, Duration::ZERO),
            1,
            Repeat::Cycle {
                pause: Duration::ZERO,
            },
        )
    }

    /// Faster alternation shown while the hold is still too short.
    #[must_use]
    pub const fn hold_pending(&self) -> BlinkProgram {
        square_cycle(self.hold_blink)
    }

    /// Slow countdown cadence.
    #[must_use]
    pub const fn warning(&self) -> BlinkProgram {
        square_cycle(self.warning_blink)
    }

    /// Fast countdown cadence close to takeoff.
    #[must_use]
    pub const fn danger(&self) -> BlinkProgram {
        square_cycle(self.danger_blink)
    }
}

impl Default for FeedbackTimings {
    fn default() -> Self {
        Self::reference()
    }
}

const fn square_cycle(half_period: Duration) -> BlinkProgram {
    BlinkProgram::repeated(
        BlinkStep::square(half_period),
        1,
        Repeat::Cycle {
            pause: Duration::ZERO,
        },
    )
}

/// How the LED behaves in a given state.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Cadence {
    /// Two pulses and a pause, repeating.
    Breathing,
    /// Hold progress: fast blink until the hold qualifies, then solid pulses.
    HoldProgress,
    /// Countdown: warning cadence, then danger cadence near takeoff.
    Countdown,
    /// No program; the LED keeps whatever level it was left at.
    Inert,
    /// A caller-supplied program.
    Fixed(BlinkProgram),
}

/// Per-state cadence assignment.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CadenceTable {
    cadences: [Cadence; SystemState::ALL.len()],
    timings: FeedbackTimings,
}

impl CadenceTable {
    /// Reference assignment: nothing drives the LED while waiting for the
    /// long press or while the mission loads.
    #[must_use]
    pub const fn reference() -> Self {
        Self {
            cadences: [
                Cadence::Breathing,
                Cadence::Breathing,
                Cadence::Inert,
                Cadence::HoldProgress,
                Cadence::Inert,
                Cadence::Countdown,
            ],
            timings: FeedbackTimings::reference(),
        }
    }

    /// Overrides the cadence used in `state`.
    #[must_use]
    pub const fn with_cadence(mut self, state: SystemState, cadence: Cadence) -> Self {
        self.cadences[state.as_index() as usize] = cadence;
        self
    }

    /// Replaces the timing knobs.
    #[must_use]
    pub const fn with_timings(mut self, timings: FeedbackTimings) -> Self {
        self.timings = timings;
        self
    }

    #[must_use]
    pub const fn cadence(&self, state: SystemState) -> Cadence {
        self.cadences[state.as_index() as usize]
    }

    #[must_use]
    pub const fn timings(&self) -> &FeedbackTimings {
        &self.timings
    }
}

impl Default for CadenceTable {
    fn default() -> Self {
        Self::reference()
    }
}

/// Picks the program for the published state at `now`.
///
/// Returns `None` when the state's cadence is [`Cadence::Inert`] or when the
/// timestamp the cadence depends on has not been published.
#[must_use]
pub fn select_program<I>(
    snapshot: &StatusSnapshot<I>,
    now: I,
    table: &CadenceTable,
) -> Option<BlinkProgram>
where
    I: MonotonicInstant,
{
    let timings = table.timings();
    match table.cadence(snapshot.state) {
        Cadence::Breathing => Some(timings.breathing()),
        Cadence::HoldProgress => {
            let start = snapshot.timestamps.long_press_start?;
            if now.saturating_duration_since(start) > timings.long_press_required {
                Some(timings.hold_qualified())
            } else {
                Some(timings.hold_pending())
            }
        }
        Cadence::Countdown => {
            let takeoff = snapshot.timestamps.takeoff_time?;
            if takeoff.saturating_duration_since(now) > timings.danger_threshold {
                Some(timings.warning())
            } else {
                Some(timings.danger())
            }
        }
        Cadence::Inert => None,
        Cadence::Fixed(program) => Some(program),
    }
}

/// Single actuator command produced by [`BlinkCursor`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LedCommand {
    /// Level to drive, or `None` to leave the LED untouched.
    pub level: Option<LedState>,
    /// How long to hold before asking for the next command.
    pub hold: Duration,
}

impl LedCommand {
    const fn drive(level: LedState, hold: Duration) -> Self {
        Self {
            level: Some(level),
            hold,
        }
    }

    const fn wait(hold: Duration) -> Self {
        Self { level: None, hold }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Phase {
    On(usize),
    Off(usize),
    Pause,
    Done,
}

/// Steps through the active program one LED command at a time.
///
/// The program is re-selected before every command; the cursor restarts from
/// the first step whenever the selection or the published revision changes.
#[derive(Clone, Debug)]
pub struct BlinkCursor {
    active: Option<(BlinkProgram, u32)>,
    phase: Phase,
}

impl BlinkCursor {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            active: None,
            phase: Phase::Done,
        }
    }

    /// Produces the next LED command for `snapshot` at `now`.
    pub fn next_command<I>(
        &mut self,
        snapshot: &StatusSnapshot<I>,
        now: I,
        table: &CadenceTable,
    ) -> LedCommand
    where
        I: MonotonicInstant,
    {
        let idle = LedCommand::wait(table.timings().idle_poll);
        let selected = select_program(snapshot, now, table).map(|p| (p, snapshot.revision));
        if selected != self.active {
            self.active = selected;
            self.phase = Phase::On(0);
        }

        let Some((program, _)) = self.active else {
            return idle;
        };
        let steps = program.steps();

        // Zero-length phases are skipped; a program of only zero durations
        // falls through to the idle poll.
        for _ in 0..=(2 * steps.len() + 1) {
            match self.phase {
                Phase::On(index) => {
                    self.phase = Phase::Off(index);
                    if !steps[index].on.is_zero() {
                        return LedCommand::drive(LedState::On, steps[index].on);
                    }
                }
                Phase::Off(index) => {
                    self.phase = if index + 1 < steps.len() {
                        Phase::On(index + 1)
                    } else {
                        match program.repeat() {
                            Repeat::Cycle { .. } => Phase::Pause,
                            Repeat::Once => Phase::Done,
                        }
                    };
                    if !steps[index].off.is_zero() {
                        return LedCommand::drive(LedState::Off, steps[index].off);
                    }
                }
                Phase::Pause => {
                    self.phase = Phase::On(0);
                    if let Repeat::Cycle { pause } = program.repeat()
                        && !pause.is_zero()
                    {
                        return LedCommand::drive(LedState::Off, pause);
                    }
                }
                Phase::Done => return idle,
            }
        }

        idle
    }
}

impl Default for BlinkCursor {
    fn default() -> Self {
        Self::new()
    }
}
