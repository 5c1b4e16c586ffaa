//! Periodic deadline checks for the timed states.
//!
//! The monitor owns no state. Each tick compares `now` against the deadlines
//! derived from the machine's timestamps and feeds at most one expiry back
//! into [`ReturnStateMachine::apply`]. Running it twice at the same instant
//! is a no-op the second time because the first call already left the timed
//! state.

use core::time::Duration;

use crate::machine::{Event, Expiry, ReturnPorts, ReturnStateMachine, SystemState, Transition};
use crate::time::MonotonicInstant;

/// Recommended spacing between monitor ticks.
pub const MONITOR_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Returns the expiry that is due at `now`, if any.
///
/// The long-press and mission-load windows lapse strictly after their
/// deadline; the countdown fires as soon as the takeoff time is reached.
#[must_use]
pub fn check<I, P>(machine: &ReturnStateMachine<I>, now: I, ports: &P) -> Option<Expiry>
where
    I: MonotonicInstant,
    P: ReturnPorts<I> + ?Sized,
{
    match machine.state() {
        SystemState::WaitingLongPressStart => machine
            .long_press_window_deadline()
            .filter(|deadline| now > *deadline)
            .map(|_| Expiry::LongPressWindow),
        SystemState::LoadingMission => {
            let started = machine.timestamps().mission_load_start?;
            let deadline = machine.mission_load_deadline()?;
            (now > deadline).then(|| Expiry::MissionLoadWindow(ports.mission_load_result(started)))
        }
        SystemState::ArmedCountdown => machine
            .takeoff_time()
            .filter(|takeoff| now >= *takeoff)
            .map(|_| Expiry::Countdown),
        SystemState::Idle | SystemState::WaitingRelease | SystemState::WaitingLongPressRelease => {
            None
        }
    }
}

/// Runs one monitor pass, applying any due expiry.
pub fn tick<I, P>(
    machine: &mut ReturnStateMachine<I>,
    now: I,
    ports: &mut P,
) -> Option<Transition<I>>
where
    I: MonotonicInstant,
    P: ReturnPorts<I> + ?Sized,
{
    let expiry = check(machine, now, ports)?;
    machine.apply(Event::Expired(expiry), now, ports)
}
