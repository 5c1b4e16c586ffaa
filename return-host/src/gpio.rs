//! GPIO collaborator contract and host implementations.
//!
//! The reference wiring uses an active-high button (`BUTTON_PRESSED = 1`) and
//! an active-low LED (`LED_ON = 0`). On the host the button is driven from
//! the session and the LED is mirrored to the terminal title.

use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, ThreadId};

use crossterm::execute;
use crossterm::terminal::SetTitle;
use log::{debug, trace};
use return_core::button::ButtonLevel;
use return_core::feedback::LedState;

/// Electrical level on a pin.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PinLevel {
    Low,
    High,
}

impl From<PinLevel> for ButtonLevel {
    fn from(level: PinLevel) -> Self {
        match level {
            PinLevel::Low => ButtonLevel::Low,
            PinLevel::High => ButtonLevel::High,
        }
    }
}

/// Which pin level lights the LED.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum LedPolarity {
    /// LED on when the pin is driven low (reference wiring).
    #[default]
    ActiveLow,
    ActiveHigh,
}

impl LedPolarity {
    /// Pin level that produces `state`.
    #[must_use]
    pub const fn level_for(self, state: LedState) -> PinLevel {
        match (self, state) {
            (LedPolarity::ActiveLow, LedState::On) | (LedPolarity::ActiveHigh, LedState::Off) => {
                PinLevel::Low
            }
            (LedPolarity::ActiveLow, LedState::Off) | (LedPolarity::ActiveHigh, LedState::On) => {
                PinLevel::High
            }
        }
    }

    /// Logical state shown for a pin level.
    #[must_use]
    pub const fn state_for(self, level: PinLevel) -> LedState {
        match (self, level) {
            (LedPolarity::ActiveLow, PinLevel::Low) | (LedPolarity::ActiveHigh, PinLevel::High) => {
                LedState::On
            }
            _ => LedState::Off,
        }
    }
}

/// Digital output driving the indicator LED.
pub trait LedOutput: Send {
    fn write(&mut self, level: PinLevel);
}

/// Button input with edge notification.
pub trait ButtonInput {
    /// Starts reporting edges in both directions.
    fn enable_edges(&mut self);

    /// Stops reporting edges.
    fn disable_edges(&mut self);

    fn edges_enabled(&self) -> bool;

    /// Current pin level.
    fn level(&self) -> PinLevel;
}

/// Button whose level is set by the operator session.
#[derive(Debug)]
pub struct SimulatedButton {
    level: PinLevel,
    released_level: PinLevel,
    edges_enabled: bool,
}

impl SimulatedButton {
    /// Creates a released button whose released level is `released_level`.
    #[must_use]
    pub const fn new(released_level: PinLevel) -> Self {
        Self {
            level: released_level,
            released_level,
            edges_enabled: false,
        }
    }

    #[must_use]
    pub const fn released_level(&self) -> PinLevel {
        self.released_level
    }

    /// Level the pin reads while the button is held.
    #[must_use]
    pub const fn pressed_level(&self) -> PinLevel {
        match self.released_level {
            PinLevel::Low => PinLevel::High,
            PinLevel::High => PinLevel::Low,
        }
    }

    /// Drives the pin. Returns the level to report when an edge notification
    /// should fire.
    pub fn drive(&mut self, level: PinLevel) -> Option<PinLevel> {
        let changed = self.level != level;
        self.level = level;
        (changed && self.edges_enabled).then_some(level)
    }

    #[must_use]
    pub fn is_pressed(&self) -> bool {
        self.level != self.released_level
    }
}

impl ButtonInput for SimulatedButton {
    fn enable_edges(&mut self) {
        self.edges_enabled = true;
    }

    fn disable_edges(&mut self) {
        self.edges_enabled = false;
    }

    fn edges_enabled(&self) -> bool {
        self.edges_enabled
    }

    fn level(&self) -> PinLevel {
        self.level
    }
}

/// Mirrors the LED into the terminal title.
#[derive(Debug)]
pub struct ConsoleLed {
    polarity: LedPolarity,
    last: Option<PinLevel>,
}

impl ConsoleLed {
    #[must_use]
    pub const fn new(polarity: LedPolarity) -> Self {
        Self {
            polarity,
            last: None,
        }
    }
}

impl LedOutput for ConsoleLed {
    fn write(&mut self, level: PinLevel) {
        trace!("return: LED pin {level:?}");
        if self.last == Some(level) {
            return;
        }
        self.last = Some(level);

        let title = match self.polarity.state_for(level) {
            LedState::On => "return [LED ●]",
            LedState::Off => "return [LED ○]",
        };
        if let Err(err) = execute!(io::stderr(), SetTitle(title)) {
            debug!("return: could not update terminal title: {err}");
        }
    }
}

/// Cloneable handle letting successive signalers share one physical LED.
pub struct SharedLed<L> {
    inner: Arc<Mutex<L>>,
}

impl<L> SharedLed<L> {
    pub fn new(led: L) -> Self {
        Self {
            inner: Arc::new(Mutex::new(led)),
        }
    }

    /// Runs `f` with exclusive access to the wrapped output.
    pub fn with<R>(&self, f: impl FnOnce(&mut L) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

impl<L> Clone for SharedLed<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L: LedOutput> LedOutput for SharedLed<L> {
    fn write(&mut self, level: PinLevel) {
        self.with(|led| led.write(level));
    }
}

/// LED that records every write with the writing thread.
#[derive(Debug, Default)]
pub struct RecordingLed {
    writes: Vec<(ThreadId, PinLevel)>,
}

impl RecordingLed {
    #[must_use]
    pub fn writes(&self) -> &[(ThreadId, PinLevel)] {
        &self.writes
    }

    #[must_use]
    pub fn last_level(&self) -> Option<PinLevel> {
        self.writes.last().map(|(_, level)| *level)
    }
}

impl LedOutput for RecordingLed {
    fn write(&mut self, level: PinLevel) {
        self.writes.push((thread::current().id(), level));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_led_is_active_low() {
        let polarity = LedPolarity::default();
        assert_eq!(polarity.level_for(LedState::On), PinLevel::Low);
        assert_eq!(polarity.level_for(LedState::Off), PinLevel::High);
        assert_eq!(polarity.state_for(PinLevel::Low), LedState::On);
    }

    #[test]
    fn simulated_button_reports_edges_only_when_enabled() {
        let mut button = SimulatedButton::new(PinLevel::Low);
        assert_eq!(button.drive(PinLevel::High), None);
        assert!(button.is_pressed());

        button.enable_edges();
        assert_eq!(button.drive(PinLevel::High), None);
        assert_eq!(button.drive(PinLevel::Low), Some(PinLevel::Low));
        assert!(!button.is_pressed());
    }
}
