//! Edge classification for the momentary return button.
//!
//! The GPIO layer reports a level sample every time it detects a change on the
//! button pin. The classifier turns that raw level into a [`Edge`] label. Contact
//! bounce is expected to be handled by the hardware or driver; a minimum
//! inter-edge interval can be switched on when that assumption does not hold.

use core::fmt;
use core::time::Duration;

use crate::time::MonotonicInstant;

/// Digital level sampled from a GPIO pin.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ButtonLevel {
    Low,
    High,
}

impl ButtonLevel {
    /// Builds a level from a raw `0`/non-zero reading.
    #[must_use]
    pub const fn from_raw(raw: u8) -> Self {
        if raw == 0 { Self::Low } else { Self::High }
    }
}

/// Which level means "pressed" on the wired button.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ButtonPolarity {
    /// Pressed reads high (external pull-down, reference wiring).
    ActiveHigh,
    /// Pressed reads low (external pull-up).
    ActiveLow,
}

impl ButtonPolarity {
    /// Level observed while the button is held down.
    #[must_use]
    pub const fn pressed_level(self) -> ButtonLevel {
        match self {
            ButtonPolarity::ActiveHigh => ButtonLevel::High,
            ButtonPolarity::ActiveLow => ButtonLevel::Low,
        }
    }
}

/// Semantic edge delivered to the state machine.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Edge {
    Pressed,
    Released,
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Edge::Pressed => f.write_str("pressed"),
            Edge::Released => f.write_str("released"),
        }
    }
}

/// Software filter applied on top of the driver's edge detection.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum EdgeFilter {
    /// Every reported edge is forwarded.
    #[default]
    PassThrough,
    /// Edges closer than the interval to the previously accepted edge are dropped.
    MinInterval(Duration),
}

/// Suggested interval when the software filter is enabled.
pub const SUGGESTED_MIN_EDGE_INTERVAL: Duration = Duration::from_millis(20);

/// Classification result for a single level sample.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Classification {
    /// Edge accepted and forwarded.
    Edge(Edge),
    /// Edge arrived inside the filter interval and was dropped.
    Filtered(Edge),
}

/// Converts level samples into [`Edge`] labels.
#[derive(Clone, Debug)]
pub struct EdgeClassifier<I> {
    polarity: ButtonPolarity,
    filter: EdgeFilter,
    last_accepted: Option<I>,
    filtered: u32,
}

impl<I> EdgeClassifier<I>
where
    I: MonotonicInstant,
{
    /// Creates a classifier for the given wiring with no software filter.
    #[must_use]
    pub const fn new(polarity: ButtonPolarity) -> Self {
        Self::with_filter(polarity, EdgeFilter::PassThrough)
    }

    /// Creates a classifier with an explicit software filter.
    #[must_use]
    pub const fn with_filter(polarity: ButtonPolarity, filter: EdgeFilter) -> Self {
        Self {
            polarity,
            filter,
            last_accepted: None,
            filtered: 0,
        }
    }

    /// Returns the configured wiring polarity.
    #[must_use]
    pub const fn polarity(&self) -> ButtonPolarity {
        self.polarity
    }

    /// Returns the configured filter.
    #[must_use]
    pub const fn filter(&self) -> EdgeFilter {
        self.filter
    }

    /// Number of edges dropped by the filter so far.
    #[must_use]
    pub const fn filtered_count(&self) -> u32 {
        self.filtered
    }

    /// Maps a raw level to its edge label without touching filter state.
    #[must_use]
    pub fn label(&self, level: ButtonLevel) -> Edge {
        if level == self.polarity.pressed_level() {
            Edge::Pressed
        } else {
            Edge::Released
        }
    }

    /// Classifies a level sample observed at `now`.
    pub fn classify(&mut self, level: ButtonLevel, now: I) -> Classification {
        let edge = self.label(level);

        if let EdgeFilter::MinInterval(interval) = self.filter
            && let Some(previous) = self.last_accepted
            && now < previous + interval
        {
            self.filtered = self.filtered.saturating_add(1);
            return Classification::Filtered(edge);
        }

        self.last_accepted = Some(now);
        Classification::Edge(edge)
    }
}
