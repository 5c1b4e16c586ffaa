//! Operator command grammar.
//!
//! The host exposes a single `return` command with a handful of verbs:
//!
//! ```text
//! [return] start | stop | status | help [topic]
//! ```
//!
//! Keywords are matched case-insensitively. The parser is built from `winnow`
//! combinators over `&str` and never allocates.

use core::fmt;

use winnow::ascii::{Caseless, space1};
use winnow::combinator::{alt, opt, preceded, terminated};
use winnow::prelude::*;
use winnow::token::take_while;

/// Usage line printed for unknown or empty input.
pub const USAGE: &str = "Usage: return <start>|<stop>|<status>";

/// Parsed operator command.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Command<'a> {
    /// Enable button edge notification and start the LED signaler.
    Start,
    /// Stop the LED signaler and disable edge notification.
    Stop,
    /// Print the current state, deadlines and recent telemetry.
    Status,
    /// Print help, optionally for a single topic.
    Help(Option<&'a str>),
}

/// Reasons a command line was refused.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CommandError {
    /// Nothing but whitespace was entered.
    Empty,
    /// The input did not match the grammar; `offset` points into the trimmed line.
    Unrecognized { offset: usize },
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Empty => f.write_str(USAGE),
            CommandError::Unrecognized { offset } => {
                write!(f, "unrecognized input at column {}; {USAGE}", offset + 1)
            }
        }
    }
}

/// Parses a single command line.
///
/// # Errors
///
/// Returns [`CommandError`] when the line is empty or does not match the grammar.
pub fn parse_command(line: &str) -> Result<Command<'_>, CommandError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(CommandError::Empty);
    }

    command.parse(trimmed).map_err(|error| CommandError::Unrecognized {
        offset: error.offset(),
    })
}

fn command<'a>(input: &mut &'a str) -> ModalResult<Command<'a>> {
    preceded(opt(terminated(Caseless("return"), space1)), verb).parse_next(input)
}

fn verb<'a>(input: &mut &'a str) -> ModalResult<Command<'a>> {
    alt((
        Caseless("start").value(Command::Start),
        Caseless("stop").value(Command::Stop),
        Caseless("status").value(Command::Status),
        preceded(Caseless("help"), opt(preceded(space1, topic))).map(Command::Help),
    ))
    .parse_next(input)
}

fn topic<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    take_while(1.., |c: char| c.is_ascii_alphanumeric() || c == '-').parse_next(input)
}

/// Help text for a topic, or the overview when `topic` is `None`.
#[must_use]
pub fn help_text(topic: Option<&str>) -> Option<&'static str> {
    let Some(topic) = topic else {
        return Some(HELP_OVERVIEW);
    };

    let entry = HELP_TOPICS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(topic))?;
    Some(entry.1)
}

/// Topics accepted by `help <topic>`.
pub fn help_topics() -> impl Iterator<Item = &'static str> {
    HELP_TOPICS.iter().map(|(name, _)| *name)
}

const HELP_OVERVIEW: &str = "\
return start   arm the button and LED feedback
return stop    stop LED feedback and ignore the button
return status  show state, deadlines and recent events
help <topic>   details for start, stop, status or gesture";

const HELP_TOPICS: &[(&str, &str)] = &[
    (
        "start",
        "Enables edge notification on the return button and (re)starts the LED \
         signaler. Any running signaler is stopped and joined first.",
    ),
    (
        "stop",
        "Stops the LED signaler, switches the LED off and disables button edges. \
         A pending mission load or armed countdown is cancelled back to idle.",
    ),
    (
        "status",
        "Prints the current state, the pending deadline if any, and the most recent \
         telemetry records.",
    ),
    (
        "gesture",
        "Tap the button, then within 2 s press and hold it for more than 4 s. On \
         release the return mission is loaded; 5 s later the countdown arms and the \
         vehicle launches 20 s after that. Press the button at any time during the \
         load or countdown to cancel.",
    ),
];
