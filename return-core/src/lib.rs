#![no_std]

// Return-trigger logic shared by the host module and its tooling.
//
// Everything here stays free of the Rust standard library so the gesture state
// machine, feedback cadences and mission bridge can run on a companion computer
// or a microcontroller with the same code. Collaborators (GPIO, waypoint
// loader, vehicle link) are reached through the traits in `mission`,
// `controller` and `feedback`.

pub mod button;
pub mod command;
pub mod controller;
pub mod feedback;
pub mod machine;
pub mod mission;
pub mod monitor;
pub mod status;
pub mod telemetry;
pub mod time;
