// Host side of the return trigger.
//
// Wires the portable controller in `return-core` to a monotonic clock,
// simulated GPIO, a simulated waypoint loader and the vehicle link, and runs
// the LED feedback signaler on its own thread. Both binaries build on the
// interactive `Session`.

pub mod clock;
pub mod gpio;
pub mod session;
pub mod signaler;
pub mod vehicle;
pub mod waypoints;
