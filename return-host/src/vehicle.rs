//! Vehicle-command collaborator.

use log::info;
use return_core::controller::ExecuteTrigger;

/// Flight-mode command that starts the loaded mission.
pub const EXECUTE_COMMAND: &str = "mode AUTO";

/// Stand-in for the MAVLink vehicle connection.
///
/// Launching is logged and counted; the host has no autopilot attached.
#[derive(Debug, Default)]
pub struct VehicleLink {
    launches: u32,
}

impl VehicleLink {
    #[must_use]
    pub const fn new() -> Self {
        Self { launches: 0 }
    }

    /// Number of times the return mission was started.
    #[must_use]
    pub const fn launches(&self) -> u32 {
        self.launches
    }
}

impl ExecuteTrigger for VehicleLink {
    fn execute_return(&mut self) {
        self.launches += 1;
        info!("return: sending `{EXECUTE_COMMAND}` to start the return mission");
    }
}
