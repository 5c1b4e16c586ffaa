//! Bridge between the gesture state machine and the waypoint collaborator.
//!
//! The waypoint subsystem owns mission parsing and upload. The bridge only
//! looks the collaborator up by name, checks that the mission file exists and
//! fires a non-blocking "load from file" request. Completion has no callback:
//! the collaborator's busy flag and last-update timestamp are polled when the
//! mission load window lapses, and the update must be newer than the load
//! request to count.

use core::fmt;

use log::{debug, warn};

/// Name under which the host registers its waypoint module.
pub const WAYPOINT_MODULE_NAME: &str = "wp";

/// Well-known mission file consulted when no override is configured.
pub const DEFAULT_MISSION_FILE: &str = "return.waypoints";

/// Contract the waypoint collaborator exposes to the bridge.
pub trait WaypointLoader<I> {
    /// Starts loading the mission at `path` without blocking.
    ///
    /// Returns `false` when the request is refused outright (e.g. the file
    /// cannot be opened).
    fn begin_load(&mut self, path: &str) -> bool;

    /// `true` while a load is still in progress.
    fn is_busy(&self) -> bool;

    /// Timestamp of the last completed load, if any.
    fn last_update(&self) -> Option<I>;
}

/// Lookup of waypoint-capable modules registered with the host.
pub trait WaypointRegistry<I> {
    /// Returns the loader registered under `name`, if present.
    fn waypoint_loader(&self, name: &str) -> Option<&dyn WaypointLoader<I>>;

    /// Mutable variant of [`waypoint_loader`](Self::waypoint_loader).
    fn waypoint_loader_mut(&mut self, name: &str) -> Option<&mut dyn WaypointLoader<I>>;
}

/// Mission file resource read by the waypoint collaborator.
pub trait MissionFile {
    /// Path handed to [`WaypointLoader::begin_load`].
    fn path(&self) -> &str;

    /// `true` when the file currently exists.
    fn exists(&self) -> bool;
}

/// Reason a load attempt was refused before entering `LoadingMission`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LoadRejection {
    /// No waypoint module is registered under the configured name.
    NoWaypointModule,
    /// The mission file does not exist.
    MissionFileMissing,
    /// The collaborator refused the request.
    LoaderRefused,
}

impl fmt::Display for LoadRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadRejection::NoWaypointModule => f.write_str("no waypoint module registered"),
            LoadRejection::MissionFileMissing => f.write_str("mission file not found"),
            LoadRejection::LoaderRefused => f.write_str("waypoint loader refused the request"),
        }
    }
}

/// Why a load that was started did not succeed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LoadFailure {
    /// The waypoint module disappeared while the load was in flight.
    CollaboratorMissing,
    /// The loader is idle but has not completed a load since the request.
    NoFreshCompletion,
}

impl fmt::Display for LoadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadFailure::CollaboratorMissing => f.write_str("waypoint module went away"),
            LoadFailure::NoFreshCompletion => f.write_str("no completion since load request"),
        }
    }
}

/// Outcome of a load attempt as observed at poll time.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MissionLoadResult {
    Pending,
    Succeeded,
    Failed(LoadFailure),
}

impl MissionLoadResult {
    /// `true` only for [`MissionLoadResult::Succeeded`].
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, MissionLoadResult::Succeeded)
    }
}

impl fmt::Display for MissionLoadResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissionLoadResult::Pending => f.write_str("pending"),
            MissionLoadResult::Succeeded => f.write_str("succeeded"),
            MissionLoadResult::Failed(reason) => write!(f, "failed ({reason})"),
        }
    }
}

/// Returns `true` when `last_update` proves a load finished after `load_started`.
///
/// A completion stamped at or before the request belongs to an earlier attempt.
#[must_use]
pub fn completion_is_fresh<I: Ord>(last_update: Option<I>, load_started: I) -> bool {
    match last_update {
        Some(updated) => updated > load_started,
        None => false,
    }
}

/// Derives the tri-state load outcome from the collaborator's polled fields.
#[must_use]
pub fn evaluate_load<I: Ord>(
    busy: bool,
    last_update: Option<I>,
    load_started: I,
) -> MissionLoadResult {
    if busy {
        MissionLoadResult::Pending
    } else if completion_is_fresh(last_update, load_started) {
        MissionLoadResult::Succeeded
    } else {
        MissionLoadResult::Failed(LoadFailure::NoFreshCompletion)
    }
}

/// Issues load requests and polls their completion.
pub struct MissionLoaderBridge<R, F> {
    registry: R,
    mission: F,
    module_name: &'static str,
}

impl<R, F> MissionLoaderBridge<R, F>
where
    F: MissionFile,
{
    /// Creates a bridge that looks up [`WAYPOINT_MODULE_NAME`].
    #[must_use]
    pub const fn new(registry: R, mission: F) -> Self {
        Self::with_module_name(registry, mission, WAYPOINT_MODULE_NAME)
    }

    /// Creates a bridge that looks up a custom module name.
    #[must_use]
    pub const fn with_module_name(registry: R, mission: F, module_name: &'static str) -> Self {
        Self {
            registry,
            mission,
            module_name,
        }
    }

    /// Returns the module registry.
    #[must_use]
    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// Returns the module registry mutably.
    pub fn registry_mut(&mut self) -> &mut R {
        &mut self.registry
    }

    /// Returns the mission file resource.
    #[must_use]
    pub fn mission(&self) -> &F {
        &self.mission
    }

    /// Name of the waypoint module this bridge looks up.
    #[must_use]
    pub const fn module_name(&self) -> &'static str {
        self.module_name
    }

    /// Requests a load of the mission file. Fails fast with no side effects.
    pub fn begin<I>(&mut self) -> Result<(), LoadRejection>
    where
        R: WaypointRegistry<I>,
    {
        let name = self.module_name;
        let Some(loader) = self.registry.waypoint_loader_mut(name) else {
            warn!("return: no `{name}` module registered, cannot load mission");
            return Err(LoadRejection::NoWaypointModule);
        };

        if !self.mission.exists() {
            warn!("return: mission file {} not found", self.mission.path());
            return Err(LoadRejection::MissionFileMissing);
        }

        if loader.begin_load(self.mission.path()) {
            debug!("return: requested mission load from {}", self.mission.path());
            Ok(())
        } else {
            warn!("return: `{name}` refused to load {}", self.mission.path());
            Err(LoadRejection::LoaderRefused)
        }
    }

    /// Polls the collaborator for the outcome of the load started at `load_started`.
    #[must_use]
    pub fn poll<I>(&self, load_started: I) -> MissionLoadResult
    where
        I: Ord,
        R: WaypointRegistry<I>,
    {
        match self.registry.waypoint_loader(self.module_name) {
            Some(loader) => evaluate_load(loader.is_busy(), loader.last_update(), load_started),
            None => MissionLoadResult::Failed(LoadFailure::CollaboratorMissing),
        }
    }
}
