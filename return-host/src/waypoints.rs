//! Simulated waypoint collaborator and filesystem mission file.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use return_core::mission::{MissionFile, WaypointLoader, WaypointRegistry};

use crate::clock::{Clock, HostInstant};

/// How the simulated loader reacts to a load request.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LoadBehavior {
    /// Finishes after the configured delay and stamps `last_update`.
    Complete,
    /// Goes idle after the delay without stamping `last_update`.
    Fail,
    /// Stays busy forever.
    Hang,
    /// Refuses the request outright.
    Refuse,
}

impl LoadBehavior {
    /// Parses the tag used on the command line and in the session.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        [
            ("complete", LoadBehavior::Complete),
            ("fail", LoadBehavior::Fail),
            ("hang", LoadBehavior::Hang),
            ("refuse", LoadBehavior::Refuse),
        ]
        .into_iter()
        .find_map(|(name, behavior)| name.eq_ignore_ascii_case(tag).then_some(behavior))
    }

    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            LoadBehavior::Complete => "complete",
            LoadBehavior::Fail => "fail",
            LoadBehavior::Hang => "hang",
            LoadBehavior::Refuse => "refuse",
        }
    }
}

/// Default time the simulated loader needs to upload a mission.
pub const DEFAULT_LOAD_DELAY: Duration = Duration::from_millis(1_500);

/// Shortest simulated load. Completions must land strictly after the request
/// to count as fresh.
const MIN_LOAD_TIME: Duration = Duration::from_micros(1);

#[derive(Copy, Clone, Debug)]
struct PendingLoad {
    requested_at: HostInstant,
    behavior: LoadBehavior,
}

/// Waypoint module stand-in whose progress is derived from the shared clock.
pub struct SimWaypointLoader {
    clock: Arc<dyn Clock>,
    delay: Duration,
    behavior: LoadBehavior,
    pending: Option<PendingLoad>,
    completed: Option<HostInstant>,
    requests: u32,
}

impl SimWaypointLoader {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, delay: Duration, behavior: LoadBehavior) -> Self {
        Self {
            clock,
            delay,
            behavior,
            pending: None,
            completed: None,
            requests: 0,
        }
    }

    pub fn set_behavior(&mut self, behavior: LoadBehavior) {
        self.behavior = behavior;
    }

    #[must_use]
    pub const fn behavior(&self) -> LoadBehavior {
        self.behavior
    }

    pub fn set_delay(&mut self, delay: Duration) {
        self.delay = delay;
    }

    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }

    /// Number of load requests received.
    #[must_use]
    pub const fn requests(&self) -> u32 {
        self.requests
    }

    fn finished_at(&self, pending: PendingLoad) -> Option<HostInstant> {
        match pending.behavior {
            LoadBehavior::Complete | LoadBehavior::Fail => {
                Some(pending.requested_at + self.delay.max(MIN_LOAD_TIME))
            }
            LoadBehavior::Hang | LoadBehavior::Refuse => None,
        }
    }
}

impl WaypointLoader<HostInstant> for SimWaypointLoader {
    fn begin_load(&mut self, path: &str) -> bool {
        self.requests += 1;
        if self.behavior == LoadBehavior::Refuse {
            warn!("wp: refusing to load {path}");
            return false;
        }
        if let Err(err) = File::open(path) {
            warn!("wp: cannot open {path}: {err}");
            return false;
        }

        let now = self.clock.now();
        // A new request supersedes whatever was in flight.
        if let Some(previous) = self.pending.take()
            && previous.behavior == LoadBehavior::Complete
            && let Some(done) = self.finished_at(previous)
            && done <= now
        {
            self.completed = Some(done);
        }
        self.pending = Some(PendingLoad {
            requested_at: now,
            behavior: self.behavior,
        });
        info!("wp: loading waypoints from {path}");
        true
    }

    fn is_busy(&self) -> bool {
        let Some(pending) = self.pending else {
            return false;
        };
        match self.finished_at(pending) {
            Some(done) => self.clock.now() < done,
            None => true,
        }
    }

    fn last_update(&self) -> Option<HostInstant> {
        let now = self.clock.now();
        let fresh = self.pending.and_then(|pending| {
            if pending.behavior != LoadBehavior::Complete {
                return None;
            }
            self.finished_at(pending).filter(|done| *done <= now)
        });
        fresh.or(self.completed)
    }
}

/// Host modules indexed by name.
#[derive(Default)]
pub struct HostModules {
    loaders: BTreeMap<String, SimWaypointLoader>,
}

impl HostModules {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `loader` under `name`, replacing any previous module.
    pub fn register(&mut self, name: &str, loader: SimWaypointLoader) {
        self.loaders.insert(name.to_owned(), loader);
    }

    /// Removes the module registered under `name`.
    pub fn remove(&mut self, name: &str) -> Option<SimWaypointLoader> {
        self.loaders.remove(name)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SimWaypointLoader> {
        self.loaders.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut SimWaypointLoader> {
        self.loaders.get_mut(name)
    }

    /// Names of the registered modules.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.loaders.keys().map(String::as_str)
    }
}

impl WaypointRegistry<HostInstant> for HostModules {
    fn waypoint_loader(&self, name: &str) -> Option<&dyn WaypointLoader<HostInstant>> {
        self.loaders
            .get(name)
            .map(|loader| loader as &dyn WaypointLoader<HostInstant>)
    }

    fn waypoint_loader_mut(&mut self, name: &str) -> Option<&mut dyn WaypointLoader<HostInstant>> {
        self.loaders
            .get_mut(name)
            .map(|loader| loader as &mut dyn WaypointLoader<HostInstant>)
    }
}

/// Mission file on the local filesystem.
#[derive(Clone, Debug)]
pub struct FsMissionFile {
    path: PathBuf,
    display: String,
}

impl FsMissionFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let display = path.to_string_lossy().into_owned();
        Self { path, display }
    }

    #[must_use]
    pub fn as_path(&self) -> &Path {
        &self.path
    }
}

impl MissionFile for FsMissionFile {
    fn path(&self) -> &str {
        &self.display
    }

    fn exists(&self) -> bool {
        self.path.is_file()
    }
}
