use core::ops::Add;
use core::time::Duration;

use return_core::button::ButtonLevel;
use return_core::controller::{ControllerConfig, ExecuteTrigger, ReturnController};
use return_core::machine::{SystemState, TIME_TO_TAKEOFF, TransitionCause};
use return_core::mission::{
    LoadRejection, MissionFile, MissionLoaderBridge, WaypointLoader, WaypointRegistry,
};
use return_core::status::{StatusBoard, StatusSource};
use return_core::time::{MicrosInstant, MonotonicInstant};

#[test]
fn tap_then_long_press_starts_mission_load() {
    let board = StatusBoard::new();
    let mut controller = build_controller(&board, Fixture::default());

    press(&mut controller, 0);
    release(&mut controller, 100);
    press(&mut controller, 200);
    release(&mut controller, 4_300);

    assert_eq!(controller.state(), SystemState::LoadingMission);
    let snapshot = board.snapshot();
    assert_eq!(
        snapshot.timestamps.mission_load_start,
        Some(MockInstant::millis(4_300))
    );
    assert_eq!(loader(&controller).requests, 1);
    assert_eq!(
        loader(&controller).last_path.as_deref(),
        Some("return.waypoints")
    );
}

#[test]
fn short_hold_returns_to_idle_without_loading() {
    let board = StatusBoard::new();
    let mut controller = build_controller(&board, Fixture::default());

    press(&mut controller, 0);
    release(&mut controller, 100);
    press(&mut controller, 200);
    let transition = release(&mut controller, 3_000).expect("release should transition");

    assert_eq!(transition.cause, TransitionCause::HoldTooShort);
    assert_eq!(controller.state(), SystemState::Idle);
    assert_eq!(loader(&controller).requests, 0);
}

#[test]
fn missing_mission_file_keeps_machine_idle() {
    let board = StatusBoard::new();
    let mut controller = build_controller(
        &board,
        Fixture {
            mission_present: false,
            ..Fixture::default()
        },
    );

    press(&mut controller, 0);
    release(&mut controller, 100);
    press(&mut controller, 200);
    let transition = release(&mut controller, 4_300).expect("release should transition");

    assert_eq!(
        transition.cause,
        TransitionCause::LoadRejected(LoadRejection::MissionFileMissing)
    );
    assert_eq!(controller.state(), SystemState::Idle);
    assert_eq!(board.snapshot().timestamps.mission_load_start, None);
    assert_eq!(loader(&controller).requests, 0);
}

#[test]
fn missing_waypoint_module_keeps_machine_idle() {
    let board = StatusBoard::new();
    let mut controller = build_controller(
        &board,
        Fixture {
            module_present: false,
            ..Fixture::default()
        },
    );

    press(&mut controller, 0);
    release(&mut controller, 100);
    press(&mut controller, 200);
    let transition = release(&mut controller, 4_300).expect("release should transition");

    assert_eq!(
        transition.cause,
        TransitionCause::LoadRejected(LoadRejection::NoWaypointModule)
    );
    assert_eq!(controller.state(), SystemState::Idle);
}

#[test]
fn long_press_window_lapse_resets_gesture() {
    let board = StatusBoard::new();
    let mut controller = build_controller(&board, Fixture::default());

    press(&mut controller, 0);
    release(&mut controller, 100);
    tick_range(&mut controller, 100, 2_100, 100);
    assert_eq!(controller.state(), SystemState::WaitingLongPressStart);

    let transition = controller
        .tick(MockInstant::millis(2_101))
        .expect("window should lapse");
    assert_eq!(transition.cause, TransitionCause::LongPressWindowLapsed);

    // A late press now starts a fresh gesture instead of a long press.
    press(&mut controller, 2_200);
    assert_eq!(controller.state(), SystemState::WaitingRelease);
}

#[test]
fn confirmed_load_arms_countdown_from_check_time() {
    let board = StatusBoard::new();
    let mut controller = loading_controller(&board);
    complete_load(&mut controller, 5_000);

    tick_range(&mut controller, 4_400, 9_300, 100);
    assert_eq!(controller.state(), SystemState::LoadingMission);

    let check = MockInstant::millis(9_400);
    controller.tick(check).expect("load window lapses");
    assert_eq!(controller.state(), SystemState::ArmedCountdown);
    assert_eq!(
        board.snapshot().timestamps.takeoff_time,
        Some(check + TIME_TO_TAKEOFF)
    );
}

#[test]
fn stale_or_pending_load_returns_idle() {
    for last_update in [Some(1_000), None] {
        let board = StatusBoard::new();
        let mut controller = loading_controller(&board);
        if let Some(at) = last_update {
            complete_load(&mut controller, at);
        }

        controller.tick(MockInstant::millis(9_400));
        assert_eq!(controller.state(), SystemState::Idle);
        assert_eq!(controller.trigger().launches, 0);
    }
}

#[test]
fn press_cancels_loading_and_countdown() {
    let board = StatusBoard::new();
    let mut controller = loading_controller(&board);
    let transition = press(&mut controller, 6_000).expect("press should cancel");
    assert_eq!(transition.cause, TransitionCause::OperatorCancel);
    assert_eq!(controller.state(), SystemState::Idle);

    let board = StatusBoard::new();
    let mut controller = armed_controller(&board);
    let transition = press(&mut controller, 20_000).expect("press should cancel");
    assert_eq!(transition.cause, TransitionCause::OperatorCancel);
    assert_eq!(board.snapshot().timestamps.takeoff_time, None);

    tick_range(&mut controller, 20_000, 40_000, 100);
    assert_eq!(controller.trigger().launches, 0);
}

#[test]
fn countdown_fires_exactly_once() {
    let board = StatusBoard::new();
    let mut controller = armed_controller(&board);

    // Armed at 9.4 s; keep ticking until 21 s past the arm instant.
    tick_range(&mut controller, 9_400, 30_400, 100);

    assert_eq!(controller.trigger().launches, 1);
    assert_eq!(controller.state(), SystemState::Idle);
}

#[test]
fn repeated_ticks_at_same_instant_are_idempotent() {
    let board = StatusBoard::new();
    let mut controller = armed_controller(&board);
    let takeoff = MockInstant::millis(29_400);

    assert!(controller.tick(takeoff).is_some());
    let revision = board.revision();
    for _ in 0..5 {
        assert!(controller.tick(takeoff).is_none());
    }
    assert_eq!(board.revision(), revision);
    assert_eq!(controller.trigger().launches, 1);
}

type Controller<'a> =
    ReturnController<MockInstant, Modules, Mission, Vehicle, &'a StatusBoard<MockInstant>>;

fn press(controller: &mut Controller<'_>, at_ms: u64) -> Option<Transition> {
    controller.on_level(ButtonLevel::High, MockInstant::millis(at_ms))
}

fn release(controller: &mut Controller<'_>, at_ms: u64) -> Option<Transition> {
    controller.on_level(ButtonLevel::Low, MockInstant::millis(at_ms))
}

type Transition = return_core::machine::Transition<MockInstant>;

fn tick_range(controller: &mut Controller<'_>, from_ms: u64, to_ms: u64, step_ms: u64) {
    let mut at = from_ms;
    while at <= to_ms {
        controller.tick(MockInstant::millis(at));
        at += step_ms;
    }
}

fn loader<'c>(controller: &'c Controller<'_>) -> &'c Loader {
    controller
        .bridge()
        .registry()
        .wp
        .as_ref()
        .expect("loader registered")
}

fn complete_load(controller: &mut Controller<'_>, at_ms: u64) {
    let loader = controller
        .bridge_mut()
        .registry_mut()
        .wp
        .as_mut()
        .expect("loader registered");
    loader.busy = false;
    loader.last_update = Some(MockInstant::millis(at_ms));
}

fn loading_controller(board: &StatusBoard<MockInstant>) -> Controller<'_> {
    let mut controller = build_controller(board, Fixture::default());
    press(&mut controller, 0);
    release(&mut controller, 100);
    press(&mut controller, 200);
    release(&mut controller, 4_300);
    assert_eq!(controller.state(), SystemState::LoadingMission);
    controller
}

fn armed_controller(board: &StatusBoard<MockInstant>) -> Controller<'_> {
    let mut controller = loading_controller(board);
    complete_load(&mut controller, 5_000);
    controller.tick(MockInstant::millis(9_400));
    assert_eq!(controller.state(), SystemState::ArmedCountdown);
    controller
}

struct Fixture {
    module_present: bool,
    mission_present: bool,
}

impl Default for Fixture {
    fn default() -> Self {
        Self {
            module_present: true,
            mission_present: true,
        }
    }
}

fn build_controller(board: &StatusBoard<MockInstant>, fixture: Fixture) -> Controller<'_> {
    let modules = Modules {
        wp: fixture.module_present.then(Loader::default),
    };
    let mission = Mission {
        present: fixture.mission_present,
    };
    ReturnController::new(
        ControllerConfig::reference(),
        MissionLoaderBridge::new(modules, mission),
        Vehicle::default(),
        board,
    )
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
struct MockInstant(u64);

impl MockInstant {
    fn millis(value: u64) -> Self {
        Self(value * 1_000)
    }
}

impl Add<Duration> for MockInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0 + u64::try_from(rhs.as_micros()).unwrap_or(u64::MAX))
    }
}

impl MonotonicInstant for MockInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }
}

impl MicrosInstant for MockInstant {
    fn as_micros(self) -> u64 {
        self.0
    }

    fn from_micros(micros: u64) -> Self {
        Self(micros)
    }
}

#[derive(Default)]
struct Loader {
    busy: bool,
    last_update: Option<MockInstant>,
    last_path: Option<String>,
    requests: u32,
}

impl WaypointLoader<MockInstant> for Loader {
    fn begin_load(&mut self, path: &str) -> bool {
        self.requests += 1;
        self.busy = true;
        self.last_path = Some(path.to_owned());
        true
    }

    fn is_busy(&self) -> bool {
        self.busy
    }

    fn last_update(&self) -> Option<MockInstant> {
        self.last_update
    }
}

#[derive(Default)]
struct Modules {
    wp: Option<Loader>,
}

impl WaypointRegistry<MockInstant> for Modules {
    fn waypoint_loader(&self, name: &str) -> Option<&dyn WaypointLoader<MockInstant>> {
        if name != "wp" {
            return None;
        }
        self.wp
            .as_ref()
            .map(|loader| loader as &dyn WaypointLoader<MockInstant>)
    }

    fn waypoint_loader_mut(&mut self, name: &str) -> Option<&mut dyn WaypointLoader<MockInstant>> {
        if name != "wp" {
            return None;
        }
        self.wp
            .as_mut()
            .map(|loader| loader as &mut dyn WaypointLoader<MockInstant>)
    }
}

struct Mission {
    present: bool,
}

impl MissionFile for Mission {
    fn path(&self) -> &str {
        "return.waypoints"
    }

    fn exists(&self) -> bool {
        self.present
    }
}

#[derive(Default)]
struct Vehicle {
    launches: u32,
}

impl ExecuteTrigger for Vehicle {
    fn execute_return(&mut self) {
        self.launches += 1;
    }
}
