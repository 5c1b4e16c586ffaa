//! Single-writer facade tying the return trigger together.
//!
//! The host owns exactly one [`ReturnController`] and drives it from one
//! execution context: button levels go through [`ReturnController::on_level`]
//! and the periodic tick through [`ReturnController::tick`]. Every applied
//! transition is logged, recorded in the telemetry ring and published to the
//! [`StatusBoard`] the feedback signaler reads from.

use core::ops::Deref;

use log::{debug, info, warn};

use crate::button::{ButtonLevel, ButtonPolarity, Classification, EdgeClassifier, EdgeFilter};
use crate::machine::{
    Event, ReturnPorts, ReturnStateMachine, ReturnTimings, SystemState, Transition,
    TransitionCause,
};
use crate::mission::{
    LoadRejection, MissionFile, MissionLoadResult, MissionLoaderBridge, WaypointRegistry,
};
use crate::monitor;
use crate::status::{StatusBoard, StatusSnapshot, StatusSource};
use crate::telemetry::{TelemetryEvent, TelemetryRecorder};
use crate::time::MicrosInstant;

/// Vehicle-command collaborator.
pub trait ExecuteTrigger {
    /// Starts the loaded mission immediately.
    fn execute_return(&mut self);
}

impl<T: ExecuteTrigger + ?Sized> ExecuteTrigger for &mut T {
    fn execute_return(&mut self) {
        (**self).execute_return();
    }
}

/// Static configuration for a controller instance.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ControllerConfig {
    pub polarity: ButtonPolarity,
    pub edge_filter: EdgeFilter,
    pub timings: ReturnTimings,
}

impl ControllerConfig {
    /// Reference wiring (active-high button), no software filter, reference timings.
    #[must_use]
    pub const fn reference() -> Self {
        Self {
            polarity: ButtonPolarity::ActiveHigh,
            edge_filter: EdgeFilter::PassThrough,
            timings: ReturnTimings::reference(),
        }
    }

    #[must_use]
    pub const fn with_polarity(mut self, polarity: ButtonPolarity) -> Self {
        self.polarity = polarity;
        self
    }

    #[must_use]
    pub const fn with_edge_filter(mut self, edge_filter: EdgeFilter) -> Self {
        self.edge_filter = edge_filter;
        self
    }

    #[must_use]
    pub const fn with_timings(mut self, timings: ReturnTimings) -> Self {
        self.timings = timings;
        self
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::reference()
    }
}

struct Ports<'a, R, F, V> {
    bridge: &'a mut MissionLoaderBridge<R, F>,
    trigger: &'a mut V,
}

impl<I, R, F, V> ReturnPorts<I> for Ports<'_, R, F, V>
where
    I: Ord,
    R: WaypointRegistry<I>,
    F: MissionFile,
    V: ExecuteTrigger,
{
    fn begin_mission_load(&mut self) -> Result<(), LoadRejection> {
        self.bridge.begin::<I>()
    }

    fn mission_load_result(&self, load_started: I) -> MissionLoadResult {
        self.bridge.poll(load_started)
    }

    fn execute_return(&mut self) {
        self.trigger.execute_return();
    }
}

/// Owns the classifier, state machine, bridge and telemetry for one button/LED pair.
pub struct ReturnController<I, R, F, V, B>
where
    I: MicrosInstant,
{
    classifier: EdgeClassifier<I>,
    machine: ReturnStateMachine<I>,
    bridge: MissionLoaderBridge<R, F>,
    trigger: V,
    telemetry: TelemetryRecorder<I>,
    board: B,
}

impl<I, R, F, V, B> ReturnController<I, R, F, V, B>
where
    I: MicrosInstant,
    R: WaypointRegistry<I>,
    F: MissionFile,
    V: ExecuteTrigger,
    B: Deref<Target = StatusBoard<I>>,
{
    /// Creates an idle controller publishing to `board`.
    pub fn new(
        config: ControllerConfig,
        bridge: MissionLoaderBridge<R, F>,
        trigger: V,
        board: B,
    ) -> Self {
        board.publish(SystemState::Idle, &crate::machine::Timestamps::empty());
        Self {
            classifier: EdgeClassifier::with_filter(config.polarity, config.edge_filter),
            machine: ReturnStateMachine::new(config.timings),
            bridge,
            trigger,
            telemetry: TelemetryRecorder::new(),
            board,
        }
    }

    /// Delivers a sampled button level, as reported by the edge callback.
    pub fn on_level(&mut self, level: ButtonLevel, now: I) -> Option<Transition<I>> {
        match self.classifier.classify(level, now) {
            Classification::Filtered(edge) => {
                debug!("return: dropped {edge} edge inside filter interval");
                self.telemetry.record(TelemetryEvent::EdgeFiltered(edge), now);
                None
            }
            Classification::Edge(edge) => {
                let state = self.machine.state();
                let mut ports = Ports {
                    bridge: &mut self.bridge,
                    trigger: &mut self.trigger,
                };
                let applied = self.machine.apply(Event::Edge(edge), now, &mut ports);
                if applied.is_none() {
                    debug!("return: button {edge} ignored in {state}");
                }
                applied.inspect(|transition| self.commit(transition))
            }
        }
    }

    /// Runs the periodic timeout monitor once.
    pub fn tick(&mut self, now: I) -> Option<Transition<I>> {
        let mut ports = Ports {
            bridge: &mut self.bridge,
            trigger: &mut self.trigger,
        };
        monitor::tick(&mut self.machine, now, &mut ports)
            .inspect(|transition| self.commit(transition))
    }

    /// Drops any in-flight load or countdown back to idle, e.g. when the
    /// module is stopped and the button can no longer cancel it.
    pub fn cancel(&mut self, now: I) -> Option<Transition<I>> {
        self.machine
            .cancel(now)
            .inspect(|transition| self.commit(transition))
    }

    fn commit(&mut self, transition: &Transition<I>) {
        self.telemetry.record_transition(transition);

        let Transition { from, to, cause, at } = *transition;
        match cause {
            TransitionCause::LoadRequested => {
                self.telemetry
                    .record(TelemetryEvent::MissionLoadRequested, at);
            }
            TransitionCause::LoadRejected(reason) => {
                self.telemetry
                    .record(TelemetryEvent::MissionLoadRejected(reason), at);
            }
            TransitionCause::CountdownArmed => {
                self.telemetry.record(
                    TelemetryEvent::MissionLoadFinished(MissionLoadResult::Succeeded),
                    at,
                );
            }
            TransitionCause::LoadUnconfirmed(result) => {
                self.telemetry
                    .record(TelemetryEvent::MissionLoadFinished(result), at);
            }
            TransitionCause::ExecuteFired => {
                self.telemetry.record(TelemetryEvent::ExecuteFired, at);
            }
            TransitionCause::Gesture(_)
            | TransitionCause::HoldTooShort
            | TransitionCause::LongPressWindowLapsed
            | TransitionCause::OperatorCancel
            | TransitionCause::ModuleStopped => {}
        }

        match cause {
            TransitionCause::LoadRejected(_) | TransitionCause::LoadUnconfirmed(_) => {
                warn!("return: {from} -> {to}: {cause}");
            }
            _ => info!("return: {from} -> {to}: {cause}"),
        }

        self.board.publish(to, self.machine.timestamps());
    }

    /// Current state as seen by the writer.
    #[must_use]
    pub fn state(&self) -> SystemState {
        self.machine.state()
    }

    /// State machine, read-only.
    #[must_use]
    pub fn machine(&self) -> &ReturnStateMachine<I> {
        &self.machine
    }

    /// Latest published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot<I> {
        self.board.snapshot()
    }

    /// Board handle shared with readers.
    #[must_use]
    pub fn board(&self) -> &B {
        &self.board
    }

    #[must_use]
    pub fn telemetry(&self) -> &TelemetryRecorder<I> {
        &self.telemetry
    }

    #[must_use]
    pub fn classifier(&self) -> &EdgeClassifier<I> {
        &self.classifier
    }

    #[must_use]
    pub fn bridge(&self) -> &MissionLoaderBridge<R, F> {
        &self.bridge
    }

    /// Bridge access for hosts that register or remove collaborators at runtime.
    pub fn bridge_mut(&mut self) -> &mut MissionLoaderBridge<R, F> {
        &mut self.bridge
    }

    #[must_use]
    pub fn trigger(&self) -> &V {
        &self.trigger
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mission::WaypointLoader;
    use crate::telemetry::TelemetryRecord;
    use crate::time::test_support::MockInstant;

    #[derive(Default)]
    struct Loader {
        busy: bool,
        last_update: Option<MockInstant>,
        requests: u32,
    }

    impl WaypointLoader<MockInstant> for Loader {
        fn begin_load(&mut self, _path: &str) -> bool {
            self.requests += 1;
            self.busy = true;
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
        fn waypoint_loader(&self, _name: &str) -> Option<&dyn WaypointLoader<MockInstant>> {
            self.wp
                .as_ref()
                .map(|loader| loader as &dyn WaypointLoader<MockInstant>)
        }

        fn waypoint_loader_mut(
            &mut self,
            _name: &str,
        ) -> Option<&mut dyn WaypointLoader<MockInstant>> {
            self.wp
                .as_mut()
                .map(|loader| loader as &mut dyn WaypointLoader<MockInstant>)
        }
    }

    struct Mission;

    impl MissionFile for Mission {
        fn path(&self) -> &str {
            "return.waypoints"
        }

        fn exists(&self) -> bool {
            true
        }
    }

    #[derive(Default)]
    struct Launches(u32);

    impl ExecuteTrigger for Launches {
        fn execute_return(&mut self) {
            self.0 += 1;
        }
    }

    type Controller<'a> =
        ReturnController<MockInstant, Modules, Mission, Launches, &'a StatusBoard<MockInstant>>;

    fn controller(board: &StatusBoard<MockInstant>) -> Controller<'_> {
        let modules = Modules {
            wp: Some(Loader::default()),
        };
        ReturnController::new(
            ControllerConfig::reference(),
            MissionLoaderBridge::new(modules, Mission),
            Launches::default(),
            board,
        )
    }

    #[test]
    fn gesture_publishes_every_transition() {
        let board = StatusBoard::new();
        let mut controller = controller(&board);

        controller.on_level(ButtonLevel::High, MockInstant::millis(0));
        controller.on_level(ButtonLevel::Low, MockInstant::millis(100));
        assert_eq!(board.snapshot().state, SystemState::WaitingLongPressStart);
        assert_eq!(
            board.snapshot().timestamps.long_up_start,
            Some(MockInstant::millis(100))
        );

        controller.on_level(ButtonLevel::High, MockInstant::millis(200));
        controller.on_level(ButtonLevel::Low, MockInstant::millis(4_300));
        let snapshot = board.snapshot();
        assert_eq!(snapshot.state, SystemState::LoadingMission);
        assert_eq!(
            snapshot.timestamps.mission_load_start,
            Some(MockInstant::millis(4_300))
        );
        assert_eq!(snapshot.revision, 5);
    }

    #[test]
    fn full_sequence_launches_once_and_records_telemetry() {
        let board = StatusBoard::new();
        let mut controller = controller(&board);

        controller.on_level(ButtonLevel::High, MockInstant::millis(0));
        controller.on_level(ButtonLevel::Low, MockInstant::millis(100));
        controller.on_level(ButtonLevel::High, MockInstant::millis(200));
        controller.on_level(ButtonLevel::Low, MockInstant::millis(4_300));

        if let Some(loader) = controller.bridge_mut().registry_mut().wp.as_mut() {
            loader.busy = false;
            loader.last_update = Some(MockInstant::millis(6_000));
        }

        let armed = controller
            .tick(MockInstant::millis(9_400))
            .expect("load window lapses");
        assert_eq!(armed.to, SystemState::ArmedCountdown);

        for at in [29_399, 29_400, 29_500, 30_000] {
            controller.tick(MockInstant::millis(at));
        }
        assert_eq!(controller.trigger().0, 1);
        assert_eq!(controller.state(), SystemState::Idle);

        let fired = controller
            .telemetry()
            .oldest_first()
            .filter(|record: &&TelemetryRecord<MockInstant>| {
                record.event == TelemetryEvent::ExecuteFired
            })
            .count();
        assert_eq!(fired, 1);
    }

    #[test]
    fn cancel_while_armed_publishes_idle_and_never_launches() {
        let board = StatusBoard::new();
        let mut controller = controller(&board);

        controller.on_level(ButtonLevel::High, MockInstant::millis(0));
        controller.on_level(ButtonLevel::Low, MockInstant::millis(100));
        controller.on_level(ButtonLevel::High, MockInstant::millis(200));
        controller.on_level(ButtonLevel::Low, MockInstant::millis(4_300));
        if let Some(loader) = controller.bridge_mut().registry_mut().wp.as_mut() {
            loader.busy = false;
            loader.last_update = Some(MockInstant::millis(6_000));
        }
        controller.tick(MockInstant::millis(9_400));
        assert_eq!(controller.state(), SystemState::ArmedCountdown);

        let cancelled = controller
            .cancel(MockInstant::millis(12_000))
            .expect("armed countdown is cancellable");
        assert_eq!(cancelled.cause, TransitionCause::ModuleStopped);
        assert_eq!(board.snapshot().state, SystemState::Idle);
        assert!(controller.cancel(MockInstant::millis(12_100)).is_none());

        assert!(controller.tick(MockInstant::millis(40_000)).is_none());
        assert_eq!(controller.trigger().0, 0);
    }

    #[test]
    fn filtered_edges_never_reach_the_machine() {
        let board = StatusBoard::new();
        let config = ControllerConfig::reference().with_edge_filter(EdgeFilter::MinInterval(
            crate::button::SUGGESTED_MIN_EDGE_INTERVAL,
        ));
        let mut controller = ReturnController::new(
            config,
            MissionLoaderBridge::new(Modules::default(), Mission),
            Launches::default(),
            &board,
        );

        assert!(controller.on_level(ButtonLevel::High, MockInstant::millis(0)).is_some());
        assert!(controller.on_level(ButtonLevel::Low, MockInstant::millis(5)).is_none());
        assert_eq!(controller.state(), SystemState::WaitingRelease);
        assert_eq!(
            controller.telemetry().latest().map(|record| record.event),
            Some(TelemetryEvent::EdgeFiltered(crate::button::Edge::Released))
        );
    }
}
