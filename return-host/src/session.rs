//! Operator session around one return controller.
//!
//! A session owns the controller, the simulated button, the LED signaler and
//! the optional transcript. Input lines are either module commands (`return
//! start`, `status`, ...) handled by the core grammar, or simulation verbs
//! that drive the button, the clock and the waypoint collaborator. All state
//! changes happen on the caller's thread; the session is the single writer.

use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::info;
use return_core::button::ButtonLevel;
use return_core::command::{Command, help_text, help_topics, parse_command};
use return_core::controller::{ControllerConfig, ReturnController};
use return_core::feedback::{CadenceTable, FeedbackTimings, select_program};
use return_core::machine::{SystemState, Transition};
use return_core::mission::{
    DEFAULT_MISSION_FILE, MissionFile, MissionLoaderBridge, WAYPOINT_MODULE_NAME,
};
use return_core::monitor::MONITOR_TICK_INTERVAL;
use return_core::status::{StatusBoard, StatusSource};
use return_core::time::MonotonicInstant;
use winnow::ascii::{Caseless, digit1, space1};
use winnow::combinator::{alt, preceded};
use winnow::prelude::*;
use winnow::token::take_while;

use crate::clock::{Clock, HostInstant};
use crate::gpio::{ButtonInput, LedOutput, LedPolarity, PinLevel, SharedLed, SimulatedButton};
use crate::signaler::{SignalerConfig, SignalerHandle};
use crate::vehicle::VehicleLink;
use crate::waypoints::{
    DEFAULT_LOAD_DELAY, FsMissionFile, HostModules, LoadBehavior, SimWaypointLoader,
};

/// How long `tap` keeps the button down.
pub const TAP_DURATION: Duration = Duration::from_millis(100);

/// Number of telemetry records shown by `status`.
const STATUS_HISTORY: usize = 6;

pub const SIM_HELP: &[(&str, &str)] = &[
    ("press", "press                      - push the button down"),
    ("release", "release                    - let the button go"),
    (
        "tap",
        "tap                        - press and release after 100ms",
    ),
    (
        "hold",
        "hold <duration>            - press, wait, release (e.g. hold 4500ms)",
    ),
    (
        "wait",
        "wait <duration>            - let time pass while the monitor ticks",
    ),
    (
        "loader",
        "loader attach|detach|show  - register or remove the waypoint module",
    ),
    (
        "loader mode",
        "loader mode <complete|fail|hang|refuse> - next load outcome",
    ),
    (
        "loader delay",
        "loader delay <duration>    - time the waypoint module needs per load",
    ),
];

/// Host-level settings for a session.
pub struct SessionConfig {
    pub mission_path: PathBuf,
    pub tick_interval: Duration,
    pub transcript: Option<PathBuf>,
    pub load_delay: Duration,
    pub load_behavior: LoadBehavior,
    pub controller: ControllerConfig,
    pub cadences: CadenceTable,
    pub led_polarity: LedPolarity,
    /// Spawn the LED thread on `return start`.
    pub spawn_signaler: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let controller = ControllerConfig::reference();
        Self {
            mission_path: PathBuf::from(DEFAULT_MISSION_FILE),
            tick_interval: MONITOR_TICK_INTERVAL,
            transcript: None,
            load_delay: DEFAULT_LOAD_DELAY,
            load_behavior: LoadBehavior::Complete,
            controller,
            cadences: CadenceTable::reference()
                .with_timings(FeedbackTimings::for_return(&controller.timings)),
            led_polarity: LedPolarity::ActiveLow,
            spawn_signaler: true,
        }
    }
}

type HostController = ReturnController<
    HostInstant,
    HostModules,
    FsMissionFile,
    VehicleLink,
    Arc<StatusBoard<HostInstant>>,
>;

pub struct Session<L> {
    clock: Arc<dyn Clock>,
    controller: HostController,
    board: Arc<StatusBoard<HostInstant>>,
    button: SimulatedButton,
    led: SharedLed<L>,
    signaler: SignalerHandle,
    cadences: CadenceTable,
    led_polarity: LedPolarity,
    spawn_signaler: bool,
    tick_interval: Duration,
    load_delay: Duration,
    load_behavior: LoadBehavior,
    transcript: Option<TranscriptLogger>,
}

impl<L> Session<L>
where
    L: LedOutput + 'static,
{
    /// Builds a session with the waypoint module registered.
    ///
    /// # Errors
    ///
    /// Fails when the transcript file cannot be created.
    pub fn new(config: SessionConfig, clock: Arc<dyn Clock>, led: L) -> io::Result<Self> {
        let transcript = match &config.transcript {
            Some(path) => Some(TranscriptLogger::new(path, "Return module session transcript")?),
            None => None,
        };

        let mut modules = HostModules::new();
        modules.register(
            WAYPOINT_MODULE_NAME,
            SimWaypointLoader::new(Arc::clone(&clock), config.load_delay, config.load_behavior),
        );
        let mission = FsMissionFile::new(&config.mission_path);
        let board = Arc::new(StatusBoard::new());
        let controller = ReturnController::new(
            config.controller,
            MissionLoaderBridge::new(modules, mission),
            VehicleLink::new(),
            Arc::clone(&board),
        );

        let released = match config.controller.polarity.pressed_level() {
            ButtonLevel::High => PinLevel::Low,
            ButtonLevel::Low => PinLevel::High,
        };

        Ok(Self {
            clock,
            controller,
            board,
            button: SimulatedButton::new(released),
            led: SharedLed::new(led),
            signaler: SignalerHandle::new(),
            cadences: config.cadences,
            led_polarity: config.led_polarity,
            spawn_signaler: config.spawn_signaler,
            tick_interval: config.tick_interval,
            load_delay: config.load_delay,
            load_behavior: config.load_behavior,
            transcript,
        })
    }

    /// Shared handle to the LED the signaler drives.
    #[must_use]
    pub fn led(&self) -> &SharedLed<L> {
        &self.led
    }

    #[must_use]
    pub fn state(&self) -> SystemState {
        self.controller.state()
    }

    /// Number of times the return mission was launched.
    #[must_use]
    pub fn launches(&self) -> u32 {
        self.controller.trigger().launches()
    }

    #[must_use]
    pub fn is_signaler_running(&self) -> bool {
        self.signaler.is_running()
    }

    fn elapsed(&self) -> Duration {
        self.clock.now().since_origin()
    }

    /// Handles one operator line and returns the response lines.
    ///
    /// # Errors
    ///
    /// Fails when the transcript cannot be written or the LED thread cannot
    /// be spawned.
    pub fn handle_line(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        self.record(TranscriptRole::Operator, trimmed)?;

        let lines = match sim_command.parse(trimmed) {
            Ok(command) => self.run_sim(command),
            Err(_) => match parse_command(trimmed) {
                Ok(command) => self.run_module(command)?,
                Err(err) => vec![format!("ERR {err}")],
            },
        };

        self.record_lines(&lines)?;
        Ok(lines)
    }

    /// Runs one monitor pass at the current clock reading.
    ///
    /// # Errors
    ///
    /// Fails when the transcript cannot be written.
    pub fn tick(&mut self) -> io::Result<Option<String>> {
        let now = self.clock.now();
        let Some(transition) = self.controller.tick(now) else {
            return Ok(None);
        };
        let line = describe_transition(&transition);
        self.record(TranscriptRole::Module, &line)?;
        Ok(Some(line))
    }

    fn run_module(&mut self, command: Command<'_>) -> io::Result<Vec<String>> {
        Ok(match command {
            Command::Start => self.start()?,
            Command::Stop => self.stop(),
            Command::Status => self.status(),
            Command::Help(topic) => help_lines(topic),
        })
    }

    fn start(&mut self) -> io::Result<Vec<String>> {
        self.button.enable_edges();
        if !self.spawn_signaler {
            return Ok(vec!["OK return started (button armed, LED disabled)".to_owned()]);
        }

        let restarted = self.signaler.is_running();
        self.signaler.start(SignalerConfig {
            board: Arc::clone(&self.board),
            clock: Arc::clone(&self.clock),
            led: self.led.clone(),
            polarity: self.led_polarity,
            cadences: self.cadences,
        })?;
        info!("return: module started");
        Ok(vec![if restarted {
            "OK return restarted (previous LED signaler joined)".to_owned()
        } else {
            "OK return started".to_owned()
        }])
    }

    fn stop(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(transition) = self.controller.cancel(self.clock.now()) {
            lines.push(describe_transition(&transition));
        }

        let was_armed = self.button.edges_enabled();
        let was_running = self.signaler.stop();
        self.button.disable_edges();
        info!("return: module stopped");
        lines.push(if was_armed || was_running {
            "OK return stopped".to_owned()
        } else {
            "OK return already stopped".to_owned()
        });
        lines
    }

    fn status(&self) -> Vec<String> {
        let now = self.clock.now();
        let snapshot = self.board.snapshot();
        let machine = self.controller.machine();
        let mut lines = vec![format!(
            "state={} revision={} button={} (pin {:?}) edges={}",
            snapshot.state,
            snapshot.revision,
            if self.button.is_pressed() { "down" } else { "up" },
            self.button.level(),
            if self.button.edges_enabled() { "on" } else { "off" },
        )];

        let deadline = match snapshot.state {
            SystemState::WaitingLongPressStart => machine
                .long_press_window_deadline()
                .map(|at| ("long-press window closes", at)),
            SystemState::WaitingLongPressRelease => {
                snapshot.timestamps.long_press_start.map(|start| {
                    ("hold qualifies", start + machine.timings().long_press_required)
                })
            }
            SystemState::LoadingMission => machine
                .mission_load_deadline()
                .map(|at| ("mission load checked", at)),
            SystemState::ArmedCountdown => machine.takeoff_time().map(|at| ("launch", at)),
            SystemState::Idle | SystemState::WaitingRelease => None,
        };
        if let Some((label, at)) = deadline {
            lines.push(format!(
                "{label} in {}",
                format_duration_short(at.saturating_duration_since(now))
            ));
        }

        let program = match select_program(&snapshot, now, &self.cadences) {
            Some(program) => format!("{} step(s), {:?}", program.steps().len(), program.repeat()),
            None => "inert".to_owned(),
        };
        lines.push(format!(
            "led={} signaler={}",
            program,
            if self.signaler.is_running() { "running" } else { "stopped" }
        ));

        let bridge = self.controller.bridge();
        let mission = bridge.mission();
        lines.push(format!(
            "mission={} ({})",
            mission.path(),
            if mission.exists() { "present" } else { "missing" }
        ));
        lines.push(match bridge.registry().get(bridge.module_name()) {
            Some(loader) => format!(
                "loader `{}` mode={} delay={} requests={}",
                bridge.module_name(),
                loader.behavior().tag(),
                format_duration_short(loader.delay()),
                loader.requests()
            ),
            None => format!("loader `{}` not registered", bridge.module_name()),
        });
        lines.push(format!(
            "launches={} filtered-edges={}",
            self.launches(),
            self.controller.classifier().filtered_count()
        ));

        let telemetry = self.controller.telemetry();
        let skip = telemetry.len().saturating_sub(STATUS_HISTORY);
        for record in telemetry.oldest_first().skip(skip) {
            lines.push(format!(
                "  #{:<3} +{} {}",
                record.id,
                format_duration_short(record.timestamp.since_origin()),
                record.event
            ));
        }
        lines
    }

    fn run_sim(&mut self, command: SimCommand) -> Vec<String> {
        match command {
            SimCommand::Press => self.set_button(true),
            SimCommand::Release => self.set_button(false),
            SimCommand::Tap => self.hold(TAP_DURATION),
            SimCommand::Hold(duration) => self.hold(duration),
            SimCommand::Wait(duration) => self.wait(duration),
            SimCommand::Loader(command) => self.loader(command),
        }
    }

    fn hold(&mut self, duration: Duration) -> Vec<String> {
        let mut lines = self.set_button(true);
        lines.extend(self.wait(duration));
        lines.extend(self.set_button(false));
        lines
    }

    fn set_button(&mut self, pressed: bool) -> Vec<String> {
        let level = if pressed {
            self.button.pressed_level()
        } else {
            self.button.released_level()
        };
        let label = if pressed { "pressed" } else { "released" };

        let Some(edge_level) = self.button.drive(level) else {
            return if self.button.edges_enabled() {
                vec![format!("button already {label}")]
            } else {
                vec![format!("button {label} (edges off, run `return start`)")]
            };
        };

        match self.controller.on_level(edge_level.into(), self.clock.now()) {
            Some(transition) => vec![describe_transition(&transition)],
            None => vec![format!(
                "button {label}, no change in {}",
                self.controller.state()
            )],
        }
    }

    fn wait(&mut self, duration: Duration) -> Vec<String> {
        let mut lines = Vec::new();
        let mut remaining = duration;
        while !remaining.is_zero() {
            let step = remaining.min(self.tick_interval);
            self.clock.sleep(step);
            remaining -= step;
            if let Some(transition) = self.controller.tick(self.clock.now()) {
                lines.push(describe_transition(&transition));
            }
        }
        lines
    }

    fn loader(&mut self, command: LoaderCommand) -> Vec<String> {
        let registry = self.controller.bridge_mut().registry_mut();
        match command {
            LoaderCommand::Attach => {
                registry.register(
                    WAYPOINT_MODULE_NAME,
                    SimWaypointLoader::new(
                        Arc::clone(&self.clock),
                        self.load_delay,
                        self.load_behavior,
                    ),
                );
                vec![format!("OK `{WAYPOINT_MODULE_NAME}` module registered")]
            }
            LoaderCommand::Detach => match registry.remove(WAYPOINT_MODULE_NAME) {
                Some(_) => vec![format!("OK `{WAYPOINT_MODULE_NAME}` module removed")],
                None => vec![format!("`{WAYPOINT_MODULE_NAME}` module was not registered")],
            },
            LoaderCommand::Mode(behavior) => {
                self.load_behavior = behavior;
                if let Some(loader) = registry.get_mut(WAYPOINT_MODULE_NAME) {
                    loader.set_behavior(behavior);
                }
                vec![format!("OK loader mode {}", behavior.tag())]
            }
            LoaderCommand::Delay(delay) => {
                self.load_delay = delay;
                if let Some(loader) = registry.get_mut(WAYPOINT_MODULE_NAME) {
                    loader.set_delay(delay);
                }
                vec![format!("OK loader delay {}", format_duration_short(delay))]
            }
            LoaderCommand::Show => {
                let names = registry.names().collect::<Vec<_>>();
                if names.is_empty() {
                    vec!["no modules registered".to_owned()]
                } else {
                    vec![format!("modules: {}", names.join(", "))]
                }
            }
        }
    }

    fn record(&mut self, role: TranscriptRole, line: &str) -> io::Result<()> {
        let elapsed = self.elapsed();
        match self.transcript.as_mut() {
            Some(transcript) => transcript.append_line(elapsed, role, line),
            None => Ok(()),
        }
    }

    fn record_lines(&mut self, lines: &[String]) -> io::Result<()> {
        for line in lines {
            self.record(TranscriptRole::Module, line)?;
        }
        Ok(())
    }
}

fn describe_transition(transition: &Transition<HostInstant>) -> String {
    format!(
        "[+{}] {} -> {}: {}",
        format_duration_short(transition.at.since_origin()),
        transition.from,
        transition.to,
        transition.cause
    )
}

fn help_lines(topic: Option<&str>) -> Vec<String> {
    if let Some(topic) = topic {
        if let Some(text) = help_text(Some(topic)) {
            return vec![text.to_owned()];
        }
        if let Some((_, detail)) = SIM_HELP
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(topic))
        {
            return vec![(*detail).to_owned()];
        }

        let mut topics = help_topics().collect::<Vec<_>>();
        topics.extend(SIM_HELP.iter().map(|(name, _)| *name));
        return vec![
            format!("No help available for `{topic}`."),
            format!("Available topics: {}", topics.join(", ")),
        ];
    }

    let mut lines = vec!["Module commands:".to_owned()];
    lines.extend(
        help_text(None)
            .unwrap_or_default()
            .lines()
            .map(|line| format!("  {line}")),
    );
    lines.push("Simulation:".to_owned());
    lines.extend(SIM_HELP.iter().map(|(_, detail)| format!("  {detail}")));
    lines
}

pub(crate) fn format_duration_short(duration: Duration) -> String {
    if duration.as_secs() == 0 {
        format!("{}ms", duration.as_millis())
    } else {
        format!("{:.3}s", duration.as_secs_f64())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum SimCommand {
    Press,
    Release,
    Tap,
    Hold(Duration),
    Wait(Duration),
    Loader(LoaderCommand),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum LoaderCommand {
    Attach,
    Detach,
    Show,
    Mode(LoadBehavior),
    Delay(Duration),
}

fn sim_command(input: &mut &str) -> ModalResult<SimCommand> {
    alt((
        Caseless("press").value(SimCommand::Press),
        Caseless("release").value(SimCommand::Release),
        Caseless("tap").value(SimCommand::Tap),
        preceded((Caseless("hold"), space1), duration).map(SimCommand::Hold),
        preceded((Caseless("wait"), space1), duration).map(SimCommand::Wait),
        preceded((Caseless("loader"), space1), loader_command).map(SimCommand::Loader),
    ))
    .parse_next(input)
}

fn loader_command(input: &mut &str) -> ModalResult<LoaderCommand> {
    alt((
        Caseless("attach").value(LoaderCommand::Attach),
        Caseless("detach").value(LoaderCommand::Detach),
        Caseless("show").value(LoaderCommand::Show),
        preceded((Caseless("mode"), space1), behavior).map(LoaderCommand::Mode),
        preceded((Caseless("delay"), space1), duration).map(LoaderCommand::Delay),
    ))
    .parse_next(input)
}

fn behavior(input: &mut &str) -> ModalResult<LoadBehavior> {
    take_while(1.., |c: char| c.is_ascii_alphabetic())
        .verify_map(LoadBehavior::from_tag)
        .parse_next(input)
}

/// `<integer>(ms|s)`, e.g. `250ms` or `5s`.
fn duration(input: &mut &str) -> ModalResult<Duration> {
    (
        digit1.try_map(str::parse::<u64>),
        alt((Caseless("ms").value(1_u64), Caseless("s").value(1_000_u64))),
    )
        .map(|(value, scale)| Duration::from_millis(value.saturating_mul(scale)))
        .parse_next(input)
}

/// Append-only transcript of a session.
pub struct TranscriptLogger {
    writer: BufWriter<fs::File>,
}

impl TranscriptLogger {
    /// Creates (or truncates) the transcript at `path` and writes a header.
    ///
    /// # Errors
    ///
    /// Fails when the file or its parent directory cannot be created.
    pub fn new(path: &Path, header: &str) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };
        writeln!(logger.writer, "# {header}")?;
        writeln!(logger.writer, "# Timestamps are milliseconds since session start")?;
        writeln!(logger.writer)?;
        logger.writer.flush()?;
        Ok(logger)
    }

    fn append_line(&mut self, elapsed: Duration, role: TranscriptRole, line: &str) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>7} ms] {} {line}",
            elapsed.as_millis(),
            role.prefix()
        )?;
        self.writer.flush()
    }
}

#[derive(Copy, Clone)]
enum TranscriptRole {
    Operator,
    Module,
}

impl TranscriptRole {
    fn prefix(self) -> &'static str {
        match self {
            TranscriptRole::Operator => "OP  >",
            TranscriptRole::Module => "RET <",
        }
    }
}
