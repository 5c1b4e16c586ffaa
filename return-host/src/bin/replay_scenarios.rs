use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use env_logger::Env;
use log::info;
use return_host::clock::ManualClock;
use return_host::gpio::RecordingLed;
use return_host::session::{Session, SessionConfig};

const DEFAULT_OUT_DIR: &str = "transcripts";

struct Scenario {
    name: &'static str,
    mission_present: bool,
    script: &'static [&'static str],
}

const SCENARIOS: &[Scenario] = &[
    Scenario {
        name: "launch",
        mission_present: true,
        script: &[
            "return start",
            "tap",
            "wait 300ms",
            "hold 4500ms",
            "return status",
            "wait 5200ms",
            "return status",
            "wait 20s",
            "return status",
        ],
    },
    Scenario {
        name: "short-hold",
        mission_present: true,
        script: &["return start", "tap", "wait 200ms", "hold 2s", "return status"],
    },
    Scenario {
        name: "long-press-window",
        mission_present: true,
        script: &["return start", "tap", "wait 2500ms", "return status"],
    },
    Scenario {
        name: "missing-mission",
        mission_present: false,
        script: &["return start", "tap", "wait 200ms", "hold 4500ms", "return status"],
    },
    Scenario {
        name: "load-timeout",
        mission_present: true,
        script: &[
            "loader mode hang",
            "return start",
            "tap",
            "wait 200ms",
            "hold 4500ms",
            "wait 5200ms",
            "return status",
        ],
    },
    Scenario {
        name: "cancel-countdown",
        mission_present: true,
        script: &[
            "return start",
            "tap",
            "wait 200ms",
            "hold 4500ms",
            "wait 5200ms",
            "wait 10s",
            "tap",
            "wait 15s",
            "return status",
            "return stop",
        ],
    },
];

fn main() -> io::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();

    let out_dir = parse_out_dir();
    fs::create_dir_all(&out_dir)?;
    for scenario in SCENARIOS {
        replay(scenario, &out_dir)?;
    }
    Ok(())
}

fn parse_out_dir() -> PathBuf {
    let mut args = env::args().skip(1);
    match args.next() {
        Some(arg) if arg == "--out" => args.next().map_or_else(|| DEFAULT_OUT_DIR.into(), PathBuf::from),
        Some(arg) => arg
            .strip_prefix("--out=")
            .map_or_else(|| PathBuf::from(&arg), PathBuf::from),
        None => PathBuf::from(DEFAULT_OUT_DIR),
    }
}

fn replay(scenario: &Scenario, out_dir: &Path) -> io::Result<()> {
    let mission_path = out_dir.join(format!("{}.waypoints", scenario.name));
    if scenario.mission_present {
        fs::write(&mission_path, "QGC WPL 110\n0\t1\t0\t16\t0\t0\t0\t0\t0\t0\t0\t1\n")?;
    } else if mission_path.exists() {
        fs::remove_file(&mission_path)?;
    }

    let transcript = out_dir.join(format!("{}.log", scenario.name));
    let config = SessionConfig {
        mission_path,
        transcript: Some(transcript.clone()),
        spawn_signaler: false,
        ..SessionConfig::default()
    };
    let mut session = Session::new(config, Arc::new(ManualClock::new()), RecordingLed::default())?;

    for line in scenario.script {
        session.handle_line(line)?;
    }

    info!(
        "replay: {} finished in {} with {} launch(es), transcript at {}",
        scenario.name,
        session.state(),
        session.launches(),
        transcript.display()
    );
    if scenario.mission_present {
        fs::remove_file(out_dir.join(format!("{}.waypoints", scenario.name)))?;
    }
    Ok(())
}
