use std::env;
use std::fmt;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use crossterm::style::Stylize;
use env_logger::Env;
use log::debug;
use return_core::button::EdgeFilter;
use return_core::feedback::Cadence;
use return_core::machine::SystemState;
use return_host::clock::SystemClock;
use return_host::gpio::ConsoleLed;
use return_host::session::{Session, SessionConfig};
use return_host::waypoints::LoadBehavior;

const USAGE: &str = "\
Usage: return-module [options]
  --mission <path>            mission file to load (default: return.waypoints)
  --tick-ms <n>               monitor tick interval in milliseconds (default: 100)
  --transcript <path>         write the session to a transcript file
  --load-delay-ms <n>         simulated waypoint load time (default: 1500)
  --load-behavior <tag>       complete, fail, hang or refuse (default: complete)
  --loading-cadence <tag>     inert or breathing while the mission loads (default: inert)
  --edge-filter-ms <n>        drop edges closer than n milliseconds (default: off)";

#[derive(Debug)]
enum ArgError {
    MissingValue(&'static str),
    InvalidNumber { flag: &'static str, value: String },
    InvalidTag { flag: &'static str, value: String },
    Unknown(String),
}

impl fmt::Display for ArgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgError::MissingValue(flag) => write!(f, "expected a value after {flag}"),
            ArgError::InvalidNumber { flag, value } => {
                write!(f, "{flag} expects a whole number, got `{value}`")
            }
            ArgError::InvalidTag { flag, value } => write!(f, "unsupported {flag} value `{value}`"),
            ArgError::Unknown(arg) => write!(f, "unknown argument `{arg}`"),
        }
    }
}

enum Invocation {
    Run(SessionConfig),
    Help,
}

fn main() -> io::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = match parse_args(env::args().skip(1)) {
        Ok(Invocation::Run(config)) => config,
        Ok(Invocation::Help) => {
            println!("{USAGE}");
            return Ok(());
        }
        Err(err) => {
            eprintln!("{err}");
            eprintln!("{USAGE}");
            process::exit(2);
        }
    };

    let tick_interval = config.tick_interval;
    let led = ConsoleLed::new(config.led_polarity);
    let mut session = Session::new(config, Arc::new(SystemClock::new()), led)?;

    let (lines_tx, lines_rx) = mpsc::channel::<String>();
    thread::Builder::new()
        .name("return-stdin".into())
        .spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if lines_tx.send(line).is_err() {
                    break;
                }
            }
        })?;

    let stdout = io::stdout();
    let mut writer = stdout.lock();
    writeln!(
        writer,
        "Return module ready. Type `help` for commands or `exit` to quit."
    )?;
    prompt(&mut writer)?;

    loop {
        match lines_rx.recv_timeout(tick_interval) {
            Ok(line) => {
                let trimmed = line.trim();
                if should_terminate(trimmed) {
                    writeln!(writer, "Session closed.")?;
                    break;
                }
                for response in session.handle_line(trimmed)? {
                    print_line(&mut writer, &response)?;
                }
                prompt(&mut writer)?;
            }
            Err(RecvTimeoutError::Timeout) => {
                if let Some(line) = session.tick()? {
                    writeln!(writer)?;
                    print_line(&mut writer, &line)?;
                    prompt(&mut writer)?;
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                writeln!(writer)?;
                break;
            }
        }
    }

    debug!("return: shutting down in {}", session.state());
    Ok(())
}

fn prompt(writer: &mut impl Write) -> io::Result<()> {
    write!(writer, "> ")?;
    writer.flush()
}

fn print_line(writer: &mut impl Write, line: &str) -> io::Result<()> {
    if line.starts_with("ERR") {
        writeln!(writer, "{}", line.red())
    } else if line.contains(&format!("-> {}", SystemState::ArmedCountdown)) {
        writeln!(writer, "{}", line.yellow().bold())
    } else if line.starts_with("[+") {
        writeln!(writer, "{}", line.cyan())
    } else {
        writeln!(writer, "{line}")
    }
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Invocation, ArgError> {
    let mut config = SessionConfig::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) => (flag.to_owned(), Some(value.to_owned())),
            None => (arg, None),
        };

        match flag.as_str() {
            "-h" | "--help" => return Ok(Invocation::Help),
            "--mission" => {
                config.mission_path = PathBuf::from(value("--mission", inline, &mut args)?);
            }
            "--transcript" => {
                config.transcript = Some(PathBuf::from(value("--transcript", inline, &mut args)?));
            }
            "--tick-ms" => {
                let millis = number("--tick-ms", value("--tick-ms", inline, &mut args)?)?;
                config.tick_interval = Duration::from_millis(millis.max(1));
            }
            "--load-delay-ms" => {
                let millis =
                    number("--load-delay-ms", value("--load-delay-ms", inline, &mut args)?)?;
                config.load_delay = Duration::from_millis(millis);
            }
            "--load-behavior" => {
                let tag = value("--load-behavior", inline, &mut args)?;
                config.load_behavior =
                    LoadBehavior::from_tag(&tag).ok_or(ArgError::InvalidTag {
                        flag: "--load-behavior",
                        value: tag,
                    })?;
            }
            "--loading-cadence" => {
                let tag = value("--loading-cadence", inline, &mut args)?;
                let cadence = match tag.to_ascii_lowercase().as_str() {
                    "inert" => Cadence::Inert,
                    "breathing" => Cadence::Breathing,
                    _ => {
                        return Err(ArgError::InvalidTag {
                            flag: "--loading-cadence",
                            value: tag,
                        });
                    }
                };
                config.cadences = config
                    .cadences
                    .with_cadence(SystemState::LoadingMission, cadence);
            }
            "--edge-filter-ms" => {
                let millis =
                    number("--edge-filter-ms", value("--edge-filter-ms", inline, &mut args)?)?;
                let filter = if millis == 0 {
                    EdgeFilter::PassThrough
                } else {
                    EdgeFilter::MinInterval(Duration::from_millis(millis))
                };
                config.controller = config.controller.with_edge_filter(filter);
            }
            _ => return Err(ArgError::Unknown(flag)),
        }
    }

    Ok(Invocation::Run(config))
}

fn value(
    flag: &'static str,
    inline: Option<String>,
    rest: &mut impl Iterator<Item = String>,
) -> Result<String, ArgError> {
    inline.or_else(|| rest.next()).ok_or(ArgError::MissingValue(flag))
}

fn number(flag: &'static str, value: String) -> Result<u64, ArgError> {
    value
        .parse()
        .map_err(|_| ArgError::InvalidNumber { flag, value })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Invocation, ArgError> {
        parse_args(args.iter().map(|arg| (*arg).to_owned()))
    }

    #[test]
    fn defaults_without_arguments() {
        let Ok(Invocation::Run(config)) = parse(&[]) else {
            panic!("expected run invocation");
        };
        assert_eq!(config.mission_path, PathBuf::from("return.waypoints"));
        assert_eq!(config.tick_interval, Duration::from_millis(100));
        assert!(config.transcript.is_none());
    }

    #[test]
    fn accepts_inline_and_separate_values() {
        let Ok(Invocation::Run(config)) = parse(&[
            "--mission=/tmp/home.waypoints",
            "--load-behavior",
            "hang",
            "--edge-filter-ms",
            "20",
        ]) else {
            panic!("expected run invocation");
        };
        assert_eq!(config.mission_path, PathBuf::from("/tmp/home.waypoints"));
        assert_eq!(config.load_behavior, LoadBehavior::Hang);
        assert_eq!(
            config.controller.edge_filter,
            EdgeFilter::MinInterval(Duration::from_millis(20))
        );
    }

    #[test]
    fn loading_cadence_is_configurable() {
        let Ok(Invocation::Run(config)) = parse(&["--loading-cadence", "breathing"]) else {
            panic!("expected run invocation");
        };
        assert_eq!(
            config.cadences.cadence(SystemState::LoadingMission),
            Cadence::Breathing
        );
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(
            parse(&["--tick-ms", "soon"]),
            Err(ArgError::InvalidNumber { .. })
        ));
        assert!(matches!(parse(&["--mission"]), Err(ArgError::MissingValue(_))));
        assert!(matches!(parse(&["--bogus"]), Err(ArgError::Unknown(_))));
        assert!(matches!(parse(&["--help"]), Ok(Invocation::Help)));
    }
}
