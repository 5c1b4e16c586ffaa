//! LED feedback thread.
//!
//! The signaler only reads the shared [`StatusBoard`] and only writes the LED.
//! Every wait is cut into slices of at most [`STATE_POLL_INTERVAL`] so a state
//! change or stop request is noticed within one slice. Starting a signaler
//! always stops and joins the previous one first, so at most one thread drives
//! the LED at any time.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use return_core::feedback::{BlinkCursor, CadenceTable, LedState};
use return_core::status::{StatusBoard, StatusSource};

use crate::clock::{Clock, HostInstant};
use crate::gpio::{LedOutput, LedPolarity};

/// Longest uninterrupted sleep inside a blink step.
pub const STATE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Everything a signaler thread needs.
pub struct SignalerConfig<L> {
    pub board: Arc<StatusBoard<HostInstant>>,
    pub clock: Arc<dyn Clock>,
    pub led: L,
    pub polarity: LedPolarity,
    pub cadences: CadenceTable,
}

struct Running {
    cancel: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

/// Owner of the (at most one) running signaler thread.
#[derive(Default)]
pub struct SignalerHandle {
    running: Option<Running>,
}

impl SignalerHandle {
    #[must_use]
    pub const fn new() -> Self {
        Self { running: None }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Stops any running signaler, then spawns a new one.
    ///
    /// # Errors
    ///
    /// Returns the spawn error if the OS refuses to create the thread.
    pub fn start<L>(&mut self, config: SignalerConfig<L>) -> io::Result<()>
    where
        L: LedOutput + 'static,
    {
        self.stop();

        let cancel = Arc::new(AtomicBool::new(false));
        let worker = Worker {
            cancel: Arc::clone(&cancel),
            config,
        };
        let join = thread::Builder::new()
            .name("return-led".into())
            .spawn(move || worker.run())?;

        self.running = Some(Running { cancel, join });
        Ok(())
    }

    /// Signals the running signaler and waits for it to exit.
    ///
    /// Returns `true` if a signaler was running.
    pub fn stop(&mut self) -> bool {
        let Some(Running { cancel, join }) = self.running.take() else {
            return false;
        };

        cancel.store(true, Ordering::Release);
        join.thread().unpark();
        if join.join().is_err() {
            warn!("return: LED signaler thread panicked");
        }
        true
    }
}

impl Drop for SignalerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker<L> {
    cancel: Arc<AtomicBool>,
    config: SignalerConfig<L>,
}

impl<L: LedOutput> Worker<L> {
    fn run(mut self) {
        info!("return: LED signaler started");
        let mut cursor = BlinkCursor::new();

        while !self.cancelled() {
            let snapshot = self.config.board.snapshot();
            let now = self.config.clock.now();
            let command = cursor.next_command(&snapshot, now, &self.config.cadences);
            if let Some(state) = command.level {
                self.drive(state);
            }
            self.hold(command.hold, snapshot.revision);
        }

        self.drive(LedState::Off);
        info!("return: LED signaler stopped");
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    fn drive(&mut self, state: LedState) {
        let level = self.config.polarity.level_for(state);
        self.config.led.write(level);
    }

    /// Sleeps for `duration` unless cancelled or the published state changes.
    fn hold(&self, duration: Duration, revision: u32) {
        let deadline = Instant::now() + duration;
        loop {
            if self.cancelled() {
                return;
            }
            if self.config.board.revision() != revision {
                debug!("return: state changed, abandoning blink step");
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            thread::park_timeout((deadline - now).min(STATE_POLL_INTERVAL));
        }
    }
}
