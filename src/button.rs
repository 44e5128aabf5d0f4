//! The snooze button.
//!
//! An input source turns raw pin levels into one [`Press`] per physical press
//! and drops it on a small channel. The listener thread is the only thing that
//! touches playback, so the input never waits on a player stopping.

use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::playback::{PlaybackController, PressOutcome};

/// presses waiting for the listener before new ones are dropped
pub const PRESS_QUEUE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Press;

pub trait ButtonInput: Send {
    /// Watches the input until nobody listens anymore.
    fn watch(&mut self, presses: &Sender<Press>);
}

#[must_use]
pub fn press_channel() -> (Sender<Press>, Receiver<Press>) {
    crossbeam_channel::bounded(PRESS_QUEUE)
}

/// Queues a press without blocking.
/// Returns false if the listener is gone.
pub fn send_press(presses: &Sender<Press>) -> bool {
    match presses.try_send(Press) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            log::debug!("press queue full, dropping press");
            true
        }
        Err(TrySendError::Disconnected(_)) => false,
    }
}

/// Turns a noisy level into clean edges: a level only counts once it held for `bounce`.
#[derive(Debug, Clone)]
pub struct Debouncer {
    bounce: Duration,
    stable: bool,
    candidate: bool,
    since: Option<Instant>,
}

impl Debouncer {
    #[must_use]
    pub const fn new(bounce: Duration) -> Self {
        Self {
            bounce,
            stable: false,
            candidate: false,
            since: None,
        }
    }

    /// Feeds the level seen at `at`, returns true on a debounced press.
    pub fn update(&mut self, pressed: bool, at: Instant) -> bool {
        if pressed != self.candidate || self.since.is_none() {
            self.candidate = pressed;
            self.since = Some(at);
        }
        let held = self
            .since
            .is_some_and(|since| at.saturating_duration_since(since) >= self.bounce);
        if held && self.candidate != self.stable {
            self.stable = self.candidate;
            return self.stable;
        }
        false
    }
}

/// Polls a pin through the legacy sysfs gpio interface. The button pulls the
/// pin low while pressed.
#[derive(Debug)]
pub struct SysfsButton {
    pin: u32,
    root: PathBuf,
    debouncer: Debouncer,
    poll: Duration,
}

impl SysfsButton {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, pin: u32, bounce: Duration) -> Self {
        Self {
            pin,
            root: root.into(),
            debouncer: Debouncer::new(bounce),
            poll: Duration::from_millis(10),
        }
    }

    #[must_use]
    pub fn with_poll(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    fn pin_dir(&self) -> PathBuf {
        self.root.join(format!("gpio{}", self.pin))
    }

    fn value_path(&self) -> PathBuf {
        self.pin_dir().join("value")
    }

    /// Exports the pin as an input if it isn't already.
    ///
    /// # Errors
    /// if the export or direction files can't be written
    pub fn export(&self) -> io::Result<()> {
        if !self.pin_dir().exists() {
            std::fs::write(self.root.join("export"), self.pin.to_string())?;
        }
        std::fs::write(self.pin_dir().join("direction"), "in")
    }

    fn is_pressed(path: &Path) -> io::Result<bool> {
        Ok(std::fs::read_to_string(path)?.trim() == "0")
    }
}

impl ButtonInput for SysfsButton {
    fn watch(&mut self, presses: &Sender<Press>) {
        let path = self.value_path();
        log::info!("watching button on {}", path.display());
        let mut failing = false;
        loop {
            match Self::is_pressed(&path) {
                Ok(pressed) => {
                    if failing {
                        log::info!("button readable again");
                        failing = false;
                    }
                    if self.debouncer.update(pressed, Instant::now()) && !send_press(presses) {
                        return;
                    }
                    thread::sleep(self.poll);
                }
                Err(e) => {
                    if !failing {
                        log::warn!("couldn't read button at {}: {e}", path.display());
                        failing = true;
                    }
                    thread::sleep(Duration::from_secs(1));
                }
            }
        }
    }
}

/// Hands every press to playback, until all senders are dropped.
pub fn listen(presses: &Receiver<Press>, playback: &PlaybackController) {
    for Press in presses {
        match playback.press() {
            Ok(PressOutcome::Ignored) => log::debug!("press ignored while idle"),
            Ok(outcome) => log::debug!("press handled: {outcome:?}"),
            Err(e) => log::error!("button press failed: {e}"),
        }
    }
    log::info!("button listener stopped");
}

/// # Errors
/// if the thread couldn't be spawned
pub fn spawn_listener(
    presses: Receiver<Press>,
    playback: Arc<PlaybackController>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("button-listener".to_string())
        .spawn(move || listen(&presses, &playback))
}

/// # Errors
/// if the thread couldn't be spawned
pub fn spawn_input(
    mut input: impl ButtonInput + 'static,
    presses: Sender<Press>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("button-input".to_string())
        .spawn(move || input.watch(&presses))
}
