//! The one place that starts and stops audio.
//!
//! Every operation on [`PlaybackController`] runs under a single lock, so the
//! scheduler, the button and control requests can call in from any thread
//! without ever having two players alive at once or a mode that disagrees with
//! what is actually playing. The mixer is only ever called outside that lock.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::{
    audio::{AudioBackend, Mixer, Player},
    config::Settings,
    error::AudioError,
    store::SettingsStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Idle,
    /// looping alarm tone
    Alarm,
    /// morning content, plays once
    Content,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Alarm => "alarm",
            Self::Content => "content",
        })
    }
}

/// A live playback.
#[derive(Debug)]
pub struct Session {
    pub target: String,
    pub looping: bool,
    player: Box<dyn Player>,
}

/// What is playing right now, as reported to the control surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub mode: Mode,
    pub target: Option<String>,
}

/// what the button press did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressOutcome {
    /// alarm acknowledged, content started
    Acknowledged,
    Silenced,
    Ignored,
}

#[derive(Debug, Default)]
struct State {
    mode: Mode,
    /// `None` exactly when `mode` is idle
    session: Option<Session>,
}

pub struct PlaybackController {
    state: Mutex<State>,
    backend: Box<dyn AudioBackend>,
    mixer: Box<dyn Mixer>,
    settings: Arc<dyn SettingsStore>,
    stop_grace: Duration,
}

impl fmt::Debug for PlaybackController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackController")
            .field("state", &self.state)
            .field("stop_grace", &self.stop_grace)
            .finish_non_exhaustive()
    }
}

impl PlaybackController {
    pub fn new(
        backend: impl AudioBackend + 'static,
        mixer: impl Mixer + 'static,
        settings: Arc<dyn SettingsStore>,
        stop_grace: Duration,
    ) -> Self {
        Self {
            state: Mutex::new(State::default()),
            backend: Box::new(backend),
            mixer: Box::new(mixer),
            settings,
            stop_grace,
        }
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        self.state.lock().mode
    }

    #[must_use]
    pub fn status(&self) -> Status {
        let mut state = self.state.lock();
        self.reap_locked(&mut state);
        Status {
            mode: state.mode,
            target: state.session.as_ref().map(|session| session.target.clone()),
        }
    }

    /// Replaces whatever is playing with a looping alarm tone.
    ///
    /// # Errors
    /// if the player couldn't be started, the mode is then idle
    pub fn start_alarm(&self) -> Result<(), AudioError> {
        let settings = self.current_settings();
        self.apply_volume(settings.volume());
        let mut state = self.state.lock();
        self.start_alarm_locked(&mut state, &settings)
    }

    /// Replaces whatever is playing with the configured morning content.
    ///
    /// # Errors
    /// if the player couldn't be started, the mode is then idle
    pub fn start_content(&self) -> Result<(), AudioError> {
        let settings = self.current_settings();
        self.apply_volume(settings.volume());
        let mut state = self.state.lock();
        self.start_content_locked(&mut state, &settings)
    }

    /// Stops playback, doing nothing if idle.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        self.stop_locked(&mut state);
    }

    /// The snooze button: an alarm turns into content, content goes quiet.
    ///
    /// # Errors
    /// if content couldn't be started after stopping the alarm
    pub fn press(&self) -> Result<PressOutcome, AudioError> {
        let settings = self.current_settings();
        let outcome = {
            let mut state = self.state.lock();
            match state.mode {
                Mode::Alarm => {
                    log::info!("button pressed during alarm, switching to content");
                    self.stop_locked(&mut state);
                    self.start_content_locked(&mut state, &settings)?;
                    PressOutcome::Acknowledged
                }
                Mode::Content => {
                    log::info!("button pressed during content, stopping");
                    self.stop_locked(&mut state);
                    PressOutcome::Silenced
                }
                Mode::Idle => {
                    log::debug!("button pressed while idle");
                    PressOutcome::Ignored
                }
            }
        };
        if outcome == PressOutcome::Acknowledged {
            self.apply_volume(settings.volume());
        }
        Ok(outcome)
    }

    /// Restarts content so a changed content source takes effect. Returns
    /// whether content was playing.
    ///
    /// # Errors
    /// if the new content couldn't be started
    pub fn restart_content(&self) -> Result<bool, AudioError> {
        let settings = self.current_settings();
        {
            let mut state = self.state.lock();
            if state.mode != Mode::Content {
                return Ok(false);
            }
            self.start_content_locked(&mut state, &settings)?;
        }
        self.apply_volume(settings.volume());
        Ok(true)
    }

    /// Drops a session whose player ended by itself. Returns true if one was dropped.
    pub fn reap(&self) -> bool {
        let mut state = self.state.lock();
        self.reap_locked(&mut state)
    }

    /// Applies `percent` to the mixer right away, logging failure. Never holds the playback lock.
    pub fn apply_volume(&self, percent: u8) {
        if let Err(e) = self.mixer.set_volume(percent) {
            log::warn!("couldn't set volume to {percent}%: {e}");
        }
    }

    fn current_settings(&self) -> Settings {
        self.settings.settings().unwrap_or_else(|e| {
            log::warn!("couldn't read settings, using defaults: {e}");
            Settings::default()
        })
    }

    fn start_alarm_locked(&self, state: &mut State, settings: &Settings) -> Result<(), AudioError> {
        let tone = pick_tone(&settings.alarm_tones_dir, &settings.alarm_tone_path);
        self.replace_locked(
            state,
            Mode::Alarm,
            &tone.to_string_lossy(),
            true,
            settings.volume(),
        )
    }

    fn start_content_locked(
        &self,
        state: &mut State,
        settings: &Settings,
    ) -> Result<(), AudioError> {
        self.replace_locked(
            state,
            Mode::Content,
            &settings.content.target(),
            false,
            settings.volume(),
        )
    }

    fn replace_locked(
        &self,
        state: &mut State,
        mode: Mode,
        target: &str,
        looping: bool,
        volume: u8,
    ) -> Result<(), AudioError> {
        self.stop_locked(state);
        match self.backend.spawn(target, looping, volume) {
            Ok(player) => {
                log::info!("{mode} started: {target}");
                state.session = Some(Session {
                    target: target.to_string(),
                    looping,
                    player,
                });
                state.mode = mode;
                Ok(())
            }
            Err(e) => {
                log::error!("couldn't start {mode} with {target}: {e}");
                Err(e)
            }
        }
    }

    fn stop_locked(&self, state: &mut State) {
        if let Some(mut session) = state.session.take() {
            if let Err(e) = session.player.terminate(self.stop_grace) {
                // the process may leak, but the mode must not get stuck
                log::error!("couldn't stop player for {}: {e}", session.target);
            }
            log::info!("{} stopped", state.mode);
        }
        state.mode = Mode::Idle;
    }

    fn reap_locked(&self, state: &mut State) -> bool {
        let finished = state
            .session
            .as_mut()
            .is_some_and(|session| !session.player.is_running());
        if finished {
            log::info!("{} finished by itself", state.mode);
            self.stop_locked(state);
        }
        finished
    }
}

/// Picks a random `*.mp3` from `dir`, or `fallback` if there is none.
#[must_use]
pub fn pick_tone(dir: &Path, fallback: &Path) -> PathBuf {
    let tones: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .extension()
                        .is_some_and(|ext| ext.eq_ignore_ascii_case("mp3"))
            })
            .collect(),
        Err(e) => {
            log::debug!("no tone pool at {}: {e}", dir.display());
            Vec::new()
        }
    };
    tones
        .choose(&mut rand::thread_rng())
        .cloned()
        .unwrap_or_else(|| fallback.to_path_buf())
}
