use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ValidationError};

const APP_NAME: &str = "bedside_clock";

/// Daemon configuration, read once at startup from `config.toml`.
///
/// Everything the control surface can change at runtime lives in [`Settings`]
/// instead, which is persisted by the store.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// how often the scheduler looks at the clock
    pub tick_ms: u64,
    /// how long a player gets to exit after being asked to before it is killed
    pub stop_grace_ms: u64,
    /// runs without a snooze button when off
    pub button: bool,
    /// BCM pin number of the snooze button
    pub button_gpio: u32,
    pub gpio_root: PathBuf,
    pub bounce_ms: u64,
    /// player program and its fixed arguments, the target is appended last
    pub player: Vec<String>,
    /// extra argument passed to the player for looping targets
    pub loop_arg: String,
    pub backend: Backend,
    pub mixer_control: String,
    pub socket_name: String,
    /// where alarms and settings are kept, defaults to the data dir
    pub state_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick_ms: 1000,
            stop_grace_ms: 2000,
            button: true,
            button_gpio: 17,
            gpio_root: PathBuf::from("/sys/class/gpio"),
            bounce_ms: 50,
            player: vec![
                "cvlc".to_string(),
                "--no-video".to_string(),
                "--quiet".to_string(),
            ],
            loop_arg: "--loop".to_string(),
            backend: Backend::default(),
            mixer_control: "Master".to_string(),
            socket_name: "bedside-clock.sock".to_string(),
            state_path: None,
        }
    }
}

/// Which audio backend plays alarms and content.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// an external player process, see [`Config::player`]
    #[default]
    Process,
    /// in process playback, local files only
    Rodio,
}

impl Config {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// if the file can't be read or isn't valid toml
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&config).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads `path`, or the defaults when no config was written yet.
    ///
    /// # Errors
    /// if the file exists but can't be read or parsed
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            log::info!("no config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// # Errors
    /// if the config dir can't be created or the file can't be written
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let config = toml::to_string(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, config).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// # Errors
    /// if there is no home directory to put the config in
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        let mut path = project_dirs()?.config_dir().to_path_buf();
        path.push("config.toml");
        Ok(path)
    }

    /// # Errors
    /// if no state path is configured and there is no home directory
    pub fn state_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.state_path {
            Some(path) => Ok(path.clone()),
            None => Ok(project_dirs()?.data_dir().join("state.toml")),
        }
    }

    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    #[must_use]
    pub const fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    #[must_use]
    pub const fn bounce(&self) -> Duration {
        Duration::from_millis(self.bounce_ms)
    }
}

fn project_dirs() -> Result<ProjectDirs, ConfigError> {
    ProjectDirs::from("", "", APP_NAME).ok_or(ConfigError::NoProjectDirs)
}

/// data dir of the app, or the working directory when there is no home
#[must_use]
pub fn data_dir() -> PathBuf {
    project_dirs().map_or_else(|_| PathBuf::from("."), |dirs| dirs.data_dir().to_path_buf())
}

/// What plays after the alarm is acknowledged.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Content {
    Stream(String),
    File(PathBuf),
}

impl Content {
    /// what gets handed to the player
    #[must_use]
    pub fn target(&self) -> String {
        match self {
            Self::Stream(url) => url.clone(),
            Self::File(path) => path.to_string_lossy().into_owned(),
        }
    }
}

impl Default for Content {
    fn default() -> Self {
        Self::Stream("http://icecast.omroep.nl/radio1-bb-mp3".to_string())
    }
}

impl fmt::Display for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream(url) => write!(f, "stream {url}"),
            Self::File(path) => write!(f, "file {}", path.display()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SettingKey {
    VolumePercent,
    AlarmTonePath,
    AlarmTonesDir,
    Content,
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::VolumePercent => "volume_percent",
            Self::AlarmTonePath => "alarm_tone_path",
            Self::AlarmTonesDir => "alarm_tones_dir",
            Self::Content => "content",
        })
    }
}

/// Runtime settings, owned by the settings store and read before every playback start.
/// Missing keys take their default, so older state files still load.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub volume_percent: u8,
    /// played when the tone pool is empty
    pub alarm_tone_path: PathBuf,
    /// a random `*.mp3` from here is picked for every alarm
    pub alarm_tones_dir: PathBuf,
    /// keys the control surface isn't allowed to change
    pub locked: Vec<SettingKey>,
    pub content: Content,
}

impl Default for Settings {
    fn default() -> Self {
        let data = data_dir();
        Self {
            volume_percent: 65,
            alarm_tone_path: data.join("media").join("alarmtone.mp3"),
            alarm_tones_dir: data.join("alarmtones"),
            locked: Vec::new(),
            content: Content::default(),
        }
    }
}

/// A partial settings change coming from the control surface.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct SettingsUpdate {
    #[serde(default)]
    pub volume_percent: Option<u8>,
    #[serde(default)]
    pub alarm_tone_path: Option<PathBuf>,
    #[serde(default)]
    pub alarm_tones_dir: Option<PathBuf>,
    #[serde(default)]
    pub content: Option<Content>,
}

/// which parts of the settings an update actually changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettingsChange {
    pub volume: bool,
    pub content: bool,
}

impl Settings {
    #[must_use]
    pub fn volume(&self) -> u8 {
        self.volume_percent.min(100)
    }

    #[must_use]
    pub fn is_locked(&self, key: SettingKey) -> bool {
        self.locked.contains(&key)
    }

    /// Applies `update` all or nothing.
    ///
    /// # Errors
    /// if the update touches a locked key or the volume is over 100
    pub fn apply(&mut self, update: SettingsUpdate) -> Result<SettingsChange, ValidationError> {
        let touched = [
            (SettingKey::VolumePercent, update.volume_percent.is_some()),
            (SettingKey::AlarmTonePath, update.alarm_tone_path.is_some()),
            (SettingKey::AlarmTonesDir, update.alarm_tones_dir.is_some()),
            (SettingKey::Content, update.content.is_some()),
        ];
        if let Some((key, _)) = touched
            .iter()
            .find(|(key, touched)| *touched && self.is_locked(*key))
        {
            return Err(ValidationError::Locked(key.to_string()));
        }
        if let Some(volume) = update.volume_percent.filter(|volume| *volume > 100) {
            return Err(ValidationError::Volume(u32::from(volume)));
        }

        let mut change = SettingsChange::default();
        if let Some(volume) = update.volume_percent {
            change.volume = true;
            self.volume_percent = volume;
        }
        if let Some(path) = update.alarm_tone_path {
            self.alarm_tone_path = path;
        }
        if let Some(dir) = update.alarm_tones_dir {
            self.alarm_tones_dir = dir;
        }
        if let Some(content) = update.content {
            change.content = content != self.content;
            self.content = content;
        }
        Ok(change)
    }
}
