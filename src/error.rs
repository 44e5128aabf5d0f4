//! Error types shared by the clock core and its collaborators.

use std::{io, path::PathBuf};

use thiserror::Error;

pub type Result<T, E = ClockError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum ClockError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Failures of the alarm and settings stores.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("couldn't read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("couldn't write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("couldn't parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("couldn't serialize state: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("no alarm with id {0}")]
    NotFound(u64),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Failures of the mixer and the audio player.
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("couldn't spawn player `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("player command is empty")]
    EmptyCommand,

    #[error("couldn't terminate player: {0}")]
    Terminate(#[source] io::Error),

    #[error("mixer `{command}` failed: {reason}")]
    Mixer { command: String, reason: String },

    #[error("can't play {target}: {reason}")]
    Unsupported { target: String, reason: String },
}

/// Input rejected at the control boundary before it reaches the core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("time must be HH:MM, got `{0}`")]
    TimeFormat(String),

    #[error("hour {hour} or minute {minute} out of range")]
    TimeRange { hour: u32, minute: u32 },

    #[error("days mask {0} is out of range (0..=127)")]
    DaysMask(u32),

    #[error("unknown weekday `{0}`")]
    Weekday(String),

    #[error("volume {0} is out of range (0..=100)")]
    Volume(u32),

    #[error("setting `{0}` is locked")]
    Locked(String),
}

/// Failures talking to the control socket.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("couldn't encode message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connection error: {0}")]
    Io(#[from] io::Error),

    #[error("connection closed before a reply arrived")]
    Closed,

    #[error("message longer than {0} bytes")]
    TooLong(u64),

    #[error("server replied with an error: {0}")]
    Server(String),

    #[error("unexpected reply: {0}")]
    Unexpected(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("couldn't find a home directory for the config")]
    NoProjectDirs,

    #[error("couldn't read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("couldn't parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("couldn't write config {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("couldn't serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}
