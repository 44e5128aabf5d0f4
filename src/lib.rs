#![warn(clippy::pedantic, clippy::nursery, clippy::cargo)]
#![deny(clippy::use_self, rust_2018_idioms)]
#![allow(clippy::multiple_crate_versions, clippy::module_name_repetitions)]

//! A bedside alarm clock: rings alarms on schedule, plays morning content after
//! the snooze button is pressed, and takes edits over a local control socket.

pub mod alarm;
pub mod audio;
pub mod button;
pub mod communication;
pub mod config;
pub mod daemon;
pub mod error;
pub mod playback;
/// edge crossing evaluation of alarm schedules
pub mod schedule;
pub mod scheduler;
pub mod server;
pub mod store;

pub use error::{ClockError, Result};
