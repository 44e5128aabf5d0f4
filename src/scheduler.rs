use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use chrono::{Local, NaiveDateTime};

use crate::{error::ClockError, playback::PlaybackController, schedule, store::AlarmStore};

/// Runs the schedule evaluation on a fixed cadence for the life of the process.
pub struct Scheduler {
    alarms: Arc<dyn AlarmStore>,
    playback: Arc<PlaybackController>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(
        alarms: Arc<dyn AlarmStore>,
        playback: Arc<PlaybackController>,
        interval: Duration,
    ) -> Self {
        Self {
            alarms,
            playback,
            interval,
        }
    }

    /// One evaluation over `(last_tick, now]`. Returns the id of the alarm that was started.
    ///
    /// The alarm is marked fired before playback starts, so a crash in between
    /// loses that alarm instead of ringing it twice.
    ///
    /// # Errors
    /// if the store couldn't be read or written, or the alarm couldn't be started
    pub fn tick(
        &self,
        last_tick: NaiveDateTime,
        now: NaiveDateTime,
    ) -> Result<Option<u64>, ClockError> {
        self.playback.reap();
        let alarms = self.alarms.list()?;
        let mut crossed = schedule::crossed_alarms(&alarms, last_tick, now);
        let Some(alarm) = crossed.next() else {
            return Ok(None);
        };
        for lapsed in crossed {
            log::warn!(
                "alarm {lapsed} crossed in the same tick as alarm {}, it won't ring today",
                alarm.id
            );
        }
        log::info!("alarm {alarm} is due");
        self.alarms.mark_fired(alarm.id, now.date())?;
        self.playback.start_alarm()?;
        Ok(Some(alarm.id))
    }

    /// Ticks forever. A failed tick is logged and the next one runs as usual.
    pub fn run(&self) {
        log::info!("scheduler running every {:?}", self.interval);
        // alarms that passed while we weren't running don't ring on startup
        let mut last_tick = Local::now().naive_local();
        loop {
            thread::sleep(self.interval);
            let now = Local::now().naive_local();
            if now < last_tick {
                log::warn!("clock went back from {last_tick} to {now}");
            }
            match self.tick(last_tick, now) {
                Ok(Some(id)) => log::debug!("tick at {now} started alarm {id}"),
                Ok(None) => {}
                Err(e @ ClockError::Store(_)) => {
                    log::warn!("tick at {now} couldn't use the store: {e}");
                }
                Err(e) => log::error!("tick at {now} failed: {e}"),
            }
            last_tick = now;
        }
    }

    /// # Errors
    /// if the thread couldn't be spawned
    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("scheduler".to_string())
            .spawn(move || self.run())
    }
}
