//! Deciding which alarm is due.
//!
//! An alarm is due when the clock crosses its scheduled instant between two
//! ticks: `last_tick < scheduled <= now`. Comparing against the crossing instead
//! of the current minute means a slow or irregular tick still rings exactly
//! once, and a tick that lands on the same instant twice can't ring twice.

use chrono::NaiveDateTime;

use crate::alarm::Alarm;

/// Whether `alarm` crosses its scheduled instant in `(last_tick, now]`.
#[must_use]
pub fn crosses(alarm: &Alarm, last_tick: NaiveDateTime, now: NaiveDateTime) -> bool {
    let today = now.date();
    if !alarm.enabled || !alarm.is_active_on(today) || alarm.fired_on(today) {
        return false;
    }
    let scheduled = alarm.scheduled_on(today);
    last_tick < scheduled && scheduled <= now
}

/// Every alarm crossing its instant this tick, in time of day order.
pub fn crossed_alarms(
    alarms: &[Alarm],
    last_tick: NaiveDateTime,
    now: NaiveDateTime,
) -> impl Iterator<Item = &Alarm> {
    let mut ordered: Vec<&Alarm> = alarms.iter().collect();
    ordered.sort_by_key(|alarm| (alarm.time, alarm.id));
    ordered
        .into_iter()
        .filter(move |alarm| crosses(alarm, last_tick, now))
}

/// The alarm to ring this tick, the earliest by time of day if several cross at once.
#[must_use]
pub fn due_alarm(alarms: &[Alarm], last_tick: NaiveDateTime, now: NaiveDateTime) -> Option<&Alarm> {
    crossed_alarms(alarms, last_tick, now).next()
}
