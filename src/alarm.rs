use std::{fmt, ops::AddAssign, str::FromStr};

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Set of weekdays an alarm is active on.
/// bit 0 is monday, bit 6 is sunday
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Days(u8);

impl Days {
    pub const NONE: Self = Self(0);
    pub const WEEKDAYS: Self = Self(0b001_1111);
    pub const WEEKEND: Self = Self(0b110_0000);
    pub const EVERY_DAY: Self = Self(0b111_1111);

    /// # Errors
    /// if `mask` has bits above the seventh set
    pub fn from_bits(mask: u32) -> Result<Self, ValidationError> {
        u8::try_from(mask)
            .ok()
            .filter(|bits| *bits <= Self::EVERY_DAY.0)
            .map(Self)
            .ok_or(ValidationError::DaysMask(mask))
    }

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub fn contains(self, day: Weekday) -> bool {
        self.0 & (1 << day.num_days_from_monday()) != 0
    }

    #[must_use]
    pub fn with(self, day: Weekday) -> Self {
        Self(self.0 | (1 << day.num_days_from_monday()))
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Weekday> {
        [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ]
        .into_iter()
        .filter(move |day| self.contains(*day))
    }
}

impl TryFrom<u32> for Days {
    type Error = ValidationError;

    fn try_from(mask: u32) -> Result<Self, Self::Error> {
        Self::from_bits(mask)
    }
}

impl From<Days> for u32 {
    fn from(days: Days) -> Self {
        Self::from(days.0)
    }
}

/// parses either a comma separated list of weekdays (`mon,tue,fri`),
/// one of the shorthands `weekdays`, `weekend`, `daily`, or a raw mask
impl FromStr for Days {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(mask) = s.parse::<u32>() {
            return Self::from_bits(mask);
        }
        match s.to_ascii_lowercase().as_str() {
            "weekdays" => return Ok(Self::WEEKDAYS),
            "weekend" => return Ok(Self::WEEKEND),
            "daily" | "every day" => return Ok(Self::EVERY_DAY),
            "" | "never" => return Ok(Self::NONE),
            _ => {}
        }
        s.split(',')
            .map(str::trim)
            .filter(|day| !day.is_empty())
            .try_fold(Self::NONE, |days, day| {
                day.parse::<Weekday>()
                    .map(|day| days.with(day))
                    .map_err(|_| ValidationError::Weekday(day.to_string()))
            })
    }
}

impl fmt::Display for Days {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::NONE => write!(f, "never"),
            Self::EVERY_DAY => write!(f, "daily"),
            Self::WEEKDAYS => write!(f, "weekdays"),
            Self::WEEKEND => write!(f, "weekend"),
            days => {
                let names: Vec<_> = days.iter().map(|day| day.to_string()).collect();
                write!(f, "{}", names.join(","))
            }
        }
    }
}

/// A scheduled alarm as the store hands it to the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alarm {
    pub id: u64,
    /// always has zero seconds
    pub time: NaiveTime,
    pub days: Days,
    pub enabled: bool,
    /// guards against ringing twice on the same day
    #[serde(default)]
    pub last_fired: Option<NaiveDate>,
}

impl Alarm {
    /// the instant this alarm is scheduled for on `date`
    #[must_use]
    pub fn scheduled_on(&self, date: NaiveDate) -> NaiveDateTime {
        date.and_time(self.time)
    }

    #[must_use]
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        self.days.contains(date.weekday())
    }

    #[must_use]
    pub fn fired_on(&self, date: NaiveDate) -> bool {
        self.last_fired == Some(date)
    }
}

impl fmt::Display for Alarm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} {}{}",
            self.id,
            self.time.format("%H:%M"),
            self.days,
            if self.enabled { "" } else { " (disabled)" }
        )?;
        if let Some(date) = self.last_fired {
            write!(f, " last rang {date}")?;
        }
        Ok(())
    }
}

/// an alarm that has not been given an id yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAlarm {
    pub time: NaiveTime,
    pub days: Days,
    pub enabled: bool,
}

impl NewAlarm {
    #[must_use]
    pub const fn into_alarm(self, id: u64) -> Alarm {
        Alarm {
            id,
            time: self.time,
            days: self.days,
            enabled: self.enabled,
            last_fired: None,
        }
    }
}

/// A partial edit, `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmUpdate {
    #[serde(default)]
    pub time: Option<NaiveTime>,
    #[serde(default)]
    pub days: Option<Days>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl AddAssign<AlarmUpdate> for Alarm {
    /// keeps the id, and forgets that the alarm rang today if the edit changed
    /// when it rings or switched it back on
    fn add_assign(&mut self, rhs: AlarmUpdate) {
        let time = rhs.time.unwrap_or(self.time);
        let days = rhs.days.unwrap_or(self.days);
        let enabled = rhs.enabled.unwrap_or(self.enabled);

        let rescheduled = time != self.time || days != self.days;
        let reenabled = enabled && !self.enabled;
        if rescheduled || reenabled {
            self.last_fired = None;
        }
        self.time = time;
        self.days = days;
        self.enabled = enabled;
    }
}

/// Accepts `HH:MM` or `HH:MM:SS` and returns the time with seconds dropped.
///
/// # Errors
/// if the string isn't colon separated numbers or the hour/minute are out of range
pub fn parse_time(value: &str) -> Result<NaiveTime, ValidationError> {
    let value = value.trim();
    let mut parts = value.split(':');
    let (Some(hour), Some(minute)) = (parts.next(), parts.next()) else {
        return Err(ValidationError::TimeFormat(value.to_string()));
    };
    let parse = |part: &str| {
        part.trim()
            .parse::<u32>()
            .map_err(|_| ValidationError::TimeFormat(value.to_string()))
    };
    let (hour, minute) = (parse(hour)?, parse(minute)?);
    if let Some(seconds) = parts.next() {
        parse(seconds)?;
    }
    if parts.next().is_some() {
        return Err(ValidationError::TimeFormat(value.to_string()));
    }
    NaiveTime::from_hms_opt(hour, minute, 0).ok_or(ValidationError::TimeRange { hour, minute })
}
