//! Fixed and calendar-relative cache expiry.
//!
//! An [`Expiry`] is either a plain number of seconds or a calendar boundary
//! ("daily", "Sunday", "15th", "09:30", ...). Calendar expiries resolve to
//! the number of seconds until the *next* occurrence of the boundary in the
//! caller's local time zone, so entries written late in the day still
//! expire at midnight rather than 24 hours later.

use chrono::{
    DateTime, Datelike, Days, Local, Month, NaiveDate, NaiveDateTime, NaiveTime, TimeZone,
    Timelike, Weekday,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use crate::errors::ConfigError;

static TIME_OF_DAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2}):(\d{2})$").expect("valid time-of-day regex"));

static ORDINAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2})(st|nd|rd|th)$").expect("valid ordinal regex"));

static SECONDS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+$").expect("valid seconds regex"));

/// A named recurring boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    /// Start of the next minute.
    Minutely,
    /// Start of the next hour.
    Hourly,
    /// Next midnight.
    Daily,
    /// Midnight on the coming Monday.
    Weekly,
    /// Midnight fourteen days after the start of today.
    Fortnightly,
    /// Midnight on the first of next month.
    Monthly,
    /// Midnight on the first day of the next calendar quarter.
    Quarterly,
    /// Midnight on the first of January.
    Yearly,
}

impl Period {
    const ALL: [Self; 8] = [
        Self::Minutely,
        Self::Hourly,
        Self::Daily,
        Self::Weekly,
        Self::Fortnightly,
        Self::Monthly,
        Self::Quarterly,
        Self::Yearly,
    ];

    /// Returns the token this period is parsed from.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Minutely => "minutely",
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Fortnightly => "fortnightly",
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::Yearly => "yearly",
        }
    }
}

/// When a cached entry should expire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Expiry {
    /// A fixed number of seconds after the write.
    Seconds(u64),
    /// The next occurrence of a recurring boundary.
    Period(Period),
    /// The next occurrence of a wall-clock time.
    TimeOfDay {
        /// Hour, 0-23.
        hour: u32,
        /// Minute, 0-59.
        minute: u32,
    },
    /// Midnight at the start of the next such weekday.
    Weekday(Weekday),
    /// Midnight on the first day of the next such month.
    Month(Month),
    /// Midnight on the next such day of the month.
    DayOfMonth(u32),
}

impl Expiry {
    /// Returns the number of seconds from `now` until this expiry.
    ///
    /// The result is always at least one second.
    #[must_use]
    pub fn seconds_from<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> u64 {
        let target = match *self {
            Self::Seconds(seconds) => return seconds.max(1),
            Self::Period(period) => next_period_boundary(period, now.naive_local()),
            Self::TimeOfDay { hour, minute } => next_time_of_day(hour, minute, now.naive_local()),
            Self::Weekday(weekday) => next_weekday(weekday, now.naive_local()),
            Self::Month(month) => next_month_start(month, now.naive_local()),
            Self::DayOfMonth(day) => next_day_of_month(day, now.naive_local()),
        };
        seconds_until(now, target)
    }

    /// Returns the time-to-live from `now` as a [`Duration`].
    #[must_use]
    pub fn ttl_from<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Duration {
        Duration::from_secs(self.seconds_from(now))
    }

    /// Returns the time-to-live measured from the local clock.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl_from(&Local::now())
    }
}

impl From<u64> for Expiry {
    fn from(seconds: u64) -> Self {
        Self::Seconds(seconds)
    }
}

impl From<Period> for Expiry {
    fn from(period: Period) -> Self {
        Self::Period(period)
    }
}

impl FromStr for Expiry {
    type Err = ConfigError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidExpiry(token.to_string());
        let normalized = token.trim().to_ascii_lowercase();

        if SECONDS.is_match(&normalized) {
            let seconds: u64 = normalized.parse().map_err(|_| invalid())?;
            return if seconds == 0 {
                Err(invalid())
            } else {
                Ok(Self::Seconds(seconds))
            };
        }

        if let Some(period) = Period::ALL.iter().find(|p| p.as_str() == normalized) {
            return Ok(Self::Period(*period));
        }

        if let Some(caps) = TIME_OF_DAY.captures(&normalized) {
            let hour: u32 = caps[1].parse().map_err(|_| invalid())?;
            let minute: u32 = caps[2].parse().map_err(|_| invalid())?;
            if hour > 23 || minute > 59 {
                return Err(invalid());
            }
            return Ok(Self::TimeOfDay { hour, minute });
        }

        if let Some(caps) = ORDINAL.captures(&normalized) {
            let day: u32 = caps[1].parse().map_err(|_| invalid())?;
            if !(1..=31).contains(&day) || &caps[2] != ordinal_suffix(day) {
                return Err(invalid());
            }
            return Ok(Self::DayOfMonth(day));
        }

        if let Ok(weekday) = normalized.parse::<Weekday>() {
            return Ok(Self::Weekday(weekday));
        }

        if let Ok(month) = normalized.parse::<Month>() {
            return Ok(Self::Month(month));
        }

        Err(invalid())
    }
}

impl fmt::Display for Expiry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Seconds(seconds) => write!(f, "{seconds}"),
            Self::Period(period) => f.write_str(period.as_str()),
            Self::TimeOfDay { hour, minute } => write!(f, "{hour:02}:{minute:02}"),
            Self::Weekday(weekday) => write!(f, "{weekday}"),
            Self::Month(month) => f.write_str(month.name()),
            Self::DayOfMonth(day) => write!(f, "{day}{}", ordinal_suffix(*day)),
        }
    }
}

/// Parses `token` and returns seconds until it expires, using the local clock.
pub fn calculate_expiry(token: &str) -> Result<u64, ConfigError> {
    let expiry: Expiry = token.parse()?;
    Ok(expiry.seconds_from(&Local::now()))
}

fn ordinal_suffix(day: u32) -> &'static str {
    match (day % 10, day % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    }
}

fn midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

fn first_of_month(year: i32, month: u32) -> NaiveDateTime {
    // Month numbers passed here are always 1-12.
    NaiveDate::from_ymd_opt(year, month, 1).map_or(NaiveDateTime::MAX, midnight)
}

fn next_period_boundary(period: Period, now: NaiveDateTime) -> NaiveDateTime {
    let today = now.date();
    match period {
        Period::Minutely => {
            let start = today.and_hms_opt(now.hour(), now.minute(), 0).unwrap_or(now);
            start + chrono::Duration::minutes(1)
        }
        Period::Hourly => {
            let start = today.and_hms_opt(now.hour(), 0, 0).unwrap_or(now);
            start + chrono::Duration::hours(1)
        }
        Period::Daily => midnight(today + Days::new(1)),
        Period::Weekly => {
            let ahead = 7 - u64::from(today.weekday().num_days_from_monday());
            midnight(today + Days::new(ahead))
        }
        Period::Fortnightly => midnight(today + Days::new(14)),
        Period::Monthly => {
            if today.month() == 12 {
                first_of_month(today.year() + 1, 1)
            } else {
                first_of_month(today.year(), today.month() + 1)
            }
        }
        Period::Quarterly => {
            let next_quarter = ((today.month() - 1) / 3) * 3 + 4;
            if next_quarter > 12 {
                first_of_month(today.year() + 1, next_quarter - 12)
            } else {
                first_of_month(today.year(), next_quarter)
            }
        }
        Period::Yearly => first_of_month(today.year() + 1, 1),
    }
}

fn next_time_of_day(hour: u32, minute: u32, now: NaiveDateTime) -> NaiveDateTime {
    let Some(today_at) = now.date().and_hms_opt(hour, minute, 0) else {
        return now;
    };
    if today_at > now {
        today_at
    } else {
        today_at + Days::new(1)
    }
}

fn next_weekday(weekday: Weekday, now: NaiveDateTime) -> NaiveDateTime {
    let today = now.date();
    let current = today.weekday().num_days_from_monday();
    let target = weekday.num_days_from_monday();
    let ahead = match (target + 7 - current) % 7 {
        0 => 7,
        days => days,
    };
    midnight(today + Days::new(u64::from(ahead)))
}

fn next_month_start(month: Month, now: NaiveDateTime) -> NaiveDateTime {
    let target = month.number_from_month();
    if target > now.month() {
        first_of_month(now.year(), target)
    } else {
        first_of_month(now.year() + 1, target)
    }
}

fn next_day_of_month(day: u32, now: NaiveDateTime) -> NaiveDateTime {
    let (mut year, mut month) = (now.year(), now.month());
    // Every day 1-31 occurs at least once in any run of 12 months.
    for _ in 0..=12 {
        if let Some(candidate) = NaiveDate::from_ymd_opt(year, month, day).map(midnight) {
            if candidate > now {
                return candidate;
            }
        }
        if month == 12 {
            year += 1;
            month = 1;
        } else {
            month += 1;
        }
    }
    now
}

fn seconds_until<Tz: TimeZone>(now: &DateTime<Tz>, target: NaiveDateTime) -> u64 {
    let seconds = match now.timezone().from_local_datetime(&target).earliest() {
        Some(at) => (at.naive_utc() - now.naive_utc()).num_seconds(),
        // The target falls in a DST gap; fall back to wall-clock difference.
        None => (target - now.naive_local()).num_seconds(),
    };
    u64::try_from(seconds).unwrap_or(0).max(1)
}
