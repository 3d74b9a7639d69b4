//! Wall-clock helpers.

use chrono::{DateTime, Datelike, TimeZone};
use std::fmt::Display;
use std::time::Duration;
use tracing::info;

/// First year accepted as a synced clock.
pub const GOOD_TIME_YEAR: i32 = 2020;

/// True once NTP has set the clock.
pub fn is_good_time<Tz: TimeZone>(now: &DateTime<Tz>) -> bool {
    now.year() >= GOOD_TIME_YEAR
}

/// Timestamp prefix for log lines.
///
/// Before the clock is synced the uptime in milliseconds is used instead.
pub fn log_timestamp<Tz>(now: &DateTime<Tz>, uptime: Duration) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    if is_good_time(now) {
        now.format("%Y%m%d %H:%M:%S").to_string()
    } else {
        format!("{:>10}", uptime.as_millis())
    }
}

/// Minute-resolution clock text for the display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockFace {
    current: String,
    meridian: String,
}

impl Default for ClockFace {
    fn default() -> Self {
        Self {
            current: "00:00".to_string(),
            meridian: "AM".to_string(),
        }
    }
}

impl ClockFace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refresh from `now`. Returns true when the minute text changed.
    pub fn update<Tz>(&mut self, now: &DateTime<Tz>) -> bool
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        let text = now.format("%I:%M").to_string();
        self.meridian = now.format("%p").to_string();
        if text == self.current {
            return false;
        }
        self.current = text;
        info!("Time is now {} {}", self.current, self.meridian);
        true
    }

    /// Hours and minutes, e.g. `07:45`.
    pub fn text(&self) -> &str {
        &self.current
    }

    /// `AM` or `PM`.
    pub fn meridian(&self) -> &str {
        &self.meridian
    }
}
