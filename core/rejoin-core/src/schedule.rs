//! Daily quiet window during which automatic relaunch is suppressed.
//!
//! The default window (05:45–08:00) covers the morning radio-exercise
//! broadcast that players idle through while asleep in-world.

use chrono::NaiveTime;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuietWindow {
    start: NaiveTime,
    end: NaiveTime,
}

impl Default for QuietWindow {
    fn default() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(5, 45, 0).expect("05:45 is a valid time"),
            end: NaiveTime::from_hms_opt(8, 0, 0).expect("08:00 is a valid time"),
        }
    }
}

impl QuietWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Parses `HH:MM` (or `HH:MM:SS`) bounds.
    pub fn parse(start: &str, end: &str) -> Result<Self, String> {
        Ok(Self {
            start: parse_clock(start)?,
            end: parse_clock(end)?,
        })
    }

    pub fn start(&self) -> NaiveTime {
        self.start
    }

    pub fn end(&self) -> NaiveTime {
        self.end
    }

    /// Inclusive on both ends. `start > end` wraps past midnight;
    /// `start == end` matches that single instant only.
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start < self.end {
            return time >= self.start && time <= self.end;
        }
        if self.start == self.end {
            return time == self.start;
        }
        time >= self.start || time <= self.end
    }
}

impl fmt::Display for QuietWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            self.start.format("%H:%M"),
            self.end.format("%H:%M")
        )
    }
}

fn parse_clock(value: &str) -> Result<NaiveTime, String> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|err| format!("invalid time of day {:?}: {}", value, err))
}
