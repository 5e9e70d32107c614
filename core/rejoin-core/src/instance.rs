//! World instances and the log-line parser that produces them.
//!
//! A destination line looks like:
//!
//! ```text
//! 2024.01.01 10:00:00 Log        -  [Behaviour] Destination set: wrld_1234:5678~private
//! ```
//!
//! The first 19 characters are the timestamp, written in the client machine's
//! local time. Everything from `wrld_` to the end of the line is the opaque
//! instance identifier; the client sometimes pads it with NUL bytes.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::fmt;
use tracing::{debug, warn};

use crate::error::ParseError;
use crate::patterns::{RE_WORLD_ID, TIMESTAMP_FORMAT, TIMESTAMP_WIDTH, WORLD_MARKER};

const ID_PREFIX: &str = "wrld_";

/// Offset used when a configured zone name cannot be loaded (UTC+9).
const FALLBACK_OFFSET_SECS: i32 = 9 * 60 * 60;

/// One world session the client has been in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    id: String,
    timestamp: DateTime<FixedOffset>,
}

impl Instance {
    pub fn new(id: impl Into<String>, timestamp: DateTime<FixedOffset>) -> Self {
        Self {
            id: id.into(),
            timestamp,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn timestamp(&self) -> DateTime<FixedOffset> {
        self.timestamp
    }

    /// True when both instances point at the same world session, whatever
    /// time they were observed at. `==` compares the timestamp too.
    pub fn same_world(&self, other: &Instance) -> bool {
        self.id == other.id
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", self.id, self.timestamp.format(TIMESTAMP_FORMAT))
    }
}

/// Time zone the client writes its log timestamps in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogTimeZone {
    #[default]
    Local,
    Named(Tz),
    Fixed(FixedOffset),
}

impl LogTimeZone {
    /// Resolves a configured zone name. `"Local"` means the machine's zone;
    /// unknown names fall back to a fixed UTC+9 offset.
    pub fn from_name(name: &str) -> Self {
        let name = name.trim();
        if name.is_empty() || name.eq_ignore_ascii_case("local") {
            return LogTimeZone::Local;
        }
        match name.parse::<Tz>() {
            Ok(tz) => LogTimeZone::Named(tz),
            Err(err) => {
                warn!(zone = name, error = %err, "Unknown time zone; falling back to UTC+9");
                Self::fallback()
            }
        }
    }

    pub fn fallback() -> Self {
        LogTimeZone::Fixed(
            FixedOffset::east_opt(FALLBACK_OFFSET_SECS).expect("UTC+9 is a valid offset"),
        )
    }

    /// Attaches this zone to a wall-clock time. Ambiguous times (DST fold)
    /// resolve to the earlier instant; skipped times yield `None`.
    pub fn localize(&self, naive: NaiveDateTime) -> Option<DateTime<FixedOffset>> {
        match self {
            LogTimeZone::Local => chrono::Local
                .from_local_datetime(&naive)
                .earliest()
                .map(|dt| dt.fixed_offset()),
            LogTimeZone::Named(tz) => tz
                .from_local_datetime(&naive)
                .earliest()
                .map(|dt| dt.fixed_offset()),
            LogTimeZone::Fixed(offset) => offset.from_local_datetime(&naive).earliest(),
        }
    }

    pub fn now(&self) -> DateTime<FixedOffset> {
        match self {
            LogTimeZone::Local => chrono::Local::now().fixed_offset(),
            LogTimeZone::Named(tz) => Utc::now().with_timezone(tz).fixed_offset(),
            LogTimeZone::Fixed(offset) => Utc::now().with_timezone(offset),
        }
    }
}

/// Parses a destination line into an [`Instance`].
pub fn parse_instance(line: &str, zone: &LogTimeZone) -> Result<Instance, ParseError> {
    if !line.contains(WORLD_MARKER) {
        return Err(ParseError::MissingMarker);
    }

    let timestamp = parse_line_timestamp(line, zone)?;

    let id = RE_WORLD_ID
        .find(line)
        .map(|m| m.as_str().trim_end_matches(['\0', '\r']))
        .filter(|id| id.len() > ID_PREFIX.len())
        .ok_or(ParseError::MissingIdentifier)?;

    Ok(Instance::new(id, timestamp))
}

/// Parses the fixed-width timestamp every log line starts with.
pub fn parse_line_timestamp(
    line: &str,
    zone: &LogTimeZone,
) -> Result<DateTime<FixedOffset>, ParseError> {
    let field = line.get(..TIMESTAMP_WIDTH).ok_or_else(|| {
        ParseError::MalformedTimestamp(line.chars().take(TIMESTAMP_WIDTH).collect())
    })?;
    let naive = NaiveDateTime::parse_from_str(field, TIMESTAMP_FORMAT)
        .map_err(|_| ParseError::MalformedTimestamp(field.to_string()))?;
    zone.localize(naive)
        .ok_or_else(|| ParseError::MalformedTimestamp(field.to_string()))
}

/// Finds the most recent instance recorded in a whole log file.
///
/// Lines with the marker that fail to parse are skipped. Among several
/// destination lines the highest timestamp wins, so out-of-order writes
/// never move the result backwards.
pub fn scan_latest_instance(content: &str, zone: &LogTimeZone) -> Option<Instance> {
    let mut latest: Option<Instance> = None;

    for line in content.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() || !line.contains(WORLD_MARKER) {
            continue;
        }

        let instance = match parse_instance(line, zone) {
            Ok(instance) => instance,
            Err(err) => {
                debug!(error = %err, "Skipping unparseable destination line");
                continue;
            }
        };

        let newer = latest
            .as_ref()
            .map(|current| instance.timestamp() >= current.timestamp())
            .unwrap_or(true);
        if newer {
            latest = Some(instance);
        }
    }

    latest
}
