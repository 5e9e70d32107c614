//! Markers and compiled patterns for the client's output log.
//!
//! Update these when the client's log format changes.

use once_cell::sync::Lazy;
use regex::Regex;

/// Substring present on every "world destination set" line.
pub const WORLD_MARKER: &str = "] Destination set: wrld_";

/// Default connection-timeout line emitted by the client.
pub const DEFAULT_TIMEOUT_MARKER: &str = "Timeout: Your connection to VRChat timed out.";

/// Width of the leading timestamp field.
pub const TIMESTAMP_WIDTH: usize = 19;

/// chrono format of the leading timestamp field (`2024.01.01 10:00:00`).
pub const TIMESTAMP_FORMAT: &str = "%Y.%m.%d %H:%M:%S";

pub static RE_WORLD_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"wrld_.+$").unwrap());
