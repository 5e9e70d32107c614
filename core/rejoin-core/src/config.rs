//! Configuration loading and path resolution.
//!
//! Settings live in `~/.auto-rejoin/config.toml`. A missing file means
//! defaults; a malformed one is an error so that typos are not silently
//! ignored.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{RejoinError, Result};
use crate::instance::LogTimeZone;
use crate::patterns::DEFAULT_TIMEOUT_MARKER;
use crate::schedule::QuietWindow;

const TOOL_DIR: &str = ".auto-rejoin";
const CONFIG_FILE: &str = "config.toml";
const CLIENT_LOG_RELATIVE_DIR: &str = "AppData/LocalLow/VRChat/VRChat";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RejoinConfig {
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub audio: AudioConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub enable_process_check: bool,
    pub enable_rejoin_notice: bool,
    pub enable_radio_exercises: bool,
    /// Start disarmed; rejoin only after the user says they went to sleep.
    pub enable_sleep_detector: bool,
    pub process_poll_interval_secs: u64,
    pub rejoin_notice_grace_secs: u64,
    pub quiet_window_start: String,
    pub quiet_window_end: String,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enable_process_check: false,
            enable_rejoin_notice: false,
            enable_radio_exercises: false,
            enable_sleep_detector: false,
            process_poll_interval_secs: 10,
            rejoin_notice_grace_secs: 60,
            quiet_window_start: "05:45".to_string(),
            quiet_window_end: "08:00".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchStrategy {
    /// Re-run the captured command line with the deep link appended.
    #[default]
    Reconstruct,
    /// Hand the deep link to the desktop's URL opener.
    OpenUrl,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub executable: String,
    pub url_scheme: String,
    /// Overrides `~/AppData/LocalLow/VRChat/VRChat`.
    pub log_dir: Option<PathBuf>,
    pub log_file_marker: String,
    pub timeout_marker: String,
    pub timezone: String,
    pub launch_strategy: LaunchStrategy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            executable: "VRChat.exe".to_string(),
            url_scheme: "vrchat".to_string(),
            log_dir: None,
            log_file_marker: "output_log".to_string(),
            timeout_marker: DEFAULT_TIMEOUT_MARKER.to_string(),
            timezone: "Local".to_string(),
            launch_strategy: LaunchStrategy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sounds_dir: PathBuf,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sounds_dir: PathBuf::from("."),
        }
    }
}

impl RejoinConfig {
    pub fn quiet_window(&self) -> Result<QuietWindow> {
        QuietWindow::parse(&self.watch.quiet_window_start, &self.watch.quiet_window_end).map_err(
            |details| RejoinError::ConfigMalformed {
                path: PathBuf::from("[watch].quiet_window_*"),
                details,
            },
        )
    }

    pub fn time_zone(&self) -> LogTimeZone {
        LogTimeZone::from_name(&self.client.timezone)
    }

    pub fn process_poll_interval(&self) -> Duration {
        Duration::from_secs(self.watch.process_poll_interval_secs)
    }

    pub fn rejoin_notice_grace(&self) -> Duration {
        Duration::from_secs(self.watch.rejoin_notice_grace_secs)
    }

    /// The client's log directory, from config or under the user's home.
    pub fn log_dir(&self) -> Result<PathBuf> {
        match &self.client.log_dir {
            Some(dir) => Ok(dir.clone()),
            None => {
                let home = dirs::home_dir().ok_or(RejoinError::HomeDirectory)?;
                Ok(home.join(CLIENT_LOG_RELATIVE_DIR))
            }
        }
    }
}

/// Returns the path to the tool's data directory (`~/.auto-rejoin`).
pub fn tool_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(TOOL_DIR))
        .ok_or(RejoinError::HomeDirectory)
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(tool_dir()?.join(CONFIG_FILE))
}

/// Loads configuration from `path` (or the default location), returning
/// defaults when the file does not exist.
pub fn load_config(path: Option<&Path>) -> Result<RejoinConfig> {
    let config_path = match path {
        Some(path) => path.to_path_buf(),
        None => default_config_path()?,
    };

    if !config_path.exists() {
        return Ok(RejoinConfig::default());
    }

    let content = fs_err::read_to_string(&config_path).map_err(|source| RejoinError::ConfigRead {
        path: config_path.clone(),
        source,
    })?;
    let config = toml::from_str::<RejoinConfig>(&content).map_err(|err| {
        RejoinError::ConfigMalformed {
            path: config_path.clone(),
            details: err.to_string(),
        }
    })?;

    // Fail at load time rather than on the first detected move.
    config.quiet_window()?;
    Ok(config)
}
