//! # rejoin-core
//!
//! Keeps a VRChat client in the instance the player last joined. The client's
//! output log is tailed for instance moves and connection timeouts, the
//! process table is polled for crashes, and when either fires the client is
//! relaunched with a deep link back into the tracked instance.
//!
//! ## Design Principles
//!
//! - **Synchronous**: Plain threads and channels, no async runtime.
//! - **One relaunch per session**: The first watcher to fire claims the
//!   session; every other watcher winds down.
//! - **Graceful degradation**: Unparseable log lines are skipped and sound
//!   failures are logged, never fatal.
//! - **Platform behind traits**: Process lookup, launching and sound are
//!   injected, so sessions can run against fakes.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rejoin_core::{load_config, AutoRejoinTool, Platform, RunOutcome};
//!
//! let tool = AutoRejoinTool::new(load_config(None)?, Platform::system());
//! if let RunOutcome::Watching(session) = tool.run()? {
//!     let summary = session.join();
//! }
//! ```

pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod inspector;
pub mod instance;
pub mod launch;
pub mod patterns;
pub mod process;
pub mod schedule;
pub mod state;
pub mod supervisor;
pub mod tail;
pub mod watcher;

// Re-export commonly used items at crate root
pub use audio::{Cue, CuePlayer, SilentCuePlayer};
#[cfg(feature = "audio")]
pub use audio::WavCuePlayer;
pub use config::*;
pub use engine::{AutoRejoinTool, Platform, RunOutcome, SessionSummary, WatchSession};
pub use error::{ParseError, RejoinError, Result};
pub use inspector::{InspectorExit, LineClass, LineClassifier, LogInspector};
pub use instance::{parse_instance, parse_line_timestamp, scan_latest_instance, Instance, LogTimeZone};
pub use launch::{CommandLauncher, ExecPlan, Launcher};
pub use process::{ClientProcess, ClientProcesses, FallbackProcesses, PsProcesses, SysinfoProcesses};
pub use schedule::QuietWindow;
pub use state::{Observation, Session, StateSnapshot, ToolState};
pub use supervisor::{
    CoordinatorReport, RejoinOutcome, RejoinRequest, RejoinSource, RelaunchSupervisor,
};
pub use tail::{latest_log_file, FileTail};
pub use watcher::{ProcessWatcher, WatcherExit};
