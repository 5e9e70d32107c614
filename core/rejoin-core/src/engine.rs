//! The tool facade: start and stop watch sessions.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{info, warn};

use crate::audio::{Cue, CuePlayer, SilentCuePlayer};
use crate::config::RejoinConfig;
use crate::error::{RejoinError, Result};
use crate::inspector::{InspectorExit, LineClassifier, LogInspector};
use crate::instance::{scan_latest_instance, Instance};
use crate::launch::{CommandLauncher, Launcher};
use crate::process::{ClientProcesses, FallbackProcesses};
use crate::state::{StateSnapshot, ToolState};
use crate::supervisor::{spawn_coordinator, CoordinatorReport, LaunchSettings, RelaunchSupervisor};
use crate::tail::{latest_log_file, FileTail};
use crate::watcher::{ProcessWatcher, WatcherExit};

const TAIL_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// The capabilities the tool needs from the machine it runs on.
pub struct Platform {
    pub processes: Arc<dyn ClientProcesses>,
    pub launcher: Arc<dyn Launcher>,
    pub cues: Arc<dyn CuePlayer>,
}

impl Platform {
    /// Real process table and launcher, no sound.
    pub fn system() -> Self {
        Self {
            processes: Arc::new(FallbackProcesses::default()),
            launcher: Arc::new(CommandLauncher),
            cues: Arc::new(SilentCuePlayer),
        }
    }

    pub fn with_cues(mut self, cues: Arc<dyn CuePlayer>) -> Self {
        self.cues = cues;
        self
    }
}

/// Handles to the threads of one watch session.
pub struct WatchSession {
    pub inspector: JoinHandle<InspectorExit>,
    pub watcher: Option<JoinHandle<WatcherExit>>,
    pub coordinator: JoinHandle<CoordinatorReport>,
}

#[derive(Debug)]
pub struct SessionSummary {
    pub inspector: Option<InspectorExit>,
    pub watcher: Option<WatcherExit>,
    pub report: Option<CoordinatorReport>,
}

impl WatchSession {
    /// Waits for every thread. A panicked thread shows up as `None`.
    pub fn join(self) -> SessionSummary {
        let inspector = self.inspector.join().ok();
        let watcher = self.watcher.and_then(|handle| handle.join().ok());
        let report = self.coordinator.join().ok();
        SessionSummary {
            inspector,
            watcher,
            report,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.inspector.is_finished()
            && self.watcher.as_ref().map_or(true, |h| h.is_finished())
            && self.coordinator.is_finished()
    }
}

pub enum RunOutcome {
    AlreadyRunning,
    /// The client was not running; nothing to watch.
    ClientNotRunning,
    Watching(WatchSession),
}

impl std::fmt::Debug for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::AlreadyRunning => f.write_str("AlreadyRunning"),
            RunOutcome::ClientNotRunning => f.write_str("ClientNotRunning"),
            RunOutcome::Watching(_) => f.write_str("Watching"),
        }
    }
}

pub struct AutoRejoinTool {
    config: RejoinConfig,
    platform: Platform,
    state: Arc<ToolState>,
    tail_poll_interval: Duration,
    process_poll_interval: Option<Duration>,
}

impl AutoRejoinTool {
    pub fn new(config: RejoinConfig, platform: Platform) -> Self {
        let state = Arc::new(ToolState::new(!config.watch.enable_sleep_detector));
        Self {
            config,
            platform,
            state,
            tail_poll_interval: TAIL_POLL_INTERVAL,
            process_poll_interval: None,
        }
    }

    /// How often the log tail checks for new lines.
    pub fn with_tail_poll_interval(mut self, interval: Duration) -> Self {
        self.tail_poll_interval = interval;
        self
    }

    /// Overrides `[watch].process_poll_interval_secs` with finer resolution.
    pub fn with_process_poll_interval(mut self, interval: Duration) -> Self {
        self.process_poll_interval = Some(interval);
        self
    }

    pub fn config(&self) -> &RejoinConfig {
        &self.config
    }

    pub fn state(&self) -> Arc<ToolState> {
        Arc::clone(&self.state)
    }

    /// Starts watching the running client. Returns immediately; the session
    /// runs on background threads until a relaunch or [`stop`](Self::stop).
    pub fn run(&self) -> Result<RunOutcome> {
        if self.state.is_running() {
            info!("Already watching");
            return Ok(RunOutcome::AlreadyRunning);
        }

        let quiet_window = if self.config.watch.enable_radio_exercises {
            Some(self.config.quiet_window()?)
        } else {
            None
        };
        let log_dir = self.config.log_dir()?;
        let executable = &self.config.client.executable;

        let client = match self.platform.processes.find(executable)? {
            Some(client) => client,
            None => {
                info!(name = %executable, "Client is not running; start it first");
                self.platform.cues.play(Cue::StartClient);
                return Ok(RunOutcome::ClientNotRunning);
            }
        };
        info!(pid = client.pid, "Captured client command line");

        let log_path = latest_log_file(&log_dir, &self.config.client.log_file_marker)?;
        let zone = self.config.time_zone();
        let content = fs_err::read(&log_path).map_err(|source| RejoinError::Io {
            context: format!("reading {}", log_path.display()),
            source,
        })?;
        let seed = scan_latest_instance(&String::from_utf8_lossy(&content), &zone);
        match &seed {
            Some(instance) => info!(instance = %instance, "Latest instance from log"),
            None => warn!(path = %log_path.display(), "No instance in log yet"),
        }

        let tail = FileTail::open(&log_path, content.len() as u64)?
            .with_poll_interval(self.tail_poll_interval);

        let session = self.state.begin_session(client.command_line, seed);
        let tail_session = session.clone();
        let tail = tail.with_keep_alive(move || tail_session.should_watch());
        info!(session = session.id(), "Session started");
        self.platform.cues.play(Cue::Start);
        info!(path = %log_path.display(), "Watching client log");

        let supervisor = RelaunchSupervisor::new(
            session.clone(),
            Arc::clone(&self.platform.processes),
            Arc::clone(&self.platform.launcher),
            LaunchSettings::from_config(&self.config),
        );
        let (requests, coordinator) = spawn_coordinator(supervisor);

        let notice = self
            .config
            .watch
            .enable_rejoin_notice
            .then(|| self.config.rejoin_notice_grace());

        let classifier = LineClassifier::new(zone, &self.config.client.timeout_marker, zone.now());
        let inspector = LogInspector::new(
            session.clone(),
            Arc::clone(&self.platform.cues),
            requests.clone(),
            classifier,
        )
        .with_quiet_window(quiet_window)
        .with_rejoin_notice(notice);
        let inspector = thread::spawn(move || inspector.run(tail));

        let watcher = self.config.watch.enable_process_check.then(|| {
            let watcher = ProcessWatcher::new(
                session.clone(),
                Arc::clone(&self.platform.processes),
                Arc::clone(&self.platform.cues),
                requests.clone(),
                executable.clone(),
                self.process_poll_interval
                    .unwrap_or_else(|| self.config.process_poll_interval()),
            )
            .with_rejoin_notice(notice);
            thread::spawn(move || watcher.run())
        });
        drop(requests);

        Ok(RunOutcome::Watching(WatchSession {
            inspector,
            watcher,
            coordinator,
        }))
    }

    /// Stops the current session. Returns false if nothing was running.
    pub fn stop(&self) -> bool {
        if !self.state.stop() {
            return false;
        }
        info!("Watching stopped");
        self.platform.cues.play(Cue::Stop);
        true
    }

    /// Arms rejoin while the sleep detector is on.
    pub fn arm(&self) {
        self.state.arm();
        info!("Rejoin armed");
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.is_shutdown()
    }

    pub fn latest_instance(&self) -> Option<Instance> {
        self.state.latest_instance()
    }

    pub fn status(&self) -> StateSnapshot {
        self.state.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launch::ExecPlan;
    use crate::process::ClientProcess;
    use std::sync::Mutex;

    struct NoClient;

    impl ClientProcesses for NoClient {
        fn find(&self, _name: &str) -> Result<Option<ClientProcess>> {
            Ok(None)
        }

        fn kill(&self, _pid: u32) -> Result<()> {
            Ok(())
        }
    }

    struct NeverLaunch;

    impl Launcher for NeverLaunch {
        fn launch(&self, plan: &ExecPlan) -> Result<u32> {
            panic!("unexpected launch of {}", plan.program);
        }
    }

    #[derive(Default)]
    struct RecordingCues(Mutex<Vec<Cue>>);

    impl CuePlayer for RecordingCues {
        fn play(&self, cue: Cue) {
            self.0.lock().unwrap().push(cue);
        }
    }

    #[test]
    fn absent_client_prompts_to_start_it() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut config = RejoinConfig::default();
        config.client.log_dir = Some(dir.path().to_path_buf());
        let cues = Arc::new(RecordingCues::default());
        let platform = Platform {
            processes: Arc::new(NoClient),
            launcher: Arc::new(NeverLaunch),
            cues: cues.clone(),
        };

        let tool = AutoRejoinTool::new(config, platform);
        assert!(matches!(tool.run().unwrap(), RunOutcome::ClientNotRunning));
        assert!(!tool.is_running());
        assert_eq!(*cues.0.lock().unwrap(), vec![Cue::StartClient]);
    }

    #[test]
    fn stop_without_session_is_noop() {
        let platform = Platform {
            processes: Arc::new(NoClient),
            launcher: Arc::new(NeverLaunch),
            cues: Arc::new(SilentCuePlayer),
        };
        let tool = AutoRejoinTool::new(RejoinConfig::default(), platform);
        assert!(!tool.stop());
    }

    #[test]
    fn sleep_detector_starts_disarmed() {
        let mut config = RejoinConfig::default();
        config.watch.enable_sleep_detector = true;
        let tool = AutoRejoinTool::new(config, Platform::system());
        assert!(!tool.status().rejoin_armed);
        tool.arm();
        let status = tool.status();
        assert!(status.rejoin_armed && status.in_sleep);
    }
}
