//! Relaunching the client into a known instance.
//!
//! Watchers do not relaunch anything themselves. They send a
//! [`RejoinRequest`] to the coordinator thread, which owns the
//! [`RelaunchSupervisor`] and handles requests one at a time in arrival
//! order. The first request of a session claims it; anything after that is
//! skipped. The coordinator exits once every watcher has dropped its sender.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::config::{LaunchStrategy, RejoinConfig};
use crate::error::{RejoinError, Result};
use crate::instance::Instance;
use crate::launch::{plan_for, Launcher};
use crate::process::ClientProcesses;
use crate::state::Session;

const KILL_WAIT_TIMEOUT: Duration = Duration::from_secs(10);
const KILL_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejoinSource {
    LogInspector,
    ProcessWatcher,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejoinRequest {
    /// Where to send the client; `None` if nothing has been seen yet.
    pub instance: Option<Instance>,
    /// The log inspector fires while the client is still up; the process
    /// watcher fires after it is already gone.
    pub kill_existing: bool,
    pub source: RejoinSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejoinOutcome {
    Launched { pid: u32, instance: Instance },
    /// Another request already claimed the session, or it was stopped.
    Skipped,
}

/// The parts of the configuration the supervisor needs.
#[derive(Debug, Clone)]
pub struct LaunchSettings {
    pub executable: String,
    pub url_scheme: String,
    pub strategy: LaunchStrategy,
    pub kill_wait: Duration,
}

impl LaunchSettings {
    pub fn from_config(config: &RejoinConfig) -> Self {
        Self {
            executable: config.client.executable.clone(),
            url_scheme: config.client.url_scheme.clone(),
            strategy: config.client.launch_strategy,
            kill_wait: KILL_WAIT_TIMEOUT,
        }
    }
}

pub struct RelaunchSupervisor {
    session: Session,
    processes: Arc<dyn ClientProcesses>,
    launcher: Arc<dyn Launcher>,
    settings: LaunchSettings,
}

/// Ends the session when dropped, whichever way `rejoin` returns.
struct SessionRelease<'a>(&'a Session);

impl Drop for SessionRelease<'_> {
    fn drop(&mut self) {
        self.0.finish_rejoin();
    }
}

impl RelaunchSupervisor {
    pub fn new(
        session: Session,
        processes: Arc<dyn ClientProcesses>,
        launcher: Arc<dyn Launcher>,
        settings: LaunchSettings,
    ) -> Self {
        Self {
            session,
            processes,
            launcher,
            settings,
        }
    }

    /// Relaunches the client into `instance`, killing the running client
    /// first if asked to. At most one call per session gets past the claim.
    pub fn rejoin(&self, instance: Option<&Instance>, kill_existing: bool) -> Result<RejoinOutcome> {
        if !self.session.claim_rejoin() {
            info!("Rejoin already claimed or session stopped; skipping");
            return Ok(RejoinOutcome::Skipped);
        }
        let _release = SessionRelease(&self.session);

        let instance = instance.ok_or(RejoinError::NoKnownInstance)?;

        if kill_existing {
            self.terminate_existing();
        }

        let plan = plan_for(
            self.settings.strategy,
            &self.session.state().launch_args(),
            &self.settings.executable,
            &self.settings.url_scheme,
            instance.id(),
        )?;
        let pid = self.launcher.launch(&plan)?;

        info!(
            pid,
            instance = %instance,
            program = %plan.program,
            "Client relaunched"
        );
        Ok(RejoinOutcome::Launched {
            pid,
            instance: instance.clone(),
        })
    }

    /// Best effort: every failure here is logged and the relaunch goes on.
    fn terminate_existing(&self) {
        let name = &self.settings.executable;
        let process = match self.processes.find(name) {
            Ok(Some(process)) => process,
            Ok(None) => {
                info!(name = %name, "Client already gone; nothing to kill");
                return;
            }
            Err(err) => {
                warn!(error = %err, "Failed to look up client before kill");
                return;
            }
        };

        if let Err(err) = self.processes.kill(process.pid) {
            warn!(pid = process.pid, error = %err, "Failed to kill client");
            return;
        }

        let deadline = Instant::now() + self.settings.kill_wait;
        while Instant::now() < deadline {
            match self.processes.find(name) {
                Ok(None) => {
                    info!(pid = process.pid, "Client terminated");
                    return;
                }
                Ok(Some(_)) => thread::sleep(KILL_POLL_INTERVAL),
                Err(err) => {
                    warn!(error = %err, "Failed to confirm client exit");
                    return;
                }
            }
        }
        warn!(pid = process.pid, "Client still running after kill; launching anyway");
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Coordinator
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct HandledRequest {
    pub request: RejoinRequest,
    pub result: Result<RejoinOutcome>,
}

/// Everything the coordinator did during one session.
#[derive(Debug, Default)]
pub struct CoordinatorReport {
    pub handled: Vec<HandledRequest>,
}

impl CoordinatorReport {
    /// The successful relaunch, if any.
    pub fn launched(&self) -> Option<&RejoinOutcome> {
        self.handled.iter().find_map(|handled| match &handled.result {
            Ok(outcome @ RejoinOutcome::Launched { .. }) => Some(outcome),
            _ => None,
        })
    }

    pub fn attempts(&self) -> usize {
        self.handled
            .iter()
            .filter(|handled| !matches!(handled.result, Ok(RejoinOutcome::Skipped)))
            .count()
    }
}

/// Starts the coordinator thread. Clone the sender for each watcher and drop
/// the original; the thread ends when the last sender is gone.
pub fn spawn_coordinator(
    supervisor: RelaunchSupervisor,
) -> (Sender<RejoinRequest>, JoinHandle<CoordinatorReport>) {
    let (tx, rx) = mpsc::channel();
    let handle = thread::spawn(move || run_coordinator(supervisor, rx));
    (tx, handle)
}

fn run_coordinator(supervisor: RelaunchSupervisor, rx: Receiver<RejoinRequest>) -> CoordinatorReport {
    let mut report = CoordinatorReport::default();

    for request in rx {
        info!(source = ?request.source, kill_existing = request.kill_existing, "Rejoin requested");
        let result = supervisor.rejoin(request.instance.as_ref(), request.kill_existing);
        if let Err(err) = &result {
            error!(source = ?request.source, error = %err, "Rejoin failed");
        }
        report.handled.push(HandledRequest { request, result });
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launch::ExecPlan;
    use crate::process::ClientProcess;
    use crate::state::ToolState;
    use chrono::DateTime;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeProcesses {
        running: Mutex<Option<ClientProcess>>,
        kills: Mutex<Vec<u32>>,
        fail_kill: bool,
    }

    impl ClientProcesses for FakeProcesses {
        fn find(&self, _name: &str) -> Result<Option<ClientProcess>> {
            Ok(self.running.lock().unwrap().clone())
        }

        fn kill(&self, pid: u32) -> Result<()> {
            self.kills.lock().unwrap().push(pid);
            if self.fail_kill {
                return Err(RejoinError::KillFailed {
                    pid,
                    details: "denied".to_string(),
                });
            }
            *self.running.lock().unwrap() = None;
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeLauncher {
        plans: Mutex<Vec<ExecPlan>>,
        fail: bool,
    }

    impl Launcher for FakeLauncher {
        fn launch(&self, plan: &ExecPlan) -> Result<u32> {
            self.plans.lock().unwrap().push(plan.clone());
            if self.fail {
                return Err(RejoinError::LaunchFailed {
                    program: plan.program.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
                });
            }
            Ok(9000)
        }
    }

    const CMDLINE: &str = r#""C:\Program Files (x86)\VRChat\VRChat.exe" --no-vr"#;

    fn settings() -> LaunchSettings {
        LaunchSettings {
            executable: "VRChat.exe".to_string(),
            url_scheme: "vrchat".to_string(),
            strategy: LaunchStrategy::Reconstruct,
            kill_wait: Duration::from_millis(50),
        }
    }

    fn instance() -> Instance {
        Instance::new(
            "wrld_home",
            DateTime::parse_from_rfc3339("2024-01-01T10:00:00+09:00").unwrap(),
        )
    }

    fn running_session() -> (Arc<ToolState>, Session) {
        let state = Arc::new(ToolState::new(true));
        let session = state.begin_session(CMDLINE.to_string(), Some(instance()));
        (state, session)
    }

    #[test]
    fn rejoin_kills_then_launches_with_deep_link() {
        let (state, session) = running_session();
        let processes = Arc::new(FakeProcesses::default());
        *processes.running.lock().unwrap() = Some(ClientProcess {
            pid: 77,
            command_line: CMDLINE.to_string(),
        });
        let launcher = Arc::new(FakeLauncher::default());
        let supervisor = RelaunchSupervisor::new(
            session,
            processes.clone(),
            launcher.clone(),
            settings(),
        );

        let outcome = supervisor.rejoin(Some(&instance()), true).unwrap();
        assert_eq!(
            outcome,
            RejoinOutcome::Launched {
                pid: 9000,
                instance: instance()
            }
        );
        assert_eq!(*processes.kills.lock().unwrap(), vec![77]);

        let plans = launcher.plans.lock().unwrap();
        assert_eq!(plans[0].program, r"C:\Program Files (x86)\VRChat\VRChat.exe");
        assert_eq!(
            plans[0].args,
            vec!["--no-vr".to_string(), "vrchat://launch?id=wrld_home".to_string()]
        );

        assert!(!state.is_running());
        assert!(state.is_shutdown());
    }

    #[test]
    fn kill_failure_does_not_block_launch() {
        let (_state, session) = running_session();
        let processes = Arc::new(FakeProcesses {
            fail_kill: true,
            ..FakeProcesses::default()
        });
        *processes.running.lock().unwrap() = Some(ClientProcess {
            pid: 77,
            command_line: CMDLINE.to_string(),
        });
        let launcher = Arc::new(FakeLauncher::default());
        let supervisor =
            RelaunchSupervisor::new(session, processes, launcher.clone(), settings());

        assert!(matches!(
            supervisor.rejoin(Some(&instance()), true),
            Ok(RejoinOutcome::Launched { .. })
        ));
        assert_eq!(launcher.plans.lock().unwrap().len(), 1);
    }

    #[test]
    fn launch_failure_still_ends_session() {
        let (state, session) = running_session();
        let launcher = Arc::new(FakeLauncher {
            fail: true,
            ..FakeLauncher::default()
        });
        let supervisor = RelaunchSupervisor::new(
            session,
            Arc::new(FakeProcesses::default()),
            launcher,
            settings(),
        );

        let err = supervisor.rejoin(Some(&instance()), false).unwrap_err();
        assert!(matches!(err, RejoinError::LaunchFailed { .. }));
        assert!(!state.is_running());
    }

    #[test]
    fn rejoin_without_instance_fails() {
        let (state, session) = running_session();
        let supervisor = RelaunchSupervisor::new(
            session,
            Arc::new(FakeProcesses::default()),
            Arc::new(FakeLauncher::default()),
            settings(),
        );
        assert!(matches!(
            supervisor.rejoin(None, false),
            Err(RejoinError::NoKnownInstance)
        ));
        assert!(!state.is_running());
    }

    #[test]
    fn coordinator_lets_first_request_win() {
        let (state, session) = running_session();
        let launcher = Arc::new(FakeLauncher::default());
        let supervisor = RelaunchSupervisor::new(
            session,
            Arc::new(FakeProcesses::default()),
            launcher.clone(),
            settings(),
        );

        let (tx, handle) = spawn_coordinator(supervisor);
        for source in [RejoinSource::ProcessWatcher, RejoinSource::LogInspector] {
            tx.send(RejoinRequest {
                instance: Some(instance()),
                kill_existing: source == RejoinSource::LogInspector,
                source,
            })
            .unwrap();
        }
        drop(tx);

        let report = handle.join().unwrap();
        assert_eq!(report.handled.len(), 2);
        assert_eq!(report.attempts(), 1);
        assert!(report.launched().is_some());
        assert!(matches!(report.handled[1].result, Ok(RejoinOutcome::Skipped)));
        assert_eq!(launcher.plans.lock().unwrap().len(), 1);
        assert!(state.is_shutdown());
    }

    #[test]
    fn stopped_session_is_skipped_after_restart() {
        let (state, old) = running_session();
        let launcher = Arc::new(FakeLauncher::default());
        let supervisor = RelaunchSupervisor::new(
            old,
            Arc::new(FakeProcesses::default()),
            launcher.clone(),
            settings(),
        );

        state.stop();
        let current = state.begin_session(CMDLINE.to_string(), Some(instance()));

        assert_eq!(
            supervisor.rejoin(Some(&instance()), false).unwrap(),
            RejoinOutcome::Skipped
        );
        assert!(launcher.plans.lock().unwrap().is_empty());
        assert!(current.should_watch());
        assert!(state.is_running());
    }
}
