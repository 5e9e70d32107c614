//! Process Watcher: notices when the client process has gone away.

use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::audio::{Cue, CuePlayer};
use crate::process::ClientProcesses;
use crate::state::Session;
use crate::supervisor::{RejoinRequest, RejoinSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherExit {
    /// Another watcher or `stop()` ended the session.
    Superseded,
    RejoinRequested,
    /// Stopped during the rejoin notice.
    Cancelled,
    /// The client exited while rejoin was disarmed.
    ClientExited,
    /// Neither process enumerator worked.
    LookupFailed,
    CoordinatorGone,
}

pub struct ProcessWatcher {
    session: Session,
    processes: Arc<dyn ClientProcesses>,
    cues: Arc<dyn CuePlayer>,
    requests: Sender<RejoinRequest>,
    executable: String,
    poll_interval: Duration,
    rejoin_notice: Option<Duration>,
}

impl ProcessWatcher {
    pub fn new(
        session: Session,
        processes: Arc<dyn ClientProcesses>,
        cues: Arc<dyn CuePlayer>,
        requests: Sender<RejoinRequest>,
        executable: impl Into<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            session,
            processes,
            cues,
            requests,
            executable: executable.into(),
            poll_interval,
            rejoin_notice: None,
        }
    }

    pub fn with_rejoin_notice(mut self, grace: Option<Duration>) -> Self {
        self.rejoin_notice = grace;
        self
    }

    pub fn run(self) -> WatcherExit {
        while self.session.should_watch() {
            debug!(name = %self.executable, "Process watcher polling");
            match self.processes.find(&self.executable) {
                Ok(Some(_)) => thread::sleep(self.poll_interval),
                Ok(None) => return self.client_gone(),
                Err(err) => {
                    error!(error = %err, "Process lookup failed; process watcher exiting");
                    return WatcherExit::LookupFailed;
                }
            }
        }
        info!("Process watcher cleaned up by other");
        WatcherExit::Superseded
    }

    fn client_gone(&self) -> WatcherExit {
        info!(name = %self.executable, "Client process not found");

        if !self.session.state().is_armed() {
            info!("Rejoin disarmed; not relaunching");
            return WatcherExit::ClientExited;
        }

        let confirmed = match self.rejoin_notice {
            Some(grace) => announce_rejoin(self.cues.as_ref(), grace, &self.session),
            None => self.session.is_running(),
        };
        if !confirmed {
            info!("Stopped during rejoin notice; cancel rejoin");
            return WatcherExit::Cancelled;
        }

        let request = RejoinRequest {
            instance: self.session.state().latest_instance(),
            kill_existing: false,
            source: RejoinSource::ProcessWatcher,
        };
        if self.requests.send(request).is_err() {
            warn!("Rejoin coordinator is gone; dropping request");
            return WatcherExit::CoordinatorGone;
        }
        WatcherExit::RejoinRequested
    }
}

/// Plays the notice, waits out the grace period, then reports whether the
/// session is still running. The wait is never cut short; a stop followed by
/// a new session during the wait still counts as stopped.
pub(crate) fn announce_rejoin(cues: &dyn CuePlayer, grace: Duration, session: &Session) -> bool {
    cues.play(Cue::RejoinNotice);
    thread::sleep(grace);
    session.is_running()
}
