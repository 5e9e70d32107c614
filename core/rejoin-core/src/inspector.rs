//! Log Inspector: turns tailed log lines into relaunch requests.
//!
//! Each line is classified as an instance move, a connection timeout, or
//! noise. While rejoin is disarmed, moves only advance the tracked instance.
//! Once armed, the first move or timeout outside the quiet window sends one
//! [`RejoinRequest`] and ends the inspector; a fresh `run()` is needed to
//! watch again.

use chrono::{DateTime, FixedOffset, NaiveTime};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::audio::CuePlayer;
use crate::instance::{parse_instance, parse_line_timestamp, Instance, LogTimeZone};
use crate::patterns::WORLD_MARKER;
use crate::schedule::QuietWindow;
use crate::state::{Observation, Session};
use crate::supervisor::{RejoinRequest, RejoinSource};
use crate::watcher::announce_rejoin;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineClass {
    /// The client moved to a world other than the tracked one.
    Move(Instance),
    Timeout,
    Ignore,
}

/// Pure line classification against the tracked instance.
#[derive(Debug, Clone)]
pub struct LineClassifier {
    zone: LogTimeZone,
    timeout_marker: String,
    watch_start: DateTime<FixedOffset>,
}

impl LineClassifier {
    pub fn new(
        zone: LogTimeZone,
        timeout_marker: impl Into<String>,
        watch_start: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            zone,
            timeout_marker: timeout_marker.into(),
            watch_start,
        }
    }

    pub fn watch_start(&self) -> DateTime<FixedOffset> {
        self.watch_start
    }

    pub fn classify(&self, line: &str, latest: Option<&Instance>) -> LineClass {
        if line.is_empty() {
            return LineClass::Ignore;
        }

        if line.contains(WORLD_MARKER) {
            return match parse_instance(line, &self.zone) {
                Ok(instance) if instance.timestamp() < self.watch_start => LineClass::Ignore,
                Ok(instance) if latest.map(|l| l.same_world(&instance)).unwrap_or(false) => {
                    LineClass::Ignore
                }
                Ok(instance) => LineClass::Move(instance),
                Err(err) => {
                    debug!(error = %err, "Unparseable destination line");
                    LineClass::Ignore
                }
            };
        }

        if line.contains(&self.timeout_marker) {
            // Lines written before watching began are history, not events.
            let stale = parse_line_timestamp(line, &self.zone)
                .map(|ts| ts < self.watch_start)
                .unwrap_or(false);
            return if stale {
                LineClass::Ignore
            } else {
                LineClass::Timeout
            };
        }

        LineClass::Ignore
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InspectorExit {
    /// Another watcher or `stop()` ended the session.
    Superseded,
    /// The tail source ran dry.
    SourceClosed,
    /// Stopped during the rejoin notice.
    Cancelled,
    RejoinRequested,
    /// The coordinator was no longer listening.
    CoordinatorGone,
}

type Clock = Box<dyn Fn() -> NaiveTime + Send>;

pub struct LogInspector {
    session: Session,
    cues: Arc<dyn CuePlayer>,
    requests: Sender<RejoinRequest>,
    classifier: LineClassifier,
    quiet_window: Option<QuietWindow>,
    rejoin_notice: Option<Duration>,
    clock: Clock,
}

impl LogInspector {
    pub fn new(
        session: Session,
        cues: Arc<dyn CuePlayer>,
        requests: Sender<RejoinRequest>,
        classifier: LineClassifier,
    ) -> Self {
        let zone = classifier.zone;
        Self {
            session,
            cues,
            requests,
            classifier,
            quiet_window: None,
            rejoin_notice: None,
            clock: Box::new(move || zone.now().time()),
        }
    }

    /// Suppress relaunches while the wall clock is inside `window`.
    pub fn with_quiet_window(mut self, window: Option<QuietWindow>) -> Self {
        self.quiet_window = window;
        self
    }

    /// Play the notice cue and wait `grace` before relaunching.
    pub fn with_rejoin_notice(mut self, grace: Option<Duration>) -> Self {
        self.rejoin_notice = grace;
        self
    }

    pub fn with_clock(mut self, clock: impl Fn() -> NaiveTime + Send + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Consumes lines until the session ends or one relaunch is requested.
    /// The source is dropped on return, releasing any file it holds.
    pub fn run<I>(self, lines: I) -> InspectorExit
    where
        I: IntoIterator<Item = String>,
    {
        for line in lines {
            if !self.session.should_watch() {
                info!("Log watcher cleaned up by other");
                return InspectorExit::Superseded;
            }

            let line = line.strip_suffix('\r').unwrap_or(&line);
            let latest = self.session.state().latest_instance();
            let class = self.classifier.classify(line, latest.as_ref());
            if class == LineClass::Ignore {
                continue;
            }

            if !self.session.state().is_armed() {
                if let LineClass::Move(instance) = class {
                    if self.session.state().observe(instance.clone()) == Observation::Advanced {
                        info!(instance = %instance, "Instance move tracked (rejoin disarmed)");
                    }
                }
                continue;
            }

            match &class {
                LineClass::Move(instance) => info!(to = %instance, "Instance move detected"),
                _ => info!("Connection timeout detected"),
            }

            if let Some(window) = self.quiet_window {
                let now = (self.clock)();
                if window.contains(now) {
                    info!(window = %window, "Inside quiet window; relaunch suppressed");
                    continue;
                }
            }

            if let Some(grace) = self.rejoin_notice {
                if !announce_rejoin(self.cues.as_ref(), grace, &self.session) {
                    info!("Stopped during rejoin notice; cancel rejoin");
                    return InspectorExit::Cancelled;
                }
            } else if !self.session.is_running() {
                info!("Stopped before rejoin; cancel rejoin");
                return InspectorExit::Cancelled;
            }

            let request = RejoinRequest {
                instance: self.session.state().latest_instance(),
                kill_existing: true,
                source: RejoinSource::LogInspector,
            };
            if self.requests.send(request).is_err() {
                warn!("Rejoin coordinator is gone; dropping request");
                return InspectorExit::CoordinatorGone;
            }
            return InspectorExit::RejoinRequested;
        }

        info!("Log source closed; log watcher exiting");
        InspectorExit::SourceClosed
    }
}
