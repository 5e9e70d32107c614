//! Shared watch-session state.
//!
//! One `ToolState` exists per tool. It is owned by [`AutoRejoinTool`](crate::AutoRejoinTool);
//! each watcher thread gets a [`Session`] handle at spawn time. Every read and
//! write goes through the single mutex below; callers never see the guard.
//!
//! Sessions are numbered. A handle only acts while its number is the current
//! one, so a thread left over from a stopped session can never claim a
//! relaunch in, or keep watching for, the session that replaced it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::instance::Instance;

#[derive(Debug, Default)]
struct StateInner {
    session: u64,
    running: bool,
    shutting_down: bool,
    rejoin_armed: bool,
    in_sleep: bool,
    latest_instance: Option<Instance>,
    launch_args: String,
}

impl StateInner {
    fn is_live(&self, session: u64) -> bool {
        self.session == session && self.running
    }
}

/// Result of offering a newly observed instance to the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// Became the latest instance.
    Advanced,
    /// Identical (id and timestamp) to the tracked instance.
    Duplicate,
    /// Older than the tracked instance; ignored.
    Stale,
}

/// Point-in-time copy of the state, for status displays.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    pub session: u64,
    pub running: bool,
    pub shutting_down: bool,
    pub rejoin_armed: bool,
    pub in_sleep: bool,
    pub latest_instance: Option<Instance>,
}

#[derive(Debug, Default)]
pub struct ToolState {
    inner: Mutex<StateInner>,
}

impl ToolState {
    pub fn new(rejoin_armed: bool) -> Self {
        Self {
            inner: Mutex::new(StateInner {
                rejoin_armed,
                ..StateInner::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StateInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts a fresh watch session, clearing any previous shutdown. Handles
    /// from earlier sessions go stale.
    pub fn begin_session(self: &Arc<Self>, launch_args: String, seed: Option<Instance>) -> Session {
        let mut state = self.lock();
        state.session += 1;
        state.running = true;
        state.shutting_down = false;
        state.launch_args = launch_args;
        state.latest_instance = seed;
        Session {
            state: Arc::clone(self),
            id: state.session,
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn is_shutdown(&self) -> bool {
        self.lock().shutting_down
    }

    /// Marks the session stopped. Returns false if nothing was running.
    pub fn stop(&self) -> bool {
        let mut state = self.lock();
        let was_running = state.running;
        state.running = false;
        was_running
    }

    /// "Sleep this instance": arm rejoin from now on.
    pub fn arm(&self) {
        let mut state = self.lock();
        state.rejoin_armed = true;
        state.in_sleep = true;
    }

    pub fn is_armed(&self) -> bool {
        self.lock().rejoin_armed
    }

    pub fn latest_instance(&self) -> Option<Instance> {
        self.lock().latest_instance.clone()
    }

    pub fn launch_args(&self) -> String {
        self.lock().launch_args.clone()
    }

    /// Offers an instance to the tracker. The tracked instance only moves
    /// forward in time; an equal timestamp with a different id still advances.
    pub fn observe(&self, instance: Instance) -> Observation {
        let mut state = self.lock();
        match &state.latest_instance {
            Some(current) if *current == instance => Observation::Duplicate,
            Some(current) if instance.timestamp() < current.timestamp() => Observation::Stale,
            _ => {
                state.latest_instance = Some(instance);
                Observation::Advanced
            }
        }
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let state = self.lock();
        StateSnapshot {
            session: state.session,
            running: state.running,
            shutting_down: state.shutting_down,
            rejoin_armed: state.rejoin_armed,
            in_sleep: state.in_sleep,
            latest_instance: state.latest_instance.clone(),
        }
    }
}

/// One watch session's view of the shared state.
#[derive(Debug, Clone)]
pub struct Session {
    state: Arc<ToolState>,
    id: u64,
}

impl Session {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> &ToolState {
        &self.state
    }

    /// Still the current session and not stopped.
    pub fn is_running(&self) -> bool {
        self.state.lock().is_live(self.id)
    }

    /// Watchers keep going only while this holds.
    pub fn should_watch(&self) -> bool {
        let state = self.state.lock();
        state.is_live(self.id) && !state.shutting_down
    }

    /// Claims the one relaunch allowed per session. Sets `shutting_down`
    /// before returning so racing watchers wind down.
    pub fn claim_rejoin(&self) -> bool {
        let mut state = self.state.lock();
        if !state.is_live(self.id) || state.shutting_down {
            return false;
        }
        state.shutting_down = true;
        true
    }

    /// Ends the session after a relaunch attempt, successful or not. A newer
    /// session is left alone.
    pub fn finish_rejoin(&self) {
        let mut state = self.state.lock();
        if state.session == self.id {
            state.running = false;
        }
    }
}
