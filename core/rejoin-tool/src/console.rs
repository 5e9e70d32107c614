//! Interactive console: one command per line on stdin.

use std::io::{self, BufRead};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use rejoin_core::{
    AutoRejoinTool, CuePlayer, Platform, RejoinConfig, RejoinError, RunOutcome, StateSnapshot,
    WatchSession,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConsoleCommand {
    Start,
    Stop,
    /// Arm rejoin: the player is going to sleep in this instance.
    Sleep,
    Status,
    Quit,
}

impl FromStr for ConsoleCommand {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_ascii_lowercase().as_str() {
            "start" | "run" => Ok(ConsoleCommand::Start),
            "stop" => Ok(ConsoleCommand::Stop),
            "sleep" | "arm" => Ok(ConsoleCommand::Sleep),
            "status" => Ok(ConsoleCommand::Status),
            "quit" | "exit" => Ok(ConsoleCommand::Quit),
            other => Err(format!("unknown command: {:?}", other)),
        }
    }
}

#[cfg(feature = "audio")]
fn cue_player(config: &RejoinConfig) -> Arc<dyn CuePlayer> {
    Arc::new(rejoin_core::WavCuePlayer::new(config.audio.sounds_dir.clone()))
}

#[cfg(not(feature = "audio"))]
fn cue_player(_config: &RejoinConfig) -> Arc<dyn CuePlayer> {
    Arc::new(rejoin_core::SilentCuePlayer)
}

fn describe(status: &StateSnapshot) -> String {
    let mode = if status.running { "running" } else { "stopped" };
    let armed = if status.rejoin_armed { "armed" } else { "disarmed" };
    match &status.latest_instance {
        Some(instance) => format!("{} ({}), latest: {}", mode, armed, instance),
        None => format!("{} ({}), latest: none", mode, armed),
    }
}

struct Console {
    tool: Arc<AutoRejoinTool>,
    session: Option<WatchSession>,
}

impl Console {
    fn start(&mut self) -> Result<(), RejoinError> {
        if let Some(previous) = self.session.take() {
            if previous.is_finished() {
                let summary = previous.join();
                info!(
                    inspector = ?summary.inspector,
                    watcher = ?summary.watcher,
                    "Previous session ended"
                );
            } else {
                self.session = Some(previous);
            }
        }

        match self.tool.run()? {
            RunOutcome::Watching(session) => {
                self.session = Some(session);
                println!("running");
            }
            RunOutcome::AlreadyRunning => println!("already running"),
            RunOutcome::ClientNotRunning => println!("start VRChat first"),
        }
        Ok(())
    }

    fn handle(&mut self, command: ConsoleCommand) -> Result<bool, RejoinError> {
        match command {
            ConsoleCommand::Start => self.start()?,
            ConsoleCommand::Stop => {
                if self.tool.stop() {
                    println!("stopped");
                } else {
                    println!("not running");
                }
            }
            ConsoleCommand::Sleep => {
                self.tool.arm();
                println!("rejoin armed");
            }
            ConsoleCommand::Status => println!("{}", describe(&self.tool.status())),
            ConsoleCommand::Quit => return Ok(false),
        }
        Ok(true)
    }
}

/// Starts a session and serves console commands until `quit`, end of input
/// or Ctrl+C.
pub fn run(config: RejoinConfig) -> Result<(), RejoinError> {
    let cues = cue_player(&config);
    let tool = Arc::new(AutoRejoinTool::new(config, Platform::system().with_cues(cues)));

    let interrupted = Arc::clone(&tool);
    if let Err(err) = ctrlc::set_handler(move || {
        interrupted.stop();
        std::process::exit(0);
    }) {
        warn!(error = %err, "Failed to install Ctrl+C handler");
    }

    let mut console = Console {
        tool: Arc::clone(&tool),
        session: None,
    };
    console.start()?;

    for line in io::stdin().lock().lines() {
        let line = line.map_err(|source| RejoinError::Io {
            context: "reading console input".to_string(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let command = match line.parse::<ConsoleCommand>() {
            Ok(command) => command,
            Err(err) => {
                println!("{} (try start, stop, sleep, status, quit)", err);
                continue;
            }
        };
        match console.handle(command) {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) => warn!(error = %err, "Command failed"),
        }
    }

    tool.stop();
    Ok(())
}
