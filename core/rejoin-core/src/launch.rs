//! Rebuilding the client's launch command with a deep link to an instance.
//!
//! The captured command line is a single string such as
//!
//! ```text
//! "C:\Program Files (x86)\Steam\steamapps\common\VRChat\VRChat.exe" --no-vr
//! ```
//!
//! `Command` wants the program and its arguments separately, so the line is
//! cut at the executable name. Install paths with spaces arrive quoted; the
//! quote characters have to go or the program path will not resolve.

use std::io;
use std::process::{Command, Stdio};

use crate::config::LaunchStrategy;
use crate::error::{RejoinError, Result};

/// A program and arguments ready to spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecPlan {
    pub program: String,
    pub args: Vec<String>,
}

/// `<scheme>://launch?id=<instance id>`
pub fn launch_url(scheme: &str, instance_id: &str) -> String {
    format!("{}://launch?id={}", scheme, instance_id)
}

/// Appends the deep link to the original command line and splits it into
/// program and arguments. Returns `None` if `executable` does not occur in
/// the command line.
pub fn prepare_exec_plan(
    command_line: &str,
    executable: &str,
    scheme: &str,
    instance_id: &str,
) -> Option<ExecPlan> {
    let full = format!("{} {}", command_line, launch_url(scheme, instance_id));
    let (dir, rest) = full.split_once(executable)?;

    let dir = dir.strip_prefix('"').unwrap_or(dir);
    let program = format!("{}{}", dir, executable);

    // The closing quote of a quoted path is left at the head of the arguments.
    let rest = rest.strip_prefix('"').unwrap_or(rest);
    let args = rest.split_whitespace().map(str::to_string).collect();

    Some(ExecPlan { program, args })
}

/// Hands the deep link to the desktop's URL handler instead.
pub fn open_url_plan(scheme: &str, instance_id: &str) -> ExecPlan {
    let url = launch_url(scheme, instance_id);
    if cfg!(target_os = "macos") {
        ExecPlan {
            program: "open".to_string(),
            args: vec![url],
        }
    } else if cfg!(windows) {
        ExecPlan {
            program: "cmd".to_string(),
            args: vec!["/C".to_string(), "start".to_string(), String::new(), url],
        }
    } else {
        ExecPlan {
            program: "xdg-open".to_string(),
            args: vec![url],
        }
    }
}

/// Chooses how to relaunch according to the configured strategy.
pub fn plan_for(
    strategy: LaunchStrategy,
    command_line: &str,
    executable: &str,
    scheme: &str,
    instance_id: &str,
) -> Result<ExecPlan> {
    match strategy {
        LaunchStrategy::Reconstruct => {
            prepare_exec_plan(command_line, executable, scheme, instance_id).ok_or_else(|| {
                RejoinError::LaunchFailed {
                    program: executable.to_string(),
                    source: io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("captured command line does not mention {}", executable),
                    ),
                }
            })
        }
        LaunchStrategy::OpenUrl => Ok(open_url_plan(scheme, instance_id)),
    }
}

/// Platform capability for starting the client.
pub trait Launcher: Send + Sync {
    /// Starts the program and returns its pid without waiting for it.
    fn launch(&self, plan: &ExecPlan) -> Result<u32>;
}

#[derive(Debug, Clone, Default)]
pub struct CommandLauncher;

impl Launcher for CommandLauncher {
    fn launch(&self, plan: &ExecPlan) -> Result<u32> {
        let child = Command::new(&plan.program)
            .args(&plan.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| RejoinError::LaunchFailed {
                program: plan.program.clone(),
                source,
            })?;
        Ok(child.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoted_install_path_is_unquoted() {
        let line = r#""C:\Program Files (x86)\Steam\steamapps\common\VRChat\VRChat.exe" --no-vr --profile=1"#;
        let plan = prepare_exec_plan(line, "VRChat.exe", "vrchat", "wrld_abc:1~private").unwrap();
        assert_eq!(
            plan.program,
            r"C:\Program Files (x86)\Steam\steamapps\common\VRChat\VRChat.exe"
        );
        assert_eq!(
            plan.args,
            vec![
                "--no-vr".to_string(),
                "--profile=1".to_string(),
                "vrchat://launch?id=wrld_abc:1~private".to_string(),
            ]
        );
    }

    #[test]
    fn plain_path_keeps_arguments() {
        let line = r"D:\VRChat\VRChat.exe";
        let plan = prepare_exec_plan(line, "VRChat.exe", "vrchat", "wrld_x").unwrap();
        assert_eq!(plan.program, r"D:\VRChat\VRChat.exe");
        assert_eq!(plan.args, vec!["vrchat://launch?id=wrld_x".to_string()]);
    }

    #[test]
    fn missing_executable_yields_none() {
        assert!(prepare_exec_plan("steam.exe -applaunch", "VRChat.exe", "vrchat", "wrld_x").is_none());
        let err = plan_for(
            LaunchStrategy::Reconstruct,
            "steam.exe",
            "VRChat.exe",
            "vrchat",
            "wrld_x",
        )
        .unwrap_err();
        assert!(matches!(err, RejoinError::LaunchFailed { .. }));
    }

    #[test]
    fn open_url_plan_carries_link() {
        let plan = plan_for(LaunchStrategy::OpenUrl, "", "VRChat.exe", "vrchat", "wrld_x").unwrap();
        assert_eq!(plan.args.last().unwrap(), "vrchat://launch?id=wrld_x");
    }

    #[test]
    fn launcher_reports_spawn_failure() {
        let plan = ExecPlan {
            program: "/definitely/not/a/real/binary".to_string(),
            args: vec![],
        };
        let err = CommandLauncher.launch(&plan).unwrap_err();
        assert!(matches!(err, RejoinError::LaunchFailed { .. }));
    }
}
