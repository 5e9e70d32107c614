//! Process inspection helpers for the game client.
//!
//! Two independent enumerators are available: sysinfo (in-process) and the
//! platform's own process listing command. [`FallbackProcesses`] uses the
//! first and falls back to the second when enumeration itself fails.

use std::process::Command;
use sysinfo::{Pid, ProcessRefreshKind, System, UpdateKind};
use tracing::{debug, warn};

use crate::error::{RejoinError, Result};

/// A running client process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientProcess {
    pub pid: u32,
    /// Full command line, with the executable path quoted when it contains spaces.
    pub command_line: String,
}

/// Platform capability for finding and terminating the client.
pub trait ClientProcesses: Send + Sync {
    /// `Ok(None)` means enumeration worked and nothing matched.
    fn find(&self, name: &str) -> Result<Option<ClientProcess>>;

    fn kill(&self, pid: u32) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// sysinfo
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default)]
pub struct SysinfoProcesses;

impl ClientProcesses for SysinfoProcesses {
    fn find(&self, name: &str) -> Result<Option<ClientProcess>> {
        ensure_supported(sysinfo::IS_SUPPORTED_SYSTEM, name)?;

        let mut sys = System::new();
        sys.refresh_processes_specifics(
            ProcessRefreshKind::new()
                .with_cmd(UpdateKind::OnlyIfNotSet)
                .with_exe(UpdateKind::OnlyIfNotSet),
        );

        let found = sys.processes().values().find(|process| {
            process.name().contains(name)
                || process
                    .exe()
                    .and_then(|exe| exe.file_name())
                    .map(|file| file.to_string_lossy().contains(name))
                    .unwrap_or(false)
        });

        found
            .map(|process| client_from_argv(name, process.pid().as_u32(), process.cmd()))
            .transpose()
    }

    fn kill(&self, pid: u32) -> Result<()> {
        let mut sys = System::new();
        let sys_pid = Pid::from_u32(pid);
        sys.refresh_process_specifics(sys_pid, ProcessRefreshKind::new());
        let process = sys.process(sys_pid).ok_or_else(|| RejoinError::KillFailed {
            pid,
            details: "process vanished before kill".to_string(),
        })?;
        if process.kill() {
            Ok(())
        } else {
            Err(RejoinError::KillFailed {
                pid,
                details: "signal not delivered".to_string(),
            })
        }
    }
}

fn ensure_supported(supported: bool, name: &str) -> Result<()> {
    if supported {
        Ok(())
    } else {
        Err(RejoinError::ProcessLookup {
            name: name.to_string(),
            details: "sysinfo does not support this platform".to_string(),
        })
    }
}

/// A match whose argv cannot be read counts as a lookup failure, so the
/// listing command gets a turn.
fn client_from_argv(name: &str, pid: u32, argv: &[String]) -> Result<ClientProcess> {
    if argv.is_empty() {
        return Err(RejoinError::ProcessLookup {
            name: name.to_string(),
            details: format!("command line of pid {} is not readable", pid),
        });
    }
    Ok(ClientProcess {
        pid,
        command_line: join_command_line(argv),
    })
}

/// Rebuilds a single command line from argv, quoting elements that contain
/// spaces the way Windows shortcuts do (`"C:\Program Files (x86)\..."`).
pub fn join_command_line(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| {
            if arg.contains(' ') && !arg.starts_with('"') {
                format!("\"{}\"", arg)
            } else {
                arg.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ═══════════════════════════════════════════════════════════════════════════════
// Platform listing command
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default)]
pub struct PsProcesses;

impl ClientProcesses for PsProcesses {
    fn find(&self, name: &str) -> Result<Option<ClientProcess>> {
        let output = run_listing().map_err(|details| RejoinError::ProcessLookup {
            name: name.to_string(),
            details,
        })?;
        Ok(parse_listing(&output, name))
    }

    fn kill(&self, pid: u32) -> Result<()> {
        let pid_arg = pid.to_string();
        let output = if cfg!(windows) {
            Command::new("taskkill")
                .args(["/F", "/PID", pid_arg.as_str()])
                .output()
        } else {
            Command::new("kill").args(["-9", pid_arg.as_str()]).output()
        };

        match output {
            Ok(output) if output.status.success() => Ok(()),
            Ok(output) => Err(RejoinError::KillFailed {
                pid,
                details: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
            Err(err) => Err(RejoinError::KillFailed {
                pid,
                details: err.to_string(),
            }),
        }
    }
}

/// Lists processes as `<pid><whitespace><command line>` lines.
fn run_listing() -> std::result::Result<String, String> {
    let output = if cfg!(windows) {
        Command::new("powershell")
            .args([
                "-NoProfile",
                "-Command",
                "Get-CimInstance Win32_Process | ForEach-Object { \"$($_.ProcessId)`t$($_.CommandLine)\" }",
            ])
            .output()
    } else {
        Command::new("ps").args(["-eo", "pid=,args="]).output()
    }
    .map_err(|err| format!("failed to run process listing: {}", err))?;

    if !output.status.success() {
        return Err(format!(
            "process listing exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

pub(crate) fn parse_listing(output: &str, name: &str) -> Option<ClientProcess> {
    output.lines().find_map(|line| {
        let line = line.trim();
        let split = line.find(char::is_whitespace)?;
        let (pid, command_line) = line.split_at(split);
        let pid = pid.parse::<u32>().ok()?;
        let command_line = command_line.trim();
        is_client_command(command_line, name).then(|| ClientProcess {
            pid,
            command_line: command_line.to_string(),
        })
    })
}

/// True when `name` is the program being run, not merely an argument
/// (`grep VRChat.exe` must not match).
fn is_client_command(command_line: &str, name: &str) -> bool {
    let Some(pos) = command_line.find(name) else {
        return false;
    };
    let program = &command_line[..pos];
    program.starts_with('"')
        || program.starts_with('/')
        || program.get(1..3) == Some(":\\")
        || !program.contains(char::is_whitespace)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Fallback
// ═══════════════════════════════════════════════════════════════════════════════

pub struct FallbackProcesses {
    primary: Box<dyn ClientProcesses>,
    secondary: Box<dyn ClientProcesses>,
}

impl FallbackProcesses {
    pub fn new(primary: Box<dyn ClientProcesses>, secondary: Box<dyn ClientProcesses>) -> Self {
        Self { primary, secondary }
    }
}

impl Default for FallbackProcesses {
    fn default() -> Self {
        Self::new(Box::new(SysinfoProcesses), Box::new(PsProcesses))
    }
}

impl ClientProcesses for FallbackProcesses {
    fn find(&self, name: &str) -> Result<Option<ClientProcess>> {
        match self.primary.find(name) {
            Ok(found) => Ok(found),
            Err(primary_err) => {
                debug!(error = %primary_err, "Primary process enumeration failed; trying fallback");
                self.secondary
                    .find(name)
                    .map_err(|secondary_err| RejoinError::ProcessLookup {
                        name: name.to_string(),
                        details: format!("{}; {}", primary_err, secondary_err),
                    })
            }
        }
    }

    fn kill(&self, pid: u32) -> Result<()> {
        match self.primary.kill(pid) {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(pid, error = %err, "Primary kill failed; trying fallback");
                self.secondary.kill(pid)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Broken;

    impl ClientProcesses for Broken {
        fn find(&self, name: &str) -> Result<Option<ClientProcess>> {
            Err(RejoinError::ProcessLookup {
                name: name.to_string(),
                details: "unavailable".to_string(),
            })
        }

        fn kill(&self, pid: u32) -> Result<()> {
            Err(RejoinError::KillFailed {
                pid,
                details: "unavailable".to_string(),
            })
        }
    }

    struct Fixed(Option<ClientProcess>);

    impl ClientProcesses for Fixed {
        fn find(&self, _name: &str) -> Result<Option<ClientProcess>> {
            Ok(self.0.clone())
        }

        fn kill(&self, _pid: u32) -> Result<()> {
            Ok(())
        }
    }

    fn client() -> ClientProcess {
        ClientProcess {
            pid: 42,
            command_line: "VRChat.exe --no-vr".to_string(),
        }
    }

    #[test]
    fn join_command_line_quotes_spaced_paths() {
        let argv = vec![
            r"C:\Program Files (x86)\Steam\steamapps\common\VRChat\VRChat.exe".to_string(),
            "--no-vr".to_string(),
        ];
        assert_eq!(
            join_command_line(&argv),
            r#""C:\Program Files (x86)\Steam\steamapps\common\VRChat\VRChat.exe" --no-vr"#
        );
    }

    #[test]
    fn unsupported_platform_is_a_lookup_failure() {
        assert!(ensure_supported(true, "VRChat.exe").is_ok());
        let err = ensure_supported(false, "VRChat.exe").unwrap_err();
        assert!(matches!(err, RejoinError::ProcessLookup { .. }));
    }

    #[test]
    fn match_without_argv_is_a_lookup_failure() {
        let err = client_from_argv("VRChat.exe", 42, &[]).unwrap_err();
        assert!(matches!(err, RejoinError::ProcessLookup { .. }));

        let argv = vec!["VRChat.exe".to_string(), "--no-vr".to_string()];
        assert_eq!(client_from_argv("VRChat.exe", 42, &argv).unwrap(), client());
    }

    #[test]
    fn fallback_supplies_command_line_primary_cannot_read() {
        struct NoArgv;

        impl ClientProcesses for NoArgv {
            fn find(&self, name: &str) -> Result<Option<ClientProcess>> {
                client_from_argv(name, 42, &[]).map(Some)
            }

            fn kill(&self, _pid: u32) -> Result<()> {
                Ok(())
            }
        }

        let processes = FallbackProcesses::new(Box::new(NoArgv), Box::new(Fixed(Some(client()))));
        let found = processes.find("VRChat.exe").unwrap().unwrap();
        assert_eq!(found.command_line, "VRChat.exe --no-vr");
    }

    #[test]
    fn parse_listing_finds_client() {
        let output = "    1 /sbin/init\n  812 grep VRChat.exe\n 4242 /opt/games/VRChat.exe --no-vr\n";
        let found = parse_listing(output, "VRChat.exe").unwrap();
        assert_eq!(found.pid, 4242);
        assert_eq!(found.command_line, "/opt/games/VRChat.exe --no-vr");
    }

    #[test]
    fn parse_listing_accepts_windows_paths() {
        let output = "7\t\"C:\\Program Files (x86)\\VRChat\\VRChat.exe\" --profile=0\r\n";
        let found = parse_listing(output, "VRChat.exe").unwrap();
        assert_eq!(found.pid, 7);
        assert!(found.command_line.starts_with('"'));

        let unquoted = "8 Z:\\Games\\VRChat\\VRChat.exe\n";
        assert_eq!(parse_listing(unquoted, "VRChat.exe").unwrap().pid, 8);
    }

    #[test]
    fn parse_listing_ignores_non_matches() {
        assert!(parse_listing("", "VRChat.exe").is_none());
        assert!(parse_listing("abc not-a-pid VRChat.exe\n", "VRChat.exe").is_none());
        assert!(parse_listing("10 tail -f VRChat.exe.log\n", "VRChat.exe").is_none());
    }

    #[test]
    fn fallback_uses_secondary_on_error() {
        let processes = FallbackProcesses::new(Box::new(Broken), Box::new(Fixed(Some(client()))));
        assert_eq!(processes.find("VRChat.exe").unwrap(), Some(client()));
        assert!(processes.kill(42).is_ok());
    }

    #[test]
    fn fallback_trusts_primary_answer() {
        let processes = FallbackProcesses::new(Box::new(Fixed(None)), Box::new(Broken));
        assert_eq!(processes.find("VRChat.exe").unwrap(), None);
    }

    #[test]
    fn fallback_reports_lookup_failure_when_both_fail() {
        let processes = FallbackProcesses::new(Box::new(Broken), Box::new(Broken));
        let err = processes.find("VRChat.exe").unwrap_err();
        assert!(matches!(err, RejoinError::ProcessLookup { .. }));
    }
}
