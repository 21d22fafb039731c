// src/core/shellcmd.rs

//! Shared machinery for invoking user-configured external commands: the
//! promote/follow/rejoin commands (C6) and the event-notification hook (C8)
//! both need "tokenize once, run as argv, capture output, enforce a
//! timeout" — this module is the one place that does it.
//!
//! Commands are executed as an argv array rather than through a shell, per
//! §9's shell-injection guidance, unless the configured string
//! starts with the `@shell:` prefix (opt-in shell features).

use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::warn;

/// A parsed, ready-to-run external command.
#[derive(Debug, Clone)]
pub enum ShellCommand {
    /// Tokenized once at parse time; executed directly, no shell.
    Argv(Vec<String>),
    /// Opted into shell interpretation via the `@shell:` prefix.
    Shell(String),
}

impl ShellCommand {
    /// Parses a configured command string. Tokenization is a simple
    /// whitespace split with support for single/double-quoted segments —
    /// enough for the promote/follow/notification command strings named in
    /// §6, without pulling in a full shell grammar.
    pub fn parse(raw: &str) -> Self {
        if let Some(shell_cmd) = raw.strip_prefix("@shell:") {
            return ShellCommand::Shell(shell_cmd.trim().to_string());
        }
        ShellCommand::Argv(tokenize(raw))
    }

    fn to_tokio_command(&self) -> Command {
        match self {
            ShellCommand::Argv(parts) => {
                let mut cmd = Command::new(parts.first().map(String::as_str).unwrap_or(""));
                cmd.args(parts.iter().skip(1));
                cmd
            }
            ShellCommand::Shell(s) => {
                let mut cmd = Command::new("/bin/sh");
                cmd.arg("-c").arg(s);
                cmd
            }
        }
    }
}

/// The result of running an external command to completion or timeout.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub success: bool,
    pub stdout: String,
    pub timed_out: bool,
}

/// Runs `cmd`, capturing stdout, with a timeout escalating from SIGTERM to
/// SIGKILL after a grace period on expiry (§4.6).
pub async fn run_with_timeout(
    cmd: &ShellCommand,
    timeout: Duration,
    grace_period: Duration,
) -> CommandOutcome {
    let mut child = match cmd
        .to_tokio_command()
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            return CommandOutcome {
                success: false,
                stdout: format!("failed to spawn: {e}"),
                timed_out: false,
            };
        }
    };

    let pid = child.id();

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => CommandOutcome {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            timed_out: false,
        },
        Ok(Err(e)) => CommandOutcome {
            success: false,
            stdout: format!("command error: {e}"),
            timed_out: false,
        },
        Err(_) => {
            warn!("external command exceeded {:?} timeout, sending SIGTERM", timeout);
            #[cfg(unix)]
            if let Some(pid) = pid {
                unsafe {
                    libc::kill(pid as i32, libc::SIGTERM);
                }
            }
            tokio::time::sleep(grace_period).await;
            #[cfg(unix)]
            if let Some(pid) = pid {
                unsafe {
                    libc::kill(pid as i32, libc::SIGKILL);
                }
            }
            CommandOutcome {
                success: false,
                stdout: String::new(),
                timed_out: true,
            }
        }
    }
}

fn tokenize(raw: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None => {
                if c == '\'' || c == '"' {
                    quote = Some(c);
                } else if c.is_whitespace() {
                    if !current.is_empty() {
                        tokens.push(std::mem::take(&mut current));
                    }
                } else {
                    current.push(c);
                }
            }
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}
