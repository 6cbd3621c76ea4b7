//! Monitor process spawning and supervision.
//!
//! The monitor outlives the `create` invocation, so the child is never
//! killed on drop. A supervisor task owns the child, publishes its exit
//! through a watch channel and kills it on request.

#![allow(unsafe_code)]

use std::ffi::OsString;
use std::fmt;
use std::os::fd::OwnedFd;
use std::path::PathBuf;
use std::process::Stdio;

use corral_common::{CorralError, CorralResult};
use tokio::process::Command;
use tokio::sync::{oneshot, watch};

/// Standard streams handed to the monitor.
#[derive(Debug)]
pub enum MonitorStdio {
    /// Inherit the runtime's stdio (the orchestrator's pipes).
    Inherit,
    /// Use the slave side of a PTY and make it the controlling terminal.
    Terminal(OwnedFd),
}

/// How to start the monitor.
#[derive(Debug)]
pub struct MonitorCommand {
    /// Monitor executable.
    pub program: PathBuf,
    /// Arguments after argv[0].
    pub args: Vec<OsString>,
    /// Working directory (the container runtime directory).
    pub cwd: PathBuf,
    /// Complete environment; nothing else is inherited.
    pub env: Vec<(OsString, OsString)>,
    /// Standard streams.
    pub stdio: MonitorStdio,
}

/// How the monitor exited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorExit {
    /// Exited with a status code.
    Code(i32),
    /// Terminated by a signal.
    Signal(i32),
    /// Waiting for the process failed.
    Unknown(String),
}

impl fmt::Display for MonitorExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "exit status {code}"),
            Self::Signal(signal) => write!(f, "killed by signal {signal}"),
            Self::Unknown(reason) => write!(f, "unknown exit ({reason})"),
        }
    }
}

/// Handle to a supervised monitor process.
#[derive(Debug)]
pub struct MonitorHandle {
    pid: u32,
    exit: watch::Receiver<Option<MonitorExit>>,
    kill: Option<oneshot::Sender<()>>,
}

impl MonitorHandle {
    /// PID of the monitor.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// Waits for the monitor to exit. Cancel safe.
    pub async fn exited(&mut self) -> MonitorExit {
        match self.exit.wait_for(Option::is_some).await {
            Ok(exit) => exit.clone().unwrap_or_else(|| {
                MonitorExit::Unknown("supervisor published no status".to_string())
            }),
            Err(_) => MonitorExit::Unknown("supervisor task is gone".to_string()),
        }
    }

    /// Asks the supervisor to kill the monitor. Idempotent.
    pub fn kill(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }
}

/// Spawns the monitor and a supervisor task watching it.
///
/// # Errors
///
/// Returns an error if the process cannot be spawned.
pub fn spawn(command: MonitorCommand) -> CorralResult<MonitorHandle> {
    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .current_dir(&command.cwd)
        .env_clear()
        .envs(command.env.iter().map(|(k, v)| (k, v)))
        .kill_on_drop(false);

    match command.stdio {
        MonitorStdio::Inherit => {
            cmd.stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit());
        }
        MonitorStdio::Terminal(slave) => {
            cmd.stdin(Stdio::from(slave.try_clone()?))
                .stdout(Stdio::from(slave.try_clone()?))
                .stderr(Stdio::from(slave));
            // SAFETY: only async-signal-safe calls between fork and exec.
            unsafe {
                cmd.pre_exec(|| {
                    if libc::setsid() < 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                    if libc::ioctl(0, libc::TIOCSCTTY, 0) < 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }
    }

    let mut child = cmd.spawn().map_err(|e| {
        CorralError::configuration_with(
            format!("failed to spawn monitor {}", command.program.display()),
            e,
        )
    })?;
    let pid = child.id().ok_or_else(|| CorralError::Internal {
        message: "monitor exited before its pid was read".to_string(),
    })?;

    let (exit_tx, exit_rx) = watch::channel(None);
    let (kill_tx, mut kill_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let status = tokio::select! {
            status = child.wait() => status,
            Ok(()) = &mut kill_rx => {
                tracing::debug!(pid, "killing monitor");
                if let Err(e) = child.start_kill() {
                    tracing::warn!(pid, error = %e, "failed to kill monitor");
                }
                child.wait().await
            }
        };

        let exit = match status {
            Ok(status) => {
                use std::os::unix::process::ExitStatusExt;
                status
                    .code()
                    .map(MonitorExit::Code)
                    .or_else(|| status.signal().map(MonitorExit::Signal))
                    .unwrap_or_else(|| MonitorExit::Unknown(status.to_string()))
            }
            Err(e) => MonitorExit::Unknown(e.to_string()),
        };
        tracing::debug!(pid, %exit, "monitor exited");
        let _ = exit_tx.send(Some(exit));
    });

    tracing::debug!(pid, program = %command.program.display(), "spawned monitor");
    Ok(MonitorHandle {
        pid,
        exit: exit_rx,
        kill: Some(kill_tx),
    })
}
