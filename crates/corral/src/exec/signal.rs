//! Signal names and delivery.

#![allow(unsafe_code)]

use std::fmt;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::path::Path;
use std::str::FromStr;

use corral_common::{CorralError, CorralResult};

const SIGNALS: &[(&str, i32)] = &[
    ("HUP", libc::SIGHUP),
    ("INT", libc::SIGINT),
    ("QUIT", libc::SIGQUIT),
    ("ILL", libc::SIGILL),
    ("TRAP", libc::SIGTRAP),
    ("ABRT", libc::SIGABRT),
    ("IOT", libc::SIGIOT),
    ("BUS", libc::SIGBUS),
    ("FPE", libc::SIGFPE),
    ("KILL", libc::SIGKILL),
    ("USR1", libc::SIGUSR1),
    ("SEGV", libc::SIGSEGV),
    ("USR2", libc::SIGUSR2),
    ("PIPE", libc::SIGPIPE),
    ("ALRM", libc::SIGALRM),
    ("TERM", libc::SIGTERM),
    ("STKFLT", libc::SIGSTKFLT),
    ("CHLD", libc::SIGCHLD),
    ("CONT", libc::SIGCONT),
    ("STOP", libc::SIGSTOP),
    ("TSTP", libc::SIGTSTP),
    ("TTIN", libc::SIGTTIN),
    ("TTOU", libc::SIGTTOU),
    ("URG", libc::SIGURG),
    ("XCPU", libc::SIGXCPU),
    ("XFSZ", libc::SIGXFSZ),
    ("VTALRM", libc::SIGVTALRM),
    ("PROF", libc::SIGPROF),
    ("WINCH", libc::SIGWINCH),
    ("IO", libc::SIGIO),
    ("PWR", libc::SIGPWR),
    ("SYS", libc::SIGSYS),
];

/// A validated signal number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signal(i32);

impl Signal {
    /// `SIGKILL`.
    pub const KILL: Self = Self(libc::SIGKILL);
    /// `SIGTERM`.
    pub const TERM: Self = Self(libc::SIGTERM);

    /// Validates a raw signal number.
    ///
    /// # Errors
    ///
    /// Returns an error for numbers outside `1..=SIGRTMAX`.
    pub fn from_raw(signal: i32) -> CorralResult<Self> {
        if (1..=libc::SIGRTMAX()).contains(&signal) {
            Ok(Self(signal))
        } else {
            Err(CorralError::validation(format!("invalid signal number {signal}")))
        }
    }

    /// Raw signal number.
    #[must_use]
    pub const fn as_raw(self) -> i32 {
        self.0
    }
}

impl FromStr for Signal {
    type Err = CorralError;

    /// Accepts `9`, `kill`, `KILL`, `sigkill` and `SIGKILL` alike.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(number) = s.parse::<i32>() {
            return Self::from_raw(number);
        }

        let upper = s.to_ascii_uppercase();
        let name = upper.strip_prefix("SIG").unwrap_or(&upper);
        SIGNALS
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, number)| Self(*number))
            .ok_or_else(|| CorralError::validation(format!("unknown signal {s:?}")))
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match SIGNALS.iter().find(|(_, number)| *number == self.0) {
            Some((name, _)) => write!(f, "SIG{name}"),
            None => write!(f, "{}", self.0),
        }
    }
}

/// Sends `signal` to `pid`, treating an exited process as success.
///
/// The process is pinned with a pidfd first, so a PID recycled after the
/// pidfd was opened cannot receive the signal. Kernels without pidfd
/// support fall back to `kill(2)`.
///
/// # Errors
///
/// Returns an error if the signal cannot be delivered for any reason other
/// than the process being gone.
pub fn send_signal(pid: u32, signal: Signal) -> CorralResult<()> {
    let raw_pid = libc::pid_t::try_from(pid)
        .map_err(|_| CorralError::validation(format!("invalid pid {pid}")))?;
    if raw_pid <= 0 {
        return Err(CorralError::validation(format!("invalid pid {pid}")));
    }

    let result = match pidfd_open(raw_pid) {
        Ok(pidfd) => pidfd_send_signal(&pidfd, signal.as_raw()),
        Err(e) if e.raw_os_error() == Some(libc::ENOSYS) => {
            // SAFETY: plain syscall on a positive pid.
            if unsafe { libc::kill(raw_pid, signal.as_raw()) } < 0 {
                Err(std::io::Error::last_os_error())
            } else {
                Ok(())
            }
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => {
            tracing::debug!(pid, %signal, "sent signal");
            Ok(())
        }
        Err(e) if e.raw_os_error() == Some(libc::ESRCH) => {
            tracing::debug!(pid, %signal, "process already exited");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Returns true once `pid` has exited. A zombie counts as exited.
///
/// # Errors
///
/// Returns an error if `<proc_root>/<pid>/stat` exists but cannot be read.
pub fn process_exited(proc_root: &Path, pid: u32) -> CorralResult<bool> {
    let stat = match std::fs::read_to_string(proc_root.join(pid.to_string()).join("stat")) {
        Ok(stat) => stat,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(e) if e.raw_os_error() == Some(libc::ESRCH) => return Ok(true),
        Err(e) => return Err(e.into()),
    };
    // The state follows the parenthesized command name, which may itself
    // contain spaces and parentheses.
    let state = stat
        .rfind(')')
        .and_then(|end| stat[end + 1..].split_whitespace().next());
    Ok(matches!(state, None | Some("Z" | "X")))
}

fn pidfd_open(pid: libc::pid_t) -> std::io::Result<OwnedFd> {
    // SAFETY: pidfd_open takes a pid and flags and returns a new descriptor.
    let fd = unsafe { libc::syscall(libc::SYS_pidfd_open, pid, 0) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error());
    }
    let fd = i32::try_from(fd).map_err(|_| std::io::Error::other("pidfd out of range"))?;
    // SAFETY: the kernel just returned this descriptor and nobody else owns it.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn pidfd_send_signal(pidfd: &OwnedFd, signal: i32) -> std::io::Result<()> {
    // SAFETY: a null siginfo makes the call behave like kill(2).
    let rc = unsafe {
        libc::syscall(
            libc::SYS_pidfd_send_signal,
            pidfd.as_raw_fd(),
            signal,
            std::ptr::null::<libc::siginfo_t>(),
            0,
        )
    };
    if rc < 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numbers_and_names() {
        for input in ["9", "kill", "KILL", "sigkill", "SIGKILL", "SigKill"] {
            assert_eq!(input.parse::<Signal>().unwrap(), Signal::KILL, "{input}");
        }
        assert_eq!("usr1".parse::<Signal>().unwrap().as_raw(), libc::SIGUSR1);
        assert_eq!("SIGTERM".parse::<Signal>().unwrap(), Signal::TERM);
    }

    #[test]
    fn rejects_garbage() {
        assert!("0".parse::<Signal>().is_err());
        assert!("-1".parse::<Signal>().is_err());
        assert!("1000".parse::<Signal>().is_err());
        assert!("SIGNOPE".parse::<Signal>().is_err());
        assert!("".parse::<Signal>().is_err());
    }

    #[test]
    fn displays_names() {
        assert_eq!(Signal::KILL.to_string(), "SIGKILL");
        assert_eq!(Signal::from_raw(libc::SIGRTMIN()).unwrap().to_string(), libc::SIGRTMIN().to_string());
    }

    #[test]
    fn exited_process_is_not_an_error() {
        // pid_max itself is never handed out.
        let pid_max = std::fs::read_to_string("/proc/sys/kernel/pid_max")
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok())
            .unwrap_or(4_194_304);
        send_signal(pid_max, Signal::TERM).unwrap();
    }

    #[test]
    fn zombies_count_as_exited() {
        let proc_root = Path::new("/proc");
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        assert!(!process_exited(proc_root, child.id()).unwrap());

        send_signal(child.id(), Signal::KILL).unwrap();
        let mut exited = false;
        for _ in 0..200 {
            if process_exited(proc_root, child.id()).unwrap() {
                exited = true;
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        // Not reaped yet: still a zombie.
        assert!(exited);
        child.wait().unwrap();
        assert!(process_exited(proc_root, child.id()).unwrap());
    }

    #[test]
    fn delivers_to_live_process() {
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        send_signal(child.id(), Signal::KILL).unwrap();
        let status = child.wait().unwrap();
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(status.signal(), Some(libc::SIGKILL));
    }
}
