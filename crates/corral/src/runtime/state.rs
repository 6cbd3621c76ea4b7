//! Container status inference.
//!
//! The engine only knows whether an init process exists. Whether that
//! process is still the init shim waiting for `start` or already the user
//! command is read from its command line. Nothing is cached.

use std::path::Path;

use corral_common::{ContainerId, CorralResult};
use corral_oci::ContainerStatus;

use crate::engine::{EngineState, IsolationEngine};
use crate::exec::init::init_cmdline;

/// Derives the container status from the engine state and `/proc`.
///
/// # Errors
///
/// Returns an error if the engine state or the init command line cannot
/// be read.
pub fn infer_status(
    engine: &dyn IsolationEngine,
    id: &ContainerId,
    proc_root: &Path,
) -> CorralResult<ContainerStatus> {
    let state = engine.state()?;
    if state == EngineState::Starting {
        return Ok(ContainerStatus::Creating);
    }
    if !state.is_active() {
        return Ok(ContainerStatus::Stopped);
    }
    match engine.init_pid()? {
        Some(pid) if pid > 0 => init_status(pid, id, proc_root),
        _ => Ok(ContainerStatus::Stopped),
    }
}

/// Status of the init process `pid`.
///
/// # Errors
///
/// Returns an error if `/proc/<pid>/cmdline` exists but cannot be read.
pub fn init_status(pid: u32, id: &ContainerId, proc_root: &Path) -> CorralResult<ContainerStatus> {
    let path = proc_root.join(pid.to_string()).join("cmdline");
    let cmdline = match std::fs::read(&path) {
        Ok(cmdline) => cmdline,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ContainerStatus::Stopped),
        Err(e) if e.raw_os_error() == Some(libc::ESRCH) => return Ok(ContainerStatus::Stopped),
        Err(e) => return Err(e.into()),
    };

    // Zombies have an empty command line.
    if cmdline.is_empty() {
        return Ok(ContainerStatus::Stopped);
    }
    if cmdline == init_cmdline(id) {
        Ok(ContainerStatus::Created)
    } else {
        Ok(ContainerStatus::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::LxcConfigEngine;
    use corral_common::paths::MONITOR_STATE_FILE;

    fn fake_proc(pid: u32, cmdline: &[u8]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let proc_dir = dir.path().join(pid.to_string());
        std::fs::create_dir(&proc_dir).unwrap();
        std::fs::write(proc_dir.join("cmdline"), cmdline).unwrap();
        dir
    }

    #[test]
    fn init_shim_is_created() {
        let id = ContainerId::new("web").unwrap();
        let proc_root = fake_proc(100, b"/.corral/init\0web\0");
        assert_eq!(init_status(100, &id, proc_root.path()).unwrap(), ContainerStatus::Created);
    }

    #[test]
    fn user_command_is_running() {
        let id = ContainerId::new("web").unwrap();
        let proc_root = fake_proc(100, b"nginx\0-g\0daemon off;\0");
        assert_eq!(init_status(100, &id, proc_root.path()).unwrap(), ContainerStatus::Running);

        // Another container's shim is not ours.
        let proc_root = fake_proc(100, b"/.corral/init\0db\0");
        assert_eq!(init_status(100, &id, proc_root.path()).unwrap(), ContainerStatus::Running);
    }

    #[test]
    fn gone_or_zombie_is_stopped() {
        let id = ContainerId::new("web").unwrap();
        let proc_root = fake_proc(100, b"");
        assert_eq!(init_status(100, &id, proc_root.path()).unwrap(), ContainerStatus::Stopped);
        assert_eq!(init_status(200, &id, proc_root.path()).unwrap(), ContainerStatus::Stopped);
    }

    #[test]
    fn follows_engine_state() {
        let id = ContainerId::new("web").unwrap();
        let runtime_dir = tempfile::tempdir().unwrap();
        let proc_root = fake_proc(100, b"/.corral/init\0web\0");
        let engine = LxcConfigEngine::new("web", runtime_dir.path());
        let status = || infer_status(&engine, &id, proc_root.path()).unwrap();

        assert_eq!(status(), ContainerStatus::Stopped);

        let state_file = runtime_dir.path().join(MONITOR_STATE_FILE);
        std::fs::write(&state_file, "STARTING\n").unwrap();
        assert_eq!(status(), ContainerStatus::Creating);

        std::fs::write(&state_file, "RUNNING 100\n").unwrap();
        assert_eq!(status(), ContainerStatus::Created);

        std::fs::write(&state_file, "RUNNING 300\n").unwrap();
        assert_eq!(status(), ContainerStatus::Stopped);

        std::fs::write(&state_file, "STOPPED\n").unwrap();
        assert_eq!(status(), ContainerStatus::Stopped);
    }
}
