//! On-disk layout of the runtime root.
//!
//! ```text
//! <root>/.rootfs/            where the engine mounts container root filesystems
//! <root>/<id>/               runtime directory, bind-mounted at /.corral
//!             container.json container descriptor
//!             config.json    the (amended) OCI spec
//!             config         isolation engine configuration
//!             monitor.state  coarse state written by the monitor
//!             syncfifo       start handshake pipe
//!             seccomp.conf   compiled seccomp profile
//!             devices.txt    device nodes for the mount hook
//!             masked.txt     masked paths for the mount hook
//!             init           mount point for the init shim
//! ```

use std::path::{Path, PathBuf};

/// Default runtime root.
pub const DEFAULT_ROOT: &str = "/run/corral";

/// Where the runtime directory appears inside the container.
pub const CONTAINER_INIT_DIR: &str = "/.corral";

/// Isolation engine configuration file name.
pub const ENGINE_CONFIG_FILE: &str = "config";

/// Monitor status file name.
pub const MONITOR_STATE_FILE: &str = "monitor.state";

/// Start handshake FIFO name.
pub const SYNC_FIFO_FILE: &str = "syncfifo";

/// Paths of a runtime root and its container directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    /// Runtime root (default: /run/corral).
    pub root: PathBuf,
}

impl RuntimePaths {
    /// Create paths for the given runtime root.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory the engine mounts root filesystems on.
    #[must_use]
    pub fn rootfs_mount(&self) -> PathBuf {
        self.root.join(".rootfs")
    }

    /// Runtime directory of a container.
    #[must_use]
    pub fn container(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    /// Container descriptor.
    #[must_use]
    pub fn descriptor(&self, id: &str) -> PathBuf {
        self.container(id).join("container.json")
    }

    /// Copy of the OCI spec as amended during create.
    #[must_use]
    pub fn spec(&self, id: &str) -> PathBuf {
        self.container(id).join("config.json")
    }

    /// Isolation engine configuration file.
    #[must_use]
    pub fn engine_config(&self, id: &str) -> PathBuf {
        self.container(id).join(ENGINE_CONFIG_FILE)
    }

    /// Status file maintained by the monitor process.
    #[must_use]
    pub fn monitor_state(&self, id: &str) -> PathBuf {
        self.container(id).join(MONITOR_STATE_FILE)
    }

    /// Start handshake FIFO.
    #[must_use]
    pub fn sync_fifo(&self, id: &str) -> PathBuf {
        self.container(id).join(SYNC_FIFO_FILE)
    }

    /// Compiled seccomp profile.
    #[must_use]
    pub fn seccomp_profile(&self, id: &str) -> PathBuf {
        self.container(id).join("seccomp.conf")
    }

    /// Device list consumed by the mount hook.
    #[must_use]
    pub fn devices(&self, id: &str) -> PathBuf {
        self.container(id).join("devices.txt")
    }

    /// Masked path list consumed by the mount hook.
    #[must_use]
    pub fn masked(&self, id: &str) -> PathBuf {
        self.container(id).join("masked.txt")
    }

    /// Mount point for the init shim binary.
    #[must_use]
    pub fn init_target(&self, id: &str) -> PathBuf {
        self.container(id).join("init")
    }

    /// Lists container IDs that have a runtime directory.
    ///
    /// A missing root yields an empty list. Hidden entries are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the root exists but cannot be read.
    pub fn list(&self) -> std::io::Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type()?.is_dir() && !name.starts_with('.') {
                ids.push(name);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

impl Default for RuntimePaths {
    fn default() -> Self {
        Self::new(DEFAULT_ROOT)
    }
}

impl AsRef<Path> for RuntimePaths {
    fn as_ref(&self) -> &Path {
        &self.root
    }
}
