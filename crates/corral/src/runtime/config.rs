//! Runtime configuration.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use corral_common::paths::DEFAULT_ROOT;
use corral_common::{CorralError, CorralResult};
use serde::{Deserialize, Serialize};

/// System-wide configuration file, read when present.
pub const DEFAULT_CONFIG_FILE: &str = "/etc/corral/config.toml";

/// Monitor executable, starts and holds the container.
pub const MONITOR_EXEC: &str = "corral-monitor";
/// Init shim executable, the container's first process.
pub const INIT_EXEC: &str = "corral-init";
/// Mount hook executable, creates devices and masks paths.
pub const HOOK_EXEC: &str = "corral-hook";

/// Per-operation deadlines in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Deadline of `create`, including the wait for the init process.
    pub create: u64,
    /// Deadline of `start`.
    pub start: u64,
    /// Deadline of `kill`.
    pub kill: u64,
    /// Deadline of `delete`, including the cgroup teardown.
    pub delete: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            create: 60,
            start: 30,
            kill: 10,
            delete: 10,
        }
    }
}

impl Timeouts {
    /// Deadline of `create`.
    #[must_use]
    pub const fn create(&self) -> Duration {
        Duration::from_secs(self.create)
    }

    /// Deadline of `start`.
    #[must_use]
    pub const fn start(&self) -> Duration {
        Duration::from_secs(self.start)
    }

    /// Deadline of `kill`.
    #[must_use]
    pub const fn kill(&self) -> Duration {
        Duration::from_secs(self.kill)
    }

    /// Deadline of `delete`.
    #[must_use]
    pub const fn delete(&self) -> Duration {
        Duration::from_secs(self.delete)
    }
}

/// Security features applied to every container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct Features {
    /// Compile and load the seccomp policy.
    pub seccomp: bool,
    /// Restrict capabilities to the permitted set.
    pub capabilities: bool,
    /// Apply the AppArmor profile.
    pub apparmor: bool,
    /// Translate device cgroup rules.
    pub cgroup_devices: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            seccomp: true,
            capabilities: true,
            apparmor: true,
            cgroup_devices: true,
        }
    }
}

/// Runtime configuration options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Runtime root holding one directory per container.
    pub root: PathBuf,
    /// Cgroup paths use the systemd `slice:prefix:name` encoding.
    pub systemd_cgroup: bool,
    /// Slice the monitor processes are placed in.
    pub monitor_cgroup: String,
    /// Directory with the monitor, init and hook executables.
    pub libexec: PathBuf,
    /// Operation deadlines.
    pub timeouts: Timeouts,
    /// Security features.
    pub features: Features,
    /// Host environment variables passed on to the monitor.
    pub env: Vec<String>,
    /// Mount point of procfs.
    pub proc_root: PathBuf,
    /// Cgroup v2 mount point, detected when unset.
    pub cgroup_root: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_ROOT),
            systemd_cgroup: false,
            monitor_cgroup: "corral-monitor.slice".to_string(),
            libexec: PathBuf::from("/usr/libexec/corral"),
            timeouts: Timeouts::default(),
            features: Features::default(),
            env: ["HOME", "XDG_RUNTIME_DIR", "PATH"].map(String::from).to_vec(),
            proc_root: PathBuf::from("/proc"),
            cgroup_root: None,
        }
    }
}

impl RuntimeConfig {
    /// Parses a TOML configuration. Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns a [`CorralError::Validation`] if the document is malformed.
    pub fn from_toml(content: &str) -> CorralResult<Self> {
        toml::from_str(content).map_err(|e| CorralError::validation(format!("invalid runtime config: {e}")))
    }

    /// Loads the configuration file at `path`, or the system-wide file if
    /// no path is given and it exists, or the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly named file is missing, or if a
    /// file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> CorralResult<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };
        let content = std::fs::read_to_string(&path).map_err(|e| {
            CorralError::configuration_with(format!("failed to read {}", path.display()), e)
        })?;
        let config = Self::from_toml(&content)?;
        tracing::debug!(path = %path.display(), "loaded runtime config");
        Ok(config)
    }

    /// Set the root directory.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Enable systemd cgroups.
    #[must_use]
    pub const fn with_systemd_cgroup(mut self, enabled: bool) -> Self {
        self.systemd_cgroup = enabled;
        self
    }

    /// Set the executable directory.
    #[must_use]
    pub fn with_libexec(mut self, libexec: impl Into<PathBuf>) -> Self {
        self.libexec = libexec.into();
        self
    }

    /// Set the operation deadlines.
    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the security features.
    #[must_use]
    pub const fn with_features(mut self, features: Features) -> Self {
        self.features = features;
        self
    }

    /// Set the cgroup v2 mount point.
    #[must_use]
    pub fn with_cgroup_root(mut self, cgroup_root: impl Into<PathBuf>) -> Self {
        self.cgroup_root = Some(cgroup_root.into());
        self
    }

    /// Set the procfs mount point.
    #[must_use]
    pub fn with_proc_root(mut self, proc_root: impl Into<PathBuf>) -> Self {
        self.proc_root = proc_root.into();
        self
    }

    /// Path of the monitor executable.
    #[must_use]
    pub fn monitor_program(&self) -> PathBuf {
        self.libexec.join(MONITOR_EXEC)
    }

    /// Path of the init shim executable.
    #[must_use]
    pub fn init_program(&self) -> PathBuf {
        self.libexec.join(INIT_EXEC)
    }

    /// Path of the mount hook executable.
    #[must_use]
    pub fn hook_program(&self) -> PathBuf {
        self.libexec.join(HOOK_EXEC)
    }

    /// The monitor's environment: every variable of [`Self::env`] that is
    /// set to a non-empty value in the runtime's own environment.
    #[must_use]
    pub fn monitor_env(&self) -> Vec<(OsString, OsString)> {
        self.env
            .iter()
            .filter_map(|name| {
                std::env::var_os(name)
                    .filter(|value| !value.is_empty())
                    .map(|value| (OsString::from(name), value))
            })
            .collect()
    }
}
