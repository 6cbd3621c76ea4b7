//! Container type and its on-disk descriptor.

use std::collections::BTreeMap;
use std::io::Write as _;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use corral_common::{ContainerId, CorralError, CorralResult};
use corral_oci::{ContainerState, ContainerStatus, Spec};
use serde::{Deserialize, Serialize};

use super::config::Features;
use super::state;
use crate::engine::IsolationEngine;

/// Annotation naming the engine configuration file of a container.
pub const CONFIG_FILE_ANNOTATION: &str = "org.linuxcontainers.lxc.ConfigFile";

/// Everything `create` needs to know about a new container.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    /// Container ID.
    pub id: ContainerId,
    /// OCI specification.
    pub spec: Spec,
    /// Bundle directory.
    pub bundle: PathBuf,
    /// Socket receiving the PTY master.
    pub console_socket: Option<PathBuf>,
    /// File receiving the monitor PID.
    pub pid_file: Option<PathBuf>,
    /// Engine log file.
    pub log_file: Option<PathBuf>,
    /// Engine log level.
    pub log_level: Option<String>,
}

impl ContainerConfig {
    /// Create a configuration from an already parsed spec.
    #[must_use]
    pub fn new(id: ContainerId, spec: Spec, bundle: impl Into<PathBuf>) -> Self {
        Self {
            id,
            spec,
            bundle: bundle.into(),
            console_socket: None,
            pid_file: None,
            log_file: None,
            log_level: None,
        }
    }

    /// Reads `<bundle>/config.json`.
    ///
    /// # Errors
    ///
    /// Returns an error if the spec cannot be read or parsed.
    pub fn from_bundle(id: ContainerId, bundle: impl Into<PathBuf>) -> CorralResult<Self> {
        let bundle = bundle.into();
        let spec = Spec::load(&bundle.join("config.json"))?;
        Ok(Self::new(id, spec, bundle))
    }

    /// Set the console socket.
    #[must_use]
    pub fn with_console_socket(mut self, socket: Option<PathBuf>) -> Self {
        self.console_socket = socket;
        self
    }

    /// Set the pid file.
    #[must_use]
    pub fn with_pid_file(mut self, pid_file: Option<PathBuf>) -> Self {
        self.pid_file = pid_file;
        self
    }

    /// Set the engine log sink.
    #[must_use]
    pub fn with_log(mut self, file: Option<PathBuf>, level: Option<String>) -> Self {
        self.log_file = file;
        self.log_level = level;
        self
    }
}

/// Durable record of a created container (`container.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    /// Container ID.
    pub id: ContainerId,
    /// When `create` spawned the monitor.
    pub created_at: DateTime<Utc>,
    /// Runtime root the container lives in.
    pub root: PathBuf,
    /// Bundle directory.
    pub bundle: PathBuf,
    /// Console socket given to `create`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console_socket: Option<PathBuf>,
    /// Pid file given to `create`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid_file: Option<PathBuf>,
    /// PID of the monitor process.
    pub monitor_pid: u32,
    /// Cgroup directory of the monitor, relative to the cgroup root.
    pub monitor_cgroup_dir: String,
    /// Cgroup directory of the container, relative to the cgroup root.
    pub cgroup_dir: String,
    /// Engine log file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    /// Engine log level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    /// Features the container was created with.
    pub features: Features,
}

impl Descriptor {
    /// Writes the descriptor. Fails if one already exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists or cannot be written.
    pub fn create(&self, path: &Path) -> CorralResult<()> {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o440)
            .open(path)?;
        serde_json::to_writer_pretty(&mut file, self)?;
        file.write_all(b"\n")?;
        Ok(())
    }

    /// Reads a descriptor.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> CorralResult<Self> {
        let data = std::fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }
}

/// Writes `pid` to `path` atomically: a temporary file in the same
/// directory is renamed over the target.
///
/// # Errors
///
/// Returns an error if the file cannot be written or renamed.
pub fn write_pid_file(path: &Path, pid: u32) -> CorralResult<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::Builder::new().prefix(".corral-pid").tempfile_in(dir)?;
    write!(tmp, "{pid}")?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| CorralError::Io(e.error))?;
    tracing::debug!(path = %path.display(), pid, "wrote pid file");
    Ok(())
}

/// A created container.
#[derive(Debug, Clone)]
pub struct Container {
    engine: Arc<dyn IsolationEngine>,
    descriptor: Descriptor,
    spec: Spec,
    runtime_dir: PathBuf,
    proc_root: PathBuf,
}

impl Container {
    pub(crate) fn new(
        engine: Arc<dyn IsolationEngine>,
        descriptor: Descriptor,
        spec: Spec,
        runtime_dir: PathBuf,
        proc_root: PathBuf,
    ) -> Self {
        Self {
            engine,
            descriptor,
            spec,
            runtime_dir,
            proc_root,
        }
    }

    /// ID accessor.
    #[must_use]
    pub fn id(&self) -> &ContainerId {
        &self.descriptor.id
    }

    /// The container descriptor.
    #[must_use]
    pub const fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// The spec as amended during create.
    #[must_use]
    pub const fn spec(&self) -> &Spec {
        &self.spec
    }

    /// Runtime directory (`<root>/<id>`).
    #[must_use]
    pub fn runtime_dir(&self) -> &Path {
        &self.runtime_dir
    }

    /// Engine handle.
    #[must_use]
    pub fn engine(&self) -> &dyn IsolationEngine {
        self.engine.as_ref()
    }

    /// PID of the container init process, if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot report it.
    pub fn init_pid(&self) -> CorralResult<Option<u32>> {
        self.engine.init_pid()
    }

    /// Current status, derived from the engine and the process table.
    ///
    /// # Errors
    ///
    /// Returns an error if the status cannot be determined; callers retry
    /// rather than assume a status.
    pub fn status(&self) -> CorralResult<ContainerStatus> {
        state::infer_status(self.engine.as_ref(), self.id(), &self.proc_root)
    }

    /// OCI state document.
    ///
    /// # Errors
    ///
    /// Returns an error if the status cannot be determined.
    pub fn state(&self) -> CorralResult<ContainerState> {
        let status = self.status()?;
        let pid = self.init_pid()?;
        let mut annotations: BTreeMap<String, String> = self.spec.annotations.clone();
        annotations
            .entry(CONFIG_FILE_ANNOTATION.to_string())
            .or_insert_with(|| {
                self.runtime_dir
                    .join(corral_common::paths::ENGINE_CONFIG_FILE)
                    .to_string_lossy()
                    .into_owned()
            });
        Ok(ContainerState::new(
            self.id().as_str(),
            status,
            pid,
            &self.descriptor.bundle,
            annotations,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::LxcConfigEngine;

    fn descriptor(root: &Path) -> Descriptor {
        Descriptor {
            id: ContainerId::new("web").unwrap(),
            created_at: Utc::now(),
            root: root.to_path_buf(),
            bundle: PathBuf::from("/bundles/web"),
            console_socket: None,
            pid_file: Some(PathBuf::from("/run/web.pid")),
            monitor_pid: 4242,
            monitor_cgroup_dir: "corral-monitor.slice/web.scope".to_string(),
            cgroup_dir: "corral/web".to_string(),
            log_file: None,
            log_level: None,
            features: Features::default(),
        }
    }

    #[test]
    fn descriptor_is_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("container.json");
        let desc = descriptor(dir.path());

        desc.create(&path).unwrap();
        assert_eq!(Descriptor::load(&path).unwrap(), desc);
        assert!(desc.create(&path).is_err());
    }

    #[test]
    fn descriptor_field_names() {
        let dir = tempfile::tempdir().unwrap();
        let json = serde_json::to_value(descriptor(dir.path())).unwrap();
        for field in ["id", "created_at", "root", "bundle", "pid_file", "monitor_cgroup_dir", "cgroup_dir"] {
            assert!(json.get(field).is_some(), "{field}");
        }
        assert_eq!(json["features"]["cgroup_devices"], true);
        assert!(json.get("console_socket").is_none());
    }

    #[test]
    fn pid_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("web.pid");
        std::fs::write(&path, "1").unwrap();

        write_pid_file(&path, 31337).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "31337");
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn state_carries_config_annotation() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(LxcConfigEngine::new("web", dir.path()));
        let mut spec = Spec::default();
        spec.annotations.insert("io.kubernetes.pod".to_string(), "nginx".to_string());
        let container = Container::new(
            engine,
            descriptor(dir.path()),
            spec,
            dir.path().to_path_buf(),
            PathBuf::from("/proc"),
        );

        let state = container.state().unwrap();
        assert_eq!(state.status, ContainerStatus::Stopped);
        assert_eq!(state.pid, None);
        assert_eq!(state.annotations["io.kubernetes.pod"], "nginx");
        assert_eq!(
            state.annotations[CONFIG_FILE_ANNOTATION],
            dir.path().join("config").to_string_lossy()
        );
    }
}
