//! OCI Runtime Specification types.
//!
//! Based on the OCI Runtime Specification v1.2.0:
//! <https://github.com/opencontainers/runtime-spec/blob/main/config.md>
//!
//! Only the parts the runtime translates are modelled. Unknown fields are
//! ignored on input.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use corral_common::{CorralError, CorralResult};
use serde::{Deserialize, Serialize};

/// OCI Runtime Specification (config.json).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Spec {
    /// OCI version.
    #[serde(default = "default_oci_version")]
    pub oci_version: String,

    /// Container's root filesystem.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<Root>,

    /// Container process configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process: Option<Process>,

    /// Container hostname.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    /// Additional mounts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<Mount>,

    /// Lifecycle hooks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hooks: Option<Hooks>,

    /// Annotations (key-value pairs).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Linux-specific configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linux: Option<Linux>,
}

fn default_oci_version() -> String {
    "1.2.0".to_string()
}

impl Default for Spec {
    fn default() -> Self {
        Self {
            oci_version: default_oci_version(),
            root: None,
            process: None,
            hostname: None,
            mounts: Vec::new(),
            hooks: None,
            annotations: BTreeMap::new(),
            linux: None,
        }
    }
}

impl Spec {
    /// Reads a spec from a `config.json` file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a valid spec.
    pub fn load(path: &Path) -> CorralResult<Self> {
        let data = std::fs::read(path)?;
        serde_json::from_slice(&data).map_err(|e| {
            CorralError::validation(format!("failed to parse {}: {e}", path.display()))
        })
    }

    /// Linux section, created empty on first access.
    pub fn linux_mut(&mut self) -> &mut Linux {
        self.linux.get_or_insert_with(Linux::default)
    }

    /// Namespaces declared in the Linux section.
    #[must_use]
    pub fn namespaces(&self) -> &[Namespace] {
        self.linux.as_ref().map_or(&[], |l| l.namespaces.as_slice())
    }

    /// Returns the declared namespace of the given type.
    #[must_use]
    pub fn namespace(&self, ns_type: NamespaceType) -> Option<&Namespace> {
        self.namespaces().iter().find(|ns| ns.ns_type == ns_type)
    }
}

/// Root filesystem configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Root {
    /// Path to the root filesystem, absolute or relative to the bundle.
    pub path: PathBuf,

    /// Whether the root filesystem is read-only.
    #[serde(default)]
    pub readonly: bool,
}

/// Process configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Process {
    /// Whether to run with a terminal.
    #[serde(default)]
    pub terminal: bool,

    /// User to run as.
    #[serde(default)]
    pub user: User,

    /// Command arguments.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,

    /// Working directory. Empty means `/`.
    #[serde(default)]
    pub cwd: PathBuf,

    /// Capabilities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Capabilities>,

    /// Resource limits (rlimits).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rlimits: Vec<Rlimit>,

    /// No new privileges flag.
    #[serde(default)]
    pub no_new_privileges: bool,

    /// AppArmor profile.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apparmor_profile: Option<String>,

    /// OOM score adjustment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oom_score_adj: Option<i32>,
}

/// User and group IDs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// User ID.
    #[serde(default)]
    pub uid: u32,
    /// Group ID.
    #[serde(default)]
    pub gid: u32,
    /// Additional group IDs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_gids: Vec<u32>,
}

/// Linux capabilities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Capabilities {
    /// Bounding capabilities.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bounding: Vec<String>,
    /// Effective capabilities.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub effective: Vec<String>,
    /// Inheritable capabilities.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inheritable: Vec<String>,
    /// Permitted capabilities.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permitted: Vec<String>,
    /// Ambient capabilities.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ambient: Vec<String>,
}

/// Resource limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rlimit {
    /// Limit type (e.g., `RLIMIT_NOFILE`).
    #[serde(rename = "type")]
    pub limit_type: String,
    /// Hard limit.
    pub hard: u64,
    /// Soft limit.
    pub soft: u64,
}

/// Mount configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    /// Mount destination path (inside container).
    pub destination: PathBuf,
    /// Mount type (e.g., "bind", "tmpfs", "proc").
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub mount_type: Option<String>,
    /// Mount source path (outside container).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    /// Mount options.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl Mount {
    /// Returns true for bind mounts, whether declared by type or by option.
    #[must_use]
    pub fn is_bind(&self) -> bool {
        self.mount_type.as_deref() == Some("bind")
            || self.options.iter().any(|o| o == "bind" || o == "rbind")
    }

    /// Returns true if `option` is present.
    #[must_use]
    pub fn has_option(&self, option: &str) -> bool {
        self.options.iter().any(|o| o == option)
    }
}

/// Lifecycle hooks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hooks {
    /// Hooks run before start (in runtime namespace, deprecated).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prestart: Vec<Hook>,
    /// Hooks run in the runtime namespace after the environment is created.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub create_runtime: Vec<Hook>,
    /// Hooks run in the container namespace after the environment is created.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub create_container: Vec<Hook>,
    /// Hooks run before the user process is executed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub start_container: Vec<Hook>,
    /// Hooks run after the user process is started.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub poststart: Vec<Hook>,
    /// Hooks run after the container is deleted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub poststop: Vec<Hook>,
}

/// A lifecycle hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hook {
    /// Path to the hook executable.
    pub path: PathBuf,
    /// Arguments to the hook, including argv[0].
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Environment variables for the hook.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    /// Timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
}

/// Linux-specific configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Linux {
    /// UID mappings (for user namespaces).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uid_mappings: Vec<IdMapping>,
    /// GID mappings (for user namespaces).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gid_mappings: Vec<IdMapping>,
    /// Kernel parameters.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sysctl: BTreeMap<String, String>,
    /// Namespaces to create/join.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<Namespace>,
    /// Device nodes to create.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<Device>,
    /// Cgroup path, plain or systemd encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cgroups_path: Option<String>,
    /// Resource limits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Resources>,
    /// Seccomp configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seccomp: Option<Seccomp>,
    /// Rootfs propagation mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rootfs_propagation: Option<String>,
    /// Masked paths (hidden from container).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub masked_paths: Vec<String>,
    /// Read-only paths.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub readonly_paths: Vec<String>,
}

/// ID mapping for user/group namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdMapping {
    /// Container ID (start of range).
    #[serde(rename = "containerID")]
    pub container_id: u32,
    /// Host ID (start of range).
    #[serde(rename = "hostID")]
    pub host_id: u32,
    /// Size of the range.
    pub size: u32,
}

/// Namespace configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    /// Namespace type.
    #[serde(rename = "type")]
    pub ns_type: NamespaceType,
    /// Path to existing namespace (to join instead of create).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Namespace {
    /// The path to join, treating an empty path as absent.
    #[must_use]
    pub fn join_path(&self) -> Option<&Path> {
        self.path.as_deref().filter(|p| !p.as_os_str().is_empty())
    }
}

/// Namespace types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceType {
    /// PID namespace.
    Pid,
    /// Network namespace.
    Network,
    /// Mount namespace.
    Mount,
    /// IPC namespace.
    Ipc,
    /// UTS namespace.
    Uts,
    /// User namespace.
    User,
    /// Cgroup namespace.
    Cgroup,
    /// Time namespace.
    Time,
}

impl fmt::Display for NamespaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pid => "pid",
            Self::Network => "network",
            Self::Mount => "mount",
            Self::Ipc => "ipc",
            Self::Uts => "uts",
            Self::User => "user",
            Self::Cgroup => "cgroup",
            Self::Time => "time",
        };
        f.write_str(name)
    }
}

/// Device node to create inside the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Device path.
    pub path: PathBuf,
    /// Device type (c, b, u or p).
    #[serde(rename = "type")]
    pub device_type: String,
    /// Major number.
    #[serde(default)]
    pub major: i64,
    /// Minor number.
    #[serde(default)]
    pub minor: i64,
    /// File mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_mode: Option<u32>,
    /// UID of the device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    /// GID of the device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
}

/// Resource limits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resources {
    /// Device cgroup rules.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<DeviceCgroup>,
    /// CPU resources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuResources>,
    /// Memory resources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryResources>,
    /// PIDs limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pids: Option<PidsResources>,
}

/// Device cgroup allow/deny rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCgroup {
    /// Allow or deny.
    pub allow: bool,
    /// Device type: `a`, `b`, `c`, or empty for any.
    #[serde(rename = "type", default)]
    pub device_type: String,
    /// Major number, any if absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub major: Option<i64>,
    /// Minor number, any if absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minor: Option<i64>,
    /// Access string, a combination of `r`, `w` and `m`.
    #[serde(default)]
    pub access: String,
}

/// CPU resource limits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuResources {
    /// CPU shares (relative weight).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shares: Option<u64>,
    /// CPU quota (in microseconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<i64>,
    /// CPU period (in microseconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<u64>,
    /// CPUs to use (e.g., "0-2,4").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<String>,
    /// Memory nodes to use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mems: Option<String>,
}

/// Memory resource limits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryResources {
    /// Hard memory limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    /// Memory reservation (soft limit).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservation: Option<i64>,
    /// Memory + swap limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swap: Option<i64>,
}

/// PIDs resource limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PidsResources {
    /// Maximum number of PIDs.
    pub limit: i64,
}

/// Seccomp configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Seccomp {
    /// Default action.
    pub default_action: SeccompAction,
    /// Errno returned by a default `SCMP_ACT_ERRNO`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_errno_ret: Option<u32>,
    /// Architectures.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub architectures: Vec<String>,
    /// Flags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
    /// Syscall rules.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub syscalls: Vec<SeccompSyscall>,
}

/// Seccomp action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeccompAction {
    /// Kill the thread.
    ScmpActKill,
    /// Kill the thread.
    ScmpActKillThread,
    /// Kill the whole process.
    ScmpActKillProcess,
    /// Send SIGSYS.
    ScmpActTrap,
    /// Return an error.
    ScmpActErrno,
    /// Notify a tracing process.
    ScmpActTrace,
    /// Log and continue.
    ScmpActLog,
    /// Allow the syscall.
    ScmpActAllow,
    /// Notify userspace.
    ScmpActNotify,
}

impl fmt::Display for SeccompAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ScmpActKill => "SCMP_ACT_KILL",
            Self::ScmpActKillThread => "SCMP_ACT_KILL_THREAD",
            Self::ScmpActKillProcess => "SCMP_ACT_KILL_PROCESS",
            Self::ScmpActTrap => "SCMP_ACT_TRAP",
            Self::ScmpActErrno => "SCMP_ACT_ERRNO",
            Self::ScmpActTrace => "SCMP_ACT_TRACE",
            Self::ScmpActLog => "SCMP_ACT_LOG",
            Self::ScmpActAllow => "SCMP_ACT_ALLOW",
            Self::ScmpActNotify => "SCMP_ACT_NOTIFY",
        };
        f.write_str(name)
    }
}

/// Seccomp syscall rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeccompSyscall {
    /// Syscall names.
    pub names: Vec<String>,
    /// Action to take.
    pub action: SeccompAction,
    /// Errno to return (for `SCMP_ACT_ERRNO`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errno_ret: Option<u32>,
    /// Argument conditions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<SeccompArg>,
}

/// Seccomp argument condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeccompArg {
    /// Argument index.
    pub index: u32,
    /// Value to compare.
    pub value: u64,
    /// Second value (for masked equality).
    #[serde(default)]
    pub value_two: u64,
    /// Comparison operator.
    pub op: SeccompOperator,
}

/// Seccomp comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeccompOperator {
    /// Not equal.
    ScmpCmpNe,
    /// Less than.
    ScmpCmpLt,
    /// Less than or equal.
    ScmpCmpLe,
    /// Equal.
    ScmpCmpEq,
    /// Greater than or equal.
    ScmpCmpGe,
    /// Greater than.
    ScmpCmpGt,
    /// Masked equality.
    ScmpCmpMaskedEq,
}

impl fmt::Display for SeccompOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ScmpCmpNe => "SCMP_CMP_NE",
            Self::ScmpCmpLt => "SCMP_CMP_LT",
            Self::ScmpCmpLe => "SCMP_CMP_LE",
            Self::ScmpCmpEq => "SCMP_CMP_EQ",
            Self::ScmpCmpGe => "SCMP_CMP_GE",
            Self::ScmpCmpGt => "SCMP_CMP_GT",
            Self::ScmpCmpMaskedEq => "SCMP_CMP_MASKED_EQ",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "ociVersion": "1.0.2",
        "root": { "path": "rootfs", "readonly": true },
        "process": { "user": { "uid": 0, "gid": 0 }, "args": ["sh"], "cwd": "/" },
        "linux": {
            "namespaces": [ { "type": "pid" }, { "type": "network", "path": "/proc/1/ns/net" } ],
            "uidMappings": [ { "containerID": 0, "hostID": 100000, "size": 65536 } ],
            "resources": {
                "devices": [ { "allow": false, "access": "rwm" }, { "allow": true, "type": "c", "major": 1, "minor": 3, "access": "rwm" } ],
                "pids": { "limit": 32 }
            },
            "seccomp": {
                "defaultAction": "SCMP_ACT_ERRNO",
                "syscalls": [ { "names": ["kill"], "action": "SCMP_ACT_ALLOW", "args": [ { "index": 1, "value": 9, "op": "SCMP_CMP_EQ" } ] } ]
            }
        }
    }"#;

    #[test]
    fn spec_default() {
        let spec = Spec::default();
        assert_eq!(spec.oci_version, "1.2.0");
        assert!(spec.root.is_none());
        assert!(spec.process.is_none());
        assert!(spec.namespaces().is_empty());
    }

    #[test]
    fn parse_minimal_bundle_config() {
        let spec: Spec = serde_json::from_str(MINIMAL).unwrap();
        let linux = spec.linux.as_ref().unwrap();

        assert_eq!(linux.uid_mappings[0].host_id, 100_000);
        assert_eq!(spec.namespaces().len(), 2);
        assert!(spec.namespace(NamespaceType::Pid).unwrap().join_path().is_none());
        assert_eq!(
            spec.namespace(NamespaceType::Network).unwrap().join_path(),
            Some(Path::new("/proc/1/ns/net"))
        );

        let resources = linux.resources.as_ref().unwrap();
        assert_eq!(resources.devices[0].device_type, "");
        assert_eq!(resources.devices[0].major, None);
        assert_eq!(resources.devices[1].major, Some(1));
        assert_eq!(resources.pids.as_ref().unwrap().limit, 32);

        let seccomp = linux.seccomp.as_ref().unwrap();
        assert_eq!(seccomp.default_action, SeccompAction::ScmpActErrno);
        assert_eq!(seccomp.syscalls[0].args[0].op, SeccompOperator::ScmpCmpEq);
        assert_eq!(seccomp.syscalls[0].args[0].value_two, 0);
    }

    #[test]
    fn empty_namespace_path_is_clone() {
        let ns: Namespace = serde_json::from_str(r#"{"type":"uts","path":""}"#).unwrap();
        assert!(ns.join_path().is_none());
    }

    #[test]
    fn load_reports_path_on_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = Spec::load(&path).unwrap_err();
        assert!(matches!(err, CorralError::Validation { .. }));
        assert!(err.to_string().contains("config.json"));
    }

    #[test]
    fn mount_helpers() {
        let mount = Mount {
            destination: "/data".into(),
            mount_type: Some("none".into()),
            source: Some("/srv".into()),
            options: vec!["rbind".into(), "optional".into()],
        };
        assert!(mount.is_bind());
        assert!(mount.has_option("optional"));
        assert!(!mount.has_option("ro"));
    }

    #[test]
    fn seccomp_names_render_like_libseccomp() {
        assert_eq!(SeccompAction::ScmpActKillProcess.to_string(), "SCMP_ACT_KILL_PROCESS");
        assert_eq!(SeccompOperator::ScmpCmpMaskedEq.to_string(), "SCMP_CMP_MASKED_EQ");
    }
}
