//! Container state document.
//!
//! Based on the OCI Runtime Specification state format:
//! <https://github.com/opencontainers/runtime-spec/blob/main/runtime.md#state>

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// OCI version reported in state documents.
pub const OCI_VERSION: &str = "1.2.0";

/// Container runtime state, as printed by `state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerState {
    /// OCI version.
    pub oci_version: String,
    /// Container ID.
    pub id: String,
    /// Container status.
    pub status: ContainerStatus,
    /// Process ID of the container init process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Path to the OCI bundle.
    pub bundle: PathBuf,
    /// Annotations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl ContainerState {
    /// Builds a state document. The PID is dropped for stopped containers.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        status: ContainerStatus,
        pid: Option<u32>,
        bundle: impl Into<PathBuf>,
        annotations: BTreeMap<String, String>,
    ) -> Self {
        Self {
            oci_version: OCI_VERSION.to_string(),
            id: id.into(),
            status,
            pid: if status.is_stopped() { None } else { pid },
            bundle: bundle.into(),
            annotations,
        }
    }
}

/// Container status values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// The monitor is setting up the container.
    Creating,
    /// The init process waits for `start`.
    Created,
    /// The user process is executing.
    Running,
    /// The init process has exited.
    Stopped,
}

impl ContainerStatus {
    /// Returns true if the container can be started.
    #[must_use]
    pub const fn can_start(&self) -> bool {
        matches!(self, Self::Created)
    }

    /// Returns true if the container can receive signals.
    #[must_use]
    pub const fn can_kill(&self) -> bool {
        !self.is_stopped()
    }

    /// Returns true if the container has exited.
    #[must_use]
    pub const fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// Lowercase name as used in the state document.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Created => "created",
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
