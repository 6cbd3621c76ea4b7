//! Isolation engine abstraction.
//!
//! Corral never attaches namespaces or cgroups itself. It translates the OCI
//! spec into key/value configuration items, hands them to an isolation
//! engine, and lets the engine's monitor process build the container.
//! Every configuration component writes through [`IsolationEngine`].

pub mod lxc;

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use corral_common::{CorralError, CorralResult};

use crate::exec::monitor::{MonitorCommand, MonitorHandle};

pub use lxc::{LxcConfigEngine, LxcProvider};

/// Coarse process-manager state reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineState {
    /// No container process exists.
    Stopped,
    /// The monitor is setting up the container.
    Starting,
    /// The container init process exists.
    Running,
    /// The container is shutting down.
    Stopping,
    /// Setup failed and is being rolled back.
    Aborting,
    /// The container is being frozen.
    Freezing,
    /// The container is frozen.
    Frozen,
    /// The container was thawed.
    Thawed,
}

impl EngineState {
    /// Returns true if an init process may exist.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !matches!(self, Self::Stopped | Self::Starting)
    }
}

impl FromStr for EngineState {
    type Err = CorralError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STOPPED" => Ok(Self::Stopped),
            "STARTING" => Ok(Self::Starting),
            "RUNNING" => Ok(Self::Running),
            "STOPPING" => Ok(Self::Stopping),
            "ABORTING" => Ok(Self::Aborting),
            "FREEZING" => Ok(Self::Freezing),
            "FROZEN" => Ok(Self::Frozen),
            "THAWED" => Ok(Self::Thawed),
            other => Err(CorralError::Internal {
                message: format!("unknown engine state {other:?}"),
            }),
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "STOPPED",
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
            Self::Aborting => "ABORTING",
            Self::Freezing => "FREEZING",
            Self::Frozen => "FROZEN",
            Self::Thawed => "THAWED",
        };
        f.write_str(name)
    }
}

/// Configuration sink and process spawner for one container.
///
/// Implementations use interior mutability; a container shares its engine
/// handle between the configuration steps and the state queries.
#[async_trait]
pub trait IsolationEngine: Send + Sync + fmt::Debug {
    /// Sets a configuration item. Multi-valued keys accumulate values, an
    /// empty value clears them.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::Configuration`] if the engine rejects the item.
    fn set_config_item(&self, key: &str, value: &str) -> CorralResult<()>;

    /// Current value of a configuration item, `None` when unset.
    fn config_item(&self, key: &str) -> Option<String>;

    /// Returns true if the engine understands `key`.
    fn is_supported_config_item(&self, key: &str) -> bool;

    /// Writes the configuration where the monitor will read it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    fn save_config(&self, path: &Path) -> CorralResult<()>;

    /// Coarse state as seen by the engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be determined.
    fn state(&self) -> CorralResult<EngineState>;

    /// PID of the container init process, if one exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be determined.
    fn init_pid(&self) -> CorralResult<Option<u32>>;

    /// Spawns the monitor process that builds and holds the container.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned.
    async fn spawn_monitor(&self, command: MonitorCommand) -> CorralResult<MonitorHandle>;

    /// Releases the engine handle. The engine must not be used afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot release its resources.
    fn release(&self) -> CorralResult<()>;
}

/// Opens engine handles for container runtime directories.
pub trait EngineProvider: Send + Sync + fmt::Debug {
    /// Creates a fresh, empty engine for a new container.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be created.
    fn create(&self, name: &str, runtime_dir: &Path) -> CorralResult<Arc<dyn IsolationEngine>>;

    /// Opens the engine of an existing container.
    ///
    /// # Errors
    ///
    /// Returns an error if the saved engine state cannot be read.
    fn load(&self, name: &str, runtime_dir: &Path) -> CorralResult<Arc<dyn IsolationEngine>>;
}

/// Sets `key` only if the engine supports it. Returns whether it was set.
///
/// # Errors
///
/// Returns an error if the engine rejects a supported item.
pub fn set_if_supported(engine: &dyn IsolationEngine, key: &str, value: &str) -> CorralResult<bool> {
    if engine.is_supported_config_item(key) {
        engine.set_config_item(key, value)?;
        Ok(true)
    } else {
        tracing::debug!(key, "configuration item not supported by engine");
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_names_round_trip() {
        for state in [
            EngineState::Stopped,
            EngineState::Starting,
            EngineState::Running,
            EngineState::Frozen,
        ] {
            assert_eq!(state.to_string().parse::<EngineState>().unwrap(), state);
        }
        assert!("BOGUS".parse::<EngineState>().is_err());
    }

    #[test]
    fn active_states() {
        assert!(!EngineState::Stopped.is_active());
        assert!(!EngineState::Starting.is_active());
        assert!(EngineState::Running.is_active());
        assert!(EngineState::Thawed.is_active());
    }
}
