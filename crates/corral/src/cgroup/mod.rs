//! Cgroup v2 management.
//!
//! The engine creates the container's cgroup and applies its limits from
//! the configuration written here. Corral itself only touches the cgroup
//! filesystem to tear the group down again.

mod manager;
pub mod path;
pub mod resources;

pub use manager::{CGROUP2_SUPER_MAGIC, Cgroup, CgroupEvents, MAX_DELETE_DEPTH, detect_cgroup_root, is_cgroup2};

use corral_common::CorralResult;
use corral_oci::runtime::Linux;

use crate::engine::IsolationEngine;

/// Cgroup directories of a container, relative to the cgroup root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgroupDirs {
    /// Directory holding the container's processes.
    pub container: String,
    /// Directory holding the monitor process.
    pub monitor: String,
}

/// Writes the cgroup placement and resource limits.
///
/// Engines that can place the monitor separately get both directories;
/// older ones only learn the container directory.
///
/// # Errors
///
/// Returns an error if a resource limit is invalid or an item is rejected.
pub fn configure_cgroup(
    engine: &dyn IsolationEngine,
    linux: &Linux,
    dirs: &CgroupDirs,
    device_filtering: bool,
) -> CorralResult<()> {
    engine.set_config_item("lxc.cgroup.relative", "0")?;

    if engine.is_supported_config_item("lxc.cgroup.dir.container")
        && engine.is_supported_config_item("lxc.cgroup.dir.monitor")
    {
        engine.set_config_item("lxc.cgroup.dir.container", &dirs.container)?;
        engine.set_config_item("lxc.cgroup.dir.monitor", &dirs.monitor)?;
    } else {
        engine.set_config_item("lxc.cgroup.dir", &dirs.container)?;
    }

    if let Some(resources) = &linux.resources {
        resources::configure_resources(engine, resources, device_filtering)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::LxcConfigEngine;
    use corral_oci::runtime::{PidsResources, Resources};

    #[test]
    fn places_container_and_monitor() {
        let engine = LxcConfigEngine::new("web", "/nonexistent");
        let linux = Linux {
            resources: Some(Resources {
                pids: Some(PidsResources { limit: 100 }),
                ..Resources::default()
            }),
            ..Linux::default()
        };
        let dirs = CgroupDirs {
            container: "corral/web".to_string(),
            monitor: "corral-monitor.slice/web.scope".to_string(),
        };
        configure_cgroup(&engine, &linux, &dirs, true).unwrap();

        assert_eq!(engine.config_item("lxc.cgroup.relative").as_deref(), Some("0"));
        assert_eq!(engine.config_item("lxc.cgroup.dir.container").as_deref(), Some("corral/web"));
        assert_eq!(
            engine.config_item("lxc.cgroup.dir.monitor").as_deref(),
            Some("corral-monitor.slice/web.scope")
        );
        assert_eq!(engine.config_item("lxc.cgroup2.pids.max").as_deref(), Some("100"));
    }
}
