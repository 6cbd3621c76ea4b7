//! Root filesystem configuration.

use std::path::Path;

use corral_common::CorralResult;
use corral_oci::runtime::Root;

use crate::engine::IsolationEngine;

/// Configures the root filesystem.
///
/// The rootfs is prepared by the caller (orchestrator or image tool) and
/// must never be cleaned up by the engine. `rootfs_mount` is where the
/// engine mounts it before pivoting.
///
/// # Errors
///
/// Returns an error if the engine rejects an item.
pub fn configure_rootfs(
    engine: &dyn IsolationEngine,
    root: &Root,
    propagation: Option<&str>,
    rootfs_mount: &Path,
) -> CorralResult<()> {
    engine.set_config_item("lxc.rootfs.path", &root.path.to_string_lossy())?;
    engine.set_config_item("lxc.rootfs.mount", &rootfs_mount.to_string_lossy())?;
    engine.set_config_item("lxc.rootfs.managed", "0")?;
    engine.set_config_item("lxc.ephemeral", "0")?;

    let mut options: Vec<&str> = Vec::new();
    if let Some(propagation) = propagation.filter(|p| !p.is_empty()) {
        options.push(propagation);
    }
    if root.readonly {
        options.push("ro");
    }
    engine.set_config_item("lxc.rootfs.options", &options.join(","))
}
