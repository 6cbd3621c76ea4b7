//! Init shim wiring.
//!
//! The runtime directory is bind-mounted read-only at `/.corral` inside the
//! container and the init shim binary on top of `/.corral/init`. The engine
//! starts `/.corral/init <id>` as the container's first process; it blocks
//! on the sync FIFO until `start`, then executes the user command.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use corral_common::paths::{CONTAINER_INIT_DIR, SYNC_FIFO_FILE};
use corral_common::{ContainerId, CorralError, CorralResult};
use corral_oci::Spec;
use corral_oci::runtime::{IdMapping, Mount};

use crate::engine::{IsolationEngine, set_if_supported};
use crate::exec::sync;

/// Name of the init shim inside [`CONTAINER_INIT_DIR`].
pub const INIT_NAME: &str = "init";

/// Command line the engine runs as the container's first process.
#[must_use]
pub fn init_command(id: &ContainerId) -> String {
    format!("{CONTAINER_INIT_DIR}/{INIT_NAME} {id}")
}

/// Prefix of `/proc/<pid>/cmdline` while the init shim has not yet
/// executed the user command.
#[must_use]
pub fn init_cmdline(id: &ContainerId) -> Vec<u8> {
    format!("{CONTAINER_INIT_DIR}/{INIT_NAME}\0{id}\0").into_bytes()
}

/// Maps a container ID to the host ID through `mappings`. Unmapped IDs
/// are returned unchanged.
///
/// # Errors
///
/// Returns a [`CorralError::Validation`] if the mapping points past the
/// end of the host ID space.
pub fn unmap_id(id: u32, mappings: &[IdMapping]) -> CorralResult<u32> {
    let Some(m) = mappings
        .iter()
        .find(|m| id >= m.container_id && id - m.container_id < m.size)
    else {
        return Ok(id);
    };
    m.host_id.checked_add(id - m.container_id).ok_or_else(|| {
        CorralError::validation(format!(
            "id mapping {} {} {} overflows for id {id}",
            m.container_id, m.host_id, m.size
        ))
    })
}

/// Returns true if the container process runs as `runtime_uid` on the host.
///
/// # Errors
///
/// Returns an error if the uid mapping overflows.
pub fn runs_as_runtime_user(spec: &Spec, runtime_uid: u32) -> CorralResult<bool> {
    let uid = spec.process.as_ref().map_or(0, |p| p.user.uid);
    let mappings = spec.linux.as_ref().map_or(&[][..], |l| &l.uid_mappings[..]);
    Ok(unmap_id(uid, mappings)? == runtime_uid)
}

/// Configures the init shim, its mounts and the sync FIFO.
///
/// # Errors
///
/// Returns an error if the FIFO or the init mount point cannot be created,
/// or if the engine rejects an item.
pub fn configure_init(
    engine: &dyn IsolationEngine,
    spec: &mut Spec,
    id: &ContainerId,
    runtime_dir: &Path,
    init_program: &Path,
    runtime_uid: u32,
) -> CorralResult<()> {
    spec.mounts.push(Mount {
        destination: PathBuf::from(CONTAINER_INIT_DIR),
        mount_type: Some("bind".to_string()),
        source: Some(runtime_dir.to_path_buf()),
        options: ["bind", "ro", "nodev", "nosuid", "create=dir"]
            .map(String::from)
            .to_vec(),
    });
    engine.set_config_item("lxc.init.cwd", CONTAINER_INIT_DIR)?;

    // The init process may run as another user than the runtime.
    let mode = if runs_as_runtime_user(spec, runtime_uid)? {
        0o600
    } else {
        0o666
    };
    sync::create_fifo(&runtime_dir.join(SYNC_FIFO_FILE), mode)?;

    configure_init_user(engine, spec)?;

    let mount_point = runtime_dir.join(INIT_NAME);
    std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&mount_point)?;
    spec.mounts.push(Mount {
        destination: Path::new(CONTAINER_INIT_DIR).join(INIT_NAME),
        mount_type: Some("bind".to_string()),
        source: Some(init_program.to_path_buf()),
        options: ["bind", "ro", "nosuid"].map(String::from).to_vec(),
    });

    engine.set_config_item("lxc.init.cmd", &init_command(id))
}

fn configure_init_user(engine: &dyn IsolationEngine, spec: &Spec) -> CorralResult<()> {
    if let Some(linux) = &spec.linux {
        for m in &linux.uid_mappings {
            engine.set_config_item(
                "lxc.idmap",
                &format!("u {} {} {}", m.container_id, m.host_id, m.size),
            )?;
        }
        for m in &linux.gid_mappings {
            engine.set_config_item(
                "lxc.idmap",
                &format!("g {} {} {}", m.container_id, m.host_id, m.size),
            )?;
        }
    }

    let user = spec.process.as_ref().map(|p| p.user.clone()).unwrap_or_default();
    engine.set_config_item("lxc.init.uid", &user.uid.to_string())?;
    engine.set_config_item("lxc.init.gid", &user.gid.to_string())?;

    if !user.additional_gids.is_empty() {
        let mut groups = String::new();
        for (i, gid) in user.additional_gids.iter().enumerate() {
            if i > 0 {
                groups.push(',');
            }
            let _ = write!(groups, "{gid}");
        }
        set_if_supported(engine, "lxc.init.groups", &groups)?;
    }
    Ok(())
}
