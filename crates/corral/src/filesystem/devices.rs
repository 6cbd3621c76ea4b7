//! Device nodes and masked paths.
//!
//! The engine's own `/dev` population is disabled. Privileged runtimes
//! list the device nodes in `devices.txt` and the mount hook creates them
//! with mknod; unprivileged runtimes cannot mknod and bind mount the host
//! nodes instead. Masked paths go to `masked.txt` for the same hook.

use std::fmt::Write as _;
use std::io::Write as _;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use corral_common::{CorralError, CorralResult};
use corral_oci::Spec;
use corral_oci::runtime::{Device, DeviceCgroup, Mount};

use crate::engine::IsolationEngine;

/// Devices every container gets: (path, major, minor).
const DEFAULT_DEVICES: &[(&str, i64, i64)] = &[
    ("/dev/null", 1, 3),
    ("/dev/zero", 1, 5),
    ("/dev/full", 1, 7),
    ("/dev/random", 1, 8),
    ("/dev/urandom", 1, 9),
    ("/dev/tty", 5, 0),
];

/// Major number of `/dev/ptmx`.
const PTMX_MAJOR: i64 = 5;
/// Minor number of `/dev/ptmx`.
const PTMX_MINOR: i64 = 2;
/// Major number of Unix98 PTY slaves (`/dev/pts/N`).
const PTS_MAJOR: i64 = 136;

fn allow_rule(major: i64, minor: Option<i64>) -> DeviceCgroup {
    DeviceCgroup {
        allow: true,
        device_type: "c".to_string(),
        major: Some(major),
        minor,
        access: "rwm".to_string(),
    }
}

/// Returns true if `spec` declares `path`, checking that it agrees with
/// the expected character device numbers.
fn is_declared(devices: &[Device], path: &str, major: i64, minor: i64) -> CorralResult<bool> {
    let Some(device) = devices.iter().find(|d| d.path == Path::new(path)) else {
        return Ok(false);
    };
    if device.device_type != "c" || device.major != major || device.minor != minor {
        return Err(CorralError::validation(format!(
            "device {path} must be c {major}:{minor}, found {} {}:{}",
            device.device_type, device.major, device.minor
        )));
    }
    Ok(true)
}

/// Adds the default devices that `spec` does not declare and allows
/// access to them, to `/dev/ptmx` and to the PTY slaves.
///
/// # Errors
///
/// Returns a [`CorralError::Validation`] if a default device is declared
/// with other device numbers.
pub fn ensure_default_devices(spec: &mut Spec) -> CorralResult<()> {
    let user = spec.process.as_ref().map(|p| p.user.clone()).unwrap_or_default();
    let linux = spec.linux_mut();
    let rules = &mut linux.resources.get_or_insert_with(Default::default).devices;
    rules.push(allow_rule(PTMX_MAJOR, Some(PTMX_MINOR)));
    rules.push(allow_rule(PTS_MAJOR, None));

    for &(path, major, minor) in DEFAULT_DEVICES {
        if is_declared(&linux.devices, path, major, minor)? {
            continue;
        }
        linux.devices.push(Device {
            path: PathBuf::from(path),
            device_type: "c".to_string(),
            major,
            minor,
            file_mode: Some(0o666),
            uid: Some(user.uid),
            gid: Some(user.gid),
        });
        if let Some(resources) = linux.resources.as_mut() {
            resources.devices.push(allow_rule(major, Some(minor)));
        }
    }
    Ok(())
}

fn create_exclusive(path: &Path, content: &str) -> CorralResult<()> {
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}

/// Renders the device list: `<path> <type> <major> <minor> <mode> <uid>:<gid>`
/// per line, mode in octal.
#[must_use]
pub fn render_devices(spec: &Spec) -> String {
    let user = spec.process.as_ref().map(|p| p.user.clone()).unwrap_or_default();
    let mut out = String::new();
    for d in spec.linux.iter().flat_map(|l| &l.devices) {
        let _ = writeln!(
            out,
            "{} {} {} {} {:o} {}:{}",
            d.path.display(),
            d.device_type,
            d.major,
            d.minor,
            d.file_mode.unwrap_or(0o600),
            d.uid.unwrap_or(user.uid),
            d.gid.unwrap_or(user.gid)
        );
    }
    out
}

/// Replaces the `/dev` mount by bind mounts of the host device nodes.
pub fn bind_host_devices(spec: &mut Spec) {
    spec.mounts.retain(|m| {
        let dev = m.destination == Path::new("/dev");
        if dev {
            tracing::info!("unprivileged runtime, removing /dev mount");
        }
        !dev
    });

    let devices: Vec<PathBuf> = spec.linux.iter().flat_map(|l| &l.devices).map(|d| d.path.clone()).collect();
    tracing::info!(count = devices.len(), "unprivileged runtime, bind mounting devices");
    for path in devices {
        spec.mounts.push(Mount {
            destination: path.clone(),
            mount_type: Some("bind".to_string()),
            source: Some(path),
            options: vec!["bind".to_string()],
        });
    }
}

/// Configures devices and masked paths for the mount hook.
///
/// # Errors
///
/// Returns an error if a list cannot be written or an item is rejected.
pub fn configure_devices(
    engine: &dyn IsolationEngine,
    spec: &mut Spec,
    runtime_dir: &Path,
    privileged: bool,
    hook: &Path,
) -> CorralResult<()> {
    engine.set_config_item("lxc.autodev", "0")?;
    ensure_default_devices(spec)?;

    if privileged {
        create_exclusive(&runtime_dir.join("devices.txt"), &render_devices(spec))?;
    } else {
        bind_host_devices(spec);
    }

    let masked = spec.linux.as_ref().map(|l| l.masked_paths.as_slice()).unwrap_or_default();
    if !masked.is_empty() {
        let mut content = String::new();
        for path in masked {
            let _ = writeln!(content, "{path}");
        }
        create_exclusive(&runtime_dir.join("masked.txt"), &content)?;
    }

    engine.set_config_item("lxc.hook.version", "1")?;
    engine.set_config_item("lxc.hook.mount", &hook.to_string_lossy())
}
