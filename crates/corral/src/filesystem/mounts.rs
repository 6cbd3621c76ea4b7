//! OCI mounts as `lxc.mount.entry` items.
//!
//! Each entry is an fstab line. Destinations are resolved inside the root
//! filesystem first, see [`super::resolve`].

use std::path::Path;

use corral_common::{CorralError, CorralResult};
use corral_oci::Spec;
use corral_oci::runtime::Mount;

use super::resolve::resolve_mount_destination;
use crate::engine::IsolationEngine;

/// Options the engine rejects, per filesystem type.
fn unsupported_options(fs_type: &str) -> &'static [&'static str] {
    match fs_type {
        "sysfs" => &["rslave"],
        "tmpfs" => &["rprivate", "tmpcopyup"],
        "cgroup2" => &["private", "rslave"],
        _ => &[],
    }
}

/// Drops mount options the engine cannot handle for `fs_type`.
#[must_use]
pub fn filter_mount_options(fs_type: &str, options: &[String]) -> Vec<String> {
    let unsupported = unsupported_options(fs_type);
    options
        .iter()
        .filter(|option| {
            let keep = !unsupported.contains(&option.as_str());
            if !keep {
                tracing::info!(fs = fs_type, option = %option, "removed mount option");
            }
            keep
        })
        .cloned()
        .collect()
}

/// Escapes a field of an fstab line the way `getmntent(3)` expects.
#[must_use]
pub fn escape_mount_field(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    for c in field.chars() {
        match c {
            ' ' => out.push_str("\\040"),
            '\t' => out.push_str("\\011"),
            '\n' => out.push_str("\\012"),
            '\\' => out.push_str("\\134"),
            c => out.push(c),
        }
    }
    out
}

/// Turns one OCI mount into an fstab line, `None` if it is skipped.
///
/// Bind mounts need an existing source unless they are `optional`. The
/// destination is marked `create=dir` or `create=file` after the source
/// type; with a read-only root it is created right away.
///
/// # Errors
///
/// Returns a [`CorralError::Security`] for a destination outside the root,
/// or a [`CorralError::Configuration`] for a missing bind source.
pub fn mount_entry(mount: &Mount, rootfs: &Path, readonly_root: bool) -> CorralResult<Option<String>> {
    let mut mount = mount.clone();
    if mount.mount_type.as_deref() == Some("cgroup") {
        mount.mount_type = Some("cgroup2".to_string());
        mount.source = Some("cgroup2".into());
    }
    let fs_type = mount.mount_type.clone().unwrap_or_else(|| {
        if mount.is_bind() { "bind" } else { "none" }.to_string()
    });

    let resolved = resolve_mount_destination(rootfs, &mount.destination)?;
    tracing::trace!(
        destination = %mount.destination.display(),
        target = %resolved.path().display(),
        exists = resolved.exists(),
        "resolved mount destination"
    );
    let destination = resolved.into_path();

    let source_meta = mount.source.as_deref().map(std::fs::metadata);
    let source_is_dir = match source_meta {
        Some(Ok(meta)) => meta.is_dir(),
        Some(Err(e)) if mount.is_bind() => {
            if mount.has_option("optional") {
                tracing::debug!(destination = %mount.destination.display(), "skipping optional bind mount");
                return Ok(None);
            }
            let source = mount.source.as_deref().unwrap_or(Path::new(""));
            return Err(CorralError::configuration_with(
                format!("failed to access bind mount source {}", source.display()),
                e,
            ));
        }
        None if mount.is_bind() => {
            return Err(CorralError::validation(format!(
                "bind mount {} has no source",
                mount.destination.display()
            )));
        }
        _ => true,
    };

    if source_is_dir {
        mount.options.push("create=dir".to_string());
        if readonly_root {
            std::fs::create_dir_all(&destination)?;
        }
    } else {
        mount.options.push("create=file".to_string());
        if readonly_root {
            if let Some(parent) = destination.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&destination)?;
        }
    }

    let options = filter_mount_options(&fs_type, &mount.options);
    let source = mount
        .source
        .as_deref()
        .map_or_else(|| fs_type.clone(), |s| s.to_string_lossy().into_owned());
    Ok(Some(format!(
        "{} {} {} {}",
        escape_mount_field(&source),
        escape_mount_field(&destination.to_string_lossy()),
        fs_type,
        options.join(",")
    )))
}

/// Writes every mount of `spec` as an `lxc.mount.entry`. The engine's own
/// automatic mounts are disabled.
///
/// # Errors
///
/// Returns an error if a mount is rejected, see [`mount_entry`].
pub fn configure_mounts(engine: &dyn IsolationEngine, spec: &Spec, rootfs: &Path) -> CorralResult<()> {
    engine.set_config_item("lxc.mount.auto", "")?;

    let readonly_root = spec.root.as_ref().is_some_and(|r| r.readonly);
    for mount in &spec.mounts {
        if let Some(entry) = mount_entry(mount, rootfs, readonly_root)? {
            engine.set_config_item("lxc.mount.entry", &entry)?;
        }
    }
    Ok(())
}

/// Remounts `linux.readonlyPaths` read-only by binding them onto themselves.
///
/// # Errors
///
/// Returns a [`CorralError::Configuration`] if `lxc.rootfs.mount` is unset.
pub fn configure_readonly_paths(engine: &dyn IsolationEngine, spec: &Spec) -> CorralResult<()> {
    let Some(linux) = &spec.linux else {
        return Ok(());
    };
    if linux.readonly_paths.is_empty() {
        return Ok(());
    }

    let rootmnt = engine
        .config_item("lxc.rootfs.mount")
        .ok_or_else(|| CorralError::configuration("lxc.rootfs.mount is not set"))?;
    for path in &linux.readonly_paths {
        let relative = path.trim_start_matches('/');
        let entry = format!(
            "{} {} bind bind,ro,optional",
            escape_mount_field(&Path::new(&rootmnt).join(relative).to_string_lossy()),
            escape_mount_field(relative)
        );
        engine.set_config_item("lxc.mount.entry", &entry)?;
    }
    Ok(())
}
