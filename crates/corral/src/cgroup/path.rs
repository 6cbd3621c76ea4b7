//! Cgroup path derivation.
//!
//! Orchestrators on systemd hosts pass cgroup paths as
//! `<slice>:<scope prefix>:<scope name>`, for example
//! `kubepods-burstable-pod1.slice:crio:abc`. The slice name encodes its
//! parents: every hyphen-delimited prefix is a slice of its own.

use std::path::{Component, Path};

use corral_common::{ContainerId, CorralError, CorralResult};

const SLICE_SUFFIX: &str = ".slice";

/// Decodes a systemd-encoded cgroup path into a plain cgroup path.
///
/// ```
/// use corral::cgroup::path::decode_systemd_path;
///
/// assert_eq!(
///     decode_systemd_path("kubepods-burstable-123.slice:crio:ABC"),
///     "kubepods.slice/kubepods-burstable.slice/kubepods-burstable-123.slice/crio-ABC.scope"
/// );
/// ```
#[must_use]
pub fn decode_systemd_path(encoded: &str) -> String {
    let mut parts = encoded.split(':');
    let slice = parts.next().unwrap_or_default();
    let scope: Vec<&str> = parts.collect();

    let name = slice.strip_suffix(SLICE_SUFFIX).unwrap_or(slice);
    let mut segments: Vec<String> = name
        .char_indices()
        .filter(|&(i, c)| c == '-' && i > 0)
        .map(|(i, _)| format!("{}{SLICE_SUFFIX}", &name[..i]))
        .collect();
    if !name.is_empty() {
        segments.push(format!("{name}{SLICE_SUFFIX}"));
    }
    if !scope.is_empty() {
        segments.push(format!("{}.scope", scope.join("-")));
    }
    segments.join("/")
}

/// Derives the container's cgroup directory, relative to the cgroup root.
///
/// A missing `cgroups_path` places the container under `corral/<id>`.
///
/// # Errors
///
/// Returns a [`CorralError::Validation`] if the path climbs out of the
/// cgroup root.
pub fn container_cgroup_dir(
    cgroups_path: Option<&str>,
    systemd: bool,
    id: &ContainerId,
) -> CorralResult<String> {
    let dir = match cgroups_path.filter(|p| !p.is_empty()) {
        Some(path) if systemd => decode_systemd_path(path),
        Some(path) => path.trim_start_matches('/').to_string(),
        None => format!("corral/{id}"),
    };
    check_relative(&dir)?;
    Ok(dir)
}

/// Derives the monitor's cgroup directory, a scope below `monitor_slice`.
///
/// # Errors
///
/// Returns a [`CorralError::Validation`] if the slice climbs out of the
/// cgroup root.
pub fn monitor_cgroup_dir(monitor_slice: &str, id: &ContainerId) -> CorralResult<String> {
    let dir = format!("{}/{id}.scope", monitor_slice.trim_matches('/'));
    let dir = dir.trim_start_matches('/').to_string();
    check_relative(&dir)?;
    Ok(dir)
}

fn check_relative(dir: &str) -> CorralResult<()> {
    let escapes = Path::new(dir)
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if dir.is_empty() || escapes {
        return Err(CorralError::validation(format!("invalid cgroup path {dir:?}")));
    }
    Ok(())
}
