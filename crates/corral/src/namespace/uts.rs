//! Hostname of a shared UTS namespace.
//!
//! The engine only sets the hostname of UTS namespaces it creates. For a
//! joined namespace the runtime enters it and sets the hostname itself.
//! `setns(2)` moves only the calling thread, so the switch runs on a
//! short-lived thread of its own.

use std::fs::File;
use std::os::fd::AsFd;
use std::path::Path;

use corral_common::{CorralError, CorralResult};
use rustix::thread::{LinkNameSpaceType, move_into_link_name_space};

/// Sets `hostname` inside the UTS namespace at `ns_path`.
///
/// # Errors
///
/// Returns an error if the namespace cannot be entered or the hostname
/// cannot be set.
pub fn set_hostname(ns_path: &Path, hostname: &str) -> CorralResult<()> {
    let ns_path = ns_path.to_path_buf();
    let hostname = hostname.to_string();

    std::thread::Builder::new()
        .name("corral-uts".to_string())
        .spawn(move || switch_and_set(&ns_path, &hostname))
        .map_err(CorralError::from)?
        .join()
        .map_err(|_| CorralError::Internal {
            message: "hostname thread panicked".to_string(),
        })?
}

fn switch_and_set(ns_path: &Path, hostname: &str) -> CorralResult<()> {
    let target = File::open(ns_path).map_err(|e| {
        CorralError::configuration_with(
            format!("failed to open uts namespace {}", ns_path.display()),
            e,
        )
    })?;
    let origin = File::open("/proc/thread-self/ns/uts")?;

    move_into_link_name_space(target.as_fd(), Some(LinkNameSpaceType::HostNameAndNISDomainName))
        .map_err(|e| {
            CorralError::configuration_with(
                format!("failed to enter uts namespace {}", ns_path.display()),
                std::io::Error::from(e),
            )
        })?;

    let result = rustix::system::sethostname(hostname.as_bytes()).map_err(|e| {
        CorralError::configuration_with(
            format!("failed to set hostname {hostname:?}"),
            std::io::Error::from(e),
        )
    });

    if let Err(e) =
        move_into_link_name_space(origin.as_fd(), Some(LinkNameSpaceType::HostNameAndNISDomainName))
    {
        tracing::warn!(error = %e, "failed to return to the runtime uts namespace");
    }
    result?;
    tracing::debug!(namespace = %ns_path.display(), hostname, "set hostname in shared uts namespace");
    Ok(())
}
