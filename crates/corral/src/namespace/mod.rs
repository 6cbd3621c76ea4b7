//! Linux namespace configuration.
//!
//! Declared namespaces with a path are joined (`lxc.namespace.share.*`),
//! everything else is cloned (`lxc.namespace.clone`). A namespace type
//! missing from the spec is cloned too; the container never silently
//! inherits a runtime namespace.

pub mod uts;

use std::collections::BTreeSet;
use std::path::Path;

use corral_common::{CorralError, CorralResult};
use corral_oci::Spec;
use corral_oci::runtime::{Namespace, NamespaceType};

use crate::engine::IsolationEngine;

pub use uts::set_hostname;

/// Namespaces cloned when the spec omits them.
///
/// `user` is missing on purpose: an omitted user namespace is cloned only
/// when the spec carries ID mappings, since a user namespace without
/// mappings leaves the container with nobody but the overflow user.
const CLONED_BY_DEFAULT: &[NamespaceType] = &[
    NamespaceType::Cgroup,
    NamespaceType::Ipc,
    NamespaceType::Mount,
    NamespaceType::Network,
    NamespaceType::Pid,
    NamespaceType::Uts,
];

/// Name of the namespace in `/proc/<pid>/ns` and in engine keys.
///
/// # Errors
///
/// Returns a [`CorralError::Validation`] for namespace types the engine
/// cannot handle.
pub fn proc_name(ns_type: NamespaceType) -> CorralResult<&'static str> {
    match ns_type {
        NamespaceType::Cgroup => Ok("cgroup"),
        NamespaceType::Ipc => Ok("ipc"),
        NamespaceType::Mount => Ok("mnt"),
        NamespaceType::Network => Ok("net"),
        NamespaceType::Pid => Ok("pid"),
        NamespaceType::User => Ok("user"),
        NamespaceType::Uts => Ok("uts"),
        NamespaceType::Time => Err(CorralError::validation("namespace time is not supported")),
    }
}

/// Writes the namespace configuration.
///
/// A user namespace the spec omits is cloned only when ID mappings exist.
///
/// # Errors
///
/// Returns a [`CorralError::Validation`] for duplicate or unsupported
/// namespaces, or an error if the engine rejects an item.
pub fn configure_namespaces(engine: &dyn IsolationEngine, spec: &Spec) -> CorralResult<()> {
    let mut seen = BTreeSet::new();
    let mut clone: Vec<&str> = Vec::new();

    for ns in spec.namespaces() {
        if !seen.insert(ns.ns_type) {
            return Err(CorralError::validation(format!("duplicate namespace {}", ns.ns_type)));
        }
        let name = proc_name(ns.ns_type)?;
        match ns.join_path() {
            None => clone.push(name),
            Some(path) => {
                engine.set_config_item(
                    &format!("lxc.namespace.share.{name}"),
                    &path.to_string_lossy(),
                )?;
            }
        }
    }

    for &ns_type in CLONED_BY_DEFAULT {
        if !seen.contains(&ns_type) {
            tracing::debug!(namespace = %ns_type, "cloning undeclared namespace");
            clone.push(proc_name(ns_type)?);
        }
    }
    let has_idmaps = spec
        .linux
        .as_ref()
        .is_some_and(|l| !l.uid_mappings.is_empty() || !l.gid_mappings.is_empty());
    if !seen.contains(&NamespaceType::User) && has_idmaps {
        clone.push(proc_name(NamespaceType::User)?);
    }

    engine.set_config_item("lxc.namespace.clone", &clone.join(" "))
}

/// Returns true if the namespace is the one the runtime itself runs in.
///
/// Omitted and pathless namespaces are cloned, so they are never shared.
///
/// # Errors
///
/// Returns an error if either namespace file cannot be inspected.
pub fn is_shared_with_runtime(
    ns: Option<&Namespace>,
    ns_type: NamespaceType,
    proc_root: &Path,
) -> CorralResult<bool> {
    let Some(path) = ns.and_then(Namespace::join_path) else {
        return Ok(false);
    };
    let own = proc_root.join("self/ns").join(proc_name(ns_type)?);

    let target = rustix::fs::stat(path).map_err(std::io::Error::from)?;
    let current = rustix::fs::stat(&own).map_err(std::io::Error::from)?;
    Ok(target.st_dev == current.st_dev && target.st_ino == current.st_ino)
}
