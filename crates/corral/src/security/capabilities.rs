//! Linux capabilities.

use std::collections::BTreeSet;

use caps::Capability;
use corral_common::{CorralError, CorralResult};
use corral_oci::runtime::Capabilities;

use crate::engine::IsolationEngine;

/// Parses a capability name, with or without the `CAP_` prefix, in any case.
///
/// # Errors
///
/// Returns a [`CorralError::Validation`] for names the kernel does not know.
pub fn parse_capability(name: &str) -> CorralResult<Capability> {
    let upper = name.trim().to_ascii_uppercase();
    let full = if upper.starts_with("CAP_") {
        upper
    } else {
        format!("CAP_{upper}")
    };
    full.parse::<Capability>()
        .map_err(|_| CorralError::validation(format!("unknown capability {name:?}")))
}

/// Engine spelling of a capability: lowercase, no `CAP_` prefix.
fn keep_name(cap: Capability) -> String {
    let name = cap.to_string().to_ascii_lowercase();
    name.strip_prefix("cap_").map(str::to_string).unwrap_or(name)
}

/// Value of `lxc.cap.keep` for the permitted set, `none` if it is empty.
///
/// # Errors
///
/// Returns a [`CorralError::Validation`] for unknown capability names.
pub fn keep_list(capabilities: Option<&Capabilities>) -> CorralResult<String> {
    let mut keep = BTreeSet::new();
    for name in capabilities.map(|c| c.permitted.as_slice()).unwrap_or_default() {
        keep.insert(keep_name(parse_capability(name)?));
    }
    if keep.is_empty() {
        return Ok("none".to_string());
    }
    Ok(keep.into_iter().collect::<Vec<_>>().join(" "))
}

/// Restricts the container to its permitted capabilities.
///
/// # Errors
///
/// Returns an error for unknown capabilities or if the engine rejects the item.
pub fn configure_capabilities(
    engine: &dyn IsolationEngine,
    capabilities: Option<&Capabilities>,
) -> CorralResult<()> {
    engine.set_config_item("lxc.cap.keep", &keep_list(capabilities)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::LxcConfigEngine;

    fn permitted(names: &[&str]) -> Capabilities {
        Capabilities {
            permitted: names.iter().map(ToString::to_string).collect(),
            ..Capabilities::default()
        }
    }

    #[test]
    fn parses_any_spelling() {
        for name in ["CAP_NET_ADMIN", "cap_net_admin", "NET_ADMIN", "net_admin"] {
            assert_eq!(parse_capability(name).unwrap(), Capability::CAP_NET_ADMIN, "{name}");
        }
        assert!(matches!(
            parse_capability("CAP_WIZARDRY").unwrap_err(),
            CorralError::Validation { .. }
        ));
    }

    #[test]
    fn keep_list_is_lowercase_without_prefix() {
        let caps = permitted(&["CAP_KILL", "CAP_CHOWN", "CAP_NET_BIND_SERVICE", "CAP_KILL"]);
        assert_eq!(keep_list(Some(&caps)).unwrap(), "chown kill net_bind_service");
    }

    #[test]
    fn empty_set_keeps_none() {
        assert_eq!(keep_list(None).unwrap(), "none");
        assert_eq!(keep_list(Some(&permitted(&[]))).unwrap(), "none");

        let engine = LxcConfigEngine::new("web", "/nonexistent");
        configure_capabilities(&engine, None).unwrap();
        assert_eq!(engine.config_item("lxc.cap.keep").as_deref(), Some("none"));
    }
}
