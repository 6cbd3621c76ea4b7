//! AppArmor profile selection.

use std::path::Path;

use corral_common::CorralResult;

use crate::engine::IsolationEngine;

/// Profile used when the spec names none.
pub const UNCONFINED: &str = "unconfined";

/// Check if AppArmor is enabled on the system.
#[must_use]
pub fn is_enabled() -> bool {
    Path::new("/sys/module/apparmor").exists()
        && Path::new("/sys/kernel/security/apparmor").exists()
}

/// Profile name for the container, `unconfined` when none is given.
#[must_use]
pub fn profile_name(profile: Option<&str>) -> &str {
    profile.filter(|p| !p.is_empty()).unwrap_or(UNCONFINED)
}

/// Sets the AppArmor profile of the container.
///
/// # Errors
///
/// Returns an error if the engine rejects the item.
pub fn configure_apparmor(engine: &dyn IsolationEngine, profile: Option<&str>) -> CorralResult<()> {
    let name = profile_name(profile);
    if name != UNCONFINED && !is_enabled() {
        tracing::warn!(profile = name, "AppArmor not enabled on this host");
    }
    engine.set_config_item("lxc.apparmor.profile", name)
}
