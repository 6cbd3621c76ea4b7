//! Resource limits expressed as `lxc.cgroup2.*` items.
//!
//! The engine writes the values into the container's cgroup after creating
//! it, so nothing here touches the cgroup filesystem.

use corral_common::{CorralError, CorralResult};
use corral_oci::runtime::{CpuResources, DeviceCgroup, MemoryResources, PidsResources, Resources};

use crate::engine::IsolationEngine;

const DEVICES_ALLOW: &str = "lxc.cgroup2.devices.allow";
const DEVICES_DENY: &str = "lxc.cgroup2.devices.deny";

/// Default CFS period in microseconds.
const DEFAULT_CPU_PERIOD: u64 = 100_000;

/// Applies `resources` to the engine configuration.
///
/// Device rules are skipped with a warning when `device_filtering` is off.
///
/// # Errors
///
/// Returns an error for device rules of an unknown type, contradictory
/// memory limits, or items rejected by the engine.
pub fn configure_resources(
    engine: &dyn IsolationEngine,
    resources: &Resources,
    device_filtering: bool,
) -> CorralResult<()> {
    if !resources.devices.is_empty() {
        if device_filtering {
            configure_devices(engine, &resources.devices)?;
        } else {
            tracing::warn!("cgroup device filtering is disabled, access to all devices is granted");
        }
    }
    if let Some(memory) = &resources.memory {
        configure_memory(engine, memory)?;
    }
    if let Some(cpu) = &resources.cpu {
        configure_cpu(engine, cpu)?;
    }
    if let Some(pids) = &resources.pids {
        configure_pids(engine, pids)?;
    }
    Ok(())
}

/// Renders one device rule in the cgroup2 device controller syntax.
fn device_rule(device_type: &str, rule: &DeviceCgroup) -> String {
    let number = |n: Option<i64>| n.map_or_else(|| "*".to_string(), |n| n.to_string());
    format!(
        "{device_type} {}:{} {}",
        number(rule.major),
        number(rule.minor),
        rule.access
    )
}

/// Translates device rules into allow/deny items.
///
/// A rule without a type matches any device. As an allow rule it is split
/// into a block and a character rule; as a deny rule it is dropped, since
/// it would also revoke the default devices.
///
/// # Errors
///
/// Returns a [`CorralError::Validation`] for an unknown device type.
pub fn configure_devices(engine: &dyn IsolationEngine, rules: &[DeviceCgroup]) -> CorralResult<()> {
    for rule in rules {
        let key = if rule.allow { DEVICES_ALLOW } else { DEVICES_DENY };
        match rule.device_type.as_str() {
            "" | "a" => {
                if !rule.allow {
                    tracing::debug!(?rule, "skipping deny rule for any device type");
                    continue;
                }
                engine.set_config_item(key, &device_rule("b", rule))?;
                engine.set_config_item(key, &device_rule("c", rule))?;
            }
            t @ ("b" | "c") => engine.set_config_item(key, &device_rule(t, rule))?,
            other => {
                return Err(CorralError::validation(format!(
                    "invalid device type {other:?} in device cgroup rule"
                )));
            }
        }
    }
    Ok(())
}

fn limit_value(limit: i64) -> String {
    if limit < 0 {
        "max".to_string()
    } else {
        limit.to_string()
    }
}

fn configure_memory(engine: &dyn IsolationEngine, memory: &MemoryResources) -> CorralResult<()> {
    if let Some(limit) = memory.limit {
        engine.set_config_item("lxc.cgroup2.memory.max", &limit_value(limit))?;
    }
    if let Some(reservation) = memory.reservation {
        engine.set_config_item("lxc.cgroup2.memory.low", &limit_value(reservation))?;
    }
    if let Some(swap) = memory.swap {
        // OCI swap is memory plus swap, cgroup2 limits swap alone.
        let value = match memory.limit {
            _ if swap < 0 => "max".to_string(),
            Some(limit) if limit >= 0 && swap >= limit => (swap - limit).to_string(),
            Some(limit) if limit >= 0 => {
                return Err(CorralError::validation(format!(
                    "memory swap limit {swap} is lower than memory limit {limit}"
                )));
            }
            _ => {
                return Err(CorralError::validation(
                    "a memory swap limit requires a memory limit",
                ));
            }
        };
        engine.set_config_item("lxc.cgroup2.memory.swap.max", &value)?;
    }
    Ok(())
}

/// Converts cgroup v1 CPU shares (2..=262144) to a cgroup v2 weight (1..=10000).
#[must_use]
pub fn shares_to_weight(shares: u64) -> u64 {
    let shares = shares.clamp(2, 262_144);
    1 + ((shares - 2) * 9999) / 262_142
}

fn configure_cpu(engine: &dyn IsolationEngine, cpu: &CpuResources) -> CorralResult<()> {
    if let Some(shares) = cpu.shares.filter(|s| *s > 0) {
        engine.set_config_item("lxc.cgroup2.cpu.weight", &shares_to_weight(shares).to_string())?;
    }
    if cpu.quota.is_some() || cpu.period.is_some() {
        let quota = cpu.quota.filter(|q| *q > 0).map_or_else(|| "max".to_string(), |q| q.to_string());
        let period = cpu.period.filter(|p| *p > 0).unwrap_or(DEFAULT_CPU_PERIOD);
        engine.set_config_item("lxc.cgroup2.cpu.max", &format!("{quota} {period}"))?;
    }
    if let Some(cpus) = cpu.cpus.as_deref().filter(|c| !c.is_empty()) {
        engine.set_config_item("lxc.cgroup2.cpuset.cpus", cpus)?;
    }
    if let Some(mems) = cpu.mems.as_deref().filter(|m| !m.is_empty()) {
        engine.set_config_item("lxc.cgroup2.cpuset.mems", mems)?;
    }
    Ok(())
}

fn configure_pids(engine: &dyn IsolationEngine, pids: &PidsResources) -> CorralResult<()> {
    let value = if pids.limit > 0 {
        pids.limit.to_string()
    } else {
        "max".to_string()
    };
    engine.set_config_item("lxc.cgroup2.pids.max", &value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::LxcConfigEngine;

    fn rule(allow: bool, device_type: &str, major: Option<i64>, minor: Option<i64>) -> DeviceCgroup {
        DeviceCgroup {
            allow,
            device_type: device_type.to_string(),
            major,
            minor,
            access: "rwm".to_string(),
        }
    }

    #[test]
    fn any_type_allow_is_decomposed() {
        let engine = LxcConfigEngine::new("web", "/nonexistent");
        configure_devices(&engine, &[rule(true, "", None, None)]).unwrap();
        assert_eq!(
            engine.config_item(DEVICES_ALLOW).as_deref(),
            Some("b *:* rwm\nc *:* rwm")
        );
    }

    #[test]
    fn any_type_deny_is_dropped() {
        let engine = LxcConfigEngine::new("web", "/nonexistent");
        configure_devices(&engine, &[rule(false, "", None, None), rule(false, "a", None, None)])
            .unwrap();
        assert_eq!(engine.config_item(DEVICES_DENY), None);
    }

    #[test]
    fn explicit_rules_keep_their_numbers() {
        let engine = LxcConfigEngine::new("web", "/nonexistent");
        configure_devices(
            &engine,
            &[rule(true, "c", Some(5), Some(2)), rule(false, "b", Some(8), None)],
        )
        .unwrap();
        assert_eq!(engine.config_item(DEVICES_ALLOW).as_deref(), Some("c 5:2 rwm"));
        assert_eq!(engine.config_item(DEVICES_DENY).as_deref(), Some("b 8:* rwm"));
    }

    #[test]
    fn unknown_device_type_is_rejected() {
        let engine = LxcConfigEngine::new("web", "/nonexistent");
        let err = configure_devices(&engine, &[rule(true, "p", None, None)]).unwrap_err();
        assert!(matches!(err, CorralError::Validation { .. }));
    }

    #[test]
    fn device_rules_respect_feature_gate() {
        let engine = LxcConfigEngine::new("web", "/nonexistent");
        let resources = Resources {
            devices: vec![rule(true, "c", Some(1), Some(3))],
            ..Resources::default()
        };
        configure_resources(&engine, &resources, false).unwrap();
        assert_eq!(engine.config_item(DEVICES_ALLOW), None);
    }

    #[test]
    fn memory_cpu_and_pids() {
        let engine = LxcConfigEngine::new("web", "/nonexistent");
        let resources = Resources {
            memory: Some(MemoryResources {
                limit: Some(512 * 1024 * 1024),
                reservation: Some(-1),
                swap: Some(768 * 1024 * 1024),
            }),
            cpu: Some(CpuResources {
                shares: Some(1024),
                quota: Some(50_000),
                period: None,
                cpus: Some("0-1".to_string()),
                mems: Some(String::new()),
            }),
            pids: Some(PidsResources { limit: 0 }),
            ..Resources::default()
        };
        configure_resources(&engine, &resources, true).unwrap();

        assert_eq!(engine.config_item("lxc.cgroup2.memory.max").as_deref(), Some("536870912"));
        assert_eq!(engine.config_item("lxc.cgroup2.memory.low").as_deref(), Some("max"));
        assert_eq!(engine.config_item("lxc.cgroup2.memory.swap.max").as_deref(), Some("268435456"));
        assert_eq!(engine.config_item("lxc.cgroup2.cpu.weight").as_deref(), Some("39"));
        assert_eq!(engine.config_item("lxc.cgroup2.cpu.max").as_deref(), Some("50000 100000"));
        assert_eq!(engine.config_item("lxc.cgroup2.cpuset.cpus").as_deref(), Some("0-1"));
        assert_eq!(engine.config_item("lxc.cgroup2.cpuset.mems"), None);
        assert_eq!(engine.config_item("lxc.cgroup2.pids.max").as_deref(), Some("max"));
    }

    #[test]
    fn swap_below_limit_is_rejected() {
        let engine = LxcConfigEngine::new("web", "/nonexistent");
        let resources = Resources {
            memory: Some(MemoryResources {
                limit: Some(1000),
                reservation: None,
                swap: Some(10),
            }),
            ..Resources::default()
        };
        assert!(configure_resources(&engine, &resources, true).is_err());
    }

    #[test]
    fn weight_bounds() {
        assert_eq!(shares_to_weight(2), 1);
        assert_eq!(shares_to_weight(262_144), 10_000);
        assert_eq!(shares_to_weight(1), 1);
    }
}
