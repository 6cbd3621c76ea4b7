//! Seccomp profile compiler.
//!
//! The engine reads seccomp policies in its own line-oriented text format
//! (version 2):
//!
//! ```text
//! 2
//! allowlist errno 1
//! [x86_64]
//! read allow
//! kill allow [1,9,SCMP_CMP_EQ,0]
//! ```
//!
//! The grammar allows a single argument condition per line, so a rule with
//! several conditions is emitted as several lines.

use std::fmt::Write as _;
use std::io::Write as _;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use corral_common::{CorralError, CorralResult};
use corral_oci::runtime::{Seccomp, SeccompAction, SeccompSyscall};

/// Profile format version understood by the engine.
const PROFILE_VERSION: u32 = 2;

/// Prefix of OCI architecture names (`SCMP_ARCH_X86_64`).
const ARCH_PREFIX: &str = "SCMP_ARCH_";

/// Renders an action, `errno` carrying its return code.
fn render_action(action: SeccompAction, errno_ret: Option<u32>) -> CorralResult<String> {
    match action {
        SeccompAction::ScmpActKill | SeccompAction::ScmpActKillThread => Ok("kill".to_string()),
        SeccompAction::ScmpActTrap => Ok("trap".to_string()),
        SeccompAction::ScmpActErrno => Ok(format!("errno {}", errno_ret.unwrap_or(0))),
        SeccompAction::ScmpActAllow => Ok("allow".to_string()),
        other => Err(CorralError::UnsupportedPolicy {
            message: format!("action {other} is not supported"),
        }),
    }
}

/// Architecture sections for the profile.
///
/// The engine adds compat architectures of the native one by itself, so a
/// list naming the native architecture collapses to just that.
fn select_archs(seccomp: &Seccomp, native: &str) -> Vec<String> {
    let native = native.to_ascii_lowercase();
    let listed: Vec<String> = seccomp
        .architectures
        .iter()
        .map(|a| a.strip_prefix(ARCH_PREFIX).unwrap_or(a).to_ascii_lowercase())
        .collect();

    if listed.is_empty() || listed.contains(&native) {
        return vec![native];
    }
    let mut archs = vec![native];
    for arch in listed {
        if !archs.contains(&arch) {
            archs.push(arch);
        }
    }
    archs
}

fn write_rule(out: &mut String, rule: &SeccompSyscall) -> CorralResult<()> {
    let action = render_action(rule.action, rule.errno_ret)?;
    for name in &rule.names {
        if rule.args.is_empty() {
            let _ = writeln!(out, "{name} {action}");
            continue;
        }
        for arg in &rule.args {
            let _ = writeln!(
                out,
                "{name} {action} [{},{},{},{}]",
                arg.index, arg.value, arg.op, arg.value_two
            );
        }
    }
    Ok(())
}

/// Compiles an OCI seccomp policy for a host with architecture `native`.
///
/// # Errors
///
/// Returns [`CorralError::UnsupportedPolicy`] for actions the engine cannot
/// express (trace, log, kill-process, notify).
pub fn compile_profile(seccomp: &Seccomp, native: &str) -> CorralResult<String> {
    let default = render_action(seccomp.default_action, seccomp.default_errno_ret).map_err(|_| {
        CorralError::UnsupportedPolicy {
            message: format!("default action {} is not supported", seccomp.default_action),
        }
    })?;

    let mut out = String::new();
    let _ = writeln!(out, "{PROFILE_VERSION}");
    let _ = writeln!(out, "allowlist {default}");

    for arch in select_archs(seccomp, native) {
        let _ = writeln!(out, "[{arch}]");
        for rule in &seccomp.syscalls {
            write_rule(&mut out, rule)?;
        }
    }
    Ok(out)
}

/// Architecture of the running kernel, as `uname -m` reports it.
#[must_use]
pub fn native_arch() -> String {
    rustix::system::uname().machine().to_string_lossy().into_owned()
}

/// Compiles the policy and writes it to `path` (mode `0440`, must not exist).
///
/// # Errors
///
/// Returns an error if the policy is unsupported or the file cannot be
/// created.
pub fn write_profile(path: &Path, seccomp: &Seccomp) -> CorralResult<()> {
    let profile = compile_profile(seccomp, &native_arch())?;
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o440)
        .open(path)?;
    file.write_all(profile.as_bytes())?;
    tracing::debug!(path = %path.display(), rules = seccomp.syscalls.len(), "wrote seccomp profile");
    Ok(())
}
