//! Spec validation and translation into engine configuration.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use corral_common::{ContainerId, CorralError, CorralResult};
use corral_oci::Spec;
use corral_oci::runtime::{Namespace, NamespaceType};

use super::config::RuntimeConfig;
use crate::cgroup::{self, CgroupDirs};
use crate::engine::IsolationEngine;
use crate::exec::init;
use crate::filesystem::{self, devices};
use crate::namespace;
use crate::security;

/// Engine log levels, lowest first.
const LOG_LEVELS: &[&str] = &[
    "trace", "debug", "info", "notice", "warn", "error", "crit", "alert", "fatal",
];

/// Engine log level used when none is given.
const DEFAULT_LOG_LEVEL: &str = "warn";

/// Checks the spec and fills in defaults.
///
/// A relative root path is resolved against the bundle and an empty
/// working directory becomes `/`.
///
/// # Errors
///
/// Returns a [`CorralError::Validation`] for incomplete specs and for
/// specs sharing the runtime's mount namespace.
pub fn check_spec(spec: &mut Spec, bundle: &Path, proc_root: &Path) -> CorralResult<()> {
    let root = spec
        .root
        .as_mut()
        .ok_or_else(|| CorralError::validation("spec has no root"))?;
    if root.path.as_os_str().is_empty() {
        return Err(CorralError::validation("root.path is empty"));
    }
    if root.path.is_relative() {
        root.path = bundle.join(&root.path);
    }

    let process = spec
        .process
        .as_mut()
        .ok_or_else(|| CorralError::validation("spec has no process"))?;
    if process.args.is_empty() {
        return Err(CorralError::validation("process.args is empty"));
    }
    if process.cwd.as_os_str().is_empty() {
        tracing::info!("process.cwd is unset, defaulting to /");
        process.cwd = PathBuf::from("/");
    }
    if process.cwd.is_relative() {
        return Err(CorralError::validation(format!(
            "process.cwd {} is not absolute",
            process.cwd.display()
        )));
    }

    let mnt = spec.namespace(NamespaceType::Mount);
    if namespace::is_shared_with_runtime(mnt, NamespaceType::Mount, proc_root)? {
        return Err(CorralError::validation("container wants to share the host mount namespace"));
    }
    let pid = spec.namespace(NamespaceType::Pid);
    if namespace::is_shared_with_runtime(pid, NamespaceType::Pid, proc_root)? {
        tracing::warn!("container shares the host pid namespace");
    }
    Ok(())
}

/// Normalizes an engine log level name.
///
/// # Errors
///
/// Returns a [`CorralError::Validation`] for unknown level names.
pub fn log_level(level: Option<&str>) -> CorralResult<&'static str> {
    let Some(level) = level.filter(|l| !l.is_empty()) else {
        return Ok(DEFAULT_LOG_LEVEL);
    };
    let lower = level.to_ascii_lowercase();
    LOG_LEVELS
        .iter()
        .find(|l| **l == lower)
        .copied()
        .ok_or_else(|| CorralError::validation(format!("unknown log level {level:?}")))
}

/// Writes `lxc.prlimit.*` items. Duplicate resources are rejected.
///
/// # Errors
///
/// Returns a [`CorralError::Validation`] for duplicate resources.
pub fn configure_rlimits(engine: &dyn IsolationEngine, spec: &Spec) -> CorralResult<()> {
    let Some(process) = &spec.process else {
        return Ok(());
    };
    let mut seen = BTreeSet::new();
    for limit in &process.rlimits {
        let lower = limit.limit_type.to_ascii_lowercase();
        let name = lower.strip_prefix("rlimit_").unwrap_or(&lower).to_string();
        if !seen.insert(name.clone()) {
            return Err(CorralError::validation(format!(
                "duplicate resource limit {}",
                limit.limit_type
            )));
        }
        engine.set_config_item(
            &format!("lxc.prlimit.{name}"),
            &format!("{}:{}", limit.soft, limit.hard),
        )?;
    }
    Ok(())
}

/// Everything [`configure`] needs besides the spec.
#[derive(Debug)]
pub struct CreateContext<'a> {
    /// Runtime configuration.
    pub config: &'a RuntimeConfig,
    /// Container ID.
    pub id: &'a ContainerId,
    /// Runtime directory of the container.
    pub runtime_dir: &'a Path,
    /// Where the engine mounts the rootfs.
    pub rootfs_mount: &'a Path,
    /// Cgroup placement.
    pub cgroup_dirs: &'a CgroupDirs,
    /// The runtime runs as root.
    pub privileged: bool,
    /// UID the runtime runs as.
    pub runtime_uid: u32,
    /// Engine log file.
    pub log_file: Option<&'a Path>,
    /// Engine log level.
    pub log_level: Option<&'a str>,
}

/// Translates `spec` into engine configuration. The spec is amended on
/// the way (init mounts, default devices).
///
/// # Errors
///
/// Returns the first error of any configuration step.
pub fn configure(ctx: &CreateContext<'_>, engine: &dyn IsolationEngine, spec: &mut Spec) -> CorralResult<()> {
    let features = ctx.config.features;

    if let Some(hostname) = spec.hostname.clone().filter(|h| !h.is_empty()) {
        engine.set_config_item("lxc.uts.name", &hostname)?;
        if let Some(path) = spec.namespace(NamespaceType::Uts).and_then(Namespace::join_path) {
            namespace::set_hostname(path, &hostname)?;
        }
    }

    let root = spec
        .root
        .clone()
        .ok_or_else(|| CorralError::validation("spec has no root"))?;
    let propagation = spec.linux.as_ref().and_then(|l| l.rootfs_propagation.clone());
    filesystem::configure_rootfs(engine, &root, propagation.as_deref(), ctx.rootfs_mount)?;

    init::configure_init(
        engine,
        spec,
        ctx.id,
        ctx.runtime_dir,
        &ctx.config.init_program(),
        ctx.runtime_uid,
    )?;

    if !ctx.privileged && spec.namespace(NamespaceType::User).is_none() {
        tracing::warn!(container_id = %ctx.id, "unprivileged runtime, enabling user namespace");
        spec.linux_mut().namespaces.push(Namespace {
            ns_type: NamespaceType::User,
            path: None,
        });
    }
    namespace::configure_namespaces(engine, spec)?;

    if let Some(process) = &spec.process {
        if let Some(score) = process.oom_score_adj {
            engine.set_config_item("lxc.proc.oom_score_adj", &score.to_string())?;
        }
        if process.no_new_privileges {
            engine.set_config_item("lxc.no_new_privs", "1")?;
        }
    }

    let process = spec.process.clone().unwrap_or_default();
    if features.apparmor {
        security::configure_apparmor(engine, process.apparmor_profile.as_deref())?;
    } else {
        tracing::warn!("apparmor feature is disabled, profile is unconfined");
    }

    if features.seccomp {
        if let Some(seccomp) = spec.linux.as_ref().and_then(|l| l.seccomp.as_ref()) {
            if !seccomp.syscalls.is_empty() {
                let profile = ctx.runtime_dir.join("seccomp.conf");
                security::write_profile(&profile, seccomp)?;
                engine.set_config_item("lxc.seccomp.profile", &profile.to_string_lossy())?;
            }
        }
    } else {
        tracing::warn!("seccomp feature is disabled, all system calls are allowed");
    }

    if features.capabilities {
        security::configure_capabilities(engine, process.capabilities.as_ref())?;
    } else {
        tracing::warn!("capabilities feature is disabled, running with full privileges");
    }

    devices::configure_devices(
        engine,
        spec,
        ctx.runtime_dir,
        ctx.privileged,
        &ctx.config.hook_program(),
    )?;

    let linux = spec.linux.clone().unwrap_or_default();
    cgroup::configure_cgroup(engine, &linux, ctx.cgroup_dirs, features.cgroup_devices)?;

    for (key, value) in &linux.sysctl {
        engine.set_config_item(&format!("lxc.sysctl.{key}"), value)?;
    }

    configure_rlimits(engine, spec)?;

    let level = log_level(ctx.log_level)?;
    engine.set_config_item("lxc.log.level", level)?;
    if let Some(file) = ctx.log_file {
        engine.set_config_item("lxc.log.file", &file.to_string_lossy())?;
    }

    filesystem::configure_mounts(engine, spec, &root.path)?;
    filesystem::configure_readonly_paths(engine, spec)?;

    for var in &process.env {
        engine.set_config_item("lxc.environment", var)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::LxcConfigEngine;
    use corral_oci::runtime::{Linux, Process, Rlimit, Root};

    fn spec() -> Spec {
        Spec {
            root: Some(Root {
                path: PathBuf::from("rootfs"),
                readonly: false,
            }),
            process: Some(Process {
                args: vec!["sleep".to_string(), "30".to_string()],
                env: vec!["PATH=/bin".to_string(), "TERM=xterm".to_string()],
                ..Process::default()
            }),
            hostname: Some("web".to_string()),
            linux: Some(Linux::default()),
            ..Spec::default()
        }
    }

    #[test]
    fn check_fills_defaults() {
        let mut spec = spec();
        check_spec(&mut spec, Path::new("/bundles/web"), Path::new("/proc")).unwrap();
        assert_eq!(spec.root.as_ref().unwrap().path, PathBuf::from("/bundles/web/rootfs"));
        assert_eq!(spec.process.as_ref().unwrap().cwd, PathBuf::from("/"));
    }

    #[test]
    fn check_rejects_incomplete_specs() {
        let bundle = Path::new("/bundles/web");
        let proc_root = Path::new("/proc");

        let mut no_args = spec();
        no_args.process.as_mut().unwrap().args.clear();
        assert!(matches!(
            check_spec(&mut no_args, bundle, proc_root).unwrap_err(),
            CorralError::Validation { .. }
        ));

        let mut no_root = spec();
        no_root.root.as_mut().unwrap().path = PathBuf::new();
        assert!(check_spec(&mut no_root, bundle, proc_root).is_err());

        let mut relative_cwd = spec();
        relative_cwd.process.as_mut().unwrap().cwd = PathBuf::from("srv");
        assert!(check_spec(&mut relative_cwd, bundle, proc_root).is_err());
    }

    #[test]
    fn check_rejects_host_mount_namespace() {
        let mut spec = spec();
        spec.linux_mut().namespaces.push(Namespace {
            ns_type: NamespaceType::Mount,
            path: Some(PathBuf::from("/proc/self/ns/mnt")),
        });
        let err = check_spec(&mut spec, Path::new("/bundles/web"), Path::new("/proc")).unwrap_err();
        assert!(matches!(err, CorralError::Validation { .. }));
    }

    #[test]
    fn log_levels() {
        assert_eq!(log_level(None).unwrap(), "warn");
        assert_eq!(log_level(Some("DEBUG")).unwrap(), "debug");
        assert_eq!(log_level(Some("Notice")).unwrap(), "notice");
        assert!(log_level(Some("verbose")).is_err());
    }

    #[test]
    fn rlimits() {
        let engine = LxcConfigEngine::new("web", "/nonexistent");
        let mut spec = spec();
        spec.process.as_mut().unwrap().rlimits = vec![
            Rlimit { limit_type: "RLIMIT_NOFILE".to_string(), soft: 1024, hard: 4096 },
            Rlimit { limit_type: "RLIMIT_NPROC".to_string(), soft: 64, hard: 64 },
        ];
        configure_rlimits(&engine, &spec).unwrap();
        assert_eq!(engine.config_item("lxc.prlimit.nofile").as_deref(), Some("1024:4096"));
        assert_eq!(engine.config_item("lxc.prlimit.nproc").as_deref(), Some("64:64"));

        spec.process.as_mut().unwrap().rlimits.push(Rlimit {
            limit_type: "rlimit_nofile".to_string(),
            soft: 1,
            hard: 1,
        });
        assert!(matches!(
            configure_rlimits(&engine, &spec).unwrap_err(),
            CorralError::Validation { .. }
        ));
    }

    struct Fixture {
        root: tempfile::TempDir,
        config: RuntimeConfig,
        id: ContainerId,
        dirs: CgroupDirs,
    }

    impl Fixture {
        fn new() -> Self {
            let root = tempfile::tempdir().unwrap();
            let libexec = root.path().join("libexec");
            std::fs::create_dir(&libexec).unwrap();
            std::fs::write(libexec.join("corral-init"), "").unwrap();
            std::fs::create_dir(root.path().join("web")).unwrap();
            std::fs::create_dir_all(root.path().join("bundle/rootfs")).unwrap();
            let config = RuntimeConfig::default().with_root(root.path()).with_libexec(libexec);
            Self {
                root,
                config,
                id: ContainerId::new("web").unwrap(),
                dirs: CgroupDirs {
                    container: "corral/web".to_string(),
                    monitor: "corral-monitor.slice/web.scope".to_string(),
                },
            }
        }

        fn runtime_dir(&self) -> PathBuf {
            self.root.path().join("web")
        }

        fn configure(&self, privileged: bool, log_level: Option<&str>) -> (LxcConfigEngine, Spec) {
            let runtime_dir = self.runtime_dir();
            let rootfs_mount = self.root.path().join(".rootfs");
            let ctx = CreateContext {
                config: &self.config,
                id: &self.id,
                runtime_dir: &runtime_dir,
                rootfs_mount: &rootfs_mount,
                cgroup_dirs: &self.dirs,
                privileged,
                runtime_uid: if privileged { 0 } else { 1000 },
                log_file: None,
                log_level,
            };
            let engine = LxcConfigEngine::new("web", &runtime_dir);
            let mut spec = spec();
            check_spec(&mut spec, &self.root.path().join("bundle"), Path::new("/proc")).unwrap();
            configure(&ctx, &engine, &mut spec).unwrap();
            (engine, spec)
        }
    }

    #[test]
    fn configures_a_minimal_container() {
        let fixture = Fixture::new();
        let (engine, _) = fixture.configure(true, Some("info"));
        let runtime_dir = fixture.runtime_dir();

        assert_eq!(engine.config_item("lxc.uts.name").as_deref(), Some("web"));
        assert_eq!(engine.config_item("lxc.init.cmd").as_deref(), Some("/.corral/init web"));
        assert_eq!(engine.config_item("lxc.cap.keep").as_deref(), Some("none"));
        assert_eq!(engine.config_item("lxc.apparmor.profile").as_deref(), Some("unconfined"));
        assert_eq!(engine.config_item("lxc.log.level").as_deref(), Some("info"));
        assert_eq!(engine.config_item("lxc.environment").as_deref(), Some("PATH=/bin\nTERM=xterm"));
        assert_eq!(engine.config_item("lxc.cgroup.dir.container").as_deref(), Some("corral/web"));
        assert!(engine.config_item("lxc.namespace.clone").unwrap().contains("pid"));
        assert!(engine.config_item("lxc.seccomp.profile").is_none());
        assert!(runtime_dir.join("devices.txt").exists());
        assert!(runtime_dir.join("syncfifo").exists());

        let mounts = engine.config_item("lxc.mount.entry").unwrap();
        assert!(mounts.lines().any(|m| m.contains(".corral bind bind,ro,nodev,nosuid,create=dir")));
    }

    #[test]
    fn unprivileged_runtime_adds_user_namespace() {
        let fixture = Fixture::new();
        let (engine, spec) = fixture.configure(false, None);

        assert!(spec.namespace(NamespaceType::User).is_some());
        assert!(engine.config_item("lxc.namespace.clone").unwrap().split(' ').any(|ns| ns == "user"));
        assert_eq!(engine.config_item("lxc.log.level").as_deref(), Some("warn"));
        assert!(!fixture.runtime_dir().join("devices.txt").exists());
    }
}
