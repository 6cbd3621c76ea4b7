//! Container lifecycle: create, start, kill, delete.

use std::ffi::OsString;
use std::fmt;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use corral_common::{ContainerId, CorralError, CorralResult, RuntimePaths};
use corral_oci::{ContainerState, ContainerStatus, Spec};
use rustix::fs::Access;
use tokio::time::Instant;

use super::config::RuntimeConfig;
use super::container::{Container, ContainerConfig, Descriptor, write_pid_file};
use super::create::{self, CreateContext};
use crate::cgroup::{self, Cgroup, CgroupDirs};
use crate::engine::{EngineProvider, LxcProvider};
use crate::exec::{console, hooks, sync};
use crate::exec::{MonitorCommand, MonitorHandle, MonitorStdio, Signal, process_exited, send_signal};

/// Interval between status checks while waiting for a transition.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Called with the runtime directory right after it was created. May
/// amend the container configuration.
pub type OnCreateHook = Arc<dyn Fn(&Path, &mut ContainerConfig) -> CorralResult<()> + Send + Sync>;

/// Process-wide runtime context.
#[derive(Clone)]
pub struct Runtime {
    config: RuntimeConfig,
    paths: RuntimePaths,
    provider: Arc<dyn EngineProvider>,
    cgroup_root: Option<PathBuf>,
    privileged: bool,
    runtime_uid: u32,
    on_create: Option<OnCreateHook>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("provider", &self.provider)
            .field("cgroup_root", &self.cgroup_root)
            .field("privileged", &self.privileged)
            .field("runtime_uid", &self.runtime_uid)
            .field("on_create", &self.on_create.is_some())
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Creates a runtime using the lxc configuration engine. The cgroup
    /// root is detected unless the configuration names one.
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Self {
        let cgroup_root = config.cgroup_root.clone().or_else(cgroup::detect_cgroup_root);
        let runtime_uid = rustix::process::geteuid().as_raw();
        tracing::debug!(
            root = %config.root.display(),
            cgroup_root = ?cgroup_root,
            runtime_uid,
            "initialized runtime"
        );
        Self {
            paths: RuntimePaths::new(&config.root),
            config,
            provider: Arc::new(LxcProvider),
            cgroup_root,
            privileged: runtime_uid == 0,
            runtime_uid,
            on_create: None,
        }
    }

    /// Use another engine provider.
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn EngineProvider>) -> Self {
        self.provider = provider;
        self
    }

    /// Run `hook` after the runtime directory of a new container exists.
    #[must_use]
    pub fn with_on_create(mut self, hook: OnCreateHook) -> Self {
        self.on_create = Some(hook);
        self
    }

    /// Runtime configuration.
    #[must_use]
    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Runtime directory layout.
    #[must_use]
    pub const fn paths(&self) -> &RuntimePaths {
        &self.paths
    }

    /// The cgroup v2 mount point in use.
    #[must_use]
    pub fn cgroup_root(&self) -> Option<&Path> {
        self.cgroup_root.as_deref()
    }

    /// Checks that the host can run containers: the helper executables are
    /// executable, cgroup v2 is mounted, and the runtime root exists.
    ///
    /// # Errors
    ///
    /// Returns a [`CorralError::Configuration`] for a missing executable,
    /// [`CorralError::Unsupported`] without cgroup v2, or an I/O error if
    /// the root cannot be created.
    pub fn check_host(&self) -> CorralResult<()> {
        for program in [
            self.config.monitor_program(),
            self.config.init_program(),
            self.config.hook_program(),
        ] {
            rustix::fs::access(&program, Access::EXEC_OK).map_err(|e| {
                CorralError::configuration_with(
                    format!("{} is not executable", program.display()),
                    std::io::Error::from(e),
                )
            })?;
        }

        if self.cgroup_root.is_none() {
            return Err(CorralError::Unsupported {
                feature: "cgroup2 unified hierarchy".to_string(),
            });
        }

        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o711)
            .create(&self.paths.root)?;
        // The engine mounts every rootfs here, whatever user it maps to.
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o777)
            .create(self.paths.rootfs_mount())?;
        Ok(())
    }

    /// Creates a container and waits until its init process exists.
    ///
    /// On any failure, including the timeout, the partially created
    /// container must be removed with a forced [`Runtime::delete`].
    ///
    /// # Errors
    ///
    /// Returns a [`CorralError::Validation`] for an invalid spec,
    /// [`CorralError::AlreadyExists`] for a taken ID, a configuration error
    /// if the engine rejects the spec, or [`CorralError::Timeout`].
    pub async fn create(&self, config: ContainerConfig, timeout: Duration) -> CorralResult<Container> {
        let id = config.id.clone();
        let deadline = Instant::now() + timeout;
        let mut monitor = None;
        let result = tokio::time::timeout_at(deadline, self.create_container(config, &mut monitor))
            .await
            .unwrap_or_else(|_| {
                Err(CorralError::Timeout {
                    operation: format!("container {id} to be created"),
                })
            });

        if result.is_err() {
            if let Some(monitor) = monitor.as_mut() {
                tracing::warn!(container_id = %id, pid = monitor.pid(), "create failed, killing monitor");
                monitor.kill();
                let exit = monitor.exited().await;
                tracing::debug!(container_id = %id, %exit, "monitor gone");
            }
        }
        result
    }

    async fn create_container(
        &self,
        mut config: ContainerConfig,
        monitor_slot: &mut Option<MonitorHandle>,
    ) -> CorralResult<Container> {
        let id = config.id.clone();
        create::check_spec(&mut config.spec, &config.bundle, &self.config.proc_root)?;

        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o711)
            .create(&self.paths.root)?;
        let runtime_dir = self.paths.container(id.as_str());
        match std::fs::DirBuilder::new().mode(0o755).create(&runtime_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(CorralError::AlreadyExists { id: id.to_string() });
            }
            Err(e) => return Err(e.into()),
        }
        tracing::info!(container_id = %id, bundle = %config.bundle.display(), "creating container");

        if let Some(hook) = &self.on_create {
            hook(&runtime_dir, &mut config)?;
        }

        let engine = self.provider.create(id.as_str(), &runtime_dir)?;
        let linux = config.spec.linux.clone().unwrap_or_default();
        let dirs = CgroupDirs {
            container: cgroup::path::container_cgroup_dir(
                linux.cgroups_path.as_deref(),
                self.config.systemd_cgroup,
                &id,
            )?,
            monitor: cgroup::path::monitor_cgroup_dir(&self.config.monitor_cgroup, &id)?,
        };

        let rootfs_mount = self.paths.rootfs_mount();
        let ctx = CreateContext {
            config: &self.config,
            id: &id,
            runtime_dir: &runtime_dir,
            rootfs_mount: &rootfs_mount,
            cgroup_dirs: &dirs,
            privileged: self.privileged,
            runtime_uid: self.runtime_uid,
            log_file: config.log_file.as_deref(),
            log_level: config.log_level.as_deref(),
        };
        create::configure(&ctx, engine.as_ref(), &mut config.spec)?;

        if let Some(hooks) = config.spec.hooks.as_ref().filter(|h| !h.create_runtime.is_empty()) {
            let state = ContainerState::new(
                id.as_str(),
                ContainerStatus::Creating,
                None,
                &config.bundle,
                config.spec.annotations.clone(),
            );
            hooks::run_hooks_logged("createRuntime", &hooks.create_runtime, &state).await;
        }

        let stdio = self.console(&config, engine.as_ref())?;

        write_spec(&self.paths.spec(id.as_str()), &config.spec)?;
        let engine_config = self.paths.engine_config(id.as_str());
        engine.save_config(&engine_config)?;

        let monitor = engine
            .spawn_monitor(MonitorCommand {
                program: self.config.monitor_program(),
                args: vec![
                    OsString::from(id.as_str()),
                    self.paths.root.clone().into_os_string(),
                    engine_config.into_os_string(),
                ],
                cwd: runtime_dir.clone(),
                env: self.config.monitor_env(),
                stdio,
            })
            .await?;
        let monitor = monitor_slot.insert(monitor);
        tracing::info!(container_id = %id, pid = monitor.pid(), "spawned monitor");

        let descriptor = Descriptor {
            id: id.clone(),
            created_at: Utc::now(),
            root: self.paths.root.clone(),
            bundle: config.bundle.clone(),
            console_socket: config.console_socket.clone(),
            pid_file: config.pid_file.clone(),
            monitor_pid: monitor.pid(),
            monitor_cgroup_dir: dirs.monitor,
            cgroup_dir: dirs.container,
            log_file: config.log_file.clone(),
            log_level: config.log_level.clone(),
            features: self.config.features,
        };
        descriptor.create(&self.paths.descriptor(id.as_str()))?;

        let container = Container::new(
            engine,
            descriptor,
            config.spec,
            runtime_dir,
            self.config.proc_root.clone(),
        );
        wait_created(&container, monitor).await?;

        if let Some(pid_file) = &config.pid_file {
            write_pid_file(pid_file, monitor.pid())?;
        }
        tracing::info!(container_id = %id, "container created");
        Ok(container)
    }

    fn console(
        &self,
        config: &ContainerConfig,
        engine: &dyn crate::engine::IsolationEngine,
    ) -> CorralResult<MonitorStdio> {
        let terminal = config.spec.process.as_ref().is_some_and(|p| p.terminal);
        match &config.console_socket {
            Some(socket) => {
                let pty = console::allocate_pty()?;
                console::send_console(socket, &pty.master)?;
                tracing::debug!(container_id = %config.id, socket = %socket.display(), "sent console");
                Ok(MonitorStdio::Terminal(pty.slave))
            }
            None if terminal => Err(CorralError::validation(
                "process.terminal requires a console socket",
            )),
            None => {
                engine.set_config_item("lxc.console.path", "none")?;
                Ok(MonitorStdio::Inherit)
            }
        }
    }

    /// Lets a created container run its command.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::InvalidState`] unless the container is
    /// created, a [`CorralError::Protocol`] error for a foreign peer on the
    /// sync FIFO, or [`CorralError::Timeout`].
    pub async fn start(&self, container: &Container, timeout: Duration) -> CorralResult<()> {
        let id = container.id();
        let status = container.status()?;
        if !status.can_start() {
            return Err(invalid_state(id, "created", status));
        }

        let deadline = Instant::now() + timeout;
        let fifo = self.paths.sync_fifo(id.as_str());
        tokio::time::timeout_at(deadline, sync::wait_for_peer(&fifo, id.as_str()))
            .await
            .map_err(|_| CorralError::Timeout {
                operation: format!("init of {id} to open the sync fifo"),
            })??;

        tokio::time::timeout_at(deadline, wait_while(container, ContainerStatus::Created))
            .await
            .map_err(|_| CorralError::Timeout {
                operation: format!("container {id} to start"),
            })??;
        tracing::info!(container_id = %id, "container started");
        Ok(())
    }

    /// Sends `signal` to the init process of the container.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::InvalidState`] for a stopped container or
    /// [`CorralError::Timeout`].
    pub async fn kill(&self, container: &Container, signal: Signal, timeout: Duration) -> CorralResult<()> {
        let id = container.id().clone();
        let target = container.clone();
        let task = tokio::task::spawn_blocking(move || signal_init(&target, signal));
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(CorralError::Internal {
                message: format!("kill task failed: {e}"),
            }),
            Err(_) => Err(CorralError::Timeout {
                operation: format!("signal delivery to {id}"),
            }),
        }
    }

    /// Deletes a container. A container that does not exist is already
    /// deleted.
    ///
    /// Without `force` the container must be stopped. With `force` it is
    /// killed first.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::InvalidState`] for a live container without
    /// `force`, [`CorralError::Timeout`], or an error if the cgroup or the
    /// runtime directory cannot be removed.
    pub async fn delete(&self, id: &ContainerId, force: bool, timeout: Duration) -> CorralResult<()> {
        let deadline = Instant::now() + timeout;
        tokio::time::timeout_at(deadline, self.delete_container(id, force, deadline))
            .await
            .map_err(|_| CorralError::Timeout {
                operation: format!("container {id} to be deleted"),
            })?
    }

    async fn delete_container(&self, id: &ContainerId, force: bool, deadline: Instant) -> CorralResult<()> {
        let runtime_dir = self.paths.container(id.as_str());
        let container = match self.load(id) {
            Ok(container) => container,
            Err(CorralError::NotExist { .. }) => {
                tracing::debug!(container_id = %id, "container does not exist");
                return Ok(());
            }
            Err(e) => {
                tracing::warn!(container_id = %id, error = %e, "container cannot be loaded, removing runtime directory");
                remove_runtime_dir(&runtime_dir)?;
                return Ok(());
            }
        };

        let status = container.status()?;
        if !status.is_stopped() {
            if !force {
                return Err(invalid_state(id, "stopped", status));
            }
            self.kill_container(&container, status).await?;
        }

        let descriptor = container.descriptor();
        if let Some(root) = &self.cgroup_root {
            let cgroup = Cgroup::new(root, &descriptor.cgroup_dir);
            cgroup.kill(Signal::KILL, Some(descriptor.monitor_pid), deadline).await?;
            cgroup.wait_unpopulated(deadline).await?;

            // A monitor that outlived its container is not needed anymore.
            let monitor_cgroup = Cgroup::new(root, &descriptor.monitor_cgroup_dir);
            monitor_cgroup.kill(Signal::KILL, None, deadline).await?;
            monitor_cgroup.wait_unpopulated(deadline).await?;
        }

        container.engine().release()?;

        if let Some(root) = &self.cgroup_root {
            Cgroup::new(root, &descriptor.cgroup_dir).delete()?;
            if let Err(e) = Cgroup::new(root, &descriptor.monitor_cgroup_dir).delete() {
                tracing::warn!(container_id = %id, error = %e, "failed to delete monitor cgroup");
            }
        }

        remove_runtime_dir(&runtime_dir)?;
        tracing::info!(container_id = %id, "container deleted");
        Ok(())
    }

    /// Kills a container that is not stopped yet and waits until it is.
    async fn kill_container(&self, container: &Container, status: ContainerStatus) -> CorralResult<()> {
        let id = container.id();
        if let Some(pid) = container.init_pid()? {
            tracing::info!(container_id = %id, pid, "killing container");
            send_signal(pid, Signal::KILL)?;
        }
        if status != ContainerStatus::Creating {
            return wait_while_alive(container).await;
        }

        // Without an init process the monitor never reports the container
        // stopped, so the monitor itself has to go.
        let pid = container.descriptor().monitor_pid;
        if !runs_in(&self.config.proc_root, pid, container.runtime_dir()) {
            tracing::debug!(container_id = %id, pid, "monitor already gone");
            return Ok(());
        }
        tracing::info!(container_id = %id, pid, "killing monitor of unfinished container");
        send_signal(pid, Signal::KILL)?;
        while !process_exited(&self.config.proc_root, pid)? {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        Ok(())
    }

    /// OCI state document of a container.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::NotExist`] for an unknown container, or an
    /// error if the status cannot be determined.
    pub fn state(&self, id: &ContainerId) -> CorralResult<ContainerState> {
        self.load(id)?.state()
    }

    /// IDs of all containers in the runtime root.
    ///
    /// # Errors
    ///
    /// Returns an error if the root cannot be read.
    pub fn list(&self) -> CorralResult<Vec<ContainerId>> {
        let mut ids = Vec::new();
        for name in self.paths.list()? {
            match ContainerId::new(name.as_str()) {
                Ok(id) => ids.push(id),
                Err(_) => tracing::debug!(name, "skipping foreign directory in runtime root"),
            }
        }
        Ok(ids)
    }

    /// Loads a created container from its runtime directory.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::NotExist`] if there is no runtime directory,
    /// or an error if the descriptor or the spec cannot be read.
    pub fn load(&self, id: &ContainerId) -> CorralResult<Container> {
        let runtime_dir = self.paths.container(id.as_str());
        match std::fs::symlink_metadata(&runtime_dir) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CorralError::NotExist { id: id.to_string() });
            }
            Err(e) => return Err(e.into()),
        }

        let descriptor = Descriptor::load(&self.paths.descriptor(id.as_str()))?;
        let spec = Spec::load(&self.paths.spec(id.as_str()))?;
        let engine = self.provider.load(id.as_str(), &runtime_dir)?;
        Ok(Container::new(
            engine,
            descriptor,
            spec,
            runtime_dir,
            self.config.proc_root.clone(),
        ))
    }
}

fn invalid_state(id: &ContainerId, expected: &str, actual: ContainerStatus) -> CorralError {
    CorralError::InvalidState {
        id: id.to_string(),
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}

fn write_spec(path: &Path, spec: &Spec) -> CorralResult<()> {
    let mut data = serde_json::to_vec_pretty(spec)?;
    data.push(b'\n');
    std::fs::write(path, data)?;
    Ok(())
}

fn remove_runtime_dir(path: &Path) -> CorralResult<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Returns true if `pid` has `dir` as its working directory. The monitor
/// runs in the runtime directory, which tells it apart from a process that
/// reused its PID.
fn runs_in(proc_root: &Path, pid: u32, dir: &Path) -> bool {
    let Ok(cwd) = std::fs::read_link(proc_root.join(pid.to_string()).join("cwd")) else {
        return false;
    };
    std::fs::canonicalize(dir).is_ok_and(|dir| dir == cwd)
}

fn signal_init(container: &Container, signal: Signal) -> CorralResult<()> {
    let status = container.status()?;
    if !status.can_kill() {
        return Err(invalid_state(container.id(), "created or running", status));
    }
    match container.init_pid()? {
        Some(pid) => {
            send_signal(pid, signal)?;
            tracing::info!(container_id = %container.id(), pid, %signal, "sent signal");
        }
        None => tracing::debug!(container_id = %container.id(), "init process already gone"),
    }
    Ok(())
}

/// Polls until the container is created. Fails as soon as the monitor
/// exits without the container getting there.
async fn wait_created(container: &Container, monitor: &mut MonitorHandle) -> CorralResult<()> {
    let id = container.id();
    let mut interval = tokio::time::interval(POLL_INTERVAL);
    loop {
        tokio::select! {
            exit = monitor.exited() => {
                if container.status()? == ContainerStatus::Created {
                    return Ok(());
                }
                return Err(CorralError::configuration(format!(
                    "monitor of {id} exited before the container was created: {exit}"
                )));
            }
            _ = interval.tick() => {
                match container.status()? {
                    ContainerStatus::Created => return Ok(()),
                    // The monitor writes its first state once it runs.
                    ContainerStatus::Creating | ContainerStatus::Stopped => {}
                    status @ ContainerStatus::Running => {
                        return Err(invalid_state(id, "created", status));
                    }
                }
            }
        }
    }
}

async fn wait_while(container: &Container, status: ContainerStatus) -> CorralResult<()> {
    while container.status()? == status {
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    Ok(())
}

async fn wait_while_alive(container: &Container) -> CorralResult<()> {
    while !container.status()?.is_stopped() {
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_oci::runtime::{Process, Root};

    fn runtime(root: &Path) -> Runtime {
        Runtime::new(RuntimeConfig::default().with_root(root).with_cgroup_root(root.join("cgroup")))
    }

    fn config(id: &str, bundle: &Path) -> ContainerConfig {
        let spec = Spec {
            root: Some(Root {
                path: PathBuf::from("rootfs"),
                readonly: false,
            }),
            process: Some(Process {
                args: vec!["true".to_string()],
                ..Process::default()
            }),
            ..Spec::default()
        };
        ContainerConfig::new(ContainerId::new(id).unwrap(), spec, bundle)
    }

    #[test]
    fn load_unknown_container() {
        let root = tempfile::tempdir().unwrap();
        let err = runtime(root.path()).load(&ContainerId::new("ghost").unwrap()).unwrap_err();
        assert!(matches!(err, CorralError::NotExist { .. }));
    }

    #[test_log::test(tokio::test)]
    async fn delete_unknown_container_succeeds() {
        let root = tempfile::tempdir().unwrap();
        let rt = runtime(root.path());
        let id = ContainerId::new("ghost").unwrap();
        rt.delete(&id, false, Duration::from_secs(1)).await.unwrap();
        rt.delete(&id, true, Duration::from_secs(1)).await.unwrap();
    }

    #[test_log::test(tokio::test)]
    async fn delete_removes_unloadable_leftovers() {
        let root = tempfile::tempdir().unwrap();
        let rt = runtime(root.path());
        std::fs::create_dir(root.path().join("half")).unwrap();
        std::fs::write(root.path().join("half/config"), "").unwrap();

        rt.delete(&ContainerId::new("half").unwrap(), false, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(!root.path().join("half").exists());
    }

    #[test_log::test(tokio::test)]
    async fn invalid_spec_leaves_nothing_behind() {
        let root = tempfile::tempdir().unwrap();
        let rt = runtime(root.path());
        let mut config = config("web", root.path());
        config.spec.process.as_mut().unwrap().args.clear();

        let err = rt.create(config, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, CorralError::Validation { .. }));
        assert!(!root.path().join("web").exists());
    }

    #[test_log::test(tokio::test)]
    async fn taken_id_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let rt = runtime(root.path());
        std::fs::create_dir(root.path().join("web")).unwrap();

        let err = rt.create(config("web", root.path()), Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, CorralError::AlreadyExists { .. }));
        // The existing directory is not touched.
        assert!(root.path().join("web").exists());
    }

    #[test_log::test(tokio::test)]
    async fn force_delete_kills_monitor_of_unfinished_container() {
        use std::os::unix::process::ExitStatusExt;

        let root = tempfile::tempdir().unwrap();
        let rt = runtime(root.path());
        let id = ContainerId::new("stuck").unwrap();
        let runtime_dir = rt.paths().container("stuck");
        std::fs::create_dir(&runtime_dir).unwrap();
        std::fs::write(rt.paths().monitor_state("stuck"), "STARTING\n").unwrap();

        // A monitor left behind by a create that never finished.
        let mut monitor = std::process::Command::new("sleep")
            .arg("30")
            .current_dir(&runtime_dir)
            .spawn()
            .unwrap();
        Descriptor {
            id: id.clone(),
            created_at: Utc::now(),
            root: root.path().to_path_buf(),
            bundle: root.path().to_path_buf(),
            console_socket: None,
            pid_file: None,
            monitor_pid: monitor.id(),
            monitor_cgroup_dir: "corral.slice/stuck.scope".to_string(),
            cgroup_dir: "corral/stuck".to_string(),
            log_file: None,
            log_level: None,
            features: rt.config().features,
        }
        .create(&rt.paths().descriptor("stuck"))
        .unwrap();
        write_spec(&rt.paths().spec("stuck"), &config("stuck", root.path()).spec).unwrap();

        assert_eq!(rt.state(&id).unwrap().status, ContainerStatus::Creating);
        let err = rt.delete(&id, false, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, CorralError::InvalidState { .. }));

        rt.delete(&id, true, Duration::from_secs(5)).await.unwrap();
        assert!(!runtime_dir.exists());
        assert_eq!(monitor.wait().unwrap().signal(), Some(libc::SIGKILL));
    }

    #[test]
    fn pid_reuse_is_not_mistaken_for_the_monitor() {
        let dir = tempfile::tempdir().unwrap();
        let proc_root = Path::new("/proc");
        let own = std::process::id();
        let cwd = std::env::current_dir().unwrap();
        assert!(runs_in(proc_root, own, &cwd));
        assert!(!runs_in(proc_root, own, dir.path()));
    }

    #[test]
    fn list_skips_foreign_entries() {
        let root = tempfile::tempdir().unwrap();
        let rt = runtime(root.path());
        for name in ["web", "db", ".rootfs", "Not-An-Id"] {
            std::fs::create_dir(root.path().join(name)).unwrap();
        }
        std::fs::write(root.path().join("stray"), "").unwrap();

        let ids: Vec<String> = rt.list().unwrap().into_iter().map(String::from).collect();
        assert_eq!(ids, ["db", "web"]);
    }

    #[test]
    fn check_host_requires_executables() {
        let root = tempfile::tempdir().unwrap();
        let rt = Runtime::new(
            RuntimeConfig::default()
                .with_root(root.path().join("run"))
                .with_libexec(root.path().join("libexec"))
                .with_cgroup_root(root.path()),
        );
        let err = rt.check_host().unwrap_err();
        assert!(matches!(err, CorralError::Configuration { .. }));
    }
}
