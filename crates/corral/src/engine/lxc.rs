//! File-backed `lxc.*` configuration engine.
//!
//! The engine keeps an ordered list of `lxc.*` items and writes them as
//! `key = value` lines for the monitor (`corral-monitor <name> <root>
//! <config>`), which drives liblxc. The monitor reports progress through
//! `monitor.state` in the runtime directory: a single line
//! `<STATE> [<init pid>]`, where a missing file means `STOPPED`.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use corral_common::paths::{ENGINE_CONFIG_FILE, MONITOR_STATE_FILE};
use corral_common::{CorralError, CorralResult};
use parking_lot::Mutex;

use super::{EngineProvider, EngineState, IsolationEngine};
use crate::exec::monitor::{self, MonitorCommand, MonitorHandle};

/// Keys understood by the engine.
const SUPPORTED_KEYS: &[&str] = &[
    "lxc.apparmor.allow_nesting",
    "lxc.apparmor.profile",
    "lxc.autodev",
    "lxc.cap.drop",
    "lxc.cap.keep",
    "lxc.cgroup.dir",
    "lxc.cgroup.dir.container",
    "lxc.cgroup.dir.monitor",
    "lxc.cgroup.relative",
    "lxc.console.path",
    "lxc.environment",
    "lxc.ephemeral",
    "lxc.hook.mount",
    "lxc.hook.version",
    "lxc.idmap",
    "lxc.init.cmd",
    "lxc.init.cwd",
    "lxc.init.gid",
    "lxc.init.groups",
    "lxc.init.uid",
    "lxc.log.file",
    "lxc.log.level",
    "lxc.mount.auto",
    "lxc.mount.entry",
    "lxc.namespace.clone",
    "lxc.namespace.keep",
    "lxc.no_new_privs",
    "lxc.proc.oom_score_adj",
    "lxc.rootfs.managed",
    "lxc.rootfs.mount",
    "lxc.rootfs.options",
    "lxc.rootfs.path",
    "lxc.seccomp.profile",
    "lxc.uts.name",
];

/// Key families with a free-form suffix.
const SUPPORTED_PREFIXES: &[&str] = &[
    "lxc.cgroup2.",
    "lxc.namespace.share.",
    "lxc.prlimit.",
    "lxc.sysctl.",
];

/// Keys that accumulate values instead of replacing them.
const MULTI_VALUED_KEYS: &[&str] = &[
    "lxc.cgroup2.devices.allow",
    "lxc.cgroup2.devices.deny",
    "lxc.environment",
    "lxc.idmap",
    "lxc.mount.entry",
];

#[derive(Debug, Default)]
struct Items {
    entries: Vec<(String, String)>,
    released: bool,
}

/// Engine handle for one container.
#[derive(Debug)]
pub struct LxcConfigEngine {
    name: String,
    runtime_dir: PathBuf,
    items: Mutex<Items>,
}

impl LxcConfigEngine {
    /// Creates an engine with no configuration.
    #[must_use]
    pub fn new(name: impl Into<String>, runtime_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            runtime_dir: runtime_dir.into(),
            items: Mutex::new(Items::default()),
        }
    }

    /// Opens the engine of an existing container, reading back its saved
    /// configuration if there is one.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but is unreadable.
    pub fn open(name: impl Into<String>, runtime_dir: impl Into<PathBuf>) -> CorralResult<Self> {
        let engine = Self::new(name, runtime_dir);
        let path = engine.runtime_dir.join(ENGINE_CONFIG_FILE);
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                engine.items.lock().entries = parse_config(&content);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(engine)
    }

    /// Container name the engine was opened for.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Renders the configuration file content.
    #[must_use]
    pub fn render(&self) -> String {
        let items = self.items.lock();
        let mut out = String::new();
        for (key, value) in &items.entries {
            let _ = writeln!(out, "{key} = {value}");
        }
        out
    }

    fn read_monitor_state(&self) -> CorralResult<Option<(EngineState, Option<u32>)>> {
        let path = self.runtime_dir.join(MONITOR_STATE_FILE);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut fields = content.split_whitespace();
        let Some(state) = fields.next() else {
            // The monitor truncates the file before writing the first state.
            return Ok(Some((EngineState::Starting, None)));
        };
        let state: EngineState = state.parse()?;
        let pid = match fields.next() {
            Some(pid) => Some(pid.parse::<u32>().map_err(|e| CorralError::Internal {
                message: format!("invalid init pid {pid:?} in {}: {e}", path.display()),
            })?),
            None => None,
        };
        Ok(Some((state, pid.filter(|p| *p > 0))))
    }
}

fn is_supported(key: &str) -> bool {
    SUPPORTED_KEYS.contains(&key)
        || SUPPORTED_PREFIXES
            .iter()
            .any(|prefix| key.len() > prefix.len() && key.starts_with(prefix))
}

fn is_multi_valued(key: &str) -> bool {
    MULTI_VALUED_KEYS.contains(&key)
}

fn parse_config(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}

#[async_trait]
impl IsolationEngine for LxcConfigEngine {
    fn set_config_item(&self, key: &str, value: &str) -> CorralResult<()> {
        if !is_supported(key) {
            return Err(CorralError::configuration(format!(
                "unsupported configuration item {key}"
            )));
        }
        if value.contains('\n') {
            return Err(CorralError::configuration(format!(
                "value of {key} must not contain a newline"
            )));
        }

        let mut items = self.items.lock();
        if items.released {
            return Err(CorralError::Internal {
                message: format!("engine for {} already released", self.name),
            });
        }

        if is_multi_valued(key) {
            if value.is_empty() {
                items.entries.retain(|(k, _)| k != key);
            } else {
                items.entries.push((key.to_string(), value.to_string()));
            }
        } else {
            items.entries.retain(|(k, _)| k != key);
            items.entries.push((key.to_string(), value.to_string()));
        }

        tracing::debug!(container_id = %self.name, key, value, "set config item");
        Ok(())
    }

    fn config_item(&self, key: &str) -> Option<String> {
        let items = self.items.lock();
        let values: Vec<&str> = items
            .entries
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty() && *v != "(null)")
            .collect();
        if values.is_empty() {
            None
        } else {
            Some(values.join("\n"))
        }
    }

    fn is_supported_config_item(&self, key: &str) -> bool {
        is_supported(key)
    }

    fn save_config(&self, path: &Path) -> CorralResult<()> {
        std::fs::write(path, self.render())?;
        tracing::debug!(container_id = %self.name, path = %path.display(), "saved engine config");
        Ok(())
    }

    fn state(&self) -> CorralResult<EngineState> {
        Ok(self
            .read_monitor_state()?
            .map_or(EngineState::Stopped, |(state, _)| state))
    }

    fn init_pid(&self) -> CorralResult<Option<u32>> {
        Ok(self.read_monitor_state()?.and_then(|(_, pid)| pid))
    }

    async fn spawn_monitor(&self, command: MonitorCommand) -> CorralResult<MonitorHandle> {
        monitor::spawn(command)
    }

    fn release(&self) -> CorralResult<()> {
        let mut items = self.items.lock();
        items.entries.clear();
        items.released = true;
        tracing::debug!(container_id = %self.name, "released engine");
        Ok(())
    }
}

/// Provider for [`LxcConfigEngine`] handles.
#[derive(Debug, Clone, Copy, Default)]
pub struct LxcProvider;

impl EngineProvider for LxcProvider {
    fn create(&self, name: &str, runtime_dir: &Path) -> CorralResult<Arc<dyn IsolationEngine>> {
        Ok(Arc::new(LxcConfigEngine::new(name, runtime_dir)))
    }

    fn load(&self, name: &str, runtime_dir: &Path) -> CorralResult<Arc<dyn IsolationEngine>> {
        Ok(Arc::new(LxcConfigEngine::open(name, runtime_dir)?))
    }
}
