//! Cgroup v2 teardown.
//!
//! A container's cgroup is killed by freezing it, signalling every process
//! in the subtree and thawing it again, so nothing can fork past the
//! sweep. The subtree is then removed depth first.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use corral_common::{CorralError, CorralResult};
use tokio::time::Instant;
use walkdir::WalkDir;

use crate::exec::signal::{Signal, send_signal};

/// `statfs` magic of a cgroup2 filesystem.
pub const CGROUP2_SUPER_MAGIC: u64 = 0x6367_7270;

/// Where a cgroup2 hierarchy is looked for, in order.
const CANDIDATE_ROOTS: &[&str] = &["/sys/fs/cgroup", "/sys/fs/cgroup/unified"];

/// Interval between two reads of `cgroup.events`.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Deepest subtree [`Cgroup::delete`] descends into.
pub const MAX_DELETE_DEPTH: usize = 32;

/// Returns true if `path` is the root of a cgroup2 filesystem.
#[must_use]
pub fn is_cgroup2(path: &Path) -> bool {
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    let is_cgroup2 =
        rustix::fs::statfs(path).is_ok_and(|stat| stat.f_type as u64 == CGROUP2_SUPER_MAGIC);
    is_cgroup2
}

/// Finds the mounted cgroup2 hierarchy.
#[must_use]
pub fn detect_cgroup_root() -> Option<PathBuf> {
    let root = CANDIDATE_ROOTS
        .iter()
        .map(PathBuf::from)
        .find(|candidate| is_cgroup2(candidate));
    tracing::debug!(root = ?root, "detected cgroup2 root");
    root
}

/// Snapshot of `cgroup.events`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CgroupEvents {
    /// The cgroup or one of its descendants has live processes.
    pub populated: bool,
    /// The cgroup is frozen.
    pub frozen: bool,
}

impl FromStr for CgroupEvents {
    type Err = CorralError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut events = Self::default();
        for line in s.lines() {
            let Some((key, value)) = line.split_once(' ') else {
                continue;
            };
            let flag = match value.trim() {
                "0" => false,
                "1" => true,
                other => {
                    return Err(CorralError::Internal {
                        message: format!("invalid cgroup.events value {other:?} for {key}"),
                    });
                }
            };
            match key {
                "populated" => events.populated = flag,
                "frozen" => events.frozen = flag,
                _ => {}
            }
        }
        Ok(events)
    }
}

/// A cgroup directory below the cgroup2 root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cgroup {
    path: PathBuf,
}

impl Cgroup {
    /// The cgroup `dir` below `root`.
    #[must_use]
    pub fn new(root: &Path, dir: &str) -> Self {
        Self {
            path: root.join(dir.trim_start_matches('/')),
        }
    }

    /// Absolute path of the cgroup directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads `cgroup.events`, `None` if the cgroup does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn events(&self) -> CorralResult<Option<CgroupEvents>> {
        match std::fs::read_to_string(self.path.join("cgroup.events")) {
            Ok(content) => Ok(Some(content.parse()?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_frozen(&self, frozen: bool) -> CorralResult<()> {
        std::fs::write(self.path.join("cgroup.freeze"), if frozen { "1" } else { "0" })?;
        tracing::debug!(path = %self.path.display(), frozen, "set cgroup freeze");
        Ok(())
    }

    /// PIDs of every process in the cgroup and its descendants.
    ///
    /// # Errors
    ///
    /// Returns an error if a `cgroup.procs` file cannot be read or parsed.
    pub fn procs(&self) -> CorralResult<Vec<u32>> {
        let mut pids = Vec::new();
        for entry in WalkDir::new(&self.path).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.io_error().is_some_and(|e| e.kind() == std::io::ErrorKind::NotFound) => {
                    continue;
                }
                Err(e) => return Err(std::io::Error::from(e).into()),
            };
            if !entry.file_type().is_file() || entry.file_name() != "cgroup.procs" {
                continue;
            }
            let content = match std::fs::read_to_string(entry.path()) {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
                let pid = line.parse::<u32>().map_err(|e| CorralError::Internal {
                    message: format!("invalid pid {line:?} in {}: {e}", entry.path().display()),
                })?;
                pids.push(pid);
            }
        }
        Ok(pids)
    }

    /// Signals every process in the subtree except `exclude`.
    ///
    /// The cgroup is frozen for the duration of the sweep. An unpopulated
    /// or missing cgroup is left alone.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::Timeout`] if the cgroup does not freeze before
    /// `deadline`, or an error if the cgroup files cannot be accessed.
    pub async fn kill(&self, signal: Signal, exclude: Option<u32>, deadline: Instant) -> CorralResult<()> {
        match self.events()? {
            Some(events) if events.populated => {}
            _ => {
                tracing::debug!(path = %self.path.display(), "cgroup not populated");
                return Ok(());
            }
        }

        self.set_frozen(true)?;
        let swept = self.sweep(signal, exclude, deadline).await;
        let thawed = self.set_frozen(false);
        swept?;
        thawed
    }

    async fn sweep(&self, signal: Signal, exclude: Option<u32>, deadline: Instant) -> CorralResult<()> {
        loop {
            match self.events()? {
                Some(events) if events.frozen => break,
                Some(_) => {}
                None => return Ok(()),
            }
            if Instant::now() >= deadline {
                return Err(CorralError::Timeout {
                    operation: format!("cgroup {} to freeze", self.path.display()),
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        let mut signalled = 0usize;
        for pid in self.procs()? {
            if Some(pid) == exclude {
                continue;
            }
            send_signal(pid, signal)?;
            signalled += 1;
        }
        tracing::debug!(path = %self.path.display(), %signal, signalled, "signalled cgroup processes");
        Ok(())
    }

    /// Waits until no process is left in the subtree.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::Timeout`] if processes remain at `deadline`.
    pub async fn wait_unpopulated(&self, deadline: Instant) -> CorralResult<()> {
        loop {
            match self.events()? {
                Some(events) if events.populated => {}
                _ => return Ok(()),
            }
            if Instant::now() >= deadline {
                return Err(CorralError::Timeout {
                    operation: format!("cgroup {} to drain", self.path.display()),
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Removes the cgroup and every descendant, depth first. A missing
    /// cgroup counts as removed.
    ///
    /// # Errors
    ///
    /// Returns a [`CorralError::Configuration`] if the subtree is deeper
    /// than [`MAX_DELETE_DEPTH`], or an error if a directory cannot be removed.
    pub fn delete(&self) -> CorralResult<()> {
        remove_tree(&self.path, 0)?;
        tracing::debug!(path = %self.path.display(), "deleted cgroup");
        Ok(())
    }
}

fn remove_tree(path: &Path, depth: usize) -> CorralResult<()> {
    if depth > MAX_DELETE_DEPTH {
        return Err(CorralError::configuration(format!(
            "cgroup {} is nested deeper than {MAX_DELETE_DEPTH} levels",
            path.display()
        )));
    }

    let entries = match std::fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            remove_tree(&entry.path(), depth + 1)?;
        }
    }

    match std::fs::remove_dir(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CorralError::configuration_with(
            format!("failed to remove cgroup {}", path.display()),
            e,
        )),
    }
}
