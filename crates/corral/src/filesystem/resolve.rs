//! Mount destination resolution.
//!
//! The engine refuses mount targets that traverse symlinks, yet images
//! routinely contain them (`/var/run -> /run`). Destinations are therefore
//! resolved here, one component at a time, with every symlink interpreted
//! relative to the container root. A result outside the root is rejected.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use corral_common::{CorralError, CorralResult};

/// Symlinks followed while resolving a single destination.
pub const MAX_SYMLINK_HOPS: usize = 40;

/// Outcome of resolving a mount destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// The destination exists.
    Found(PathBuf),
    /// A component is missing; the path is the resolved prefix with the
    /// unresolved remainder appended, for the engine to create.
    NotFound(PathBuf),
}

impl Resolved {
    /// The resolved path inside the container root.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Found(path) | Self::NotFound(path) => path,
        }
    }

    /// Consumes the result, returning the path.
    #[must_use]
    pub fn into_path(self) -> PathBuf {
        match self {
            Self::Found(path) | Self::NotFound(path) => path,
        }
    }

    /// Returns true if the destination exists.
    #[must_use]
    pub const fn exists(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

#[derive(Debug)]
enum Part {
    Parent,
    Name(OsString),
}

fn parts(path: &Path) -> impl Iterator<Item = Part> + '_ {
    path.components().filter_map(|c| match c {
        Component::ParentDir => Some(Part::Parent),
        Component::Normal(name) => Some(Part::Name(name.to_os_string())),
        Component::RootDir | Component::CurDir | Component::Prefix(_) => None,
    })
}

fn ensure_within(root: &Path, path: &Path, destination: &Path) -> CorralResult<()> {
    if path.starts_with(root) {
        Ok(())
    } else {
        Err(CorralError::Security {
            message: format!(
                "mount destination {} resolves to {}, outside of container root {}",
                destination.display(),
                path.display(),
                root.display()
            ),
        })
    }
}

/// Resolves `destination` inside the container root `root`.
///
/// A destination that already carries the root prefix is accepted as is,
/// so resolving a resolved path returns it unchanged.
///
/// # Errors
///
/// Returns a [`CorralError::Security`] if the destination resolves outside
/// of `root`, a [`CorralError::Validation`] for a relative root, or an I/O
/// error (`ELOOP` after [`MAX_SYMLINK_HOPS`] symlinks).
pub fn resolve_mount_destination(root: &Path, destination: &Path) -> CorralResult<Resolved> {
    if !root.is_absolute() {
        return Err(CorralError::validation(format!(
            "container root {} is not absolute",
            root.display()
        )));
    }

    let relative = destination.strip_prefix(root).unwrap_or(destination);
    let mut pending: VecDeque<Part> = parts(relative).collect();
    let mut current = root.to_path_buf();
    let mut hops = 0usize;

    while let Some(part) = pending.pop_front() {
        let name = match part {
            Part::Parent => {
                current.pop();
                ensure_within(root, &current, destination)?;
                continue;
            }
            Part::Name(name) => name,
        };

        let candidate = current.join(&name);
        let meta = match std::fs::symlink_metadata(&candidate) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut path = candidate;
                for rest in pending {
                    match rest {
                        Part::Parent => {
                            path.pop();
                        }
                        Part::Name(name) => path.push(name),
                    }
                }
                ensure_within(root, &path, destination)?;
                return Ok(Resolved::NotFound(path));
            }
            Err(e) => return Err(e.into()),
        };

        if !meta.file_type().is_symlink() {
            current = candidate;
            continue;
        }

        hops += 1;
        if hops > MAX_SYMLINK_HOPS {
            return Err(std::io::Error::from_raw_os_error(libc::ELOOP).into());
        }

        let target = std::fs::read_link(&candidate)?;
        tracing::trace!(link = %candidate.display(), target = %target.display(), "following symlink");
        let target_parts: Vec<Part> = if target.is_absolute() {
            current = root.to_path_buf();
            parts(target.strip_prefix(root).unwrap_or(&target)).collect()
        } else {
            parts(&target).collect()
        };
        for part in target_parts.into_iter().rev() {
            pending.push_front(part);
        }
    }

    ensure_within(root, &current, destination)?;
    Ok(Resolved::Found(current))
}
