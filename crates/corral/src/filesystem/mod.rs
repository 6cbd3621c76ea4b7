//! Root filesystem, mounts and devices.

pub mod devices;
pub mod mounts;
pub mod resolve;
pub mod rootfs;

pub use mounts::{configure_mounts, configure_readonly_paths, filter_mount_options};
pub use resolve::{MAX_SYMLINK_HOPS, Resolved, resolve_mount_destination};
pub use rootfs::configure_rootfs;
