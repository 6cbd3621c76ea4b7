//! Container runtime core.
//!
//! [`Runtime`] owns the process-wide configuration and drives the
//! lifecycle of [`Container`]s: create, start, kill and delete. A
//! container's status is never stored; it is derived from the engine and
//! `/proc` on every query.

mod config;
mod container;
pub mod create;
mod lifecycle;
pub mod state;

pub use config::{
    DEFAULT_CONFIG_FILE, Features, HOOK_EXEC, INIT_EXEC, MONITOR_EXEC, RuntimeConfig, Timeouts,
};
pub use container::{CONFIG_FILE_ANNOTATION, Container, ContainerConfig, Descriptor, write_pid_file};
pub use lifecycle::{OnCreateHook, Runtime};
