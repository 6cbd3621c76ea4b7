//! # Corral Container Runtime
//!
//! Corral is an OCI runtime that does not create namespaces or cgroups
//! itself. It translates the OCI spec into the configuration of an
//! lxc-style isolation engine, spawns the engine's monitor process and
//! tracks the container through its lifecycle.
//!
//! ## Components
//!
//! - **Namespaces**: clone/share configuration, shared UTS hostnames
//! - **Cgroup v2**: path derivation, device rules, freeze-kill-thaw teardown
//! - **Mounts**: symlink-safe destination resolution inside the rootfs
//! - **Security**: seccomp profile compiler, capabilities, AppArmor
//!
//! ## Usage
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use corral::runtime::{ContainerConfig, Runtime, RuntimeConfig};
//! use corral_common::ContainerId;
//!
//! # async fn example() -> corral_common::CorralResult<()> {
//! let runtime = Runtime::new(RuntimeConfig::default());
//! let id = ContainerId::new("web")?;
//!
//! let config = ContainerConfig::from_bundle(id.clone(), "/var/lib/bundles/web")?;
//! let container = runtime.create(config, Duration::from_secs(60)).await?;
//! runtime.start(&container, Duration::from_secs(30)).await?;
//!
//! println!("{}", container.status()?);
//! runtime.delete(&id, true, Duration::from_secs(10)).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod cgroup;
pub mod cli;
pub mod engine;
pub mod exec;
pub mod filesystem;
pub mod namespace;
pub mod runtime;
pub mod security;

pub use runtime::{Container, Runtime};
