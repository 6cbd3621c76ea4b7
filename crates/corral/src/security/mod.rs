//! Container security features.
//!
//! This module translates the security parts of the spec:
//! - Seccomp syscall filtering (compiled to the engine's profile format)
//! - Linux capabilities
//! - AppArmor profiles

pub mod apparmor;
pub mod capabilities;
pub mod seccomp;

pub use apparmor::configure_apparmor;
pub use capabilities::configure_capabilities;
pub use seccomp::{compile_profile, write_profile};
