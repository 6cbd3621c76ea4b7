//! # corral-common
//!
//! Shared utilities and types for the Corral container runtime.
//!
//! This crate provides common functionality used across all Corral crates:
//! - Container ID validation
//! - The on-disk layout of a container's runtime directory
//! - Common error types

#![warn(missing_docs)]

pub mod error;
pub mod id;
pub mod paths;

pub use error::{CorralError, CorralResult};
pub use id::ContainerId;
pub use paths::RuntimePaths;
