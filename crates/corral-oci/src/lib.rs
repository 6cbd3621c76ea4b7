//! # corral-oci
//!
//! OCI (Open Container Initiative) specification types for Corral.
//!
//! This crate provides Rust types for:
//! - OCI Runtime Specification (config.json)
//! - The OCI state document returned by `state`

#![warn(missing_docs)]

pub mod runtime;
pub mod state;

pub use runtime::Spec;
pub use state::{ContainerState, ContainerStatus};
