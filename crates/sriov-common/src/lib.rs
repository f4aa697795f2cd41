//! # sriov-common
//!
//! Shared types for the SR-IOV container network driver.
//!
//! This crate provides functionality used by both the driver core and the
//! agent binary:
//! - The error taxonomy surfaced to the container engine
//! - Network ID validation
//! - Standard filesystem paths

#![warn(missing_docs)]

pub mod error;
pub mod id;
pub mod paths;

pub use error::{SriovError, SriovResult};
pub use id::NetworkId;
pub use paths::SriovPaths;
