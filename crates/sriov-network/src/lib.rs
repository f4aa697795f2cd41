//! # sriov-network
//!
//! Core of the SR-IOV container network driver.
//!
//! This crate turns the engine's network lifecycle calls into operations on
//! host hardware:
//! - Option parsing and the on-disk network records
//! - The device layer over sysfs and `ip link`
//! - Passthrough, single-port and multi-port network variants
//! - The registry and its reconciliation with the engine after a restart

#![warn(missing_docs)]

pub mod bootstrap;
pub mod device;
pub mod network;
pub mod options;
pub mod registry;
pub mod store;
pub mod variant;

pub use bootstrap::{EngineNetwork, EngineNetworks, ReconcileReport};
pub use device::{HostDevices, IpLink, SysfsDevices, VfInfo};
pub use network::{
    Endpoint, EndpointInterface, EndpointRequest, Gateway, InterfaceAddresses, Ipv4Data,
    JoinInfo, Network, VfHandle,
};
pub use options::{NetworkConfig, NetworkMode, OptionMap};
pub use registry::{NetworkRegistry, Scope};
pub use store::{NetworkRecord, NetworkStore};
pub use variant::VariantKind;
