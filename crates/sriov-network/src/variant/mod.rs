//! Network variants.
//!
//! A network is backed by a whole passthrough device, by the VF pool of one
//! physical port, or by the pooled VFs of every port behind a multi-port
//! device. The variant is fixed when the network is created.

mod multiport;
mod passthrough;
mod sriov;

use std::collections::{HashMap, HashSet};
use std::fmt;

use sriov_common::{NetworkId, SriovResult};

pub use multiport::MultiPortBackend;
pub use passthrough::PassthroughBackend;
pub use sriov::SinglePortBackend;

use crate::device::HostDevices;
use crate::network::{Endpoint, EndpointInterface, EndpointRequest, VfHandle};
use crate::options::{NetworkConfig, NetworkMode};

/// Which strategy backs a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariantKind {
    /// One whole netdevice, one endpoint.
    Passthrough,
    /// VFs of a single physical port.
    SinglePort,
    /// VFs pooled across several physical ports.
    MultiPort,
}

impl VariantKind {
    /// Pick the variant for a mode and the ports behind its netdevice.
    #[must_use]
    pub fn select(mode: NetworkMode, ports: &[String]) -> Self {
        match mode {
            NetworkMode::Passthrough => Self::Passthrough,
            NetworkMode::Sriov if ports.len() > 1 => Self::MultiPort,
            NetworkMode::Sriov => Self::SinglePort,
        }
    }
}

impl fmt::Display for VariantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Passthrough => "passthrough",
            Self::SinglePort => "single-port sriov",
            Self::MultiPort => "multi-port sriov",
        })
    }
}

/// Variant state attached to a network.
#[derive(Debug)]
pub enum Backend {
    /// See [`PassthroughBackend`].
    Passthrough(PassthroughBackend),
    /// See [`SinglePortBackend`].
    SinglePort(SinglePortBackend),
    /// See [`MultiPortBackend`].
    MultiPort(MultiPortBackend),
}

impl Backend {
    /// Set up host resources for a new network.
    ///
    /// `ports` are the physical ports behind the netdevice, as used for
    /// [`VariantKind::select`]. `reserved` are the VFs held by endpoints of
    /// every registered network; pool preparation leaves them bound.
    ///
    /// # Errors
    ///
    /// Returns the host failure that prevented setup.
    pub fn create(
        devices: &dyn HostDevices,
        kind: VariantKind,
        config: &NetworkConfig,
        ports: &[String],
        reserved: &HashSet<VfHandle>,
    ) -> SriovResult<Self> {
        Ok(match kind {
            VariantKind::Passthrough => {
                Self::Passthrough(PassthroughBackend::create(devices, config)?)
            }
            VariantKind::SinglePort => {
                let port = ports.first().unwrap_or(&config.netdevice);
                Self::SinglePort(SinglePortBackend::create(devices, port, reserved)?)
            }
            VariantKind::MultiPort => {
                Self::MultiPort(MultiPortBackend::create(devices, ports, reserved)?)
            }
        })
    }

    /// Kind of this backend.
    #[must_use]
    pub fn kind(&self) -> VariantKind {
        match self {
            Self::Passthrough(_) => VariantKind::Passthrough,
            Self::SinglePort(_) => VariantKind::SinglePort,
            Self::MultiPort(_) => VariantKind::MultiPort,
        }
    }

    /// Reserve and configure a device for a new endpoint.
    ///
    /// `endpoints` are the network's current endpoints. `reserved` are the
    /// VFs held by endpoints of every registered network, this one included;
    /// none of them is handed out again.
    ///
    /// # Errors
    ///
    /// Fails with [`sriov_common::SriovError::CapacityExceeded`] when no
    /// device is left, or with the host failure of the step that broke.
    pub fn create_endpoint(
        &self,
        devices: &dyn HostDevices,
        network: &NetworkId,
        config: &NetworkConfig,
        endpoints: &HashMap<String, Endpoint>,
        reserved: &HashSet<VfHandle>,
        request: &EndpointRequest,
    ) -> SriovResult<(Endpoint, EndpointInterface)> {
        match self {
            Self::Passthrough(backend) => backend.create_endpoint(network, endpoints, request),
            Self::SinglePort(backend) => {
                backend.create_endpoint(devices, network, config, reserved, request)
            }
            Self::MultiPort(backend) => {
                backend.create_endpoint(devices, network, config, reserved, request)
            }
        }
    }

    /// Release the device held by an endpoint.
    ///
    /// # Errors
    ///
    /// Returns the first host failure during release.
    pub fn delete_endpoint(&self, devices: &dyn HostDevices, endpoint: &Endpoint) -> SriovResult<()> {
        match (self, &endpoint.vf) {
            (Self::Passthrough(_), _) | (_, None) => Ok(()),
            (Self::SinglePort(_) | Self::MultiPort(_), Some(vf)) => sriov::release_vf(devices, vf),
        }
    }
}
