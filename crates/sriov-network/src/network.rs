//! Networks, endpoints and the request/response shapes the registry speaks.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use sriov_common::{NetworkId, SriovError, SriovResult};

use crate::device::HostDevices;
use crate::options::{NetworkConfig, NetworkMode};
use crate::store::NetworkRecord;
use crate::variant::{Backend, VariantKind};

/// IPv4 IPAM data handed over by the engine at network creation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ipv4Data {
    /// Address pool, e.g. `10.0.0.0/24`.
    pub pool: Option<String>,
    /// Gateway, CIDR (`10.0.0.1/24`) or bare address.
    pub gateway: String,
}

/// A network's IPv4 gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gateway {
    raw: String,
    addr: Ipv4Addr,
}

impl Gateway {
    /// Parse a gateway in CIDR or bare-address form.
    ///
    /// # Errors
    ///
    /// Returns [`SriovError::InvalidConfig`] if neither form parses.
    pub fn parse(raw: &str) -> SriovResult<Self> {
        let raw = raw.trim();
        let addr = raw
            .parse::<Ipv4Net>()
            .map(|net| net.addr())
            .or_else(|_| raw.parse::<Ipv4Addr>())
            .map_err(|e| {
                SriovError::invalid_config(format!("Parse gateway [{raw}] error: {e}"))
            })?;
        Ok(Self {
            raw: raw.to_string(),
            addr,
        })
    }

    /// Gateway as supplied.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Gateway address without prefix length.
    #[must_use]
    pub fn addr(&self) -> Ipv4Addr {
        self.addr
    }
}

/// Addresses the engine assigned to an endpoint's interface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceAddresses {
    /// IPv4 address in CIDR form.
    pub address: Option<String>,
    /// IPv6 address in CIDR form.
    pub address_ipv6: Option<String>,
    /// MAC address.
    pub mac_address: Option<String>,
}

/// `CreateEndpoint` request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointRequest {
    /// Owning network.
    pub network_id: String,
    /// Endpoint ID, unique within the network.
    pub endpoint_id: String,
    /// Engine-assigned addresses.
    pub interface: InterfaceAddresses,
}

/// Interface fields the driver fills in for the engine.
///
/// Only fields the request left empty are set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointInterface {
    /// IPv4 address.
    pub address: Option<String>,
    /// MAC address.
    pub mac_address: Option<String>,
}

/// What the engine needs to move the device into the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinInfo {
    /// Host-side interface to move.
    pub src_name: String,
    /// Container-side interface name prefix.
    pub dst_prefix: String,
    /// IPv4 gateway.
    pub gateway: Ipv4Addr,
}

/// A VF reserved for an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VfHandle {
    /// Physical port owning the VF.
    pub port: String,
    /// VF index on that port.
    pub index: u32,
}

/// One container interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Endpoint ID.
    pub id: String,
    /// Host-side device handed to the container.
    pub dev_name: String,
    /// IPv4 address.
    pub address: Option<String>,
    /// MAC address.
    pub mac_address: Option<String>,
    /// Sandbox the endpoint is joined to.
    pub sandbox_key: Option<String>,
    /// Reserved VF, SR-IOV networks only.
    pub vf: Option<VfHandle>,
}

impl Endpoint {
    /// Whether the endpoint is joined to a sandbox.
    #[must_use]
    pub fn is_joined(&self) -> bool {
        self.sandbox_key.is_some()
    }
}

/// A registered network and the endpoints it owns.
#[derive(Debug)]
pub struct Network {
    id: NetworkId,
    config: NetworkConfig,
    gateway: Gateway,
    endpoints: HashMap<String, Endpoint>,
    backend: Backend,
}

impl Network {
    /// Set up the host side of a network.
    ///
    /// The variant is chosen here, once, from the mode and the port layout of
    /// the netdevice. VFs in `reserved` belong to other networks' endpoints
    /// and are not reclaimed.
    ///
    /// # Errors
    ///
    /// Returns the first host failure; nothing is registered in that case.
    pub fn create(
        devices: &dyn HostDevices,
        id: NetworkId,
        config: NetworkConfig,
        gateway: Gateway,
        reserved: &HashSet<VfHandle>,
    ) -> SriovResult<Self> {
        let ports = match config.mode {
            NetworkMode::Passthrough => Vec::new(),
            NetworkMode::Sriov => devices.port_members(&config.netdevice)?,
        };
        let kind = VariantKind::select(config.mode, &ports);
        tracing::info!(
            network_id = %id.short(),
            netdevice = %config.netdevice,
            variant = %kind,
            "Creating network"
        );

        let backend = Backend::create(devices, kind, &config, &ports, reserved)?;
        Ok(Self {
            id,
            config,
            gateway,
            endpoints: HashMap::new(),
            backend,
        })
    }

    /// Network ID.
    #[must_use]
    pub fn id(&self) -> &NetworkId {
        &self.id
    }

    /// Validated configuration.
    #[must_use]
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// IPv4 gateway.
    #[must_use]
    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// Which variant backs this network.
    #[must_use]
    pub fn kind(&self) -> VariantKind {
        self.backend.kind()
    }

    /// The record persisted for this network.
    #[must_use]
    pub fn record(&self) -> NetworkRecord {
        NetworkRecord::new(&self.config, self.gateway.as_str())
    }

    /// Look up an endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`SriovError::EndpointNotFound`] for an unknown ID.
    pub fn endpoint(&self, id: &str) -> SriovResult<&Endpoint> {
        self.endpoints
            .get(id)
            .ok_or_else(|| SriovError::EndpointNotFound { id: id.to_string() })
    }

    /// Mutable endpoint lookup.
    ///
    /// # Errors
    ///
    /// Returns [`SriovError::EndpointNotFound`] for an unknown ID.
    pub fn endpoint_mut(&mut self, id: &str) -> SriovResult<&mut Endpoint> {
        self.endpoints
            .get_mut(id)
            .ok_or_else(|| SriovError::EndpointNotFound { id: id.to_string() })
    }

    /// VFs held by this network's endpoints.
    pub fn reserved_vfs(&self) -> impl Iterator<Item = &VfHandle> {
        self.endpoints.values().filter_map(|ep| ep.vf.as_ref())
    }

    /// Reserve a device for a new endpoint and register it.
    ///
    /// # Errors
    ///
    /// Returns [`SriovError::EndpointExists`] for an ID already in use, before
    /// any device is touched. Fails when the variant has no capacity left or
    /// a host step fails. The endpoint is not registered then, but host
    /// changes already made are not rolled back.
    pub fn create_endpoint(
        &mut self,
        devices: &dyn HostDevices,
        request: &EndpointRequest,
        reserved: &HashSet<VfHandle>,
    ) -> SriovResult<EndpointInterface> {
        if self.endpoints.contains_key(&request.endpoint_id) {
            return Err(SriovError::EndpointExists {
                id: request.endpoint_id.clone(),
            });
        }

        let (endpoint, interface) = self.backend.create_endpoint(
            devices,
            &self.id,
            &self.config,
            &self.endpoints,
            reserved,
            request,
        )?;

        tracing::info!(
            network_id = %self.id.short(),
            endpoint_id = %endpoint.id,
            dev_name = %endpoint.dev_name,
            "Endpoint created"
        );
        self.endpoints.insert(endpoint.id.clone(), endpoint);
        Ok(interface)
    }

    /// Release an endpoint's device and forget the endpoint.
    ///
    /// The endpoint is removed even if the host release fails; that failure
    /// is still returned.
    ///
    /// # Errors
    ///
    /// Returns [`SriovError::EndpointNotFound`] or the host release error.
    pub fn delete_endpoint(&mut self, devices: &dyn HostDevices, id: &str) -> SriovResult<()> {
        let endpoint = self
            .endpoints
            .remove(id)
            .ok_or_else(|| SriovError::EndpointNotFound { id: id.to_string() })?;

        let released = self.backend.delete_endpoint(devices, &endpoint);
        tracing::info!(
            network_id = %self.id.short(),
            endpoint_id = %id,
            released = released.is_ok(),
            "Endpoint deleted"
        );
        released
    }

    /// Release the devices of every endpoint.
    ///
    /// # Errors
    ///
    /// Returns the first release failure after attempting all of them.
    pub fn teardown(&mut self, devices: &dyn HostDevices) -> SriovResult<()> {
        let mut first_error = None;

        for (id, endpoint) in self.endpoints.drain() {
            if let Err(e) = self.backend.delete_endpoint(devices, &endpoint) {
                tracing::warn!(
                    network_id = %self.id.short(),
                    endpoint_id = %id,
                    error = %e,
                    "Failed to release endpoint during network teardown"
                );
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

/// VFs held by endpoints of any of `networks`.
pub(crate) fn reserved_vfs(networks: &HashMap<NetworkId, Network>) -> HashSet<VfHandle> {
    networks
        .values()
        .flat_map(Network::reserved_vfs)
        .cloned()
        .collect()
}
