//! Request and response bodies of the engine's remote network driver protocol.
//!
//! Field names follow the engine's PascalCase wire format.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sriov_network::{EndpointInterface, EndpointRequest, InterfaceAddresses, Ipv4Data, JoinInfo};

/// Reply to `Plugin.Activate`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActivateResponse {
    pub implements: Vec<String>,
}

/// Reply to `NetworkDriver.GetCapabilities`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CapabilitiesResponse {
    pub scope: String,
    pub connectivity_scope: String,
}

/// Error body, sent with status 500.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(rename = "Err")]
    pub err: String,
}

/// Empty success body.
#[derive(Debug, Default, Serialize)]
pub struct EmptyResponse {}

/// IPAM data block.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct IpamData {
    pub pool: String,
    pub gateway: String,
}

impl From<IpamData> for Ipv4Data {
    fn from(data: IpamData) -> Self {
        Self {
            pool: (!data.pool.is_empty()).then_some(data.pool),
            gateway: data.gateway,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateNetworkRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    #[serde(default)]
    pub options: Value,
    #[serde(rename = "IPv4Data", default)]
    pub ipv4_data: Option<Vec<IpamData>>,
}

impl CreateNetworkRequest {
    /// IPv4 blocks in core form.
    pub fn ipv4(&self) -> Vec<Ipv4Data> {
        self.ipv4_data
            .iter()
            .flatten()
            .cloned()
            .map(Ipv4Data::from)
            .collect()
    }
}

#[derive(Debug, Deserialize)]
pub struct AllocateNetworkRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AllocateNetworkResponse {
    pub options: BTreeMap<String, String>,
}

/// Body naming only a network.
#[derive(Debug, Deserialize)]
pub struct NetworkRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
}

/// Interface addresses as exchanged on the wire; empty strings mean unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct WireInterface {
    pub address: String,
    #[serde(rename = "AddressIPv6")]
    pub address_ipv6: String,
    pub mac_address: String,
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

impl From<WireInterface> for InterfaceAddresses {
    fn from(wire: WireInterface) -> Self {
        Self {
            address: non_empty(wire.address),
            address_ipv6: non_empty(wire.address_ipv6),
            mac_address: non_empty(wire.mac_address),
        }
    }
}

impl From<EndpointInterface> for WireInterface {
    fn from(interface: EndpointInterface) -> Self {
        Self {
            address: interface.address.unwrap_or_default(),
            address_ipv6: String::new(),
            mac_address: interface.mac_address.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateEndpointRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    #[serde(rename = "EndpointID")]
    pub endpoint_id: String,
    #[serde(default)]
    pub interface: Option<WireInterface>,
}

impl From<CreateEndpointRequest> for EndpointRequest {
    fn from(request: CreateEndpointRequest) -> Self {
        Self {
            network_id: request.network_id,
            endpoint_id: request.endpoint_id,
            interface: request.interface.unwrap_or_default().into(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateEndpointResponse {
    pub interface: WireInterface,
}

/// Body naming a network and one of its endpoints.
#[derive(Debug, Deserialize)]
pub struct EndpointRef {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    #[serde(rename = "EndpointID")]
    pub endpoint_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct InfoResponse {
    pub value: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JoinRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    #[serde(rename = "EndpointID")]
    pub endpoint_id: String,
    pub sandbox_key: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct InterfaceName {
    pub src_name: String,
    pub dst_prefix: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct JoinResponse {
    pub interface_name: InterfaceName,
    pub gateway: String,
    pub disable_gateway_service: bool,
}

impl From<JoinInfo> for JoinResponse {
    fn from(info: JoinInfo) -> Self {
        Self {
            interface_name: InterfaceName {
                src_name: info.src_name,
                dst_prefix: info.dst_prefix,
            },
            gateway: info.gateway.to_string(),
            disable_gateway_service: false,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DiscoveryNotification {
    pub discovery_type: i64,
}
