//! Whole-device passthrough.

use std::collections::HashMap;

use sriov_common::{NetworkId, SriovError, SriovResult};

use crate::device::HostDevices;
use crate::network::{Endpoint, EndpointInterface, EndpointRequest};
use crate::options::NetworkConfig;

/// Hands the network's netdevice to a single container.
#[derive(Debug, Clone)]
pub struct PassthroughBackend {
    netdevice: String,
    hardware_address: String,
}

impl PassthroughBackend {
    pub(crate) fn create(devices: &dyn HostDevices, config: &NetworkConfig) -> SriovResult<Self> {
        if !devices.device_exists(&config.netdevice) {
            return Err(SriovError::invalid_config(format!(
                "netdevice [ {} ] not found",
                config.netdevice
            )));
        }

        let hardware_address = devices.hardware_address(&config.netdevice)?;
        Ok(Self {
            netdevice: config.netdevice.clone(),
            hardware_address,
        })
    }

    pub(crate) fn create_endpoint(
        &self,
        network: &NetworkId,
        endpoints: &HashMap<String, Endpoint>,
        request: &EndpointRequest,
    ) -> SriovResult<(Endpoint, EndpointInterface)> {
        if !endpoints.is_empty() {
            return Err(SriovError::CapacityExceeded {
                network: network.to_string(),
                reason: "passthrough network supports only one device".to_string(),
            });
        }

        let requested_mac = request.interface.mac_address.clone();
        let endpoint = Endpoint {
            id: request.endpoint_id.clone(),
            dev_name: self.netdevice.clone(),
            address: request.interface.address.clone(),
            mac_address: Some(
                requested_mac
                    .clone()
                    .unwrap_or_else(|| self.hardware_address.clone()),
            ),
            sandbox_key: None,
            vf: None,
        };
        let interface = EndpointInterface {
            address: None,
            mac_address: requested_mac
                .is_none()
                .then(|| self.hardware_address.clone()),
        };
        Ok((endpoint, interface))
    }
}
