//! VF pools and the single-port SR-IOV variant.

use std::collections::HashSet;
use std::io::{self, ErrorKind};

use sriov_common::{NetworkId, SriovError, SriovResult};

use crate::device::{HostDevices, VfInfo, apply_privilege, require_sriov};
use crate::network::{Endpoint, EndpointInterface, EndpointRequest, VfHandle};
use crate::options::NetworkConfig;

/// Get a port's VF pool ready for endpoints.
///
/// VFs bound to a driver and still visible on the host are idle and get
/// unbound. Bound VFs without a host netdevice live in a container namespace
/// and are left alone, as are VFs in `reserved`: another network's endpoint
/// holds them even before it joins a sandbox.
pub(crate) fn prepare_pool(
    devices: &dyn HostDevices,
    port: &str,
    reserved: &HashSet<VfHandle>,
) -> SriovResult<()> {
    let enabled = require_sriov(devices, port)?;
    let held = reserved_on(reserved, port);

    let mut released = 0_usize;
    for vf in devices.list_vfs(port)? {
        if vf.bound && vf.netdev.is_some() && !held.contains(&vf.index) {
            devices.unbind_vf(port, vf.index)?;
            released += 1;
        }
    }

    tracing::info!(port, enabled, released, held = held.len(), "VF pool ready");
    Ok(())
}

/// VF indices on `port` held by endpoints.
pub(crate) fn reserved_on(reserved: &HashSet<VfHandle>, port: &str) -> HashSet<u32> {
    reserved
        .iter()
        .filter(|vf| vf.port == port)
        .map(|vf| vf.index)
        .collect()
}

/// Whether a VF can be handed to a new endpoint.
pub(crate) fn is_free(vf: &VfInfo, reserved: &HashSet<u32>) -> bool {
    !vf.bound && !reserved.contains(&vf.index)
}

pub(crate) fn pool_exhausted(network: &NetworkId) -> SriovError {
    SriovError::CapacityExceeded {
        network: network.to_string(),
        reason: "no free VF left".to_string(),
    }
}

/// Configure a reserved VF and build its endpoint.
///
/// Steps run in order and stop at the first failure: VLAN, requested MAC,
/// trust and spoof-check (tolerated), bind, netdevice lookup, RoCE hop limit.
pub(crate) fn attach_vf(
    devices: &dyn HostDevices,
    config: &NetworkConfig,
    vf: VfHandle,
    request: &EndpointRequest,
) -> SriovResult<(Endpoint, EndpointInterface)> {
    let (port, index) = (vf.port.as_str(), vf.index);
    tracing::debug!(port, vf = index, endpoint_id = %request.endpoint_id, "Attaching VF");

    devices.set_vf_vlan(port, index, config.vlan)?;
    if let Some(mac) = &request.interface.mac_address {
        devices.set_vf_mac(port, index, mac)?;
    }
    apply_privilege(devices, port, index, config.privileged);
    devices.bind_vf(port, index)?;

    let dev_name = devices.vf_netdev(port, index)?.ok_or_else(|| {
        io::Error::new(
            ErrorKind::NotFound,
            format!("VF {index} of {port} has no netdevice after bind"),
        )
    })?;

    if let Some(hop_limit) = config.roce_hop_limit {
        if devices.rdma_device(&dev_name)?.is_some() {
            devices.apply_roce_hop_limit(&dev_name, hop_limit)?;
        } else {
            tracing::debug!(netdev = %dev_name, "No RDMA device, skipping hop limit");
        }
    }

    let mac = match &request.interface.mac_address {
        Some(mac) => mac.clone(),
        None => devices.hardware_address(&dev_name)?,
    };
    let interface = EndpointInterface {
        address: None,
        mac_address: request.interface.mac_address.is_none().then(|| mac.clone()),
    };
    let endpoint = Endpoint {
        id: request.endpoint_id.clone(),
        dev_name,
        address: request.interface.address.clone(),
        mac_address: Some(mac),
        sandbox_key: None,
        vf: Some(vf),
    };
    Ok((endpoint, interface))
}

/// Return a VF to the pool: unbind, clear the VLAN, restore default trust.
pub(crate) fn release_vf(devices: &dyn HostDevices, vf: &VfHandle) -> SriovResult<()> {
    tracing::debug!(port = %vf.port, vf = vf.index, "Releasing VF");
    devices.unbind_vf(&vf.port, vf.index)?;
    devices.set_vf_vlan(&vf.port, vf.index, 0)?;
    apply_privilege(devices, &vf.port, vf.index, false);
    Ok(())
}

/// VFs of one physical port.
///
/// New endpoints get the lowest-index free VF.
#[derive(Debug, Clone)]
pub struct SinglePortBackend {
    port: String,
}

impl SinglePortBackend {
    pub(crate) fn create(
        devices: &dyn HostDevices,
        port: &str,
        reserved: &HashSet<VfHandle>,
    ) -> SriovResult<Self> {
        prepare_pool(devices, port, reserved)?;
        Ok(Self {
            port: port.to_string(),
        })
    }

    pub(crate) fn create_endpoint(
        &self,
        devices: &dyn HostDevices,
        network: &NetworkId,
        config: &NetworkConfig,
        reserved: &HashSet<VfHandle>,
        request: &EndpointRequest,
    ) -> SriovResult<(Endpoint, EndpointInterface)> {
        let held = reserved_on(reserved, &self.port);
        let index = devices
            .list_vfs(&self.port)?
            .into_iter()
            .find(|vf| is_free(vf, &held))
            .map(|vf| vf.index)
            .ok_or_else(|| pool_exhausted(network))?;

        let vf = VfHandle {
            port: self.port.clone(),
            index,
        };
        attach_vf(devices, config, vf, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::fake::FakeHost;
    use crate::network::InterfaceAddresses;
    use crate::options::{OptionMap, keys};

    fn config(extra: &[(&str, &str)]) -> NetworkConfig {
        let mut options = OptionMap::new();
        options.insert(keys::NETDEVICE.to_string(), "ens1f0".to_string());
        for (key, value) in extra {
            options.insert((*key).to_string(), (*value).to_string());
        }
        NetworkConfig::from_options(&options).unwrap()
    }

    fn request(endpoint: &str) -> EndpointRequest {
        EndpointRequest {
            network_id: "net1".to_string(),
            endpoint_id: endpoint.to_string(),
            interface: InterfaceAddresses {
                address: Some("10.0.0.5/24".to_string()),
                ..InterfaceAddresses::default()
            },
        }
    }

    fn network() -> NetworkId {
        NetworkId::new("net1").unwrap()
    }

    #[test]
    fn create_rejects_device_without_vfs() {
        let host = FakeHost::new().with_netdev("eth0");
        let err = SinglePortBackend::create(&host, "eth0", &HashSet::new()).unwrap_err();
        assert!(matches!(err, SriovError::DeviceNotSriovCapable { .. }));
    }

    #[test]
    fn pool_preparation_unbinds_only_idle_vfs() {
        let host = FakeHost::new().with_sriov("ens1f0", 3);
        host.mark_bound("ens1f0", 0, false);
        host.mark_bound("ens1f0", 2, true);

        SinglePortBackend::create(&host, "ens1f0", &HashSet::new()).unwrap();

        assert_eq!(host.mutations(), ["unbind ens1f0 0"]);
        assert!(!host.vf("ens1f0", 0).bound);
        assert!(host.vf("ens1f0", 2).bound);
    }

    #[test]
    fn pool_preparation_keeps_vfs_held_elsewhere() {
        let host = FakeHost::new().with_sriov("ens1f0", 2);
        host.mark_bound("ens1f0", 0, false);
        host.mark_bound("ens1f0", 1, false);
        let held = HashSet::from([VfHandle {
            port: "ens1f0".to_string(),
            index: 0,
        }]);

        SinglePortBackend::create(&host, "ens1f0", &held).unwrap();

        assert_eq!(host.mutations(), ["unbind ens1f0 1"]);
        assert!(host.vf("ens1f0", 0).bound);
    }

    #[test]
    fn attach_runs_steps_in_order() {
        let host = FakeHost::new().with_sriov("ens1f0", 2);
        let backend = SinglePortBackend::create(&host, "ens1f0", &HashSet::new()).unwrap();

        let (endpoint, interface) = backend
            .create_endpoint(
                &host,
                &network(),
                &config(&[(keys::VLAN, "100")]),
                &HashSet::new(),
                &request("ep1"),
            )
            .unwrap();

        assert_eq!(
            host.mutations(),
            [
                "vlan ens1f0 0 100",
                "trust ens1f0 0 false",
                "spoofchk ens1f0 0 true",
                "bind ens1f0 0",
            ]
        );
        assert_eq!(endpoint.dev_name, "ens1f0v0");
        assert_eq!(
            endpoint.vf,
            Some(VfHandle {
                port: "ens1f0".to_string(),
                index: 0
            })
        );
        assert_eq!(interface.mac_address, endpoint.mac_address);
        assert_eq!(host.vf("ens1f0", 0).vlan, 100);
    }

    #[test]
    fn requested_mac_is_programmed() {
        let host = FakeHost::new().with_sriov("ens1f0", 1);
        let backend = SinglePortBackend::create(&host, "ens1f0", &HashSet::new()).unwrap();
        let mut req = request("ep1");
        req.interface.mac_address = Some("02:11:22:33:44:55".to_string());

        let (endpoint, interface) = backend
            .create_endpoint(&host, &network(), &config(&[]), &HashSet::new(), &req)
            .unwrap();

        assert!(host.calls().contains(&"mac ens1f0 0 02:11:22:33:44:55".to_string()));
        assert_eq!(endpoint.mac_address.as_deref(), Some("02:11:22:33:44:55"));
        assert_eq!(interface.mac_address, None);
    }

    #[test]
    fn pool_exhaustion_after_every_vf_is_taken() {
        let host = FakeHost::new().with_sriov("ens1f0", 3);
        let backend = SinglePortBackend::create(&host, "ens1f0", &HashSet::new()).unwrap();
        let cfg = config(&[]);
        let mut reserved = HashSet::new();

        for i in 0..3 {
            let (endpoint, _) = backend
                .create_endpoint(&host, &network(), &cfg, &reserved, &request(&format!("ep{i}")))
                .unwrap();
            assert_eq!(endpoint.vf.as_ref().map(|vf| vf.index), Some(i));
            reserved.extend(endpoint.vf);
        }

        let err = backend
            .create_endpoint(&host, &network(), &cfg, &reserved, &request("ep3"))
            .unwrap_err();
        assert!(matches!(err, SriovError::CapacityExceeded { .. }));
    }

    #[test]
    fn hop_limit_applies_only_with_rdma_device() {
        let host = FakeHost::new()
            .with_sriov("ens1f0", 2)
            .with_rdma("ens1f0v0", "mlx5_2");
        let backend = SinglePortBackend::create(&host, "ens1f0", &HashSet::new()).unwrap();
        let cfg = config(&[(keys::ROCE_HOP_LIMIT, "64")]);
        let mut reserved = HashSet::new();

        let (first, _) = backend
            .create_endpoint(&host, &network(), &cfg, &reserved, &request("ep1"))
            .unwrap();
        reserved.extend(first.vf);
        backend
            .create_endpoint(&host, &network(), &cfg, &reserved, &request("ep2"))
            .unwrap();

        assert_eq!(host.hop_limits(), [("ens1f0v0".to_string(), 64)]);
    }

    #[test]
    fn trust_rejection_does_not_fail_attach() {
        let host = FakeHost::new()
            .with_sriov("ens1f0", 1)
            .without_trust_support();
        let backend = SinglePortBackend::create(&host, "ens1f0", &HashSet::new()).unwrap();

        let result = backend.create_endpoint(
            &host,
            &network(),
            &config(&[(keys::PRIVILEGED, "true")]),
            &HashSet::new(),
            &request("ep1"),
        );

        assert!(result.is_ok());
        assert!(host.vf("ens1f0", 0).bound);
    }

    #[test]
    fn vlan_failure_stops_before_bind() {
        let host = FakeHost::new().with_sriov("ens1f0", 1).failing_vlan();
        let backend = SinglePortBackend::create(&host, "ens1f0", &HashSet::new()).unwrap();

        let err = backend
            .create_endpoint(&host, &network(), &config(&[]), &HashSet::new(), &request("ep1"))
            .unwrap_err();

        assert!(matches!(err, SriovError::HostCommand { .. }));
        assert!(!host.vf("ens1f0", 0).bound);
        assert_eq!(host.mutations(), ["vlan ens1f0 0 0"]);
    }

    #[test]
    fn release_restores_defaults() {
        let host = FakeHost::new().with_sriov("ens1f0", 1);
        let backend = SinglePortBackend::create(&host, "ens1f0", &HashSet::new()).unwrap();
        let (endpoint, _) = backend
            .create_endpoint(
                &host,
                &network(),
                &config(&[(keys::VLAN, "7"), (keys::PRIVILEGED, "yes")]),
                &HashSet::new(),
                &request("ep1"),
            )
            .unwrap();

        release_vf(&host, endpoint.vf.as_ref().unwrap()).unwrap();

        let vf = host.vf("ens1f0", 0);
        assert!(!vf.bound);
        assert_eq!(vf.vlan, 0);
        assert!(!vf.trusted);
        assert!(vf.spoof_check);
    }
}
