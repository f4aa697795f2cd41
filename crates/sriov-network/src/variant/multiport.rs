//! SR-IOV across every port of a bonded or multi-port device.

use std::collections::HashSet;

use sriov_common::{NetworkId, SriovResult};

use super::sriov::{attach_vf, is_free, pool_exhausted, prepare_pool, reserved_on};
use crate::device::HostDevices;
use crate::network::{Endpoint, EndpointInterface, EndpointRequest, VfHandle};
use crate::options::NetworkConfig;

/// VFs pooled across several physical ports.
///
/// A new endpoint goes to the port holding the fewest reserved VFs. Ties go to
/// the earlier port (ports are sorted by name), then to the lowest free VF
/// index. A VF listed by several ports belongs to the first one.
#[derive(Debug, Clone)]
pub struct MultiPortBackend {
    ports: Vec<String>,
}

impl MultiPortBackend {
    pub(crate) fn create(
        devices: &dyn HostDevices,
        ports: &[String],
        reserved: &HashSet<VfHandle>,
    ) -> SriovResult<Self> {
        for port in ports {
            prepare_pool(devices, port, reserved)?;
        }
        Ok(Self {
            ports: ports.to_vec(),
        })
    }

    fn select_vf(
        &self,
        devices: &dyn HostDevices,
        reserved: &HashSet<VfHandle>,
    ) -> SriovResult<Option<VfHandle>> {
        let mut seen = HashSet::new();
        let mut best: Option<(usize, VfHandle)> = None;

        for port in &self.ports {
            let held = reserved_on(reserved, port);
            let mut first_free = None;

            for vf in devices.list_vfs(port)? {
                if !seen.insert(vf.pci_address.clone()) {
                    continue;
                }
                if first_free.is_none() && is_free(&vf, &held) {
                    first_free = Some(vf.index);
                }
            }

            let Some(index) = first_free else { continue };
            let load = held.len();
            if best.as_ref().is_none_or(|(best_load, _)| load < *best_load) {
                best = Some((
                    load,
                    VfHandle {
                        port: port.clone(),
                        index,
                    },
                ));
            }
        }

        Ok(best.map(|(_, vf)| vf))
    }

    pub(crate) fn create_endpoint(
        &self,
        devices: &dyn HostDevices,
        network: &NetworkId,
        config: &NetworkConfig,
        reserved: &HashSet<VfHandle>,
        request: &EndpointRequest,
    ) -> SriovResult<(Endpoint, EndpointInterface)> {
        let vf = self
            .select_vf(devices, reserved)?
            .ok_or_else(|| pool_exhausted(network))?;
        tracing::debug!(port = %vf.port, vf = vf.index, "Selected VF from multi-port pool");
        attach_vf(devices, config, vf, request)
    }
}
