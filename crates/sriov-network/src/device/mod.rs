//! Host device resources: netdevices, virtual functions and RDMA devices.
//!
//! Everything here is synchronous host I/O without retries. A call either
//! succeeds or reports a host misconfiguration the operator has to fix.

mod link;
mod sysfs;
mod tolerant;

#[cfg(test)]
pub(crate) mod fake;

pub use link::IpLink;
pub use sysfs::SysfsDevices;
pub use tolerant::{PrivilegeOutcome, Tolerance, apply_privilege};

use sriov_common::{SriovError, SriovResult};

/// One virtual function of a physical netdevice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VfInfo {
    /// VF index under its physical function (`virtfn<index>`).
    pub index: u32,
    /// PCI address of the VF.
    pub pci_address: String,
    /// Whether a driver is bound to the VF.
    pub bound: bool,
    /// Netdevice of the VF, when visible in the host namespace.
    pub netdev: Option<String>,
}

/// Operations the network variants need from the host.
pub trait HostDevices: Send + Sync {
    /// Whether the netdevice exists.
    fn device_exists(&self, netdev: &str) -> bool;

    /// Current MAC address of a netdevice.
    fn hardware_address(&self, netdev: &str) -> SriovResult<String>;

    /// Number of enabled VFs.
    ///
    /// Fails with [`SriovError::DeviceNotSriovCapable`] when the device
    /// exposes no SR-IOV control file.
    fn enabled_vf_count(&self, netdev: &str) -> SriovResult<u32>;

    /// Physical ports behind a netdevice, sorted by name.
    ///
    /// A plain NIC yields itself. Bond masters and multi-port PCI functions
    /// yield every member port.
    fn port_members(&self, netdev: &str) -> SriovResult<Vec<String>>;

    /// VFs of a physical function, sorted by index.
    fn list_vfs(&self, pf: &str) -> SriovResult<Vec<VfInfo>>;

    /// Bind the VF to its default driver.
    fn bind_vf(&self, pf: &str, vf: u32) -> SriovResult<()>;

    /// Unbind the VF from its driver. A VF without a driver is left alone.
    fn unbind_vf(&self, pf: &str, vf: u32) -> SriovResult<()>;

    /// Host-visible netdevice of a VF.
    fn vf_netdev(&self, pf: &str, vf: u32) -> SriovResult<Option<String>>;

    /// Set the VF's VLAN tag, 0 clears it.
    fn set_vf_vlan(&self, pf: &str, vf: u32, vlan: u16) -> SriovResult<()>;

    /// Set the VF's MAC address.
    fn set_vf_mac(&self, pf: &str, vf: u32, mac: &str) -> SriovResult<()>;

    /// Set the VF's trust flag.
    fn set_vf_trust(&self, pf: &str, vf: u32, trusted: bool) -> SriovResult<()>;

    /// Enable or disable spoof-check on the VF.
    fn set_vf_spoof_check(&self, pf: &str, vf: u32, enabled: bool) -> SriovResult<()>;

    /// RDMA device associated with a netdevice, if any.
    fn rdma_device(&self, netdev: &str) -> SriovResult<Option<String>>;

    /// Write the RoCE hop limit for the netdevice's RDMA device.
    ///
    /// Fails with [`SriovError::RdmaDeviceNotFound`] if no RDMA device maps
    /// to the netdevice.
    fn apply_roce_hop_limit(&self, netdev: &str, hop_limit: u8) -> SriovResult<()>;
}

/// Fail unless the device has at least one enabled VF.
pub(crate) fn require_sriov(devices: &dyn HostDevices, netdev: &str) -> SriovResult<u32> {
    match devices.enabled_vf_count(netdev)? {
        0 => Err(SriovError::DeviceNotSriovCapable {
            device: netdev.to_string(),
        }),
        count => Ok(count),
    }
}
