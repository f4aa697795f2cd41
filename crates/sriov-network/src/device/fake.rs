//! In-memory host used by unit tests.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use sriov_common::{SriovError, SriovResult};

use super::{HostDevices, VfInfo};

#[derive(Debug, Clone)]
pub(crate) struct FakeVf {
    pub pci_address: String,
    pub bound: bool,
    /// Bound but moved out of the host namespace.
    pub in_container: bool,
    pub vlan: u16,
    pub mac: String,
    pub trusted: bool,
    pub spoof_check: bool,
}

#[derive(Debug, Default)]
struct FakeDevice {
    mac: String,
    members: Vec<String>,
    vfs: Vec<FakeVf>,
    sriov: bool,
}

#[derive(Debug, Default)]
struct FakeState {
    devices: BTreeMap<String, FakeDevice>,
    rdma: BTreeMap<String, String>,
    hop_limits: Vec<(String, u8)>,
    calls: Vec<String>,
    trust_supported: bool,
    fail_vlan: bool,
}

/// Host double that records every call.
#[derive(Debug)]
pub(crate) struct FakeHost {
    state: Mutex<FakeState>,
}

fn vf_netdev_name(pf: &str, vf: usize) -> String {
    format!("{pf}v{vf}")
}

impl FakeHost {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                trust_supported: true,
                ..FakeState::default()
            }),
        }
    }

    /// A plain netdevice without VFs.
    pub fn with_netdev(self, name: &str) -> Self {
        {
            let mut state = self.state.lock();
            let index = state.devices.len();
            state.devices.insert(
                name.to_string(),
                FakeDevice {
                    mac: format!("02:00:00:00:{index:02x}:00"),
                    members: vec![name.to_string()],
                    ..FakeDevice::default()
                },
            );
        }
        self
    }

    /// An SR-IOV physical function with `vfs` unbound VFs.
    pub fn with_sriov(self, name: &str, vfs: usize) -> Self {
        let host = self.with_netdev(name);
        {
            let mut state = host.state.lock();
            let device_index = state.devices.len();
            let device = state.devices.get_mut(name).expect("device just added");
            device.sriov = true;
            device.vfs = (0..vfs)
                .map(|i| FakeVf {
                    pci_address: format!("0000:{device_index:02x}:00.{}", i + 1),
                    bound: false,
                    in_container: false,
                    vlan: 0,
                    mac: format!("02:00:00:{device_index:02x}:00:{i:02x}"),
                    trusted: false,
                    spoof_check: true,
                })
                .collect();
        }
        host
    }

    /// A bond master aggregating the given ports.
    pub fn with_bond(self, name: &str, ports: &[&str]) -> Self {
        let host = self.with_netdev(name);
        host.state
            .lock()
            .devices
            .get_mut(name)
            .expect("device just added")
            .members = ports.iter().map(ToString::to_string).collect();
        host
    }

    /// Map a netdevice (PF name or VF netdev) to an RDMA device.
    pub fn with_rdma(self, netdev: &str, rdma: &str) -> Self {
        self.state
            .lock()
            .rdma
            .insert(netdev.to_string(), rdma.to_string());
        self
    }

    /// Reject trust and spoof-check like an old kernel.
    pub fn without_trust_support(self) -> Self {
        self.state.lock().trust_supported = false;
        self
    }

    /// Make VLAN programming fail.
    pub fn failing_vlan(self) -> Self {
        self.set_vlan_failure(true);
        self
    }

    pub fn set_vlan_failure(&self, fail: bool) {
        self.state.lock().fail_vlan = fail;
    }

    /// Mark a VF as bound, optionally as moved into a container namespace.
    pub fn mark_bound(&self, pf: &str, vf: usize, in_container: bool) {
        let mut state = self.state.lock();
        let vf = &mut state.devices.get_mut(pf).expect("unknown pf").vfs[vf];
        vf.bound = true;
        vf.in_container = in_container;
    }

    pub fn vf(&self, pf: &str, vf: usize) -> FakeVf {
        self.state.lock().devices[pf].vfs[vf].clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Calls that changed host state.
    pub fn mutations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| {
                ["bind", "unbind", "vlan", "mac", "trust", "spoofchk", "hoplimit"]
                    .iter()
                    .any(|m| c.starts_with(&format!("{m} ")))
            })
            .collect()
    }

    pub fn hop_limits(&self) -> Vec<(String, u8)> {
        self.state.lock().hop_limits.clone()
    }

    fn record(&self, call: String) {
        self.state.lock().calls.push(call);
    }

    fn with_vf<T>(
        &self,
        pf: &str,
        vf: u32,
        f: impl FnOnce(&mut FakeVf) -> T,
    ) -> SriovResult<T> {
        let mut state = self.state.lock();
        let vf = state
            .devices
            .get_mut(pf)
            .and_then(|d| d.vfs.get_mut(vf as usize))
            .ok_or_else(|| {
                SriovError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{pf} has no VF {vf}"),
                ))
            })?;
        Ok(f(vf))
    }

    /// VF netdevice name mapped back to its PF and index.
    fn find_vf_netdev(state: &FakeState, netdev: &str) -> Option<String> {
        state.devices.iter().find_map(|(pf, device)| {
            device
                .vfs
                .iter()
                .enumerate()
                .find(|(i, vf)| vf.bound && vf_netdev_name(pf, *i) == netdev)
                .map(|(_, vf)| vf.mac.clone())
        })
    }
}

impl HostDevices for FakeHost {
    fn device_exists(&self, netdev: &str) -> bool {
        self.state.lock().devices.contains_key(netdev)
    }

    fn hardware_address(&self, netdev: &str) -> SriovResult<String> {
        let state = self.state.lock();
        state
            .devices
            .get(netdev)
            .map(|d| d.mac.clone())
            .or_else(|| Self::find_vf_netdev(&state, netdev))
            .ok_or_else(|| {
                SriovError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    netdev.to_string(),
                ))
            })
    }

    fn enabled_vf_count(&self, netdev: &str) -> SriovResult<u32> {
        match self.state.lock().devices.get(netdev) {
            Some(device) if device.sriov => Ok(device.vfs.len() as u32),
            _ => Err(SriovError::DeviceNotSriovCapable {
                device: netdev.to_string(),
            }),
        }
    }

    fn port_members(&self, netdev: &str) -> SriovResult<Vec<String>> {
        let mut members = self
            .state
            .lock()
            .devices
            .get(netdev)
            .map(|d| d.members.clone())
            .unwrap_or_else(|| vec![netdev.to_string()]);
        members.sort();
        Ok(members)
    }

    fn list_vfs(&self, pf: &str) -> SriovResult<Vec<VfInfo>> {
        self.record(format!("list {pf}"));
        let state = self.state.lock();
        let device = state.devices.get(pf).ok_or_else(|| {
            SriovError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                pf.to_string(),
            ))
        })?;
        Ok(device
            .vfs
            .iter()
            .enumerate()
            .map(|(i, vf)| VfInfo {
                index: i as u32,
                pci_address: vf.pci_address.clone(),
                bound: vf.bound,
                netdev: (vf.bound && !vf.in_container).then(|| vf_netdev_name(pf, i)),
            })
            .collect())
    }

    fn bind_vf(&self, pf: &str, vf: u32) -> SriovResult<()> {
        self.record(format!("bind {pf} {vf}"));
        self.with_vf(pf, vf, |v| {
            v.bound = true;
            v.in_container = false;
        })
    }

    fn unbind_vf(&self, pf: &str, vf: u32) -> SriovResult<()> {
        self.record(format!("unbind {pf} {vf}"));
        self.with_vf(pf, vf, |v| {
            v.bound = false;
            v.in_container = false;
        })
    }

    fn vf_netdev(&self, pf: &str, vf: u32) -> SriovResult<Option<String>> {
        self.with_vf(pf, vf, |v| {
            (v.bound && !v.in_container).then(|| vf_netdev_name(pf, vf as usize))
        })
    }

    fn set_vf_vlan(&self, pf: &str, vf: u32, vlan: u16) -> SriovResult<()> {
        self.record(format!("vlan {pf} {vf} {vlan}"));
        if self.state.lock().fail_vlan {
            return Err(SriovError::HostCommand {
                command: format!("ip link set {pf} vf {vf} vlan {vlan}"),
                stderr: "RTNETLINK answers: Operation not permitted".to_string(),
            });
        }
        self.with_vf(pf, vf, |v| v.vlan = vlan)
    }

    fn set_vf_mac(&self, pf: &str, vf: u32, mac: &str) -> SriovResult<()> {
        self.record(format!("mac {pf} {vf} {mac}"));
        self.with_vf(pf, vf, |v| v.mac = mac.to_string())
    }

    fn set_vf_trust(&self, pf: &str, vf: u32, trusted: bool) -> SriovResult<()> {
        self.record(format!("trust {pf} {vf} {trusted}"));
        if !self.state.lock().trust_supported {
            return Err(SriovError::HostCommand {
                command: format!("ip link set {pf} vf {vf} trust"),
                stderr: "Error: argument \"trust\" is wrong".to_string(),
            });
        }
        self.with_vf(pf, vf, |v| v.trusted = trusted)
    }

    fn set_vf_spoof_check(&self, pf: &str, vf: u32, enabled: bool) -> SriovResult<()> {
        self.record(format!("spoofchk {pf} {vf} {enabled}"));
        if !self.state.lock().trust_supported {
            return Err(SriovError::HostCommand {
                command: format!("ip link set {pf} vf {vf} spoofchk"),
                stderr: "Error: argument \"spoofchk\" is wrong".to_string(),
            });
        }
        self.with_vf(pf, vf, |v| v.spoof_check = enabled)
    }

    fn rdma_device(&self, netdev: &str) -> SriovResult<Option<String>> {
        Ok(self.state.lock().rdma.get(netdev).cloned())
    }

    fn apply_roce_hop_limit(&self, netdev: &str, hop_limit: u8) -> SriovResult<()> {
        self.record(format!("hoplimit {netdev} {hop_limit}"));
        let mut state = self.state.lock();
        if !state.rdma.contains_key(netdev) {
            return Err(SriovError::RdmaDeviceNotFound {
                netdev: netdev.to_string(),
            });
        }
        state.hop_limits.push((netdev.to_string(), hop_limit));
        Ok(())
    }
}
