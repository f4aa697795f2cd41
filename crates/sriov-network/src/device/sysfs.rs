//! Host devices backed by sysfs and `ip link`.

use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use sriov_common::{SriovError, SriovPaths, SriovResult};

use super::link::{IpLink, on_off};
use super::{HostDevices, VfInfo};

const SRIOV_NUMVFS: &str = "sriov_numvfs";
const VIRTFN_PREFIX: &str = "virtfn";

/// Production [`HostDevices`] implementation.
#[derive(Debug, Clone, Default)]
pub struct SysfsDevices {
    paths: SriovPaths,
    link: IpLink,
}

impl SysfsDevices {
    /// Devices under the given paths' sysfs root.
    #[must_use]
    pub fn new(paths: SriovPaths) -> Self {
        Self {
            paths,
            link: IpLink::default(),
        }
    }

    /// Use a specific `ip` runner.
    #[must_use]
    pub fn with_link(mut self, link: IpLink) -> Self {
        self.link = link;
        self
    }

    fn vf_dir(&self, pf: &str, vf: u32) -> PathBuf {
        self.paths
            .netdev_device(pf)
            .join(format!("{VIRTFN_PREFIX}{vf}"))
    }

    fn vf_pci_address(&self, pf: &str, vf: u32) -> SriovResult<String> {
        pci_address(&self.vf_dir(pf, vf))
    }
}

/// PCI address a `virtfn<N>` or `device` link points at.
fn pci_address(link: &Path) -> SriovResult<String> {
    let target = fs::read_link(link)?;
    target
        .file_name()
        .and_then(|name| name.to_str())
        .map(ToString::to_string)
        .ok_or_else(|| {
            io::Error::new(
                ErrorKind::InvalidData,
                format!("{} does not point at a PCI device", link.display()),
            )
            .into()
        })
}

/// Names in a directory, sorted; empty when the directory does not exist.
fn dir_names(dir: &Path) -> SriovResult<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut names = Vec::new();
    for entry in entries {
        if let Some(name) = entry?.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// Write to an existing sysfs attribute; never creates files.
fn write_attribute(path: &Path, value: &str) -> SriovResult<()> {
    tracing::debug!(path = %path.display(), value, "Writing sysfs attribute");
    let mut file = fs::OpenOptions::new().write(true).open(path)?;
    file.write_all(value.as_bytes())?;
    Ok(())
}

impl HostDevices for SysfsDevices {
    fn device_exists(&self, netdev: &str) -> bool {
        self.paths.netdev(netdev).exists()
    }

    fn hardware_address(&self, netdev: &str) -> SriovResult<String> {
        let raw = fs::read_to_string(self.paths.netdev(netdev).join("address"))?;
        Ok(raw.trim().to_string())
    }

    fn enabled_vf_count(&self, netdev: &str) -> SriovResult<u32> {
        let path = self.paths.netdev_device(netdev).join(SRIOV_NUMVFS);
        let raw = fs::read_to_string(&path).map_err(|e| {
            tracing::debug!(path = %path.display(), error = %e, "No SR-IOV control file");
            SriovError::DeviceNotSriovCapable {
                device: netdev.to_string(),
            }
        })?;

        let count = raw.trim().parse::<u32>().map_err(|e| {
            io::Error::new(
                ErrorKind::InvalidData,
                format!("{}: {e}", path.display()),
            )
        })?;
        tracing::debug!(netdev, count, "Enabled VFs");
        Ok(count)
    }

    fn port_members(&self, netdev: &str) -> SriovResult<Vec<String>> {
        let slaves = self.paths.netdev(netdev).join("bonding/slaves");
        let mut members = match fs::read_to_string(&slaves) {
            Ok(raw) => raw.split_whitespace().map(ToString::to_string).collect(),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                dir_names(&self.paths.netdev_device(netdev).join("net"))?
            }
            Err(e) => return Err(e.into()),
        };

        if members.is_empty() {
            members.push(netdev.to_string());
        }
        members.sort();
        members.dedup();
        Ok(members)
    }

    fn list_vfs(&self, pf: &str) -> SriovResult<Vec<VfInfo>> {
        let device = self.paths.netdev_device(pf);
        let mut vfs = Vec::new();

        for name in dir_names(&device)? {
            let Some(index) = name
                .strip_prefix(VIRTFN_PREFIX)
                .and_then(|i| i.parse::<u32>().ok())
            else {
                continue;
            };
            let dir = device.join(&name);
            vfs.push(VfInfo {
                index,
                pci_address: pci_address(&dir)?,
                bound: dir.join("driver").exists(),
                netdev: dir_names(&dir.join("net"))?.into_iter().next(),
            });
        }

        vfs.sort_by_key(|vf| vf.index);
        Ok(vfs)
    }

    fn bind_vf(&self, pf: &str, vf: u32) -> SriovResult<()> {
        let pci = self.vf_pci_address(pf, vf)?;
        tracing::debug!(pf, vf, %pci, "Binding VF");
        write_attribute(&self.paths.pci_drivers_probe(), &pci)
    }

    fn unbind_vf(&self, pf: &str, vf: u32) -> SriovResult<()> {
        let driver = self.vf_dir(pf, vf).join("driver");
        if !driver.exists() {
            return Ok(());
        }
        let pci = self.vf_pci_address(pf, vf)?;
        tracing::debug!(pf, vf, %pci, "Unbinding VF");
        write_attribute(&driver.join("unbind"), &pci)
    }

    fn vf_netdev(&self, pf: &str, vf: u32) -> SriovResult<Option<String>> {
        Ok(dir_names(&self.vf_dir(pf, vf).join("net"))?
            .into_iter()
            .next())
    }

    fn set_vf_vlan(&self, pf: &str, vf: u32, vlan: u16) -> SriovResult<()> {
        self.link.set_vf(pf, vf, &["vlan", &vlan.to_string()])
    }

    fn set_vf_mac(&self, pf: &str, vf: u32, mac: &str) -> SriovResult<()> {
        self.link.set_vf(pf, vf, &["mac", mac])
    }

    fn set_vf_trust(&self, pf: &str, vf: u32, trusted: bool) -> SriovResult<()> {
        self.link.set_vf(pf, vf, &["trust", on_off(trusted)])
    }

    fn set_vf_spoof_check(&self, pf: &str, vf: u32, enabled: bool) -> SriovResult<()> {
        self.link.set_vf(pf, vf, &["spoofchk", on_off(enabled)])
    }

    fn rdma_device(&self, netdev: &str) -> SriovResult<Option<String>> {
        Ok(
            dir_names(&self.paths.netdev_device(netdev).join("infiniband"))?
                .into_iter()
                .next(),
        )
    }

    fn apply_roce_hop_limit(&self, netdev: &str, hop_limit: u8) -> SriovResult<()> {
        let rdma = self
            .rdma_device(netdev)?
            .ok_or_else(|| SriovError::RdmaDeviceNotFound {
                netdev: netdev.to_string(),
            })?;

        let ttl = self.paths.infiniband(&rdma).join("ttl/1/ttl");
        write_attribute(&ttl, &hop_limit.to_string())?;

        tracing::info!(netdev, rdma = %rdma, hop_limit, "Applied RoCE hop limit");
        Ok(())
    }
}
