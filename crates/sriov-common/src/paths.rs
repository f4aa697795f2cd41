//! Standard filesystem paths for the driver.

use std::path::PathBuf;

use once_cell::sync::Lazy;

/// Default root of the persisted network configuration.
pub static SRIOV_CONFIG_ROOT: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("SRIOV_CONFIG_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/etc/docker/sriov-plugin"))
});

/// Default sysfs mount point.
pub static SRIOV_SYSFS_ROOT: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("SRIOV_SYSFS_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/sys"))
});

/// Default plugin socket the container engine discovers.
pub const DEFAULT_PLUGIN_SOCKET: &str = "/run/docker/plugins/sriov.sock";

/// Name of the per-network record file.
pub const NETWORK_RECORD_FILE: &str = "config.json";

/// Standard paths used by the driver.
#[derive(Debug, Clone)]
pub struct SriovPaths {
    /// Persisted configuration root (default: /etc/docker/sriov-plugin).
    pub config_root: PathBuf,
    /// Sysfs mount point (default: /sys).
    pub sysfs: PathBuf,
}

impl SriovPaths {
    /// Create paths with default locations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create paths with a custom configuration root.
    #[must_use]
    pub fn with_config_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config_root = root.into();
        self
    }

    /// Create paths with a custom sysfs root.
    #[must_use]
    pub fn with_sysfs(mut self, sysfs: impl Into<PathBuf>) -> Self {
        self.sysfs = sysfs.into();
        self
    }

    /// `class/net` below the sysfs root.
    #[must_use]
    pub fn class_net(&self) -> PathBuf {
        self.sysfs.join("class/net")
    }

    /// Sysfs directory of a netdevice.
    #[must_use]
    pub fn netdev(&self, name: &str) -> PathBuf {
        self.class_net().join(name)
    }

    /// PCI device directory backing a netdevice.
    #[must_use]
    pub fn netdev_device(&self, name: &str) -> PathBuf {
        self.netdev(name).join("device")
    }

    /// Sysfs directory of an RDMA device.
    #[must_use]
    pub fn infiniband(&self, rdma_dev: &str) -> PathBuf {
        self.sysfs.join("class/infiniband").join(rdma_dev)
    }

    /// Kernel hook that probes a PCI device and binds its default driver.
    #[must_use]
    pub fn pci_drivers_probe(&self) -> PathBuf {
        self.sysfs.join("bus/pci/drivers_probe")
    }
}

impl Default for SriovPaths {
    fn default() -> Self {
        Self {
            config_root: SRIOV_CONFIG_ROOT.clone(),
            sysfs: SRIOV_SYSFS_ROOT.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sysfs_paths() {
        let paths = SriovPaths::new().with_sysfs("/tmp/sys");
        assert_eq!(
            paths.netdev_device("ens1f0"),
            PathBuf::from("/tmp/sys/class/net/ens1f0/device")
        );
        assert_eq!(
            paths.infiniband("mlx5_0"),
            PathBuf::from("/tmp/sys/class/infiniband/mlx5_0")
        );
        assert_eq!(
            paths.pci_drivers_probe(),
            PathBuf::from("/tmp/sys/bus/pci/drivers_probe")
        );
    }
}
