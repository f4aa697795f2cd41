//! Integration tests for sriov-network against a temporary sysfs tree.

use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;
use sriov_common::{NetworkId, SriovError, SriovPaths};
use sriov_network::{
    EndpointRequest, EngineNetwork, InterfaceAddresses, IpLink, Ipv4Data, NetworkRegistry,
    NetworkStore, SysfsDevices,
};
use tempfile::{TempDir, tempdir};

/// Sysfs tree with a plain NIC `eth5` and an SR-IOV port `ens1f0` with two
/// unbound VFs whose netdevices are already visible.
struct Host {
    sysfs: TempDir,
    config: TempDir,
}

impl Host {
    fn new() -> Self {
        let host = Self {
            sysfs: tempdir().unwrap(),
            config: tempdir().unwrap(),
        };
        host.netdev("eth5", "0000:01:00.0", "aa:bb:cc:00:00:05");
        host.netdev("ens1f0", "0000:03:00.0", "aa:bb:cc:00:00:10");
        fs::write(host.device("ens1f0").join("sriov_numvfs"), "2\n").unwrap();
        host.vf("ens1f0", 0, "0000:03:00.2", "ens1f0v0", "aa:bb:cc:00:01:00");
        host.vf("ens1f0", 1, "0000:03:00.3", "ens1f0v1", "aa:bb:cc:00:01:01");
        fs::create_dir_all(host.root().join("bus/pci")).unwrap();
        fs::write(host.root().join("bus/pci/drivers_probe"), "").unwrap();
        host
    }

    fn root(&self) -> &Path {
        self.sysfs.path()
    }

    fn pci(&self, address: &str) -> PathBuf {
        let dir = self.root().join("devices/pci0000:00").join(address);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn device(&self, netdev: &str) -> PathBuf {
        self.root().join("class/net").join(netdev).join("device")
    }

    fn netdev(&self, name: &str, pci: &str, mac: &str) {
        let dir = self.root().join("class/net").join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("address"), format!("{mac}\n")).unwrap();
        symlink(self.pci(pci), dir.join("device")).unwrap();
        fs::create_dir_all(self.pci(pci).join("net").join(name)).unwrap();
    }

    fn vf(&self, pf: &str, index: u32, pci: &str, netdev: &str, mac: &str) {
        let vf = self.pci(pci);
        symlink(&vf, self.device(pf).join(format!("virtfn{index}"))).unwrap();
        fs::create_dir_all(vf.join("net").join(netdev)).unwrap();
        let class = self.root().join("class/net").join(netdev);
        fs::create_dir_all(&class).unwrap();
        fs::write(class.join("address"), format!("{mac}\n")).unwrap();
    }

    fn registry(&self, engine: Vec<EngineNetwork>) -> NetworkRegistry {
        let paths = SriovPaths::new()
            .with_sysfs(self.root())
            .with_config_root(self.config.path());
        // `true` accepts any `ip link` arguments.
        let devices = SysfsDevices::new(paths.clone()).with_link(IpLink::with_program("true"));
        NetworkRegistry::new(
            Arc::new(devices),
            NetworkStore::new(&paths.config_root),
            Arc::new(engine),
            "sriov",
        )
    }

    fn store(&self) -> NetworkStore {
        NetworkStore::new(self.config.path())
    }
}

fn generic(options: serde_json::Value) -> serde_json::Value {
    json!({ "com.docker.network.generic": options })
}

fn ipv4(gateway: &str) -> Vec<Ipv4Data> {
    vec![Ipv4Data {
        pool: None,
        gateway: gateway.to_string(),
    }]
}

fn request(network: &str, endpoint: &str) -> EndpointRequest {
    EndpointRequest {
        network_id: network.to_string(),
        endpoint_id: endpoint.to_string(),
        interface: InterfaceAddresses {
            address: Some("192.168.10.2/24".to_string()),
            ..InterfaceAddresses::default()
        },
    }
}

#[test]
fn test_passthrough_lifecycle() {
    let host = Host::new();
    let registry = host.registry(Vec::new());

    registry
        .create_network(
            "pt0",
            &generic(json!({"mode": "passthrough", "netdevice": "eth5"})),
            &ipv4("192.168.10.1/24"),
        )
        .unwrap();

    // The record is persisted alongside the network
    let id = NetworkId::new("pt0").unwrap();
    let record = host.store().read(&id).unwrap().unwrap();
    assert_eq!(record.netdevice, "eth5");
    assert_eq!(record.gateway, "192.168.10.1/24");

    // The device address is handed back when the engine did not pick one
    let interface = registry.create_endpoint(&request("pt0", "ep1")).unwrap();
    assert_eq!(interface.mac_address.as_deref(), Some("aa:bb:cc:00:00:05"));

    let join = registry.join("pt0", "ep1", "/var/run/docker/netns/c1").unwrap();
    assert_eq!(join.src_name, "eth5");
    assert_eq!(join.dst_prefix, "eth");
    assert_eq!(join.gateway.to_string(), "192.168.10.1");

    registry.leave("pt0", "ep1").unwrap();
    registry.delete_endpoint("pt0", "ep1").unwrap();
    registry.delete_network("pt0").unwrap();

    assert!(host.store().read(&id).unwrap().is_none());
}

#[test]
fn test_sriov_pool_exhaustion() {
    let host = Host::new();
    let registry = host.registry(Vec::new());

    registry
        .create_network(
            "vf0",
            &generic(json!({"netdevice": "ens1f0", "vlan": "42"})),
            &ipv4("10.20.0.1"),
        )
        .unwrap();

    registry.create_endpoint(&request("vf0", "ep1")).unwrap();
    registry.create_endpoint(&request("vf0", "ep2")).unwrap();
    let err = registry.create_endpoint(&request("vf0", "ep3")).unwrap_err();
    assert!(matches!(err, SriovError::CapacityExceeded { .. }));

    let info = registry.endpoint_info("vf0", "ep2").unwrap();
    assert_eq!(info["srcName"], "ens1f0v1");
    assert_eq!(info["macAddress"], "aa:bb:cc:00:01:01");

    // Both VFs were handed to the kernel for binding
    let probed = fs::read_to_string(host.root().join("bus/pci/drivers_probe")).unwrap();
    assert_eq!(probed, "0000:03:00.3");
}

#[test]
fn test_device_without_vfs_is_rejected() {
    let host = Host::new();
    let registry = host.registry(Vec::new());

    let err = registry
        .create_network("vf1", &generic(json!({"netdevice": "eth5"})), &ipv4("10.0.0.1"))
        .unwrap_err();
    assert!(matches!(err, SriovError::DeviceNotSriovCapable { .. }));
    assert!(registry.network_ids().is_empty());
}

#[test]
fn test_restart_restores_engine_networks() {
    let host = Host::new();
    let engine = vec![
        EngineNetwork {
            id: "pt1".to_string(),
            name: "fast".to_string(),
            driver: "sriov".to_string(),
            gateway: Some("172.30.0.1/16".to_string()),
            options: json!({"mode": "passthrough", "netdevice": "eth5"}),
        },
        EngineNetwork {
            id: "junk".to_string(),
            name: "junk".to_string(),
            driver: "sriov".to_string(),
            gateway: Some("172.31.0.1/16".to_string()),
            options: json!(42),
        },
    ];
    let registry = host.registry(engine);

    // First lifecycle call triggers reconciliation
    registry.create_endpoint(&request("pt1", "ep1")).unwrap();
    assert_eq!(registry.network_ids(), [NetworkId::new("pt1").unwrap()]);

    let join = registry.join("pt1", "ep1", "sandbox").unwrap();
    assert_eq!(join.gateway.to_string(), "172.30.0.1");
}
