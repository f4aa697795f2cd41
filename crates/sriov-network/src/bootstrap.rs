//! Rebuilding the registry after a restart.
//!
//! The engine keeps its own list of networks across driver restarts. On the
//! first lifecycle call the registry asks the engine for the networks owned by
//! this driver and registers each of them again, merging in what was persisted
//! at creation time. One bad network never blocks the others.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde_json::Value;
use sriov_common::{NetworkId, SriovError, SriovResult};

use crate::device::HostDevices;
use crate::network::{Gateway, Network, VfHandle, reserved_vfs};
use crate::options::{NetworkConfig, OptionMap, parse_generic_options};
use crate::store::{NetworkRecord, NetworkStore};

/// A network as reported by the container engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineNetwork {
    /// Network ID.
    pub id: String,
    /// Human readable name.
    pub name: String,
    /// Driver owning the network.
    pub driver: String,
    /// Gateway of the first IPAM config block.
    pub gateway: Option<String>,
    /// Driver options blob.
    pub options: Value,
}

/// Source of the engine's network list.
pub trait EngineNetworks: Send + Sync {
    /// List every network the engine knows about.
    ///
    /// # Errors
    ///
    /// Returns [`SriovError::Engine`] if the engine cannot be queried.
    fn list_networks(&self) -> SriovResult<Vec<EngineNetwork>>;
}

impl EngineNetworks for Vec<EngineNetwork> {
    fn list_networks(&self) -> SriovResult<Vec<EngineNetwork>> {
        Ok(self.clone())
    }
}

/// What a reconciliation pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Networks registered again.
    pub registered: Vec<NetworkId>,
    /// Engine network IDs that could not be registered.
    pub skipped: Vec<String>,
    /// Persisted records removed because the engine no longer has them.
    pub removed_stale: Vec<NetworkId>,
}

/// Merge engine options over a persisted record's options.
fn merge_options(engine: OptionMap, record: Option<&NetworkRecord>) -> OptionMap {
    let mut merged = record.map(NetworkRecord::to_options).unwrap_or_default();
    merged.extend(engine.into_iter().filter(|(_, value)| !value.is_empty()));
    merged
}

fn restore(
    devices: &dyn HostDevices,
    engine: &EngineNetwork,
    record: Option<&NetworkRecord>,
    reserved: &HashSet<VfHandle>,
) -> SriovResult<Network> {
    let id = NetworkId::new(engine.id.as_str())?;
    let options = merge_options(parse_generic_options(&engine.options), record);
    let config = NetworkConfig::from_options(&options)?;

    let gateway = engine
        .gateway
        .as_deref()
        .filter(|gw| !gw.is_empty())
        .or_else(|| record.map(|r| r.gateway.as_str()))
        .ok_or_else(|| SriovError::invalid_config("Network gateway config miss."))?;
    let gateway = Gateway::parse(gateway)?;

    Network::create(devices, id, config, gateway, reserved)
}

/// Register every engine network owned by `driver_name` into `networks`.
///
/// Networks already present are left untouched.
pub(crate) fn reconcile(
    devices: &dyn HostDevices,
    store: &NetworkStore,
    driver_name: &str,
    engine_networks: Vec<EngineNetwork>,
    networks: &mut HashMap<NetworkId, Network>,
) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    let records = store.read_all().unwrap_or_else(|e| {
        tracing::warn!(root = %store.root().display(), error = %e, "Failed to read persisted networks");
        BTreeMap::new()
    });

    let owned: Vec<EngineNetwork> = engine_networks
        .into_iter()
        .filter(|net| net.driver == driver_name)
        .collect();
    let reported: HashSet<&str> = owned.iter().map(|net| net.id.as_str()).collect();

    for engine in &owned {
        if networks.contains_key(engine.id.as_str()) {
            continue;
        }

        let record = records.get(engine.id.as_str());
        let reserved = reserved_vfs(networks);
        match restore(devices, engine, record, &reserved) {
            Ok(network) => {
                let id = network.id().clone();
                if let Err(e) = store.write(&id, &network.record()) {
                    tracing::warn!(network_id = %id.short(), error = %e, "Failed to persist restored network");
                }
                tracing::info!(network_id = %id.short(), name = %engine.name, "Restored network");
                report.registered.push(id.clone());
                networks.insert(id, network);
            }
            Err(e) => {
                tracing::warn!(
                    network_id = %engine.id,
                    name = %engine.name,
                    error = %e,
                    "Skipping network during reconciliation"
                );
                report.skipped.push(engine.id.clone());
            }
        }
    }

    for id in records.keys() {
        if reported.contains(id.as_str()) || networks.contains_key(id) {
            continue;
        }
        match store.delete(id) {
            Ok(()) => report.removed_stale.push(id.clone()),
            Err(e) => {
                tracing::warn!(network_id = %id.short(), error = %e, "Failed to remove stale record");
            }
        }
    }

    tracing::info!(
        registered = report.registered.len(),
        skipped = report.skipped.len(),
        removed_stale = report.removed_stale.len(),
        "Reconciled networks with engine"
    );
    report
}
