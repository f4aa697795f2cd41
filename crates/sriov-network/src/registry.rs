//! The driver registry.
//!
//! One registry serves every lifecycle call from the engine. All state sits
//! behind a single lock that is held for the whole call, host I/O included,
//! so calls on the same network or endpoint are totally ordered.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use sriov_common::{NetworkId, SriovError, SriovResult};

use crate::bootstrap::{self, EngineNetworks, ReconcileReport};
use crate::device::HostDevices;
use crate::network::{
    EndpointInterface, EndpointRequest, Gateway, Ipv4Data, JoinInfo, Network, VfHandle,
};
use crate::options::{NetworkConfig, OptionMap, generic_options, parse_generic_options};
use crate::store::NetworkStore;

/// Scope reported to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Networks exist on this host only.
    Local,
}

impl Scope {
    /// Wire value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    networks: HashMap<NetworkId, Network>,
    fetched: bool,
}

impl RegistryState {
    fn network(&self, id: &str) -> SriovResult<&Network> {
        self.networks
            .get(id)
            .ok_or_else(|| SriovError::NetworkNotFound { id: id.to_string() })
    }

    fn network_mut(&mut self, id: &str) -> SriovResult<&mut Network> {
        self.networks
            .get_mut(id)
            .ok_or_else(|| SriovError::NetworkNotFound { id: id.to_string() })
    }

    /// VFs held by endpoints of any network.
    fn reserved_vfs(&self) -> HashSet<VfHandle> {
        crate::network::reserved_vfs(&self.networks)
    }
}

/// Registry of managed networks and their endpoints.
pub struct NetworkRegistry {
    state: Mutex<RegistryState>,
    devices: Arc<dyn HostDevices>,
    store: NetworkStore,
    engine: Arc<dyn EngineNetworks>,
    driver_name: String,
}

impl fmt::Debug for NetworkRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkRegistry")
            .field("store", &self.store)
            .field("driver_name", &self.driver_name)
            .finish_non_exhaustive()
    }
}

impl NetworkRegistry {
    /// Create an empty registry.
    ///
    /// Networks the engine already knows are restored on the first call that
    /// touches a network.
    pub fn new(
        devices: Arc<dyn HostDevices>,
        store: NetworkStore,
        engine: Arc<dyn EngineNetworks>,
        driver_name: impl Into<String>,
    ) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            devices,
            store,
            engine,
            driver_name: driver_name.into(),
        }
    }

    /// IDs of the registered networks, sorted.
    #[must_use]
    pub fn network_ids(&self) -> Vec<NetworkId> {
        let mut ids: Vec<_> = self.state.lock().networks.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Restore engine networks unless that already happened.
    ///
    /// An engine failure leaves the registry unfetched so the next call
    /// tries again.
    fn ensure_fetched(&self, state: &mut RegistryState) -> Option<ReconcileReport> {
        if state.fetched {
            return None;
        }

        match self.engine.list_networks() {
            Ok(engine_networks) => {
                let report = bootstrap::reconcile(
                    self.devices.as_ref(),
                    &self.store,
                    &self.driver_name,
                    engine_networks,
                    &mut state.networks,
                );
                state.fetched = true;
                Some(report)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list engine networks, will retry");
                None
            }
        }
    }

    /// Run reconciliation now; `None` if it already ran or the engine failed.
    pub fn reconcile(&self) -> Option<ReconcileReport> {
        let mut state = self.state.lock();
        self.ensure_fetched(&mut state)
    }

    /// Capabilities reported to the engine.
    #[must_use]
    pub fn get_capabilities(&self) -> Scope {
        Scope::Local
    }

    /// Create and register a network.
    ///
    /// Input is validated before any host device is touched. An ID that is
    /// already registered has its old network torn down first.
    ///
    /// # Errors
    ///
    /// Returns [`SriovError::InvalidConfig`] for missing IPv4 data, bad
    /// options or an unparseable gateway, and host errors from setup.
    pub fn create_network(
        &self,
        id: &str,
        options: &Value,
        ipv4_data: &[Ipv4Data],
    ) -> SriovResult<()> {
        let Some(ipv4) = ipv4_data.first() else {
            return Err(SriovError::invalid_config("Network gateway config miss."));
        };
        let id = NetworkId::new(id)?;
        let options = parse_generic_options(generic_options(options)?);
        let config = NetworkConfig::from_options(&options)?;
        let gateway = Gateway::parse(&ipv4.gateway)?;

        let mut state = self.state.lock();
        self.ensure_fetched(&mut state);

        if let Some(mut previous) = state.networks.remove(&id) {
            tracing::warn!(network_id = %id.short(), "Network already registered, replacing it");
            if let Err(e) = previous.teardown(self.devices.as_ref()) {
                tracing::warn!(network_id = %id.short(), error = %e, "Teardown of replaced network failed");
            }
            self.store.delete(&id)?;
        }

        let reserved = state.reserved_vfs();
        let network = Network::create(
            self.devices.as_ref(),
            id.clone(),
            config,
            gateway,
            &reserved,
        )?;
        self.store.write(&id, &network.record())?;
        tracing::info!(network_id = %id.short(), variant = %network.kind(), "Network created");
        state.networks.insert(id, network);
        Ok(())
    }

    /// Engine-side allocation; the driver has nothing to add.
    #[must_use]
    pub fn allocate_network(&self, id: &str) -> OptionMap {
        tracing::debug!(network_id = %id, "AllocateNetwork");
        OptionMap::new()
    }

    /// Tear a network down and forget it. Unknown IDs are ignored.
    ///
    /// The network is removed even if teardown fails.
    ///
    /// # Errors
    ///
    /// Returns the first teardown or store failure.
    pub fn delete_network(&self, id: &str) -> SriovResult<()> {
        let mut state = self.state.lock();
        self.ensure_fetched(&mut state);

        let Some(mut network) = state.networks.remove(id) else {
            tracing::debug!(network_id = %id, "Delete of unknown network ignored");
            return Ok(());
        };

        let teardown = network.teardown(self.devices.as_ref());
        let removed = self.store.delete(network.id());
        tracing::info!(network_id = %network.id().short(), "Network deleted");
        teardown.and(removed)
    }

    /// Engine-side release; nothing to do.
    pub fn free_network(&self, id: &str) {
        tracing::debug!(network_id = %id, "FreeNetwork");
    }

    /// Create an endpoint on a registered network.
    ///
    /// # Errors
    ///
    /// Returns [`SriovError::NetworkNotFound`], a capacity error from the
    /// variant or the host failure that stopped device setup.
    pub fn create_endpoint(&self, request: &EndpointRequest) -> SriovResult<EndpointInterface> {
        let mut state = self.state.lock();
        self.ensure_fetched(&mut state);

        let reserved = state.reserved_vfs();
        let network = state.network_mut(&request.network_id)?;
        network.create_endpoint(self.devices.as_ref(), request, &reserved)
    }

    /// Release an endpoint's device and remove the endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`SriovError::NetworkNotFound`], [`SriovError::EndpointNotFound`]
    /// or the host release error.
    pub fn delete_endpoint(&self, network_id: &str, endpoint_id: &str) -> SriovResult<()> {
        let mut state = self.state.lock();
        self.ensure_fetched(&mut state);

        state
            .network_mut(network_id)?
            .delete_endpoint(self.devices.as_ref(), endpoint_id)
    }

    /// Operational data for an endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`SriovError::NetworkNotFound`] or [`SriovError::EndpointNotFound`].
    pub fn endpoint_info(
        &self,
        network_id: &str,
        endpoint_id: &str,
    ) -> SriovResult<BTreeMap<String, String>> {
        let mut state = self.state.lock();
        self.ensure_fetched(&mut state);

        let endpoint = state.network(network_id)?.endpoint(endpoint_id)?;
        let mut info = BTreeMap::new();
        info.insert("id".to_string(), endpoint.id.clone());
        info.insert("srcName".to_string(), endpoint.dev_name.clone());
        if let Some(mac) = &endpoint.mac_address {
            info.insert("macAddress".to_string(), mac.clone());
        }
        if let Some(vf) = &endpoint.vf {
            info.insert("pf".to_string(), vf.port.clone());
            info.insert("vf".to_string(), vf.index.to_string());
        }
        Ok(info)
    }

    /// Bind an endpoint to a sandbox.
    ///
    /// # Errors
    ///
    /// Returns [`SriovError::NetworkNotFound`], [`SriovError::EndpointNotFound`]
    /// or [`SriovError::AlreadyBound`] if the endpoint is already joined.
    pub fn join(
        &self,
        network_id: &str,
        endpoint_id: &str,
        sandbox_key: &str,
    ) -> SriovResult<JoinInfo> {
        let mut state = self.state.lock();
        self.ensure_fetched(&mut state);

        let network = state.network_mut(network_id)?;
        let gateway = network.gateway().addr();
        let dst_prefix = network.config().prefix.clone();
        let endpoint = network.endpoint_mut(endpoint_id)?;

        if endpoint.is_joined() {
            return Err(SriovError::AlreadyBound {
                id: endpoint_id.to_string(),
                sandbox_key: endpoint.sandbox_key.clone().unwrap_or_default(),
            });
        }
        endpoint.sandbox_key = Some(sandbox_key.to_string());

        tracing::info!(network_id = %network_id, endpoint_id, sandbox_key, "Endpoint joined");
        Ok(JoinInfo {
            src_name: endpoint.dev_name.clone(),
            dst_prefix,
            gateway,
        })
    }

    /// Unbind an endpoint from its sandbox. Safe on an endpoint that is not
    /// joined.
    ///
    /// # Errors
    ///
    /// Returns [`SriovError::NetworkNotFound`] or [`SriovError::EndpointNotFound`].
    pub fn leave(&self, network_id: &str, endpoint_id: &str) -> SriovResult<()> {
        let mut state = self.state.lock();
        self.ensure_fetched(&mut state);

        let endpoint = state.network_mut(network_id)?.endpoint_mut(endpoint_id)?;
        endpoint.sandbox_key = None;
        tracing::info!(network_id = %network_id, endpoint_id, "Endpoint left");
        Ok(())
    }

    /// Discovery notification; ignored.
    pub fn discover_new(&self, discovery_type: i64) {
        tracing::debug!(discovery_type, "DiscoverNew");
    }

    /// Discovery notification; ignored.
    pub fn discover_delete(&self, discovery_type: i64) {
        tracing::debug!(discovery_type, "DiscoverDelete");
    }

    /// No external connectivity is programmed.
    pub fn program_external_connectivity(&self, network_id: &str, endpoint_id: &str) {
        tracing::debug!(network_id, endpoint_id, "ProgramExternalConnectivity");
    }

    /// No external connectivity is programmed.
    pub fn revoke_external_connectivity(&self, network_id: &str, endpoint_id: &str) {
        tracing::debug!(network_id, endpoint_id, "RevokeExternalConnectivity");
    }
}
