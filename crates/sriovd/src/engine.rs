//! Container engine client used to restore networks after a restart.

use bollard::Docker;
use bollard::models::Network;
use bollard::query_parameters::ListNetworksOptions;
use serde_json::{Map, Value};
use sriov_common::{SriovError, SriovResult};
use sriov_network::{EngineNetwork, EngineNetworks};
use tokio::runtime::Handle;

/// Lists networks through the engine's local API socket.
///
/// Registry calls run on blocking worker threads, so the query is driven to
/// completion on the captured runtime handle.
pub struct DockerNetworks {
    docker: Docker,
    runtime: Handle,
}

impl DockerNetworks {
    pub fn connect(runtime: Handle) -> anyhow::Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker, runtime })
    }
}

impl EngineNetworks for DockerNetworks {
    fn list_networks(&self) -> SriovResult<Vec<EngineNetwork>> {
        let networks = self
            .runtime
            .block_on(self.docker.list_networks(None::<ListNetworksOptions>))
            .map_err(|e| SriovError::Engine {
                message: e.to_string(),
            })?;
        tracing::debug!(count = networks.len(), "Listed engine networks");
        Ok(networks.into_iter().map(engine_network).collect())
    }
}

fn engine_network(network: Network) -> EngineNetwork {
    let gateway = network
        .ipam
        .and_then(|ipam| ipam.config)
        .and_then(|configs| configs.into_iter().next())
        .and_then(|config| config.gateway);
    let options = network.options.map_or(Value::Null, |options| {
        Value::Object(
            options
                .into_iter()
                .map(|(key, value)| (key, Value::String(value)))
                .collect::<Map<_, _>>(),
        )
    });

    EngineNetwork {
        id: network.id.unwrap_or_default(),
        name: network.name.unwrap_or_default(),
        driver: network.driver.unwrap_or_default(),
        gateway,
        options,
    }
}
