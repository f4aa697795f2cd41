//! Common error types for the SR-IOV network driver.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`SriovError`].
pub type SriovResult<T> = Result<T, SriovError>;

/// Errors surfaced by the driver to the container engine.
#[derive(Error, Diagnostic, Debug)]
pub enum SriovError {
    /// Network creation options are missing or malformed.
    #[error("{message}")]
    #[diagnostic(
        code(sriov::config::invalid),
        help("Recreate the network with valid -o options (mode, netdevice, vlan, privileged, prefix)")
    )]
    InvalidConfig {
        /// Human readable reason, returned verbatim to the engine.
        message: String,
    },

    /// The network ID is not registered with the driver.
    #[error("Plugin can not find network [ {id} ]")]
    #[diagnostic(code(sriov::network::not_found))]
    NetworkNotFound {
        /// The network ID that was not found.
        id: String,
    },

    /// The endpoint ID is unknown within its network.
    #[error("Cannot find endpoint by id: {id}")]
    #[diagnostic(code(sriov::endpoint::not_found))]
    EndpointNotFound {
        /// The endpoint ID that was not found.
        id: String,
    },

    /// An endpoint with this ID already exists in the network.
    #[error("Endpoint [ {id} ] already exists")]
    #[diagnostic(code(sriov::endpoint::exists))]
    EndpointExists {
        /// The endpoint ID.
        id: String,
    },

    /// The endpoint is already joined to a sandbox.
    #[error("Endpoint [{id}] is already bound to sandbox [{sandbox_key}]")]
    #[diagnostic(code(sriov::endpoint::already_bound))]
    AlreadyBound {
        /// The endpoint ID.
        id: String,
        /// The sandbox currently holding the endpoint.
        sandbox_key: String,
    },

    /// The network cannot host another endpoint.
    #[error("Network [{network}] has no capacity left: {reason}")]
    #[diagnostic(code(sriov::endpoint::capacity))]
    CapacityExceeded {
        /// The network ID.
        network: String,
        /// Why no more endpoints fit.
        reason: String,
    },

    /// The backing device has no enabled virtual functions.
    #[error("Device {device} is not SR-IOV capable")]
    #[diagnostic(
        code(sriov::device::not_capable),
        help("Enable VFs first, e.g. echo 8 > /sys/class/net/<dev>/device/sriov_numvfs")
    )]
    DeviceNotSriovCapable {
        /// The netdevice name.
        device: String,
    },

    /// No RDMA device maps to the netdevice.
    #[error("No RDMA device found for netdevice {netdev}")]
    #[diagnostic(code(sriov::device::rdma_not_found))]
    RdmaDeviceNotFound {
        /// The netdevice name.
        netdev: String,
    },

    /// An `ip` invocation against the host failed.
    #[error("Host command `{command}` failed: {stderr}")]
    #[diagnostic(
        code(sriov::device::command),
        help("Check that iproute2 is installed and the driver runs with CAP_NET_ADMIN")
    )]
    HostCommand {
        /// The command line that was run.
        command: String,
        /// Captured standard error.
        stderr: String,
    },

    /// Invalid network ID format.
    #[error("Invalid network ID: {id}")]
    #[diagnostic(
        code(sriov::network::invalid_id),
        help("Network IDs must be alphanumeric with hyphens and underscores, 1-128 characters")
    )]
    InvalidNetworkId {
        /// The invalid network ID.
        id: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(sriov::io))]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(sriov::serialization))]
    Serialization(String),

    /// The container engine could not be queried.
    #[error("Container engine error: {message}")]
    #[diagnostic(code(sriov::engine))]
    Engine {
        /// The error message.
        message: String,
    },
}

impl SriovError {
    /// Shorthand for [`SriovError::InvalidConfig`].
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for SriovError {
    fn from(err: serde_json::Error) -> Self {
        SriovError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = SriovError::NetworkNotFound {
            id: "abc123".to_string(),
        };
        assert_eq!(err.to_string(), "Plugin can not find network [ abc123 ]");
    }

    #[test]
    fn invalid_config_is_verbatim() {
        let err = SriovError::invalid_config("sriov mode requires netdevice");
        assert_eq!(err.to_string(), "sriov mode requires netdevice");
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: SriovError = io_err.into();
        assert!(matches!(err, SriovError::Io(_)));
    }
}
