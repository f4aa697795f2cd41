//! Persisted network configuration.
//!
//! Layout, one directory per network:
//!
//! ```text
//! <config-root>/
//!     <network-id>/
//!         config.json
//! ```

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sriov_common::paths::NETWORK_RECORD_FILE;
use sriov_common::{NetworkId, SriovResult};

use crate::options::{NetworkConfig, NetworkMode, OptionMap};

/// Current record format version.
pub const RECORD_VERSION: u32 = 1;

/// Durable copy of a network's creation options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRecord {
    /// Record format version.
    #[serde(rename = "Version")]
    pub version: u32,
    /// Backing netdevice.
    #[serde(rename = "Netdevice")]
    pub netdevice: String,
    /// Operating mode.
    #[serde(rename = "Mode")]
    pub mode: NetworkMode,
    /// IPv4 gateway as supplied by the engine.
    #[serde(rename = "Gateway")]
    pub gateway: String,
    /// VLAN tag.
    #[serde(rename = "vlan")]
    pub vlan: u16,
    /// Privileged VFs.
    #[serde(rename = "Privileged")]
    pub privileged: bool,
    /// Container-side interface prefix.
    #[serde(rename = "Prefix")]
    pub prefix: String,
    /// RoCE hop limit.
    #[serde(
        rename = "RoceHopLimit",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub roce_hop_limit: Option<u8>,
}

impl NetworkRecord {
    /// Build a record from a validated configuration.
    #[must_use]
    pub fn new(config: &NetworkConfig, gateway: &str) -> Self {
        Self {
            version: RECORD_VERSION,
            netdevice: config.netdevice.clone(),
            mode: config.mode,
            gateway: gateway.to_string(),
            vlan: config.vlan,
            privileged: config.privileged,
            prefix: config.prefix.clone(),
            roce_hop_limit: config.roce_hop_limit,
        }
    }

    /// The configuration this record was written from.
    #[must_use]
    pub fn config(&self) -> NetworkConfig {
        NetworkConfig {
            mode: self.mode,
            netdevice: self.netdevice.clone(),
            prefix: self.prefix.clone(),
            vlan: self.vlan,
            privileged: self.privileged,
            roce_hop_limit: self.roce_hop_limit,
        }
    }

    /// The record as an option map, in the same shape the engine sends.
    #[must_use]
    pub fn to_options(&self) -> OptionMap {
        self.config().to_options()
    }
}

/// File-backed store of [`NetworkRecord`]s.
#[derive(Debug, Clone)]
pub struct NetworkStore {
    root: PathBuf,
}

impl NetworkStore {
    /// Create a store rooted at `root`. Nothing is touched until the first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The configuration root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, id: &NetworkId) -> PathBuf {
        self.root.join(id.as_str()).join(NETWORK_RECORD_FILE)
    }

    /// Persist a network's record, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn write(&self, id: &NetworkId, record: &NetworkRecord) -> SriovResult<()> {
        let path = self.record_path(id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(record)?;
        std::fs::write(&path, json)?;

        tracing::debug!(
            network_id = %id.short(),
            path = %path.display(),
            "Saved network record"
        );
        Ok(())
    }

    /// Load a network's record; `None` when it was never written.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or decoded.
    pub fn read(&self, id: &NetworkId) -> SriovResult<Option<NetworkRecord>> {
        let path = self.record_path(id);

        let json = match std::fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record = serde_json::from_str(&json)?;

        tracing::debug!(
            network_id = %id.short(),
            path = %path.display(),
            "Loaded network record"
        );
        Ok(Some(record))
    }

    /// Remove a network's directory. Succeeds if it is already gone.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be removed.
    pub fn delete(&self, id: &NetworkId) -> SriovResult<()> {
        let dir = self.root.join(id.as_str());

        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {
                tracing::debug!(
                    network_id = %id.short(),
                    path = %dir.display(),
                    "Deleted network record"
                );
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Load every persisted network.
    ///
    /// Directories without a record and entries that are not valid network
    /// IDs are skipped. A record that fails to decode aborts the scan.
    ///
    /// # Errors
    ///
    /// Returns the first read or decode error encountered.
    pub fn read_all(&self) -> SriovResult<BTreeMap<NetworkId, NetworkRecord>> {
        let mut records = BTreeMap::new();

        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| NetworkId::new(name).ok())
            else {
                tracing::debug!(entry = ?entry.file_name(), "Skipping foreign entry in config root");
                continue;
            };

            if let Some(record) = self.read(&id)? {
                records.insert(id, record);
            }
        }

        Ok(records)
    }
}
