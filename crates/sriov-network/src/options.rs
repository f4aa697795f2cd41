//! Network creation options.
//!
//! The container engine hands options over as a loosely typed blob. Parsing is
//! done in two stages: [`parse_generic_options`] flattens whatever arrives into
//! a string map, and [`NetworkConfig::from_options`] validates that map into a
//! typed configuration before any variant or host call sees it.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sriov_common::{SriovError, SriovResult};

/// Key under which the engine nests driver options (`docker network create -o`).
pub const GENERIC_DATA_KEY: &str = "com.docker.network.generic";

/// Container-side interface prefix used when none is configured.
pub const DEFAULT_PREFIX: &str = "eth";

/// Highest usable 802.1Q VLAN ID.
pub const MAX_VLAN: u16 = 4094;

/// Normalized option mapping.
pub type OptionMap = BTreeMap<String, String>;

/// Recognized option keys.
pub mod keys {
    /// Operating mode, `passthrough` or `sriov`.
    pub const MODE: &str = "mode";
    /// Backing netdevice.
    pub const NETDEVICE: &str = "netdevice";
    /// Container-side interface name prefix.
    pub const PREFIX: &str = "prefix";
    /// VLAN tag applied to every VF.
    pub const VLAN: &str = "vlan";
    /// Trusted VFs with spoof-check disabled.
    pub const PRIVILEGED: &str = "privileged";
    /// RoCE hop limit written to the RDMA device of each VF.
    pub const ROCE_HOP_LIMIT: &str = "rocehoplimit";
}

/// How a network maps onto host devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    /// The whole netdevice is handed to one container.
    Passthrough,
    /// Containers receive virtual functions of the netdevice.
    #[default]
    Sriov,
}

impl NetworkMode {
    /// Option value for this mode.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passthrough => "passthrough",
            Self::Sriov => "sriov",
        }
    }
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkMode {
    type Err = SriovError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "passthrough" => Ok(Self::Passthrough),
            "sriov" => Ok(Self::Sriov),
            _ => Err(SriovError::invalid_config(
                "valid modes are: passthrough and sriov",
            )),
        }
    }
}

/// Validated network configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Operating mode.
    pub mode: NetworkMode,
    /// Backing netdevice name.
    pub netdevice: String,
    /// Container-side interface prefix.
    pub prefix: String,
    /// VLAN tag, 0 for untagged.
    pub vlan: u16,
    /// Trust VFs and disable spoof-check.
    pub privileged: bool,
    /// RoCE hop limit, applied when the VF has an RDMA device.
    pub roce_hop_limit: Option<u8>,
}

impl NetworkConfig {
    /// Validate a normalized option map.
    ///
    /// # Errors
    ///
    /// Returns [`SriovError::InvalidConfig`] for an unknown mode, a missing
    /// netdevice or a malformed VLAN, privileged or hop-limit value.
    pub fn from_options(options: &OptionMap) -> SriovResult<Self> {
        let mode = match non_empty(options, keys::MODE) {
            Some(mode) => mode.parse()?,
            None => NetworkMode::default(),
        };

        let Some(netdevice) = non_empty(options, keys::NETDEVICE) else {
            return Err(SriovError::invalid_config(format!(
                "{mode} mode requires netdevice"
            )));
        };

        let prefix = non_empty(options, keys::PREFIX).unwrap_or(DEFAULT_PREFIX);

        let vlan = match non_empty(options, keys::VLAN) {
            Some(raw) => parse_vlan(raw)?,
            None => 0,
        };

        let privileged = match non_empty(options, keys::PRIVILEGED) {
            Some(raw) => parse_bool(keys::PRIVILEGED, raw)?,
            None => false,
        };

        let roce_hop_limit = non_empty(options, keys::ROCE_HOP_LIMIT)
            .map(parse_hop_limit)
            .transpose()?;

        Ok(Self {
            mode,
            netdevice: netdevice.to_string(),
            prefix: prefix.to_string(),
            vlan,
            privileged,
            roce_hop_limit,
        })
    }

    /// Render back into an option map, e.g. to merge with another source.
    #[must_use]
    pub fn to_options(&self) -> OptionMap {
        let mut options = OptionMap::new();
        options.insert(keys::MODE.into(), self.mode.to_string());
        options.insert(keys::NETDEVICE.into(), self.netdevice.clone());
        options.insert(keys::PREFIX.into(), self.prefix.clone());
        options.insert(keys::VLAN.into(), self.vlan.to_string());
        options.insert(keys::PRIVILEGED.into(), self.privileged.to_string());
        if let Some(hop_limit) = self.roce_hop_limit {
            options.insert(keys::ROCE_HOP_LIMIT.into(), hop_limit.to_string());
        }
        options
    }
}

/// Pull the driver's generic options out of a `CreateNetwork` options mapping.
///
/// # Errors
///
/// Returns [`SriovError::InvalidConfig`] when the generic-data key is missing
/// or null.
pub fn generic_options(request_options: &Value) -> SriovResult<&Value> {
    match request_options.get(GENERIC_DATA_KEY) {
        Some(data) if !data.is_null() => Ok(data),
        _ => Err(SriovError::invalid_config("invalid options")),
    }
}

/// Flatten an untyped options blob into a string map.
///
/// Anything other than a JSON object is logged and treated as empty.
#[must_use]
pub fn parse_generic_options(data: &Value) -> OptionMap {
    match data {
        Value::Object(map) => {
            let options: OptionMap = map
                .iter()
                .map(|(key, value)| (key.clone(), value_to_string(value)))
                .collect();
            tracing::debug!(?options, "Parsed generic network options");
            options
        }
        Value::Null => OptionMap::new(),
        other => {
            tracing::warn!(
                kind = value_kind(other),
                "unrecognized network config format"
            );
            OptionMap::new()
        }
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn non_empty<'a>(options: &'a OptionMap, key: &str) -> Option<&'a str> {
    options
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

fn parse_vlan(raw: &str) -> SriovResult<u16> {
    match raw.parse::<u16>() {
        Ok(vlan) if vlan <= MAX_VLAN => Ok(vlan),
        _ => Err(SriovError::invalid_config(format!(
            "invalid vlan {raw}: must be between 0 and {MAX_VLAN}"
        ))),
    }
}

fn parse_bool(key: &str, raw: &str) -> SriovResult<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(SriovError::invalid_config(format!(
            "invalid {key} value {raw}: expected true or false"
        ))),
    }
}

fn parse_hop_limit(raw: &str) -> SriovResult<u8> {
    match raw.parse::<u8>() {
        Ok(hop_limit) if hop_limit > 0 => Ok(hop_limit),
        _ => Err(SriovError::invalid_config(format!(
            "invalid {} {raw}: must be between 1 and 255",
            keys::ROCE_HOP_LIMIT
        ))),
    }
}
