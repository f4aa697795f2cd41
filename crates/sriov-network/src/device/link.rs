//! VF settings applied through `ip link`.

use std::process::Command;

use sriov_common::{SriovError, SriovResult};

/// Runs `ip link set <pf> vf <n> ...` against the host.
#[derive(Debug, Clone)]
pub struct IpLink {
    program: String,
}

impl Default for IpLink {
    fn default() -> Self {
        Self {
            program: "ip".to_string(),
        }
    }
}

impl IpLink {
    /// Use a specific `ip` binary.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Arguments for a VF setting, without the program name.
    pub(crate) fn vf_args(pf: &str, vf: u32, setting: &[&str]) -> Vec<String> {
        let mut args: Vec<String> = ["link", "set", pf, "vf"]
            .iter()
            .map(ToString::to_string)
            .collect();
        args.push(vf.to_string());
        args.extend(setting.iter().map(ToString::to_string));
        args
    }

    /// Apply one VF setting, e.g. `["vlan", "100"]`.
    pub fn set_vf(&self, pf: &str, vf: u32, setting: &[&str]) -> SriovResult<()> {
        let args = Self::vf_args(pf, vf, setting);
        let command = format!("{} {}", self.program, args.join(" "));
        tracing::debug!(%command, "Configuring VF");

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|e| SriovError::HostCommand {
                command: command.clone(),
                stderr: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(SriovError::HostCommand {
                command,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }
}

/// `on`/`off` keyword used by `ip link` for boolean VF flags.
pub(crate) fn on_off(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}
