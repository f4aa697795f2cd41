//! Best-effort host operations.
//!
//! Older kernels reject VF trust and spoof-check settings. Those two calls are
//! the only ones whose failure is tolerated; the outcome is still reported so
//! callers and tests can see what was skipped.

use sriov_common::{SriovError, SriovResult};

use super::HostDevices;

/// Result of an operation whose failure is tolerated.
#[derive(Debug)]
pub enum Tolerance {
    /// The host accepted the change.
    Applied,
    /// The host rejected the change and the error was swallowed.
    Tolerated(SriovError),
}

impl Tolerance {
    /// Log and swallow a failure of `operation`.
    pub fn tolerate(operation: &'static str, result: SriovResult<()>) -> Self {
        match result {
            Ok(()) => Self::Applied,
            Err(err) => {
                tracing::warn!(operation, error = %err, "Ignoring unsupported VF setting");
                Self::Tolerated(err)
            }
        }
    }

    /// Whether the host accepted the change.
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Outcome of [`apply_privilege`].
#[derive(Debug)]
pub struct PrivilegeOutcome {
    /// Trust flag update.
    pub trust: Tolerance,
    /// Spoof-check update.
    pub spoof_check: Tolerance,
}

/// Set trust and spoof-check for a VF from the network's privileged flag.
///
/// Privileged VFs are trusted with spoof-check off; unprivileged ones are
/// untrusted with spoof-check on.
pub fn apply_privilege(
    devices: &dyn HostDevices,
    pf: &str,
    vf: u32,
    privileged: bool,
) -> PrivilegeOutcome {
    PrivilegeOutcome {
        trust: Tolerance::tolerate("vf trust", devices.set_vf_trust(pf, vf, privileged)),
        spoof_check: Tolerance::tolerate(
            "vf spoofchk",
            devices.set_vf_spoof_check(pf, vf, !privileged),
        ),
    }
}
