//! Per-process visibility.
//!
//! Outside open-permissions mode an unprivileged caller only sees the
//! processes it shares a user or group with. Hidden processes are not
//! denied, they are absent: lookups return `NotFound` and listings skip
//! them.

use synproc_types::Credential;

use crate::config::MountOptions;
use crate::registry::ProcessRecord;

/// True if `cred` may see `process`: the caller's effective uid matches the
/// process's effective or real uid, or likewise for the gid.
pub fn can_access(cred: &Credential, process: &ProcessRecord) -> bool {
    cred.uid == process.uid
        || cred.uid == process.ruid
        || cred.gid == process.gid
        || cred.gid == process.rgid
}

/// Mount-wide access mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessPolicy {
    /// Everyone sees every process (`noprocperms`).
    pub open_permissions: bool,
}

impl AccessPolicy {
    pub fn from_options(options: &MountOptions) -> Self {
        Self {
            open_permissions: options.open_permissions,
        }
    }

    /// Whether per-process checks apply to this caller at all.
    pub fn applies_to(&self, cred: &Credential) -> bool {
        !self.open_permissions && !cred.is_privileged()
    }

    /// Whether `cred` may see `process` under this policy.
    pub fn permits(&self, cred: &Credential, process: &ProcessRecord) -> bool {
        !self.applies_to(cred) || can_access(cred, process)
    }

    /// Mask applied to process-linked permission bits.
    pub fn mode_mask(&self) -> u32 {
        if self.open_permissions { 0o755 } else { 0o770 }
    }
}
