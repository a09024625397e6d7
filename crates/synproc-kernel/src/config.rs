//! Mount options.
//!
//! Options come from three places, applied in order: the defaults, an
//! optional TOML file, and the mount helper's `-o` string.
//!
//! ```toml
//! open_permissions = false
//! verbose = true
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::error::{ProcError, ProcResult};

/// Generic mount flags that are accepted and have no effect here.
const IGNORED_FLAGS: &[&str] = &[
    "ro", "nosuid", "suid", "nodev", "dev", "noexec", "exec", "noatime", "atime",
];

/// Per-mount settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountOptions {
    /// Skip per-process access checks: every caller sees every process.
    pub open_permissions: bool,
    /// Log at debug level.
    pub verbose: bool,
}

impl MountOptions {
    /// Parse a comma-separated `-o` string on top of the defaults.
    pub fn parse_opts(opts: &str) -> ProcResult<Self> {
        let mut options = Self::default();
        options.apply_opts(opts)?;
        Ok(options)
    }

    /// Apply a comma-separated `-o` string to these options.
    ///
    /// `procperms` enforces per-process checks, `noprocperms` disables
    /// them; the last one wins. `rw` is refused.
    pub fn apply_opts(&mut self, opts: &str) -> ProcResult<()> {
        for opt in opts.split(',').map(str::trim).filter(|o| !o.is_empty()) {
            match opt {
                "procperms" => self.open_permissions = false,
                "noprocperms" => self.open_permissions = true,
                "verbose" => self.verbose = true,
                "rw" => return Err(ProcError::ReadOnly),
                flag if IGNORED_FLAGS.contains(&flag) => {
                    debug!(flag, "ignoring generic mount flag");
                }
                unknown => {
                    return Err(ProcError::invalid_operation(format!(
                        "unknown mount option: {unknown}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Parse options from TOML text. Missing fields keep their defaults.
    pub fn from_toml_str(text: &str) -> ProcResult<Self> {
        toml::from_str(text).map_err(|e| ProcError::other(format!("mount options: {e}")))
    }

    /// Load options from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> ProcResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let options = Self::from_toml_str(&text)?;
        debug!(path = %path.display(), ?options, "loaded mount options");
        Ok(options)
    }

    /// Render back to a `-o` string.
    pub fn to_opts(&self) -> String {
        let mut parts = vec![if self.open_permissions {
            "noprocperms"
        } else {
            "procperms"
        }];
        if self.verbose {
            parts.push("verbose");
        }
        parts.join(",")
    }
}
