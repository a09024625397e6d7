//! Typed identifiers for mounts, schema positions, and live namespace nodes.
//!
//! `MountId` and `BaseNodeId` are small integer newtypes. They stay `Copy`
//! and print as bare numbers so they read naturally in logs. `NodeIdentity`
//! is the composite cache key: two identities are equal iff all four fields
//! match.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A mount instance identifier.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MountId(u32);

/// A schema base identifier, unique per schema node.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BaseNodeId(u16);

// ── Shared behavior ─────────────────────────────────────────────────────────

macro_rules! impl_small_id {
    ($T:ident, $raw:ty, $name:literal) => {
        impl $T {
            /// Wrap a raw value.
            pub const fn from_raw(raw: $raw) -> Self {
                Self(raw)
            }

            /// The raw value.
            pub const fn get(self) -> $raw {
                self.0
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $name, self.0)
            }
        }

        impl From<$raw> for $T {
            fn from(raw: $raw) -> Self {
                Self(raw)
            }
        }
    };
}

impl_small_id!(MountId, u32, "MountId");
impl_small_id!(BaseNodeId, u16, "BaseNodeId");

static NEXT_MOUNT_ID: AtomicU32 = AtomicU32::new(1);

impl MountId {
    /// Allocate the next process-wide mount id. Ids start at 1 and are never reused.
    pub fn next() -> Self {
        Self(NEXT_MOUNT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl BaseNodeId {
    /// The root node's base id. Every schema starts numbering here.
    pub const ROOT: BaseNodeId = BaseNodeId(1);
}

/// Composite key naming one live node within one mount instance.
///
/// `pid` is set for everything at or below a per-process directory.
/// `object` is a thread id (below `threads/<tid>`) or a descriptor
/// number (below `fd/<n>`).
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub mount: MountId,
    pub pid: Option<i32>,
    pub object: Option<u64>,
    pub base: BaseNodeId,
}

impl NodeIdentity {
    /// An identity with no owning process or object.
    pub fn new(mount: MountId, base: BaseNodeId) -> Self {
        Self {
            mount,
            pid: None,
            object: None,
            base,
        }
    }

    /// The root directory of `mount`.
    pub fn root(mount: MountId) -> Self {
        Self::new(mount, BaseNodeId::ROOT)
    }

    pub fn with_pid(mut self, pid: Option<i32>) -> Self {
        self.pid = pid;
        self
    }

    pub fn with_object(mut self, object: Option<u64>) -> Self {
        self.object = object;
        self
    }

    /// Same owner fields, different schema position.
    pub fn rebased(self, base: BaseNodeId) -> Self {
        Self { base, ..self }
    }

    /// Host-visible file number: `base | pid << 8 | object << 24`.
    ///
    /// Absent owner fields contribute zero. High bits of large objects are
    /// truncated, so this is a hint for `ls -i`, not a key.
    pub fn file_id(&self) -> u64 {
        let pid = self.pid.map(|p| p as u32 as u64).unwrap_or(0);
        let object = self.object.unwrap_or(0);
        u64::from(self.base.get()) | (pid << 8) | (object << 24)
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.mount)?;
        match self.pid {
            Some(pid) => write!(f, "{pid}:")?,
            None => f.write_str("-:")?,
        }
        match self.object {
            Some(obj) => write!(f, "{obj}:")?,
            None => f.write_str("-:")?,
        }
        write!(f, "{}", self.base)
    }
}

/// Error parsing the `mount:pid:object:base` display form.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid node identity {input:?}: {reason}")]
pub struct ParseIdentityError {
    pub input: String,
    pub reason: &'static str,
}

impl FromStr for NodeIdentity {
    type Err = ParseIdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason| ParseIdentityError {
            input: s.to_string(),
            reason,
        };
        let parts: Vec<&str> = s.split(':').collect();
        let [mount, pid, object, base] = parts.as_slice() else {
            return Err(err("expected four ':'-separated fields"));
        };
        let mount = mount.parse::<u32>().map_err(|_| err("bad mount id"))?;
        let pid = match *pid {
            "-" => None,
            p => Some(p.parse::<i32>().map_err(|_| err("bad pid"))?),
        };
        let object = match *object {
            "-" => None,
            o => Some(o.parse::<u64>().map_err(|_| err("bad object id"))?),
        };
        let base = base.parse::<u16>().map_err(|_| err("bad base id"))?;
        Ok(Self {
            mount: MountId(mount),
            pid,
            object,
            base: BaseNodeId(base),
        })
    }
}
