//! Caller credentials.
//!
//! A `Credential` travels with every lookup, listing, and attribute request.
//! Access checks compare its effective ids against the target process's
//! effective and real ids.

use serde::{Deserialize, Serialize};

/// Identity of the caller making a namespace request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Credential {
    /// Calling process id (what `curproc` points at).
    pub pid: i32,
    /// Effective user id.
    pub uid: u32,
    /// Effective group id.
    pub gid: u32,
    /// Real user id.
    pub ruid: u32,
    /// Real group id.
    pub rgid: u32,
}

impl Credential {
    /// A credential whose real and effective ids agree.
    pub fn new(pid: i32, uid: u32, gid: u32) -> Self {
        Self {
            pid,
            uid,
            gid,
            ruid: uid,
            rgid: gid,
        }
    }

    /// Superuser credential for `pid`.
    pub fn root(pid: i32) -> Self {
        Self::new(pid, 0, 0)
    }

    /// True for the superuser, which bypasses per-process access checks.
    pub fn is_privileged(&self) -> bool {
        self.uid == 0
    }

    /// Credential of the calling process.
    #[cfg(unix)]
    pub fn current() -> Self {
        use rustix::process;

        Self {
            pid: process::getpid().as_raw_nonzero().get(),
            uid: process::geteuid().as_raw(),
            gid: process::getegid().as_raw(),
            ruid: process::getuid().as_raw(),
            rgid: process::getgid().as_raw(),
        }
    }
}
