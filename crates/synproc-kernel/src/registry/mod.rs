//! Process, thread and descriptor registries.
//!
//! The namespace never owns process state. Every lookup, listing and read
//! asks a [`ProcessRegistry`] for a fresh snapshot and drops it when the
//! call returns. Two calls may see different worlds. A process listed by
//! one `readdir` may be gone by the next `lookup`.
//!
//! - [`MemoryRegistry`] - in-memory fake for tests and `--demo`
//! - [`HostRegistry`] - reads the live host `/proc` (Linux only)

#[cfg(target_os = "linux")]
mod host;
mod memory;

#[cfg(target_os = "linux")]
pub use host::HostRegistry;
pub use memory::MemoryRegistry;

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Read-only snapshot provider for live process state.
///
/// Implementations must be cheap to call concurrently; the engine calls
/// them without holding any of its own locks. Every method returns `None`
/// for a process (or thread, or descriptor) that does not exist, including
/// one that exited between two calls.
pub trait ProcessRegistry: Send + Sync {
    /// Live process ids, ascending.
    fn pids(&self) -> Vec<i32>;

    /// Identity and session data for one process.
    fn process(&self, pid: i32) -> Option<ProcessRecord>;

    /// Resource usage for one process.
    fn task(&self, pid: i32) -> Option<TaskRecord>;

    /// Thread ids of a process, ascending.
    fn thread_ids(&self, pid: i32) -> Option<Vec<u64>>;

    /// One thread of a process.
    fn thread(&self, pid: i32, tid: u64) -> Option<ThreadRecord>;

    /// Open descriptor numbers of a process, ascending.
    fn descriptors(&self, pid: i32) -> Option<Vec<i32>>;

    /// One open descriptor of a process.
    fn descriptor(&self, pid: i32, fd: i32) -> Option<DescriptorRecord>;

    // ========================================================================
    // Convenience methods (default implementations)
    // ========================================================================

    /// Records for every live process. Processes that exit mid-scan are
    /// skipped.
    fn processes(&self) -> Vec<ProcessRecord> {
        self.pids()
            .into_iter()
            .filter_map(|pid| self.process(pid))
            .collect()
    }

    /// True if `pid` names a live process.
    fn exists(&self, pid: i32) -> bool {
        self.process(pid).is_some()
    }
}

/// Identity, ownership and session data for one process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub pid: i32,
    pub ppid: i32,
    pub pgid: i32,
    pub sid: i32,
    /// Effective user id.
    pub uid: u32,
    /// Effective group id.
    pub gid: u32,
    /// Real user id.
    pub ruid: u32,
    /// Real group id.
    pub rgid: u32,
    /// Short command name.
    pub comm: String,
    /// Controlling terminal path, if the session has one.
    pub tty: Option<String>,
    /// Raw device number of the controlling terminal (0 if none).
    pub tty_dev: u32,
    /// Foreground process group of the controlling terminal.
    pub tpgid: i32,
    pub start_time: SystemTime,
    /// Scheduler state letter (`R`, `S`, `Z`, ...).
    pub state: char,
    pub nice: i32,
    pub flags: u32,
}

impl ProcessRecord {
    /// A process owned by root, in its own group and session, started at
    /// the epoch. Adjust with the `with_*` builders.
    pub fn new(pid: i32, comm: impl Into<String>) -> Self {
        Self {
            pid,
            ppid: 1,
            pgid: pid,
            sid: pid,
            uid: 0,
            gid: 0,
            ruid: 0,
            rgid: 0,
            comm: comm.into(),
            tty: None,
            tty_dev: 0,
            tpgid: -1,
            start_time: SystemTime::UNIX_EPOCH,
            state: 'S',
            nice: 0,
            flags: 0,
        }
    }

    pub fn with_owner(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        self.ruid = uid;
        self.rgid = gid;
        self
    }

    pub fn with_parent(mut self, ppid: i32) -> Self {
        self.ppid = ppid;
        self
    }

    pub fn with_session(mut self, pgid: i32, sid: i32) -> Self {
        self.pgid = pgid;
        self.sid = sid;
        self
    }

    pub fn with_tty(mut self, tty: impl Into<String>) -> Self {
        self.tty = Some(tty.into());
        self
    }

    pub fn with_start_time(mut self, start: SystemTime) -> Self {
        self.start_time = start;
        self
    }
}

/// Resource usage for one process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub virtual_size: u64,
    pub resident_size: u64,
    pub total_user_ns: u64,
    pub total_system_ns: u64,
    pub threads_user_ns: u64,
    pub threads_system_ns: u64,
    pub policy: i32,
    pub faults: i32,
    pub pageins: i32,
    pub cow_faults: i32,
    pub messages_sent: i32,
    pub messages_received: i32,
    pub syscalls_mach: i32,
    pub syscalls_unix: i32,
    pub context_switches: i32,
    pub thread_count: i32,
    pub running_count: i32,
    pub priority: i32,
}

/// One thread of a process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadRecord {
    pub tid: u64,
    pub user_ns: u64,
    pub system_ns: u64,
    /// CPU usage scaled to 0..=1000.
    pub cpu_usage: i32,
    pub policy: i32,
    pub run_state: i32,
    pub flags: i32,
    pub sleep_time: i32,
    pub cur_priority: i32,
    pub priority: i32,
    pub max_priority: i32,
    pub name: String,
}

impl ThreadRecord {
    pub fn new(tid: u64, name: impl Into<String>) -> Self {
        Self {
            tid,
            user_ns: 0,
            system_ns: 0,
            cpu_usage: 0,
            policy: 0,
            run_state: 0,
            flags: 0,
            sleep_time: 0,
            cur_priority: 0,
            priority: 0,
            max_priority: 0,
            name: name.into(),
        }
    }
}

/// What an open descriptor refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum DescriptorKind {
    File,
    Directory,
    Pipe,
    Socket,
    Other,
}

/// One open descriptor of a process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorRecord {
    pub fd: i32,
    pub kind: DescriptorKind,
    /// Target path (or a `socket:[ino]` style tag).
    pub path: String,
    /// Current file offset.
    pub offset: i64,
    /// Open flags (`O_*`).
    pub open_flags: u32,
    /// Present iff `kind` is `Socket`.
    pub socket: Option<SocketRecord>,
}

impl DescriptorRecord {
    pub fn file(fd: i32, path: impl Into<String>) -> Self {
        Self {
            fd,
            kind: DescriptorKind::File,
            path: path.into(),
            offset: 0,
            open_flags: 0,
            socket: None,
        }
    }

    pub fn socket(fd: i32, socket: SocketRecord) -> Self {
        Self {
            fd,
            kind: DescriptorKind::Socket,
            path: format!("socket:[{}]", socket.inode),
            offset: 0,
            open_flags: 0o2, // O_RDWR
            socket: Some(socket),
        }
    }
}

/// Socket details for a descriptor that refers to a socket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketRecord {
    pub inode: u64,
    /// Address family (`AF_INET` = 2, `AF_INET6` = 10, `AF_UNIX` = 1).
    pub family: i32,
    /// `SOCK_STREAM` = 1, `SOCK_DGRAM` = 2.
    pub sock_type: i32,
    pub protocol: i32,
    pub state: i32,
    /// Raw address bytes, network order, zero-padded.
    pub local_addr: [u8; 16],
    pub remote_addr: [u8; 16],
    pub local_port: u16,
    pub remote_port: u16,
    /// Bound path for unix sockets.
    pub unix_path: Option<String>,
}
