//! In-memory process registry.
//!
//! Used for testing and the CLI demo mode. Processes, threads and
//! descriptors can be added and removed at any time to simulate exits
//! racing against namespace calls.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

use super::{
    DescriptorRecord, ProcessRecord, ProcessRegistry, SocketRecord, TaskRecord, ThreadRecord,
};

/// One fake process with everything hanging off it.
#[derive(Debug, Clone)]
struct Entry {
    record: ProcessRecord,
    task: TaskRecord,
    threads: BTreeMap<u64, ThreadRecord>,
    fds: BTreeMap<i32, DescriptorRecord>,
}

/// In-memory process registry.
///
/// Thread-safe via internal `RwLock`. Iteration order is ascending pid,
/// tid and fd.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    procs: RwLock<BTreeMap<i32, Entry>>,
}

impl MemoryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a process. A single main thread whose tid equals
    /// the pid is created with it, as on Linux.
    pub fn insert_process(&self, record: ProcessRecord) {
        let pid = record.pid;
        let main = ThreadRecord::new(pid as u64, record.comm.clone());
        let mut threads = BTreeMap::new();
        threads.insert(main.tid, main);
        let task = TaskRecord {
            thread_count: 1,
            ..TaskRecord::default()
        };
        self.procs.write().insert(
            pid,
            Entry {
                record,
                task,
                threads,
                fds: BTreeMap::new(),
            },
        );
    }

    /// Remove a process. Returns false if it did not exist.
    pub fn remove_process(&self, pid: i32) -> bool {
        self.procs.write().remove(&pid).is_some()
    }

    /// Replace the resource-usage record of a process.
    pub fn set_task(&self, pid: i32, task: TaskRecord) -> bool {
        match self.procs.write().get_mut(&pid) {
            Some(entry) => {
                entry.task = task;
                true
            }
            None => false,
        }
    }

    /// Add a thread. Returns false if the process does not exist.
    pub fn add_thread(&self, pid: i32, thread: ThreadRecord) -> bool {
        match self.procs.write().get_mut(&pid) {
            Some(entry) => {
                entry.threads.insert(thread.tid, thread);
                entry.task.thread_count = entry.threads.len() as i32;
                true
            }
            None => false,
        }
    }

    /// Remove a thread. Returns false if it did not exist.
    pub fn remove_thread(&self, pid: i32, tid: u64) -> bool {
        let mut procs = self.procs.write();
        let Some(entry) = procs.get_mut(&pid) else {
            return false;
        };
        let removed = entry.threads.remove(&tid).is_some();
        entry.task.thread_count = entry.threads.len() as i32;
        removed
    }

    /// Add an open descriptor. Returns false if the process does not exist.
    pub fn add_descriptor(&self, pid: i32, fd: DescriptorRecord) -> bool {
        match self.procs.write().get_mut(&pid) {
            Some(entry) => {
                entry.fds.insert(fd.fd, fd);
                true
            }
            None => false,
        }
    }

    /// Close a descriptor. Returns false if it was not open.
    pub fn remove_descriptor(&self, pid: i32, fd: i32) -> bool {
        match self.procs.write().get_mut(&pid) {
            Some(entry) => entry.fds.remove(&fd).is_some(),
            None => false,
        }
    }

    /// Number of processes.
    pub fn len(&self) -> usize {
        self.procs.read().len()
    }

    /// Returns true if there are no processes.
    pub fn is_empty(&self) -> bool {
        self.procs.read().is_empty()
    }

    /// A small, plausible process table: init, a root daemon, and a user
    /// shell with a worker thread, a tty and a listening socket. The shell
    /// and the daemon's children are owned by `uid`/`gid`.
    pub fn demo(uid: u32, gid: u32) -> Self {
        let reg = Self::new();
        let boot = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);

        reg.insert_process(
            ProcessRecord::new(1, "init")
                .with_parent(0)
                .with_start_time(boot),
        );
        reg.insert_process(
            ProcessRecord::new(112, "sshd")
                .with_start_time(boot + Duration::from_secs(4)),
        );
        reg.add_descriptor(112, DescriptorRecord::file(0, "/dev/null"));
        reg.add_descriptor(
            112,
            DescriptorRecord::socket(
                3,
                SocketRecord {
                    inode: 18_211,
                    family: 2,
                    sock_type: 1,
                    protocol: 6,
                    state: 10,
                    local_port: 22,
                    ..SocketRecord::default()
                },
            ),
        );

        reg.insert_process(
            ProcessRecord::new(4242, "zsh")
                .with_parent(112)
                .with_owner(uid, gid)
                .with_tty("/dev/pts/0")
                .with_start_time(boot + Duration::from_secs(3_600)),
        );
        reg.add_thread(4242, ThreadRecord::new(4243, "zsh-worker"));
        for (fd, path) in [(0, "/dev/pts/0"), (1, "/dev/pts/0"), (2, "/dev/pts/0")] {
            reg.add_descriptor(4242, DescriptorRecord::file(fd, path));
        }
        reg.add_descriptor(
            4242,
            DescriptorRecord::socket(
                5,
                SocketRecord {
                    inode: 77_001,
                    family: 1,
                    sock_type: 1,
                    unix_path: Some("/run/user/agent.sock".to_string()),
                    ..SocketRecord::default()
                },
            ),
        );
        reg.set_task(
            4242,
            TaskRecord {
                virtual_size: 12 << 20,
                resident_size: 4 << 20,
                total_user_ns: 150_000_000,
                total_system_ns: 40_000_000,
                thread_count: 2,
                running_count: 1,
                priority: 20,
                ..TaskRecord::default()
            },
        );
        reg
    }
}

impl ProcessRegistry for MemoryRegistry {
    fn pids(&self) -> Vec<i32> {
        self.procs.read().keys().copied().collect()
    }

    fn process(&self, pid: i32) -> Option<ProcessRecord> {
        self.procs.read().get(&pid).map(|e| e.record.clone())
    }

    fn task(&self, pid: i32) -> Option<TaskRecord> {
        self.procs.read().get(&pid).map(|e| e.task.clone())
    }

    fn thread_ids(&self, pid: i32) -> Option<Vec<u64>> {
        self.procs
            .read()
            .get(&pid)
            .map(|e| e.threads.keys().copied().collect())
    }

    fn thread(&self, pid: i32, tid: u64) -> Option<ThreadRecord> {
        self.procs.read().get(&pid)?.threads.get(&tid).cloned()
    }

    fn descriptors(&self, pid: i32) -> Option<Vec<i32>> {
        self.procs
            .read()
            .get(&pid)
            .map(|e| e.fds.keys().copied().collect())
    }

    fn descriptor(&self, pid: i32, fd: i32) -> Option<DescriptorRecord> {
        self.procs.read().get(&pid)?.fds.get(&fd).cloned()
    }

    fn processes(&self) -> Vec<ProcessRecord> {
        self.procs.read().values().map(|e| e.record.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_lookup() {
        let reg = MemoryRegistry::new();
        reg.insert_process(ProcessRecord::new(10, "a"));
        reg.insert_process(ProcessRecord::new(5, "b"));

        assert_eq!(reg.pids(), vec![5, 10]);
        assert_eq!(reg.process(10).unwrap().comm, "a");
        assert!(reg.process(11).is_none());
        assert_eq!(reg.thread_ids(10), Some(vec![10]));
    }

    #[test]
    fn test_threads_and_descriptors() {
        let reg = MemoryRegistry::new();
        reg.insert_process(ProcessRecord::new(7, "x"));
        assert!(reg.add_thread(7, ThreadRecord::new(9, "w")));
        assert!(!reg.add_thread(8, ThreadRecord::new(9, "w")));
        assert_eq!(reg.thread_ids(7), Some(vec![7, 9]));
        assert_eq!(reg.task(7).unwrap().thread_count, 2);

        reg.add_descriptor(7, DescriptorRecord::file(3, "/tmp/a"));
        reg.add_descriptor(7, DescriptorRecord::file(0, "/dev/null"));
        assert_eq!(reg.descriptors(7), Some(vec![0, 3]));
        assert!(reg.remove_descriptor(7, 3));
        assert_eq!(reg.descriptors(7), Some(vec![0]));
    }

    #[test]
    fn test_remove_process() {
        let reg = MemoryRegistry::new();
        reg.insert_process(ProcessRecord::new(3, "gone"));
        assert!(reg.remove_process(3));
        assert!(!reg.remove_process(3));
        assert!(reg.thread_ids(3).is_none());
        assert!(reg.descriptors(3).is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn test_demo_seed() {
        let reg = MemoryRegistry::demo(501, 20);
        assert_eq!(reg.len(), 3);
        assert_eq!(reg.process(4242).unwrap().uid, 501);
        assert!(reg.descriptor(4242, 5).unwrap().socket.is_some());
    }
}
