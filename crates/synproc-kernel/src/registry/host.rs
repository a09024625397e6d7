//! Registry backed by the host's Linux `/proc`.
//!
//! Every call reads the relevant files afresh. A process can exit between
//! any two reads, so a failed read means "absent": it is logged and turned
//! into `None`, never into an error.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, trace, warn};

use super::{
    DescriptorKind, DescriptorRecord, ProcessRecord, ProcessRegistry, SocketRecord, TaskRecord,
    ThreadRecord,
};
use crate::error::ProcResult;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Reads process state from a procfs tree.
#[derive(Debug, Clone)]
pub struct HostRegistry {
    root: PathBuf,
    ticks_per_sec: u64,
    page_size: u64,
    boot_time: SystemTime,
}

impl HostRegistry {
    /// Registry over the live `/proc`.
    pub fn new() -> ProcResult<Self> {
        Self::with_root("/proc")
    }

    /// Registry over a procfs tree rooted at `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> ProcResult<Self> {
        let root = root.into();
        let stat = fs::read_to_string(root.join("stat"))?;
        let boot_time = stat
            .lines()
            .find_map(|l| l.strip_prefix("btime "))
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(|secs| UNIX_EPOCH + Duration::from_secs(secs))
            .unwrap_or(UNIX_EPOCH);
        let registry = Self {
            root,
            ticks_per_sec: rustix::param::clock_ticks_per_second().max(1),
            page_size: rustix::param::page_size() as u64,
            boot_time,
        };
        debug!(root = %registry.root.display(), ticks = registry.ticks_per_sec, "host registry ready");
        Ok(registry)
    }

    fn pid_dir(&self, pid: i32) -> PathBuf {
        self.root.join(pid.to_string())
    }

    fn ticks_to_ns(&self, ticks: u64) -> u64 {
        let whole = ticks / self.ticks_per_sec;
        let frac = ticks % self.ticks_per_sec;
        whole
            .saturating_mul(NANOS_PER_SEC)
            .saturating_add(frac * NANOS_PER_SEC / self.ticks_per_sec)
    }

    fn read_stat(&self, path: &Path) -> Option<Stat> {
        let text = read_text(path)?;
        let stat = Stat::parse(&text);
        if stat.is_none() {
            warn!(path = %path.display(), "unparseable stat line");
        }
        stat
    }

    fn socket(&self, pid: i32, inode: u64) -> SocketRecord {
        let net = self.pid_dir(pid).join("net");
        let net = if net.is_dir() { net } else { self.root.join("net") };
        for (table, family, sock_type, protocol) in [
            ("tcp", 2, 1, 6),
            ("tcp6", 10, 1, 6),
            ("udp", 2, 2, 17),
            ("udp6", 10, 2, 17),
        ] {
            if let Some(text) = read_text(&net.join(table))
                && let Some(sock) = find_inet_socket(&text, inode, family, sock_type, protocol)
            {
                return sock;
            }
        }
        if let Some(text) = read_text(&net.join("unix"))
            && let Some(sock) = find_unix_socket(&text, inode)
        {
            return sock;
        }
        trace!(pid, inode, "socket not in any net table");
        SocketRecord {
            inode,
            ..SocketRecord::default()
        }
    }
}

impl ProcessRegistry for HostRegistry {
    fn pids(&self) -> Vec<i32> {
        numeric_entries::<i32>(&self.root)
            .into_iter()
            .filter(|&pid| pid > 0)
            .collect()
    }

    fn process(&self, pid: i32) -> Option<ProcessRecord> {
        let dir = self.pid_dir(pid);
        let stat = self.read_stat(&dir.join("stat"))?;
        let status = Status::parse(&read_text(&dir.join("status"))?);
        Some(ProcessRecord {
            pid,
            ppid: stat.ppid,
            pgid: stat.pgrp,
            sid: stat.session,
            uid: status.uid[1],
            gid: status.gid[1],
            ruid: status.uid[0],
            rgid: status.gid[0],
            tty: tty_path(stat.tty_nr),
            tty_dev: stat.tty_nr,
            tpgid: stat.tpgid,
            start_time: self.boot_time
                + Duration::from_nanos(self.ticks_to_ns(stat.start_ticks)),
            state: stat.state,
            nice: stat.nice,
            flags: stat.flags,
            comm: stat.comm,
        })
    }

    fn task(&self, pid: i32) -> Option<TaskRecord> {
        let dir = self.pid_dir(pid);
        let stat = self.read_stat(&dir.join("stat"))?;
        let status = Status::parse(&read_text(&dir.join("status"))?);
        let statm = read_text(&dir.join("statm")).unwrap_or_default();
        let mut pages = statm.split_whitespace().map(|v| v.parse::<u64>().unwrap_or(0));
        let virtual_pages = pages.next().unwrap_or(0);
        let resident_pages = pages.next().unwrap_or(0);

        let threads = self.thread_ids(pid).unwrap_or_default();
        let running = threads
            .iter()
            .filter_map(|tid| self.thread(pid, *tid))
            .filter(|t| t.run_state == RUN_STATE_RUNNING)
            .count();

        let user = self.ticks_to_ns(stat.utime);
        let system = self.ticks_to_ns(stat.stime);
        Some(TaskRecord {
            virtual_size: virtual_pages * self.page_size,
            resident_size: resident_pages * self.page_size,
            total_user_ns: user,
            total_system_ns: system,
            threads_user_ns: user,
            threads_system_ns: system,
            policy: stat.policy,
            faults: clamp_i32(stat.minflt + stat.majflt),
            pageins: clamp_i32(stat.majflt),
            cow_faults: 0,
            messages_sent: 0,
            messages_received: 0,
            syscalls_mach: 0,
            syscalls_unix: 0,
            context_switches: clamp_i32(status.voluntary_switches + status.involuntary_switches),
            thread_count: stat.num_threads,
            running_count: running as i32,
            priority: stat.priority,
        })
    }

    fn thread_ids(&self, pid: i32) -> Option<Vec<u64>> {
        let dir = self.pid_dir(pid).join("task");
        if !dir.is_dir() {
            return None;
        }
        Some(numeric_entries(&dir))
    }

    fn thread(&self, pid: i32, tid: u64) -> Option<ThreadRecord> {
        let path = self.pid_dir(pid).join("task").join(tid.to_string()).join("stat");
        let stat = self.read_stat(&path)?;
        Some(ThreadRecord {
            tid,
            user_ns: self.ticks_to_ns(stat.utime),
            system_ns: self.ticks_to_ns(stat.stime),
            cpu_usage: 0,
            policy: stat.policy,
            run_state: run_state(stat.state),
            flags: stat.flags as i32,
            sleep_time: 0,
            cur_priority: stat.priority,
            priority: stat.priority - stat.nice,
            max_priority: stat.priority,
            name: stat.comm,
        })
    }

    fn descriptors(&self, pid: i32) -> Option<Vec<i32>> {
        let dir = self.pid_dir(pid).join("fd");
        if !dir.is_dir() {
            return None;
        }
        Some(numeric_entries(&dir))
    }

    fn descriptor(&self, pid: i32, fd: i32) -> Option<DescriptorRecord> {
        let dir = self.pid_dir(pid);
        let link = dir.join("fd").join(fd.to_string());
        let target = match fs::read_link(&link) {
            Ok(t) => t.to_string_lossy().into_owned(),
            Err(e) => {
                log_read_error(&link, &e);
                return None;
            }
        };

        let info = read_text(&dir.join("fdinfo").join(fd.to_string())).unwrap_or_default();
        let mut offset = 0i64;
        let mut open_flags = 0u32;
        for line in info.lines() {
            if let Some(v) = line.strip_prefix("pos:") {
                offset = v.trim().parse().unwrap_or(0);
            } else if let Some(v) = line.strip_prefix("flags:") {
                open_flags = u32::from_str_radix(v.trim(), 8).unwrap_or(0);
            }
        }

        let (kind, socket) = if let Some(inode) = bracketed(&target, "socket:") {
            (DescriptorKind::Socket, Some(self.socket(pid, inode)))
        } else if target.starts_with("pipe:") {
            (DescriptorKind::Pipe, None)
        } else if target.starts_with('/') {
            match fs::metadata(&link) {
                Ok(m) if m.is_dir() => (DescriptorKind::Directory, None),
                _ => (DescriptorKind::File, None),
            }
        } else {
            (DescriptorKind::Other, None)
        };

        Some(DescriptorRecord {
            fd,
            kind,
            path: target,
            offset,
            open_flags,
            socket,
        })
    }
}

// ============================================================================
// Parsing
// ============================================================================

const RUN_STATE_RUNNING: i32 = 1;

fn run_state(state: char) -> i32 {
    match state {
        'R' => RUN_STATE_RUNNING,
        'T' | 't' => 2,
        'S' | 'I' => 3,
        'D' => 4,
        'Z' | 'X' => 5,
        _ => 0,
    }
}

fn clamp_i32(v: u64) -> i32 {
    i32::try_from(v).unwrap_or(i32::MAX)
}

fn read_text(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(text) => Some(text),
        Err(e) => {
            log_read_error(path, &e);
            None
        }
    }
}

fn log_read_error(path: &Path, e: &io::Error) {
    // ENOENT and ESRCH just mean the process went away.
    if e.kind() == io::ErrorKind::NotFound || e.raw_os_error() == Some(3) {
        trace!(path = %path.display(), "vanished");
    } else {
        warn!(path = %path.display(), error = %e, "read failed, treating as absent");
    }
}

/// Names of `dir` that parse as numbers, ascending.
fn numeric_entries<T: std::str::FromStr + Ord>(dir: &Path) -> Vec<T> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut out: Vec<T> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().to_str().and_then(|n| n.parse().ok()))
        .collect();
    out.sort();
    out
}

/// `socket:[1234]` style link targets.
fn bracketed(target: &str, prefix: &str) -> Option<u64> {
    target
        .strip_prefix(prefix)?
        .strip_prefix('[')?
        .strip_suffix(']')?
        .parse()
        .ok()
}

/// Device path for a `tty_nr` value.
fn tty_path(tty_nr: u32) -> Option<String> {
    if tty_nr == 0 {
        return None;
    }
    let major = (tty_nr >> 8) & 0xfff;
    let minor = (tty_nr & 0xff) | ((tty_nr >> 12) & 0xfff00);
    Some(match major {
        136..=143 => format!("/dev/pts/{}", minor + (major - 136) * 256),
        4 if minor < 64 => format!("/dev/tty{minor}"),
        4 => format!("/dev/ttyS{}", minor - 64),
        5 if minor == 0 => "/dev/tty".to_string(),
        5 if minor == 1 => "/dev/console".to_string(),
        _ => format!("/dev/char/{major}:{minor}"),
    })
}

/// The fields of `/proc/<pid>/stat` this registry uses.
#[derive(Debug, Default, PartialEq)]
struct Stat {
    comm: String,
    state: char,
    ppid: i32,
    pgrp: i32,
    session: i32,
    tty_nr: u32,
    tpgid: i32,
    flags: u32,
    minflt: u64,
    majflt: u64,
    utime: u64,
    stime: u64,
    priority: i32,
    nice: i32,
    num_threads: i32,
    start_ticks: u64,
    policy: i32,
}

impl Stat {
    /// The command name sits in parentheses and may itself contain spaces
    /// or parentheses, so split at the last `)`.
    fn parse(line: &str) -> Option<Stat> {
        let open = line.find('(')?;
        let close = line.rfind(')')?;
        let comm = line.get(open + 1..close)?.to_string();
        let rest: Vec<&str> = line.get(close + 1..)?.split_whitespace().collect();
        let field = |i: usize| rest.get(i).copied().unwrap_or("0");
        let num = |i: usize| field(i).parse::<i64>().unwrap_or(0);
        Some(Stat {
            comm,
            state: field(0).chars().next()?,
            ppid: num(1) as i32,
            pgrp: num(2) as i32,
            session: num(3) as i32,
            tty_nr: num(4) as u32,
            tpgid: num(5) as i32,
            flags: num(6) as u32,
            minflt: num(7).max(0) as u64,
            majflt: num(9).max(0) as u64,
            utime: num(11).max(0) as u64,
            stime: num(12).max(0) as u64,
            priority: num(15) as i32,
            nice: num(16) as i32,
            num_threads: num(17) as i32,
            start_ticks: num(19).max(0) as u64,
            policy: num(38) as i32,
        })
    }
}

/// The fields of `/proc/<pid>/status` this registry uses.
#[derive(Debug, Default)]
struct Status {
    /// real, effective, saved, filesystem
    uid: [u32; 4],
    gid: [u32; 4],
    voluntary_switches: u64,
    involuntary_switches: u64,
}

impl Status {
    fn parse(text: &str) -> Status {
        let mut s = Status::default();
        for line in text.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            match key {
                "Uid" => s.uid = id_quad(value),
                "Gid" => s.gid = id_quad(value),
                "voluntary_ctxt_switches" => s.voluntary_switches = value.trim().parse().unwrap_or(0),
                "nonvoluntary_ctxt_switches" => {
                    s.involuntary_switches = value.trim().parse().unwrap_or(0)
                }
                _ => {}
            }
        }
        s
    }
}

fn id_quad(value: &str) -> [u32; 4] {
    let mut ids = [0u32; 4];
    for (slot, v) in ids.iter_mut().zip(value.split_whitespace()) {
        *slot = v.parse().unwrap_or(0);
    }
    ids
}

/// Raw address bytes for a hex address column. The kernel prints each
/// 32-bit word in host byte order.
fn hex_addr(hex: &str) -> [u8; 16] {
    let mut out = [0u8; 16];
    for (i, chunk) in hex.as_bytes().chunks(8).take(4).enumerate() {
        let word = std::str::from_utf8(chunk)
            .ok()
            .and_then(|s| u32::from_str_radix(s, 16).ok())
            .unwrap_or(0);
        out[i * 4..i * 4 + 4].copy_from_slice(&word.to_ne_bytes());
    }
    out
}

fn split_endpoint(col: &str) -> ([u8; 16], u16) {
    let (addr, port) = col.split_once(':').unwrap_or((col, "0"));
    (hex_addr(addr), u16::from_str_radix(port, 16).unwrap_or(0))
}

fn find_inet_socket(
    table: &str,
    inode: u64,
    family: i32,
    sock_type: i32,
    protocol: i32,
) -> Option<SocketRecord> {
    table.lines().skip(1).find_map(|line| {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.get(9)?.parse::<u64>().ok()? != inode {
            return None;
        }
        let (local_addr, local_port) = split_endpoint(cols.get(1)?);
        let (remote_addr, remote_port) = split_endpoint(cols.get(2)?);
        Some(SocketRecord {
            inode,
            family,
            sock_type,
            protocol,
            state: i32::from_str_radix(cols.get(3)?, 16).unwrap_or(0),
            local_addr,
            remote_addr,
            local_port,
            remote_port,
            unix_path: None,
        })
    })
}

fn find_unix_socket(table: &str, inode: u64) -> Option<SocketRecord> {
    table.lines().skip(1).find_map(|line| {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.get(6)?.parse::<u64>().ok()? != inode {
            return None;
        }
        Some(SocketRecord {
            inode,
            family: 1,
            sock_type: i32::from_str_radix(cols.get(4)?, 16).unwrap_or(0),
            state: i32::from_str_radix(cols.get(5)?, 16).unwrap_or(0),
            unix_path: cols.get(7).map(|p| p.to_string()),
            ..SocketRecord::default()
        })
    })
}
