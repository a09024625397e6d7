//! Data providers and size functions for schema leaves.
//!
//! Each read function locates the owning process (and thread or
//! descriptor) in the registry, fills one fixed-layout block, and copies the
//! requested byte range into a [`Transfer`]. A process that has exited
//! yields `NoSuchProcess`; a read past the end of the data copies nothing.
//!
//! Blocks are `#[repr(C)]` plain-old-data with no padding, native endian.

use bytemuck::{Pod, Zeroable};
use std::time::UNIX_EPOCH;

use synproc_types::NodeIdentity;

use crate::error::{ProcError, ProcResult};
use crate::registry::{DescriptorKind, DescriptorRecord, ProcessRecord};
use crate::resolve::process_entry_name;
use crate::schema::{NodeKind, SchemaId};
use crate::scope::{owner_object, owner_pid, Scope};

// ============================================================================
// Transfer
// ============================================================================

/// Destination buffer plus the file offset its first byte corresponds to.
#[derive(Debug)]
pub struct Transfer<'a> {
    offset: u64,
    out: &'a mut [u8],
    written: usize,
}

impl<'a> Transfer<'a> {
    pub fn new(offset: u64, out: &'a mut [u8]) -> Self {
        Self {
            offset,
            out,
            written: 0,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Bytes copied so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Space left in the destination.
    pub fn remaining(&self) -> usize {
        self.out.len() - self.written
    }

    /// Copy `data[offset..]` into the destination, as much as fits. An
    /// offset at or past the end copies nothing and is not an error.
    pub fn copy_from(&mut self, data: &[u8]) {
        let Ok(start) = usize::try_from(self.offset) else {
            return;
        };
        if start >= data.len() {
            return;
        }
        let n = (data.len() - start).min(self.remaining());
        self.out[self.written..self.written + n].copy_from_slice(&data[start..start + n]);
        self.written += n;
    }
}

// ============================================================================
// Info blocks
// ============================================================================

/// Process identity block (`/<pid>/info`).
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct ProcInfoBlock {
    pub flags: u32,
    pub status: u32,
    pub xstatus: u32,
    pub pid: u32,
    pub ppid: u32,
    pub uid: u32,
    pub gid: u32,
    pub ruid: u32,
    pub rgid: u32,
    pub svuid: u32,
    pub svgid: u32,
    pub reserved: u32,
    pub comm: [u8; 16],
    pub name: [u8; 32],
    pub nfiles: u32,
    pub pgid: u32,
    pub pjobc: u32,
    pub tty_dev: u32,
    pub tpgid: u32,
    pub nice: i32,
    pub start_sec: u64,
    pub start_usec: u64,
}

/// Resource usage block (`/<pid>/taskinfo`).
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct TaskInfoBlock {
    pub virtual_size: u64,
    pub resident_size: u64,
    pub total_user: u64,
    pub total_system: u64,
    pub threads_user: u64,
    pub threads_system: u64,
    pub policy: i32,
    pub faults: i32,
    pub pageins: i32,
    pub cow_faults: i32,
    pub messages_sent: i32,
    pub messages_received: i32,
    pub syscalls_mach: i32,
    pub syscalls_unix: i32,
    pub csw: i32,
    pub threadnum: i32,
    pub numrunning: i32,
    pub priority: i32,
}

/// Thread block (`/<pid>/threads/<tid>/info`).
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct ThreadInfoBlock {
    pub user_time: u64,
    pub system_time: u64,
    pub cpu_usage: i32,
    pub policy: i32,
    pub run_state: i32,
    pub flags: i32,
    pub sleep_time: i32,
    pub cur_priority: i32,
    pub priority: i32,
    pub max_priority: i32,
    pub name: [u8; 64],
}

/// Descriptor block (`/<pid>/fd/<n>/details`).
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct FdInfoBlock {
    pub open_flags: u32,
    pub status: u32,
    pub offset: i64,
    pub fd_type: i32,
    pub fd: i32,
    pub vnode_type: i32,
    pub reserved: i32,
    pub path: [u8; 1024],
}

/// Socket block (`/<pid>/fd/<n>/socket`).
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct SocketInfoBlock {
    pub open_flags: u32,
    pub status: u32,
    pub offset: i64,
    pub family: i32,
    pub sock_type: i32,
    pub protocol: i32,
    pub state: i32,
    pub local_port: u16,
    pub remote_port: u16,
    pub reserved: u32,
    pub inode: u64,
    pub local_addr: [u8; 16],
    pub remote_addr: [u8; 16],
    pub unix_path: [u8; 128],
}

macro_rules! impl_block_size {
    ($($T:ident),*) => {
        $(impl $T {
            /// Size in bytes of the block.
            pub const SIZE: u64 = std::mem::size_of::<$T>() as u64;
        })*
    };
}

impl_block_size!(ProcInfoBlock, TaskInfoBlock, ThreadInfoBlock, FdInfoBlock, SocketInfoBlock);

/// Copy `s` into a fixed buffer, truncated so a NUL always remains.
fn fill_cstr(dst: &mut [u8], s: &str) {
    let n = s.len().min(dst.len().saturating_sub(1));
    dst[..n].copy_from_slice(&s.as_bytes()[..n]);
}

impl ProcInfoBlock {
    pub fn from_record(p: &ProcessRecord, nfiles: u32) -> Self {
        let since_epoch = p.start_time.duration_since(UNIX_EPOCH).unwrap_or_default();
        let mut block = Self {
            flags: p.flags,
            status: p.state as u32,
            pid: p.pid as u32,
            ppid: p.ppid as u32,
            uid: p.uid,
            gid: p.gid,
            ruid: p.ruid,
            rgid: p.rgid,
            svuid: p.uid,
            svgid: p.gid,
            nfiles,
            pgid: p.pgid as u32,
            tty_dev: p.tty_dev,
            tpgid: p.tpgid as u32,
            nice: p.nice,
            start_sec: since_epoch.as_secs(),
            start_usec: u64::from(since_epoch.subsec_micros()),
            ..Zeroable::zeroed()
        };
        fill_cstr(&mut block.comm, &p.comm);
        fill_cstr(&mut block.name, &p.comm);
        block
    }
}

impl FdInfoBlock {
    pub fn from_record(d: &DescriptorRecord) -> Self {
        let mut block = Self {
            open_flags: d.open_flags,
            offset: d.offset,
            fd_type: descriptor_type_code(d.kind),
            fd: d.fd,
            vnode_type: vnode_type_code(d.kind),
            ..Zeroable::zeroed()
        };
        fill_cstr(&mut block.path, &d.path);
        block
    }
}

fn descriptor_type_code(kind: DescriptorKind) -> i32 {
    match kind {
        DescriptorKind::File | DescriptorKind::Directory => 1,
        DescriptorKind::Socket => 2,
        DescriptorKind::Pipe => 6,
        DescriptorKind::Other => 0,
    }
}

fn vnode_type_code(kind: DescriptorKind) -> i32 {
    match kind {
        DescriptorKind::File => 1,
        DescriptorKind::Directory => 2,
        DescriptorKind::Socket => 7,
        DescriptorKind::Pipe => 8,
        DescriptorKind::Other => 0,
    }
}

// ============================================================================
// Read functions
// ============================================================================

fn descriptor_number(identity: &NodeIdentity) -> ProcResult<i32> {
    let raw = owner_object(identity)?;
    i32::try_from(raw).map_err(|_| ProcError::no_such_process(format!("fd {raw}")))
}

fn copy_i32(value: i32, t: &mut Transfer<'_>) -> ProcResult<()> {
    t.copy_from(&value.to_ne_bytes());
    Ok(())
}

pub fn read_pid(scope: &Scope<'_>, id: &NodeIdentity, t: &mut Transfer<'_>) -> ProcResult<()> {
    let p = scope.owner(id)?;
    copy_i32(p.pid, t)
}

pub fn read_ppid(scope: &Scope<'_>, id: &NodeIdentity, t: &mut Transfer<'_>) -> ProcResult<()> {
    copy_i32(scope.owner(id)?.ppid, t)
}

pub fn read_pgid(scope: &Scope<'_>, id: &NodeIdentity, t: &mut Transfer<'_>) -> ProcResult<()> {
    copy_i32(scope.owner(id)?.pgid, t)
}

pub fn read_sid(scope: &Scope<'_>, id: &NodeIdentity, t: &mut Transfer<'_>) -> ProcResult<()> {
    copy_i32(scope.owner(id)?.sid, t)
}

pub fn read_tty(scope: &Scope<'_>, id: &NodeIdentity, t: &mut Transfer<'_>) -> ProcResult<()> {
    if let Some(tty) = scope.owner(id)?.tty {
        t.copy_from(tty.as_bytes());
    }
    Ok(())
}

pub fn read_proc_info(
    scope: &Scope<'_>,
    id: &NodeIdentity,
    t: &mut Transfer<'_>,
) -> ProcResult<()> {
    let p = scope.owner(id)?;
    let nfiles = scope
        .registry
        .descriptors(p.pid)
        .map(|fds| fds.len() as u32)
        .unwrap_or(0);
    let block = ProcInfoBlock::from_record(&p, nfiles);
    t.copy_from(bytemuck::bytes_of(&block));
    Ok(())
}

pub fn read_task_info(
    scope: &Scope<'_>,
    id: &NodeIdentity,
    t: &mut Transfer<'_>,
) -> ProcResult<()> {
    let pid = owner_pid(id)?;
    let task = scope
        .registry
        .task(pid)
        .ok_or_else(|| ProcError::no_such_process(pid.to_string()))?;
    let block = TaskInfoBlock {
        virtual_size: task.virtual_size,
        resident_size: task.resident_size,
        total_user: task.total_user_ns,
        total_system: task.total_system_ns,
        threads_user: task.threads_user_ns,
        threads_system: task.threads_system_ns,
        policy: task.policy,
        faults: task.faults,
        pageins: task.pageins,
        cow_faults: task.cow_faults,
        messages_sent: task.messages_sent,
        messages_received: task.messages_received,
        syscalls_mach: task.syscalls_mach,
        syscalls_unix: task.syscalls_unix,
        csw: task.context_switches,
        threadnum: task.thread_count,
        numrunning: task.running_count,
        priority: task.priority,
    };
    t.copy_from(bytemuck::bytes_of(&block));
    Ok(())
}

pub fn read_thread_info(
    scope: &Scope<'_>,
    id: &NodeIdentity,
    t: &mut Transfer<'_>,
) -> ProcResult<()> {
    let pid = owner_pid(id)?;
    let tid = owner_object(id)?;
    let th = scope
        .registry
        .thread(pid, tid)
        .ok_or_else(|| ProcError::no_such_process(format!("{pid}/{tid}")))?;
    let mut block = ThreadInfoBlock {
        user_time: th.user_ns,
        system_time: th.system_ns,
        cpu_usage: th.cpu_usage,
        policy: th.policy,
        run_state: th.run_state,
        flags: th.flags,
        sleep_time: th.sleep_time,
        cur_priority: th.cur_priority,
        priority: th.priority,
        max_priority: th.max_priority,
        name: [0; 64],
    };
    fill_cstr(&mut block.name, &th.name);
    t.copy_from(bytemuck::bytes_of(&block));
    Ok(())
}

fn descriptor_record(scope: &Scope<'_>, id: &NodeIdentity) -> ProcResult<DescriptorRecord> {
    let pid = owner_pid(id)?;
    let fd = descriptor_number(id)?;
    if !scope.registry.exists(pid) {
        return Err(ProcError::no_such_process(pid.to_string()));
    }
    scope
        .registry
        .descriptor(pid, fd)
        .ok_or_else(|| ProcError::no_such_process(format!("{pid}/fd/{fd}")))
}

pub fn read_fd_details(
    scope: &Scope<'_>,
    id: &NodeIdentity,
    t: &mut Transfer<'_>,
) -> ProcResult<()> {
    let d = descriptor_record(scope, id)?;
    t.copy_from(bytemuck::bytes_of(&FdInfoBlock::from_record(&d)));
    Ok(())
}

pub fn read_socket(scope: &Scope<'_>, id: &NodeIdentity, t: &mut Transfer<'_>) -> ProcResult<()> {
    let d = descriptor_record(scope, id)?;
    let Some(sock) = d.socket.as_ref() else {
        return Err(ProcError::invalid_operation(format!("fd {} is not a socket", d.fd)));
    };
    let mut block = SocketInfoBlock {
        open_flags: d.open_flags,
        offset: d.offset,
        family: sock.family,
        sock_type: sock.sock_type,
        protocol: sock.protocol,
        state: sock.state,
        local_port: sock.local_port,
        remote_port: sock.remote_port,
        inode: sock.inode,
        local_addr: sock.local_addr,
        remote_addr: sock.remote_addr,
        ..Zeroable::zeroed()
    };
    if let Some(path) = &sock.unix_path {
        fill_cstr(&mut block.unix_path, path);
    }
    t.copy_from(bytemuck::bytes_of(&block));
    Ok(())
}

// ============================================================================
// Size functions
// ============================================================================

/// One per visible process.
pub fn process_count(scope: &Scope<'_>, _id: &NodeIdentity) -> u64 {
    scope.visible_processes().len() as u64
}

/// One per visible process that has a by-name entry.
pub fn named_process_count(scope: &Scope<'_>, _id: &NodeIdentity) -> u64 {
    scope
        .visible_processes()
        .iter()
        .filter(|p| process_entry_name(p.pid, &p.comm).is_some())
        .count() as u64
}

/// One per thread of the owning process.
pub fn thread_count(scope: &Scope<'_>, id: &NodeIdentity) -> u64 {
    id.pid
        .and_then(|pid| scope.registry.thread_ids(pid))
        .map(|tids| tids.len() as u64)
        .unwrap_or(0)
}

/// One per open descriptor of the owning process.
pub fn descriptor_count(scope: &Scope<'_>, id: &NodeIdentity) -> u64 {
    id.pid
        .and_then(|pid| scope.registry.descriptors(pid))
        .map(|fds| fds.len() as u64)
        .unwrap_or(0)
}

/// Length of the controlling terminal path.
pub fn tty_size(scope: &Scope<'_>, id: &NodeIdentity) -> u64 {
    id.pid
        .and_then(|pid| scope.registry.process(pid))
        .and_then(|p| p.tty)
        .map(|tty| tty.len() as u64)
        .unwrap_or(0)
}

/// Socket block size when the descriptor is a socket, else zero.
pub fn socket_size(scope: &Scope<'_>, id: &NodeIdentity) -> u64 {
    let (Some(pid), Some(fd)) = (id.pid, id.object) else {
        return 0;
    };
    let Ok(fd) = i32::try_from(fd) else {
        return 0;
    };
    match scope.registry.descriptor(pid, fd) {
        Some(d) if d.socket.is_some() => SocketInfoBlock::SIZE,
        _ => 0,
    }
}

/// Target of a symlink node: the caller's pid for `curproc`, `../<pid>`
/// for a by-name entry.
pub fn link_target(scope: &Scope<'_>, kind: NodeKind, id: &NodeIdentity) -> ProcResult<String> {
    match kind {
        NodeKind::Symlink => Ok(scope.cred.pid.to_string()),
        NodeKind::ProcessByName => Ok(format!("../{}", owner_pid(id)?)),
        other => Err(ProcError::invalid_operation(format!("readlink on {other} node"))),
    }
}

/// `st_size` of a node.
///
/// Leaves use their size function or fixed size. Directories add up their
/// schema children: an expansion contributes its size function's value
/// (one per process, thread or descriptor), every other child contributes
/// one. `.` and `..` are measured as the directory they stand for.
pub fn node_size(scope: &Scope<'_>, schema_id: SchemaId, id: &NodeIdentity) -> u64 {
    let schema = scope.schema;
    let node = schema.node(schema_id);
    let kind = node.kind;

    if kind.file_type().is_symlink() {
        return link_target(scope, kind, id)
            .map(|t| t.len() as u64)
            .unwrap_or(0);
    }

    let target = match kind {
        NodeKind::DirSelf => node.parent,
        NodeKind::DirParent => node.parent.map(|p| {
            let dir = schema.node(p);
            match (dir.kind, dir.parent) {
                (NodeKind::Root, _) | (_, None) => p,
                (_, Some(grandparent)) => grandparent,
            }
        }),
        _ => Some(schema_id),
    };
    let Some(target) = target else {
        return 0;
    };

    if kind.is_directory() {
        schema
            .children(target)
            .iter()
            .map(|&c| {
                let child = schema.node(c);
                match child.size_fn {
                    Some(f) if child.kind.is_expansion() => f(scope, id),
                    _ => 1,
                }
            })
            .sum()
    } else {
        match node.size_fn {
            Some(f) => f(scope, id),
            None => node.size,
        }
    }
}
