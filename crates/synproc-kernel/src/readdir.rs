//! Directory enumeration.
//!
//! Every call restarts at the first schema child and walks forward,
//! accumulating each entry's packed record size. Entries are handed to the
//! sink only once that running offset reaches the caller's start offset.
//! There is no cursor state between calls: the dynamic part of a directory
//! can change at any time, and re-walking is cheaper than reconciling.
//!
//! Static children come first, in schema order. An expansion marker
//! (always the last child) switches to iterating processes, threads or
//! descriptors and ends the directory.

use tracing::{trace, warn};

use synproc_types::NodeIdentity;

use crate::error::{ProcError, ProcResult};
use crate::resolve::{parent_of, process_entry_name};
use crate::schema::{NodeKind, SchemaId};
use crate::scope::Scope;
use crate::types::{DirEntry, FileType};

/// Fixed part of a packed record: u64 file id, u16 record length, u8 type,
/// u8 name length.
pub const DIRENT_HEADER_LEN: usize = 12;

/// Longest name a packed record can carry.
pub const MAX_DIRENT_NAME: usize = 255;

/// Packed size of a record for `name`: header plus the NUL-terminated name
/// rounded up to four bytes.
pub fn dirent_size(name: &str) -> usize {
    DIRENT_HEADER_LEN + ((name.len() + 1 + 3) & !3)
}

/// Receives entries during a listing.
pub trait DirentSink {
    /// Accept `entry`, or return false if there is no room for it. A
    /// rejected entry ends the listing. Names reaching a sink are at most
    /// [`MAX_DIRENT_NAME`] bytes.
    fn emit(&mut self, entry: &DirEntry) -> bool;
}

/// Collects entries without limit.
impl DirentSink for Vec<DirEntry> {
    fn emit(&mut self, entry: &DirEntry) -> bool {
        self.push(entry.clone());
        true
    }
}

/// Packs entries into a caller-supplied byte buffer.
#[derive(Debug)]
pub struct DirentBuffer<'a> {
    buf: &'a mut [u8],
    used: usize,
}

impl<'a> DirentBuffer<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, used: 0 }
    }

    /// Bytes written so far.
    pub fn used(&self) -> usize {
        self.used
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.used]
    }
}

impl DirentSink for DirentBuffer<'_> {
    fn emit(&mut self, entry: &DirEntry) -> bool {
        let name = entry.name.as_bytes();
        if name.len() > MAX_DIRENT_NAME {
            return false;
        }
        let reclen = dirent_size(&entry.name);
        if self.buf.len() - self.used < reclen {
            return false;
        }
        let rec = &mut self.buf[self.used..self.used + reclen];
        rec.fill(0);
        rec[0..8].copy_from_slice(&entry.file_id.to_ne_bytes());
        rec[8..10].copy_from_slice(&(reclen as u16).to_ne_bytes());
        rec[10] = entry.kind.dirent_type();
        rec[11] = name.len() as u8;
        rec[DIRENT_HEADER_LEN..DIRENT_HEADER_LEN + name.len()].copy_from_slice(name);
        self.used += reclen;
        true
    }
}

/// Decode a buffer filled by [`DirentBuffer`].
pub fn parse_dirents(mut bytes: &[u8]) -> Vec<(u64, u8, String)> {
    let mut out = Vec::new();
    while bytes.len() >= DIRENT_HEADER_LEN {
        let mut id = [0u8; 8];
        id.copy_from_slice(&bytes[0..8]);
        let reclen = u16::from_ne_bytes([bytes[8], bytes[9]]) as usize;
        let namlen = bytes[11] as usize;
        if reclen < DIRENT_HEADER_LEN || reclen > bytes.len() || DIRENT_HEADER_LEN + namlen > reclen {
            break;
        }
        let name = String::from_utf8_lossy(&bytes[DIRENT_HEADER_LEN..DIRENT_HEADER_LEN + namlen]);
        out.push((u64::from_ne_bytes(id), bytes[10], name.into_owned()));
        bytes = &bytes[reclen..];
    }
    out
}

/// Outcome of one listing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListOutcome {
    /// Offset to pass to the next call.
    pub next_offset: u64,
    /// True if every child, including the dynamic expansion, was walked.
    pub eof: bool,
    /// Entries the sink accepted.
    pub emitted: usize,
}

/// Tracks the running offset and forwards entries past the start point.
struct Cursor<'s> {
    start: u64,
    pos: u64,
    emitted: usize,
    sink: &'s mut dyn DirentSink,
}

impl Cursor<'_> {
    /// Returns false when the sink is full.
    fn push(&mut self, name: &str, kind: FileType, file_id: u64) -> bool {
        let size = dirent_size(name) as u64;
        if self.pos >= self.start {
            if !self.sink.emit(&DirEntry::new(name, kind, file_id)) {
                return false;
            }
            self.emitted += 1;
        }
        self.pos += size;
        true
    }

    fn stop(&self, eof: bool) -> ListOutcome {
        ListOutcome {
            next_offset: self.pos,
            eof,
            emitted: self.emitted,
        }
    }
}

/// List the directory `dir` (schema position `dir_schema`) from byte
/// offset `start`.
///
/// Inside a process's subtree the owning process must still exist
/// (`NoSuchProcess` otherwise) and be visible to the caller; if it is not
/// visible every entry is skipped.
pub fn list(
    scope: &Scope<'_>,
    dir: &NodeIdentity,
    dir_schema: SchemaId,
    start: u64,
    sink: &mut dyn DirentSink,
) -> ProcResult<ListOutcome> {
    let schema = scope.schema;
    if !schema.node(dir_schema).kind.is_directory() {
        return Err(ProcError::not_a_directory(dir.to_string()));
    }

    let mut cur = Cursor {
        start,
        pos: 0,
        emitted: 0,
        sink,
    };

    if dir.pid.is_some() {
        let owner = scope.owner(dir)?;
        if !scope.permits(&owner) {
            trace!(%dir, "owner hidden from caller, listing nothing");
            return Ok(cur.stop(true));
        }
    }

    for &child in schema.children(dir_schema) {
        let c = schema.node(child);
        let more = match c.kind {
            NodeKind::Root => {
                warn!(%dir, "root node nested in schema, skipping");
                true
            }
            NodeKind::DirSelf => cur.push(".", FileType::Directory, dir.file_id()),
            NodeKind::DirParent => {
                let parent = parent_of(schema, dir, dir_schema);
                cur.push("..", FileType::Directory, parent.identity.file_id())
            }
            NodeKind::ProcessDir | NodeKind::ProcessByName => {
                let by_name = c.kind == NodeKind::ProcessByName;
                let kind = c.kind.file_type();
                for p in scope.visible_processes() {
                    let id = NodeIdentity::new(dir.mount, c.base).with_pid(Some(p.pid));
                    let name = if by_name {
                        match process_entry_name(p.pid, &p.comm) {
                            Some(name) => name,
                            None => {
                                trace!(pid = p.pid, "no by-name entry for command name");
                                continue;
                            }
                        }
                    } else {
                        p.pid.to_string()
                    };
                    if !cur.push(&name, kind, id.file_id()) {
                        return Ok(cur.stop(false));
                    }
                }
                return Ok(cur.stop(true));
            }
            NodeKind::ThreadDir => {
                let pid = owner_of(dir)?;
                let tids = scope
                    .registry
                    .thread_ids(pid)
                    .ok_or_else(|| ProcError::no_such_process(pid.to_string()))?;
                for tid in tids {
                    let id = dir.rebased(c.base).with_object(Some(tid));
                    if !cur.push(&tid.to_string(), FileType::Directory, id.file_id()) {
                        return Ok(cur.stop(false));
                    }
                }
                return Ok(cur.stop(true));
            }
            NodeKind::DescriptorDir => {
                let pid = owner_of(dir)?;
                let fds = scope
                    .registry
                    .descriptors(pid)
                    .ok_or_else(|| ProcError::no_such_process(pid.to_string()))?;
                for fd in fds {
                    let id = dir.rebased(c.base).with_object(Some(fd as u64));
                    if !cur.push(&fd.to_string(), FileType::Directory, id.file_id()) {
                        return Ok(cur.stop(false));
                    }
                }
                return Ok(cur.stop(true));
            }
            NodeKind::Dir | NodeKind::File | NodeKind::Symlink => {
                cur.push(c.name, c.kind.file_type(), dir.rebased(c.base).file_id())
            }
        };
        if !more {
            return Ok(cur.stop(false));
        }
    }
    Ok(cur.stop(true))
}

fn owner_of(dir: &NodeIdentity) -> ProcResult<i32> {
    dir.pid
        .ok_or_else(|| ProcError::invalid_operation(format!("{dir} has no owning process")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessPolicy;
    use crate::registry::{MemoryRegistry, ProcessRecord};
    use crate::schema::Schema;
    use synproc_types::{Credential, MountId};

    #[test]
    fn test_dirent_size_rounds_to_word() {
        assert_eq!(dirent_size("."), DIRENT_HEADER_LEN + 4);
        assert_eq!(dirent_size("abc"), DIRENT_HEADER_LEN + 4);
        assert_eq!(dirent_size("abcd"), DIRENT_HEADER_LEN + 8);
        assert_eq!(dirent_size("curproc"), DIRENT_HEADER_LEN + 8);
    }

    #[test]
    fn test_buffer_packs_and_refuses_overflow() {
        let mut raw = [0u8; 40];
        let mut buf = DirentBuffer::new(&mut raw);
        assert!(buf.emit(&DirEntry::new("curproc", FileType::Symlink, 4)));
        assert_eq!(buf.used(), 20);
        assert!(buf.emit(&DirEntry::new("byname", FileType::Directory, 5)));
        assert!(!buf.emit(&DirEntry::new("x", FileType::File, 6)));
        let parsed = parse_dirents(buf.as_bytes());
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0], (4, 10, "curproc".to_string()));
        assert_eq!(parsed[1].2, "byname");
    }

    fn setup() -> (Schema, MemoryRegistry) {
        let reg = MemoryRegistry::new();
        for pid in [1, 20, 300] {
            reg.insert_process(ProcessRecord::new(pid, format!("p{pid}")).with_owner(501, 20));
        }
        (Schema::build(), reg)
    }

    #[test]
    fn test_root_listing() {
        let (schema, reg) = setup();
        let cred = Credential::root(1);
        let scope = Scope::new(&schema, &reg, AccessPolicy::default(), &cred);
        let root = NodeIdentity::root(MountId::from_raw(1));

        let mut out = Vec::new();
        let outcome = list(&scope, &root, schema.root(), 0, &mut out).unwrap();
        let names: Vec<_> = out.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec![".", "..", "curproc", "byname", "1", "20", "300"]);
        assert!(outcome.eof);
        assert_eq!(outcome.emitted, 7);
        let total: usize = names.iter().map(|n| dirent_size(n)).sum();
        assert_eq!(outcome.next_offset, total as u64);
    }

    #[test]
    fn test_resume_from_offset() {
        let (schema, reg) = setup();
        let cred = Credential::root(1);
        let scope = Scope::new(&schema, &reg, AccessPolicy::default(), &cred);
        let root = NodeIdentity::root(MountId::from_raw(1));

        // Room for exactly three records of 16/16/20 bytes.
        let mut raw = [0u8; 52];
        let mut buf = DirentBuffer::new(&mut raw);
        let first = list(&scope, &root, schema.root(), 0, &mut buf).unwrap();
        assert!(!first.eof);
        assert_eq!(first.emitted, 3);

        let mut rest = Vec::new();
        let second = list(&scope, &root, schema.root(), first.next_offset, &mut rest).unwrap();
        assert!(second.eof);
        let names: Vec<_> = rest.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["byname", "1", "20", "300"]);
    }

    #[test]
    fn test_by_name_entries_are_symlinks() {
        let (schema, reg) = setup();
        let cred = Credential::root(1);
        let scope = Scope::new(&schema, &reg, AccessPolicy::default(), &cred);
        let byname = schema.find(&["byname"]).unwrap();
        let id = NodeIdentity::new(MountId::from_raw(1), schema.node(byname).base);

        let mut out = Vec::new();
        list(&scope, &id, byname, 0, &mut out).unwrap();
        let links: Vec<_> = out.iter().filter(|e| e.kind.is_symlink()).collect();
        assert_eq!(links.len(), 3);
        assert_eq!(links[1].name, "20 p20");
    }

    #[test]
    fn test_unlinkable_commands_do_not_stall_paging() {
        let (schema, reg) = setup();
        reg.insert_process(ProcessRecord::new(40, "kworker/0:1").with_owner(501, 20));
        reg.insert_process(ProcessRecord::new(41, "x".repeat(300)).with_owner(501, 20));
        let cred = Credential::root(1);
        let scope = Scope::new(&schema, &reg, AccessPolicy::default(), &cred);
        let byname = schema.find(&["byname"]).unwrap();
        let id = NodeIdentity::new(MountId::from_raw(1), schema.node(byname).base);

        let mut names = Vec::new();
        let mut offset = 0;
        let mut done = false;
        for _ in 0..16 {
            let mut raw = [0u8; 32];
            let mut buf = DirentBuffer::new(&mut raw);
            let outcome = list(&scope, &id, byname, offset, &mut buf).unwrap();
            assert!(outcome.emitted > 0 || outcome.eof, "paging stalled at {offset}");
            names.extend(parse_dirents(buf.as_bytes()).into_iter().map(|(_, _, n)| n));
            offset = outcome.next_offset;
            if outcome.eof {
                done = true;
                break;
            }
        }
        assert!(done);
        assert_eq!(names, vec![".", "..", "1 p1", "20 p20", "300 p300"]);
        assert_eq!(
            crate::data::node_size(&scope, byname, &id),
            names.len() as u64
        );
    }

    #[test]
    fn test_hidden_processes_are_skipped() {
        let (schema, reg) = setup();
        reg.insert_process(ProcessRecord::new(999, "secret"));
        let cred = Credential::new(5, 501, 20);
        let scope = Scope::new(&schema, &reg, AccessPolicy::default(), &cred);
        let root = NodeIdentity::root(MountId::from_raw(1));

        let mut out = Vec::new();
        list(&scope, &root, schema.root(), 0, &mut out).unwrap();
        assert!(out.iter().all(|e| e.name != "999"));

        let open = Scope::new(
            &schema,
            &reg,
            AccessPolicy {
                open_permissions: true,
            },
            &cred,
        );
        let mut out = Vec::new();
        list(&open, &root, schema.root(), 0, &mut out).unwrap();
        assert!(out.iter().any(|e| e.name == "999"));
    }

    #[test]
    fn test_listing_file_is_not_a_directory() {
        let (schema, reg) = setup();
        let cred = Credential::root(1);
        let scope = Scope::new(&schema, &reg, AccessPolicy::default(), &cred);
        let pid_file = schema.find(&["", "pid"]).unwrap();
        let id = NodeIdentity::new(MountId::from_raw(1), schema.node(pid_file).base).with_pid(Some(1));
        let mut out = Vec::new();
        assert!(matches!(
            list(&scope, &id, pid_file, 0, &mut out),
            Err(ProcError::NotADirectory(_))
        ));
    }
}
