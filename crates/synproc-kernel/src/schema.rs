//! The schema tree: every structural position in the namespace.
//!
//! The schema is built once per host process and shared by every mount.
//! Nodes live in an arena indexed by [`SchemaId`]; parent and child links are
//! indices, so the tree has no interior pointers and no drop recursion.
//!
//! ```text
//! /                       Root
//! ├── curproc             Symlink
//! ├── byname/             Dir
//! │   └── <pid> <comm>    ProcessByName (expansion, symlinks)
//! └── <pid>/              ProcessDir (expansion)
//!     ├── fd/             Dir
//!     │   └── <n>/        DescriptorDir (expansion)
//!     │       ├── details
//!     │       └── socket
//!     ├── threads/        Dir
//!     │   └── <tid>/      ThreadDir (expansion)
//!     │       └── info
//!     └── pid ppid pgid sid tty info taskinfo
//! ```
//!
//! Every directory also carries `.` and `..` children. An expansion marker
//! has an empty name and must be the last child of its parent: listing
//! stops at it.

use std::sync::{Arc, OnceLock};

use synproc_types::{BaseNodeId, NodeIdentity};

use crate::data::{self, Transfer};
use crate::error::{ProcError, ProcResult};
use crate::scope::Scope;
use crate::types::FileType;

/// Longest fixed name a schema node may carry.
pub const MAX_NAME_LEN: usize = 16;

/// Reports the size of a node, or its contribution to its parent
/// directory's size.
pub type SizeFn = fn(&Scope<'_>, &NodeIdentity) -> u64;

/// Copies a node's data into a transfer.
pub type ReadFn = fn(&Scope<'_>, &NodeIdentity, &mut Transfer<'_>) -> ProcResult<()>;

bitflags::bitflags! {
    /// Ownership flags. A child inherits its parent's flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SchemaFlags: u16 {
        /// Identities at this position carry an owning pid.
        const PROCESS = 1 << 0;
        /// Identities at this position carry an owning thread id.
        const THREAD = 1 << 1;
    }
}

/// What kind of position a schema node describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum NodeKind {
    Root,
    Dir,
    File,
    /// `curproc`.
    Symlink,
    /// One directory per visible process. Doubles as the by-pid expansion.
    ProcessDir,
    /// One directory per thread of the owning process.
    ThreadDir,
    /// One directory per open descriptor of the owning process.
    DescriptorDir,
    /// `.`
    DirSelf,
    /// `..`
    DirParent,
    /// One `<pid> <comm>` symlink per visible process.
    ProcessByName,
}

impl NodeKind {
    /// Every kind except files and symlinks is a directory.
    pub fn is_directory(self) -> bool {
        // By-name entries are symlinks to `../<pid>`; only the target is
        // a directory.
        !matches!(self, NodeKind::File | NodeKind::Symlink | NodeKind::ProcessByName)
    }

    /// Expands to one entry per live process, thread or descriptor.
    pub fn is_expansion(self) -> bool {
        matches!(
            self,
            NodeKind::ProcessDir
                | NodeKind::ProcessByName
                | NodeKind::ThreadDir
                | NodeKind::DescriptorDir
        )
    }

    pub fn file_type(self) -> FileType {
        match self {
            NodeKind::File => FileType::File,
            NodeKind::Symlink | NodeKind::ProcessByName => FileType::Symlink,
            _ => FileType::Directory,
        }
    }
}

/// Free-function form of [`NodeKind::is_directory`].
pub fn is_directory_type(kind: NodeKind) -> bool {
    kind.is_directory()
}

/// Index of a node in the schema arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchemaId(u16);

impl SchemaId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Immutable template for one namespace position.
#[derive(Debug)]
pub struct SchemaNode {
    pub kind: NodeKind,
    /// Fixed name; empty for expansion markers.
    pub name: &'static str,
    pub base: BaseNodeId,
    pub flags: SchemaFlags,
    pub parent: Option<SchemaId>,
    pub children: Vec<SchemaId>,
    /// Size used when there is no size function.
    pub size: u64,
    pub size_fn: Option<SizeFn>,
    pub read_fn: Option<ReadFn>,
}

/// The schema arena.
#[derive(Debug)]
pub struct Schema {
    nodes: Vec<SchemaNode>,
}

static SHARED: OnceLock<Arc<Schema>> = OnceLock::new();

impl Schema {
    /// The process-wide schema, built on first use.
    pub fn shared() -> Arc<Schema> {
        SHARED.get_or_init(|| Arc::new(Self::build())).clone()
    }

    /// Build a fresh schema. Base ids are assigned in insertion order
    /// starting at [`BaseNodeId::ROOT`].
    pub fn build() -> Schema {
        let mut b = Builder { nodes: Vec::new() };
        let none = SchemaFlags::empty();
        let process = SchemaFlags::PROCESS;

        let root = b.add_directory(None, "/", NodeKind::Root, none, None);
        b.add_node(
            Some(root),
            "curproc",
            NodeKind::Symlink,
            none,
            0,
            None,
            None,
        );

        let by_name = b.add_directory(Some(root), "byname", NodeKind::Dir, none, None);
        b.add_node(
            Some(by_name),
            "",
            NodeKind::ProcessByName,
            process,
            0,
            Some(data::named_process_count),
            None,
        );

        // Must stay the last child of the root.
        let proc_dir = b.add_directory(
            Some(root),
            "",
            NodeKind::ProcessDir,
            process,
            Some(data::process_count),
        );

        let fd_dir = b.add_directory(Some(proc_dir), "fd", NodeKind::Dir, process, None);
        let one_fd = b.add_directory(
            Some(fd_dir),
            "",
            NodeKind::DescriptorDir,
            process,
            Some(data::descriptor_count),
        );

        let threads_dir = b.add_directory(Some(proc_dir), "threads", NodeKind::Dir, process, None);
        let one_thread = b.add_directory(
            Some(threads_dir),
            "",
            NodeKind::ThreadDir,
            process | SchemaFlags::THREAD,
            Some(data::thread_count),
        );

        let pid_size = std::mem::size_of::<i32>() as u64;
        b.add_file(proc_dir, "pid", pid_size, None, data::read_pid);
        b.add_file(proc_dir, "ppid", pid_size, None, data::read_ppid);
        b.add_file(proc_dir, "pgid", pid_size, None, data::read_pgid);
        b.add_file(proc_dir, "sid", pid_size, None, data::read_sid);
        b.add_file(proc_dir, "tty", 0, Some(data::tty_size), data::read_tty);
        b.add_file(
            proc_dir,
            "info",
            data::ProcInfoBlock::SIZE,
            None,
            data::read_proc_info,
        );
        b.add_file(
            proc_dir,
            "taskinfo",
            data::TaskInfoBlock::SIZE,
            None,
            data::read_task_info,
        );

        b.add_file(
            one_thread,
            "info",
            data::ThreadInfoBlock::SIZE,
            None,
            data::read_thread_info,
        );

        b.add_file(
            one_fd,
            "details",
            data::FdInfoBlock::SIZE,
            None,
            data::read_fd_details,
        );
        b.add_file(one_fd, "socket", 0, Some(data::socket_size), data::read_socket);

        Schema { nodes: b.nodes }
    }

    /// The root node.
    pub fn root(&self) -> SchemaId {
        SchemaId(0)
    }

    pub fn node(&self, id: SchemaId) -> &SchemaNode {
        &self.nodes[id.index()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look a node up by its base id.
    pub fn by_base(&self, base: BaseNodeId) -> Option<SchemaId> {
        let idx = usize::from(base.get()).checked_sub(usize::from(BaseNodeId::ROOT.get()))?;
        (idx < self.nodes.len()).then(|| SchemaId(idx as u16))
    }

    pub fn parent(&self, id: SchemaId) -> Option<SchemaId> {
        self.node(id).parent
    }

    pub fn children(&self, id: SchemaId) -> &[SchemaId] {
        &self.node(id).children
    }

    /// The child of `dir` with the fixed name `name`.
    pub fn child_named(&self, dir: SchemaId, name: &str) -> Option<SchemaId> {
        self.children(dir)
            .iter()
            .copied()
            .find(|&c| !self.node(c).name.is_empty() && self.node(c).name == name)
    }

    /// The expansion marker of `dir`, if it has one.
    pub fn expansion(&self, dir: SchemaId) -> Option<SchemaId> {
        self.children(dir)
            .last()
            .copied()
            .filter(|&c| self.node(c).kind.is_expansion())
    }

    /// Follow a chain of fixed names (expansions are entered with `""`).
    pub fn find(&self, path: &[&str]) -> Option<SchemaId> {
        let mut cur = self.root();
        for &name in path {
            cur = if name.is_empty() {
                self.expansion(cur)?
            } else {
                self.child_named(cur, name)?
            };
        }
        Some(cur)
    }

    /// Pre-order traversal with an explicit worklist.
    pub fn walk(&self) -> Walk<'_> {
        Walk {
            schema: self,
            stack: if self.nodes.is_empty() {
                Vec::new()
            } else {
                vec![self.root()]
            },
        }
    }

    /// Check the structural rules listing and lookup rely on.
    pub fn validate(&self) -> ProcResult<()> {
        let mut seen = std::collections::HashSet::new();
        for id in self.walk() {
            let node = self.node(id);
            if !seen.insert(node.base) {
                return Err(ProcError::other(format!("duplicate base id {}", node.base)));
            }
            if node.name.len() > MAX_NAME_LEN {
                return Err(ProcError::other(format!("schema name {:?} too long", node.name)));
            }
            if node.kind.is_expansion() != node.name.is_empty() && node.kind != NodeKind::Root {
                return Err(ProcError::other(format!(
                    "{} node {} must be unnamed iff it is an expansion",
                    node.kind, node.base
                )));
            }
            let children = &node.children;
            for (i, &child) in children.iter().enumerate() {
                let c = self.node(child);
                if c.kind.is_expansion() && i + 1 != children.len() {
                    return Err(ProcError::other(format!(
                        "expansion {} is not the last child of {}",
                        c.base, node.base
                    )));
                }
                if c.kind == NodeKind::Root {
                    return Err(ProcError::other("root nested below another node"));
                }
            }
            if !node.kind.is_directory() && !children.is_empty() {
                return Err(ProcError::other(format!("leaf {} has children", node.base)));
            }
        }
        if seen.len() != self.nodes.len() {
            return Err(ProcError::other("schema nodes unreachable from the root"));
        }
        Ok(())
    }
}

/// Iterator returned by [`Schema::walk`].
pub struct Walk<'a> {
    schema: &'a Schema,
    stack: Vec<SchemaId>,
}

impl Iterator for Walk<'_> {
    type Item = SchemaId;

    fn next(&mut self) -> Option<SchemaId> {
        let id = self.stack.pop()?;
        self.stack
            .extend(self.schema.children(id).iter().rev().copied());
        Some(id)
    }
}

struct Builder {
    nodes: Vec<SchemaNode>,
}

impl Builder {
    #[allow(clippy::too_many_arguments)]
    fn add_node(
        &mut self,
        parent: Option<SchemaId>,
        name: &'static str,
        kind: NodeKind,
        flags: SchemaFlags,
        size: u64,
        size_fn: Option<SizeFn>,
        read_fn: Option<ReadFn>,
    ) -> SchemaId {
        let id = SchemaId(self.nodes.len() as u16);
        let base = BaseNodeId::from_raw(BaseNodeId::ROOT.get() + id.0);
        let inherited = parent
            .map(|p| self.nodes[p.index()].flags)
            .unwrap_or(SchemaFlags::empty());
        self.nodes.push(SchemaNode {
            kind,
            name,
            base,
            flags: flags | inherited,
            parent,
            children: Vec::new(),
            size,
            size_fn,
            read_fn,
        });
        if let Some(p) = parent {
            self.nodes[p.index()].children.push(id);
        }
        id
    }

    /// Adds a directory followed immediately by its `.` and `..` entries.
    fn add_directory(
        &mut self,
        parent: Option<SchemaId>,
        name: &'static str,
        kind: NodeKind,
        flags: SchemaFlags,
        size_fn: Option<SizeFn>,
    ) -> SchemaId {
        let dir = self.add_node(parent, name, kind, flags, 0, size_fn, None);
        self.add_node(Some(dir), ".", NodeKind::DirSelf, flags, 0, None, None);
        self.add_node(Some(dir), "..", NodeKind::DirParent, flags, 0, None, None);
        dir
    }

    fn add_file(
        &mut self,
        parent: SchemaId,
        name: &'static str,
        size: u64,
        size_fn: Option<SizeFn>,
        read_fn: ReadFn,
    ) -> SchemaId {
        self.add_node(
            Some(parent),
            name,
            NodeKind::File,
            SchemaFlags::empty(),
            size,
            size_fn,
            Some(read_fn),
        )
    }
}
