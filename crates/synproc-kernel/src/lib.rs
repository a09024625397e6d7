//! # synproc-kernel
//!
//! A read-only synthetic process namespace.
//!
//! The namespace is a fixed schema tree of directories, files and symlinks
//! expanded on demand over the live set of processes, threads and open
//! descriptors. Nothing is stored: every lookup, listing and read asks a
//! [`ProcessRegistry`] for current state.
//!
//! - [`schema`] - the static tree and its base node ids
//! - [`cache`] - one live node per identity, created at most once
//! - [`resolve`] / [`readdir`] - name lookup and directory enumeration
//! - [`data`] / [`attr`] - file contents, sizes and attributes
//! - [`mount`] / [`ops`] - mount instances and the path-based facade

pub mod access;
pub mod attr;
pub mod cache;
pub mod config;
pub mod data;
pub mod error;
pub mod mount;
pub mod ops;
pub mod readdir;
pub mod registry;
pub mod resolve;
pub mod schema;
pub mod scope;
pub mod types;
pub mod vnode;

pub use access::{can_access, AccessPolicy};
pub use cache::{LiveNode, NodeCache};
pub use config::MountOptions;
pub use error::{ProcError, ProcResult};
pub use mount::{ProcFs, ProcMount, MAX_SYMLINK_HOPS};
pub use ops::{ProcFsOps, ProcSession};
pub use readdir::{dirent_size, DirentBuffer, DirentSink, ListOutcome};
#[cfg(target_os = "linux")]
pub use registry::HostRegistry;
pub use registry::{
    DescriptorKind, DescriptorRecord, MemoryRegistry, ProcessRecord, ProcessRegistry,
    SocketRecord, TaskRecord, ThreadRecord,
};
pub use schema::{NodeKind, Schema, SchemaId};
pub use types::{DirEntry, FileAttr, FileType, SetAttr, StatFs};
pub use vnode::Vnode;

pub use synproc_types::{BaseNodeId, Credential, MountId, NodeIdentity};
