//! Attribute synthesis.

use std::time::SystemTime;

use synproc_types::{MountId, NodeIdentity};

use crate::access::AccessPolicy;
use crate::data::node_size;
use crate::error::ProcResult;
use crate::schema::{NodeKind, SchemaId};
use crate::scope::Scope;
use crate::types::FileAttr;

/// Permission bits for a node of `kind`.
///
/// The root and descriptor directories are world-readable, symlinks are
/// 0777, and everything else is 0555 masked by the mount's mode mask.
pub fn permissions(kind: NodeKind, policy: AccessPolicy) -> u32 {
    match kind {
        NodeKind::Root | NodeKind::DescriptorDir => 0o555,
        NodeKind::Symlink | NodeKind::ProcessByName => 0o777,
        _ => 0o555 & policy.mode_mask(),
    }
}

/// Attributes of the node `id` at schema position `schema_id`.
///
/// Process-linked nodes report the owning process's effective ids and start
/// time, and fail with `NoSuchProcess` once that process has exited. Other
/// nodes report the caller's real ids and `mounted_at`.
pub fn getattr(
    scope: &Scope<'_>,
    mount: MountId,
    schema_id: SchemaId,
    id: &NodeIdentity,
    mounted_at: SystemTime,
) -> ProcResult<FileAttr> {
    let node = scope.schema.node(schema_id);
    let kind = node.kind.file_type();

    let (uid, gid, mtime) = match id.pid {
        Some(_) => {
            let p = scope.owner(id)?;
            (p.uid, p.gid, p.start_time)
        }
        None => (scope.cred.ruid, scope.cred.gid, mounted_at),
    };

    Ok(FileAttr {
        size: node_size(scope, schema_id, id),
        kind,
        perm: permissions(node.kind, scope.policy),
        file_id: id.file_id(),
        fsid: mount.get(),
        mtime,
        nlink: if kind.is_dir() { 2 } else { 1 },
        uid,
        gid,
    })
}
