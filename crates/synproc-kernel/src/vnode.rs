//! Representation objects handed to the host.

use std::fmt;
use std::sync::Arc;

use synproc_types::NodeIdentity;

use crate::cache::{LiveNode, NodeCache};
use crate::schema::{NodeKind, SchemaId};
use crate::types::FileType;

/// The object a host file-access layer holds for one live node.
///
/// Clone the `Arc` to add a reference. When the last reference goes away
/// the node is reclaimed from the cache.
pub struct Vnode {
    node: LiveNode,
    kind: NodeKind,
    cache: Arc<NodeCache<Vnode>>,
}

impl Vnode {
    pub(crate) fn new(node: LiveNode, kind: NodeKind, cache: Arc<NodeCache<Vnode>>) -> Self {
        Self { node, kind, cache }
    }

    pub fn live(&self) -> &LiveNode {
        &self.node
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.node.identity
    }

    pub fn schema(&self) -> SchemaId {
        self.node.schema
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn file_type(&self) -> FileType {
        self.kind.file_type()
    }

    pub fn is_dir(&self) -> bool {
        self.file_type().is_dir()
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type().is_symlink()
    }
}

impl fmt::Debug for Vnode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vnode")
            .field("identity", &self.node.identity.to_string())
            .field("kind", &self.kind)
            .field("serial", &self.node.serial)
            .finish()
    }
}

impl Drop for Vnode {
    fn drop(&mut self) {
        self.cache.reclaim(&self.node);
    }
}
