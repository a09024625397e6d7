//! Filesystem instances and mounts.
//!
//! A [`ProcFs`] owns what is shared by every mount: the schema, the node
//! cache and the process registry. [`ProcFs::mount`] creates a
//! [`ProcMount`] with its own id, options and root node. All node-level
//! operations go through the mount, which builds a [`Scope`] for the
//! caller and delegates to the resolve, readdir, attribute and data
//! modules.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, trace};

use synproc_types::{Credential, MountId, NodeIdentity};

use crate::access::AccessPolicy;
use crate::attr;
use crate::cache::NodeCache;
use crate::config::MountOptions;
use crate::data::{link_target, Transfer};
use crate::error::{ProcError, ProcResult};
use crate::readdir::{self, DirentSink, ListOutcome};
use crate::registry::ProcessRegistry;
use crate::resolve::resolve;
use crate::schema::{Schema, SchemaId};
use crate::scope::Scope;
use crate::types::{FileAttr, StatFs};
use crate::vnode::Vnode;

/// Symlinks followed in one path walk before giving up.
pub const MAX_SYMLINK_HOPS: usize = 8;

struct Inner {
    schema: Arc<Schema>,
    cache: Arc<NodeCache<Vnode>>,
    registry: Arc<dyn ProcessRegistry>,
}

/// A process namespace over one registry. Cheap to clone.
#[derive(Clone)]
pub struct ProcFs {
    inner: Arc<Inner>,
}

impl fmt::Debug for ProcFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcFs")
            .field("schema_nodes", &self.inner.schema.len())
            .field("live_nodes", &self.inner.cache.len())
            .finish()
    }
}

impl ProcFs {
    pub fn new(registry: Arc<dyn ProcessRegistry>) -> Self {
        Self {
            inner: Arc::new(Inner {
                schema: Schema::shared(),
                cache: Arc::new(NodeCache::new()),
                registry,
            }),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    pub fn registry(&self) -> &dyn ProcessRegistry {
        &*self.inner.registry
    }

    /// Number of live nodes across all mounts.
    pub fn live_nodes(&self) -> usize {
        self.inner.cache.len()
    }

    /// Create a mount instance with a fresh mount id.
    pub fn mount(&self, options: MountOptions) -> ProcResult<ProcMount> {
        let id = MountId::next();
        let schema_root = self.inner.schema.root();
        let root = self.node(NodeIdentity::root(id), schema_root)?;
        debug!(mount = %id, opts = %options.to_opts(), "mounted");
        Ok(ProcMount {
            id,
            policy: AccessPolicy::from_options(&options),
            options,
            mounted_at: SystemTime::now(),
            fs: self.clone(),
            root,
        })
    }

    fn node(&self, identity: NodeIdentity, schema_id: SchemaId) -> ProcResult<Arc<Vnode>> {
        let kind = self.inner.schema.node(schema_id).kind;
        let cache = &self.inner.cache;
        let (_, vnode) = cache.find_or_create(identity, schema_id, |live| {
            Ok(Arc::new(Vnode::new(*live, kind, Arc::clone(cache))))
        })?;
        Ok(vnode)
    }
}

/// One mounted instance of the namespace.
pub struct ProcMount {
    id: MountId,
    options: MountOptions,
    policy: AccessPolicy,
    mounted_at: SystemTime,
    fs: ProcFs,
    root: Arc<Vnode>,
}

impl fmt::Debug for ProcMount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcMount")
            .field("id", &self.id)
            .field("options", &self.options)
            .finish()
    }
}

impl ProcMount {
    pub fn id(&self) -> MountId {
        self.id
    }

    pub fn options(&self) -> &MountOptions {
        &self.options
    }

    pub fn policy(&self) -> AccessPolicy {
        self.policy
    }

    pub fn mounted_at(&self) -> SystemTime {
        self.mounted_at
    }

    pub fn fs(&self) -> &ProcFs {
        &self.fs
    }

    /// The root node. Every call returns the same object.
    pub fn root(&self) -> Arc<Vnode> {
        Arc::clone(&self.root)
    }

    fn scope<'a>(&'a self, cred: &'a Credential) -> Scope<'a> {
        Scope::new(self.fs.schema(), self.fs.registry(), self.policy, cred)
    }

    fn check_mount(&self, node: &Vnode) -> ProcResult<()> {
        if node.identity().mount != self.id {
            return Err(ProcError::invalid_operation(format!(
                "node {} belongs to another mount",
                node.identity()
            )));
        }
        Ok(())
    }

    /// Look up `name` in the directory `dir`.
    pub fn lookup(&self, dir: &Vnode, name: &str, cred: &Credential) -> ProcResult<Arc<Vnode>> {
        self.check_mount(dir)?;
        let found = resolve(&self.scope(cred), dir.identity(), dir.schema(), name)?;
        self.fs.node(found.identity, found.schema)
    }

    /// List `dir` from byte offset `offset` into `sink`.
    pub fn readdir(
        &self,
        dir: &Vnode,
        offset: u64,
        sink: &mut dyn DirentSink,
        cred: &Credential,
    ) -> ProcResult<ListOutcome> {
        self.check_mount(dir)?;
        readdir::list(&self.scope(cred), dir.identity(), dir.schema(), offset, sink)
    }

    pub fn getattr(&self, node: &Vnode, cred: &Credential) -> ProcResult<FileAttr> {
        self.check_mount(node)?;
        attr::getattr(
            &self.scope(cred),
            self.id,
            node.schema(),
            node.identity(),
            self.mounted_at,
        )
    }

    /// Read file data at `offset` into `buf`, returning the byte count.
    pub fn read(
        &self,
        node: &Vnode,
        offset: u64,
        buf: &mut [u8],
        cred: &Credential,
    ) -> ProcResult<usize> {
        self.check_mount(node)?;
        if node.is_dir() {
            return Err(ProcError::is_a_directory(node.identity().to_string()));
        }
        let Some(read) = self.fs.schema().node(node.schema()).read_fn else {
            return Err(ProcError::invalid_operation(format!(
                "{} node has no data",
                node.kind()
            )));
        };
        let mut t = Transfer::new(offset, buf);
        read(&self.scope(cred), node.identity(), &mut t)?;
        Ok(t.written())
    }

    pub fn readlink(&self, node: &Vnode, cred: &Credential) -> ProcResult<String> {
        self.check_mount(node)?;
        link_target(&self.scope(cred), node.kind(), node.identity())
    }

    /// Resolve a slash-separated path from the root.
    ///
    /// Symlinks in intermediate components are always followed; the final
    /// component is followed only if `follow_final` is set. Relative link
    /// targets resolve against the directory containing the link.
    pub fn walk(&self, path: &str, cred: &Credential, follow_final: bool) -> ProcResult<Arc<Vnode>> {
        let mut pending: VecDeque<String> = split_path(path);
        let mut current = self.root();
        let mut hops = 0;

        while let Some(name) = pending.pop_front() {
            let next = self.lookup(&current, &name, cred)?;
            let follow = next.is_symlink() && (!pending.is_empty() || follow_final);
            if !follow {
                current = next;
                continue;
            }
            hops += 1;
            if hops > MAX_SYMLINK_HOPS {
                return Err(ProcError::TooManySymlinks);
            }
            let target = self.readlink(&next, cred)?;
            trace!(from = %name, to = %target, "following symlink");
            if target.starts_with('/') {
                current = self.root();
            }
            for part in split_path(&target).into_iter().rev() {
                pending.push_front(part);
            }
        }
        Ok(current)
    }

    /// Fixed capacity report.
    pub fn statfs(&self) -> StatFs {
        StatFs::default()
    }
}

impl Drop for ProcMount {
    fn drop(&mut self) {
        debug!(mount = %self.id, "unmounting");
    }
}

fn split_path(path: &str) -> VecDeque<String> {
    path.split('/')
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}
