//! Node identity cache.
//!
//! Guarantees at most one live node per [`NodeIdentity`] and at most one
//! in-flight creation of its representation object. One mutex guards the
//! table and every slot's attachment flags; a condvar wakes callers that
//! found an attachment in progress.
//!
//! The cache holds only a `Weak` to each representation. The host owns the
//! strong references and must call [`NodeCache::reclaim`] when it releases
//! the last one (the `Vnode` drop handler does). Serial numbers tell a
//! current slot from a recycled one, so a late reclaim for an old
//! incarnation never evicts its successor.
//!
//! No strong representation reference is ever dropped while the table lock
//! is held: reclamation takes the same lock.

use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

use synproc_types::NodeIdentity;

use crate::error::{ProcError, ProcResult};
use crate::schema::SchemaId;

/// Handle to a cache entry. Cheap to copy; carries the serial that
/// distinguishes this incarnation from any later one with the same identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveNode {
    pub identity: NodeIdentity,
    pub schema: SchemaId,
    pub serial: u64,
}

#[derive(Debug)]
struct Slot<R> {
    serial: u64,
    schema: SchemaId,
    rep: Option<Weak<R>>,
    attaching: bool,
    waiting: bool,
}

impl<R> Slot<R> {
    fn live(&self, identity: NodeIdentity) -> LiveNode {
        LiveNode {
            identity,
            schema: self.schema,
            serial: self.serial,
        }
    }
}

enum Found<R> {
    Absent,
    Busy,
    Attached(LiveNode, Weak<R>),
    Unattached(LiveNode),
}

/// Table of live nodes keyed by identity.
#[derive(Debug)]
pub struct NodeCache<R> {
    table: Mutex<HashMap<NodeIdentity, Slot<R>>>,
    attached: Condvar,
    next_serial: AtomicU64,
}

impl<R> Default for NodeCache<R> {
    fn default() -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            attached: Condvar::new(),
            next_serial: AtomicU64::new(1),
        }
    }
}

impl<R: Send + Sync> NodeCache<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the live node for `identity` and a strong reference to its
    /// representation, creating both if needed.
    ///
    /// `factory` runs at most once per call, without the table lock held,
    /// and only by the single caller that won the right to attach. Other
    /// callers for the same identity block until it finishes. If the
    /// factory fails the entry is removed and the error returned; waiters
    /// retry from scratch.
    pub fn find_or_create<F>(
        &self,
        identity: NodeIdentity,
        schema: SchemaId,
        factory: F,
    ) -> ProcResult<(LiveNode, Arc<R>)>
    where
        F: FnOnce(&LiveNode) -> ProcResult<Arc<R>>,
    {
        let mut spare: Option<Slot<R>> = None;
        let mut table = self.table.lock();

        let node = loop {
            let found = match table.get_mut(&identity) {
                None => Found::Absent,
                Some(slot) if slot.attaching => {
                    slot.waiting = true;
                    Found::Busy
                }
                Some(slot) => {
                    let node = slot.live(identity);
                    match &slot.rep {
                        Some(weak) => Found::Attached(node, weak.clone()),
                        None => {
                            slot.attaching = true;
                            Found::Unattached(node)
                        }
                    }
                }
            };

            match found {
                Found::Absent => match spare.take() {
                    Some(slot) => {
                        table.try_reserve(1).map_err(|_| ProcError::OutOfMemory)?;
                        trace!(%identity, serial = slot.serial, "inserting live node");
                        table.insert(identity, slot);
                    }
                    None => {
                        // Build the entry unlocked, then look again: another
                        // caller may have inserted one meanwhile.
                        drop(table);
                        spare = Some(Slot {
                            serial: self.next_serial.fetch_add(1, Ordering::Relaxed),
                            schema,
                            rep: None,
                            attaching: false,
                            waiting: false,
                        });
                        table = self.table.lock();
                    }
                },
                Found::Busy => {
                    self.attached.wait(&mut table);
                }
                Found::Attached(node, weak) => {
                    drop(table);
                    if let Some(rep) = weak.upgrade() {
                        return Ok((node, rep));
                    }
                    // Reclaim is running (or about to) for the old
                    // incarnation. Evict it so a fresh one can be created;
                    // the late reclaim sees a different serial and no-ops.
                    drop(weak);
                    table = self.table.lock();
                    if table
                        .get(&identity)
                        .is_some_and(|s| s.serial == node.serial && !s.attaching)
                    {
                        debug!(%identity, serial = node.serial, "evicting stale live node");
                        table.remove(&identity);
                    }
                }
                Found::Unattached(node) => break node,
            }
        };
        drop(table);
        drop(spare);

        let guard = AttachGuard {
            cache: self,
            node,
            armed: true,
        };
        let result = factory(&node);
        guard.finish(result.as_ref().ok());
        match result {
            Ok(rep) => {
                debug!(identity = %node.identity, serial = node.serial, "attached representation");
                Ok((node, rep))
            }
            Err(e) => {
                debug!(identity = %node.identity, error = %e, "representation factory failed");
                Err(e)
            }
        }
    }

    /// Remove `node` from the table. Called by the host when it releases the
    /// representation object. A stale handle (older serial) is ignored.
    pub fn reclaim(&self, node: &LiveNode) {
        let mut table = self.table.lock();
        let current = table
            .get(&node.identity)
            .is_some_and(|s| s.serial == node.serial && !s.attaching);
        if current {
            table.remove(&node.identity);
            debug!(identity = %node.identity, serial = node.serial, "reclaimed live node");
        } else {
            trace!(identity = %node.identity, serial = node.serial, "reclaim of superseded node");
        }
    }

    /// Number of entries in the table.
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }

    /// Whether an entry exists for `identity`.
    pub fn contains(&self, identity: &NodeIdentity) -> bool {
        self.table.lock().contains_key(identity)
    }

    fn finish_attach(&self, node: &LiveNode, rep: Option<&Arc<R>>) {
        let mut table = self.table.lock();
        let mut wake = false;
        match table.get_mut(&node.identity) {
            Some(slot) if slot.serial == node.serial => {
                slot.attaching = false;
                wake = std::mem::take(&mut slot.waiting);
                match rep {
                    Some(rep) => slot.rep = Some(Arc::downgrade(rep)),
                    None => {
                        table.remove(&node.identity);
                    }
                }
            }
            _ => warn!(identity = %node.identity, "attaching slot vanished"),
        }
        drop(table);
        if wake {
            self.attached.notify_all();
        }
    }
}

/// Clears the attachment flag even if the factory panics, so waiters are
/// never stranded.
struct AttachGuard<'a, R: Send + Sync> {
    cache: &'a NodeCache<R>,
    node: LiveNode,
    armed: bool,
}

impl<R: Send + Sync> AttachGuard<'_, R> {
    fn finish(mut self, rep: Option<&Arc<R>>) {
        self.armed = false;
        self.cache.finish_attach(&self.node, rep);
    }
}

impl<R: Send + Sync> Drop for AttachGuard<'_, R> {
    fn drop(&mut self) {
        if self.armed {
            self.cache.finish_attach(&self.node, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::sync::atomic::AtomicUsize;
    use synproc_types::{BaseNodeId, MountId};

    #[derive(Debug)]
    struct Rep(u32);

    fn ident(base: u16) -> NodeIdentity {
        NodeIdentity::new(MountId::from_raw(1), BaseNodeId::from_raw(base))
    }

    fn schema_id() -> SchemaId {
        crate::schema::Schema::shared().root()
    }

    #[test]
    fn test_create_then_find() {
        let cache = NodeCache::<Rep>::new();
        let calls = AtomicUsize::new(0);
        let make = |_: &LiveNode| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Rep(7)))
        };

        let (n1, r1) = cache.find_or_create(ident(5), schema_id(), make).unwrap();
        let (n2, r2) = cache.find_or_create(ident(5), schema_id(), make).unwrap();
        assert_eq!(n1, n2);
        assert!(Arc::ptr_eq(&r1, &r2));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_distinct_identities() {
        let cache = NodeCache::<Rep>::new();
        let (_, a) = cache
            .find_or_create(ident(5), schema_id(), |_| Ok(Arc::new(Rep(1))))
            .unwrap();
        let (_, b) = cache
            .find_or_create(ident(5).with_pid(Some(9)), schema_id(), |_| Ok(Arc::new(Rep(2))))
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_factory_failure_removes_entry() {
        let cache = NodeCache::<Rep>::new();
        let err = cache
            .find_or_create(ident(5), schema_id(), |_| Err(ProcError::OutOfMemory))
            .unwrap_err();
        assert!(matches!(err, ProcError::OutOfMemory));
        assert!(cache.is_empty());

        let (_, rep) = cache
            .find_or_create(ident(5), schema_id(), |_| Ok(Arc::new(Rep(3))))
            .unwrap();
        assert_eq!(rep.0, 3);
    }

    #[test]
    fn test_reclaim_then_recreate_gets_new_serial() {
        let cache = NodeCache::<Rep>::new();
        let (n1, r1) = cache
            .find_or_create(ident(5), schema_id(), |_| Ok(Arc::new(Rep(1))))
            .unwrap();
        drop(r1);
        cache.reclaim(&n1);
        assert!(!cache.contains(&ident(5)));

        let (n2, _r2) = cache
            .find_or_create(ident(5), schema_id(), |_| Ok(Arc::new(Rep(2))))
            .unwrap();
        assert_ne!(n1.serial, n2.serial);

        // A late reclaim for the old incarnation leaves the new one alone.
        cache.reclaim(&n1);
        assert!(cache.contains(&ident(5)));
    }

    #[test]
    fn test_stale_rep_is_replaced() {
        let cache = NodeCache::<Rep>::new();
        let (n1, r1) = cache
            .find_or_create(ident(5), schema_id(), |_| Ok(Arc::new(Rep(1))))
            .unwrap();
        // Host dropped the object but has not reclaimed yet.
        drop(r1);
        let (n2, r2) = cache
            .find_or_create(ident(5), schema_id(), |_| Ok(Arc::new(Rep(2))))
            .unwrap();
        assert_ne!(n1.serial, n2.serial);
        assert_eq!(r2.0, 2);
        cache.reclaim(&n1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_factory_panic_does_not_wedge() {
        let cache = NodeCache::<Rep>::new();
        let result = catch_unwind(AssertUnwindSafe(|| {
            let _ = cache.find_or_create(ident(5), schema_id(), |_| -> ProcResult<Arc<Rep>> {
                panic!("factory blew up")
            });
        }));
        assert!(result.is_err());
        assert!(cache.is_empty());
        let (_, rep) = cache
            .find_or_create(ident(5), schema_id(), |_| Ok(Arc::new(Rep(4))))
            .unwrap();
        assert_eq!(rep.0, 4);
    }
}
