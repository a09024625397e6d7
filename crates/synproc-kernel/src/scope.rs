//! Per-call view of the namespace.

use synproc_types::{Credential, NodeIdentity};

use crate::access::AccessPolicy;
use crate::error::{ProcError, ProcResult};
use crate::registry::{ProcessRecord, ProcessRegistry};
use crate::schema::Schema;

/// What one lookup, listing, attribute or read call works against: the
/// shared schema, the registry snapshot provider, the mount's policy and
/// the caller. Cheap to copy; holds no locks.
#[derive(Clone, Copy)]
pub struct Scope<'a> {
    pub schema: &'a Schema,
    pub registry: &'a dyn ProcessRegistry,
    pub policy: AccessPolicy,
    pub cred: &'a Credential,
}

impl<'a> Scope<'a> {
    pub fn new(
        schema: &'a Schema,
        registry: &'a dyn ProcessRegistry,
        policy: AccessPolicy,
        cred: &'a Credential,
    ) -> Self {
        Self {
            schema,
            registry,
            policy,
            cred,
        }
    }

    /// Whether per-process checks apply to this caller.
    pub fn checks_access(&self) -> bool {
        self.policy.applies_to(self.cred)
    }

    /// Whether the caller may see `process`.
    pub fn permits(&self, process: &ProcessRecord) -> bool {
        self.policy.permits(self.cred, process)
    }

    /// Processes the caller may see, ascending by pid. Listing and the
    /// process-count size function both go through here so they agree.
    pub fn visible_processes(&self) -> Vec<ProcessRecord> {
        let mut procs = self.registry.processes();
        procs.retain(|p| self.permits(p));
        procs
    }

    /// The process owning `identity`, or `NoSuchProcess` if it has exited.
    pub fn owner(&self, identity: &NodeIdentity) -> ProcResult<ProcessRecord> {
        let pid = owner_pid(identity)?;
        self.registry
            .process(pid)
            .ok_or_else(|| ProcError::no_such_process(pid.to_string()))
    }
}

/// The owning pid of a process-linked identity.
pub fn owner_pid(identity: &NodeIdentity) -> ProcResult<i32> {
    identity
        .pid
        .ok_or_else(|| ProcError::invalid_operation(format!("node {identity} has no owning process")))
}

/// The owning object id (thread id or descriptor number) of an identity.
pub fn owner_object(identity: &NodeIdentity) -> ProcResult<u64> {
    identity
        .object
        .ok_or_else(|| ProcError::invalid_operation(format!("node {identity} has no owning object")))
}
