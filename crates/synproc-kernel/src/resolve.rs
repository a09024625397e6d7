//! Name resolution: one path component inside one directory.
//!
//! The directory's schema children are tried in order:
//!
//! - `..` and `.` are handled before anything else
//! - a child whose fixed name equals the component matches, inheriting the
//!   directory's pid and object id
//! - a descriptor expansion matches an all-digit name that is an open
//!   descriptor of the owning process
//! - a process, by-name or thread expansion matches a name starting with
//!   digits; the number must identify a live process (or a thread of the
//!   owning process) the caller is allowed to see
//!
//! A process the caller may not see resolves to `NotFound`, never
//! `AccessDenied`, so its existence is not revealed.

use tracing::trace;

use synproc_types::NodeIdentity;

use crate::error::{ProcError, ProcResult};
use crate::readdir::MAX_DIRENT_NAME;
use crate::schema::{NodeKind, Schema, SchemaFlags, SchemaId};
use crate::scope::Scope;

/// Result of a successful resolution: the child's identity and the schema
/// node describing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub identity: NodeIdentity,
    pub schema: SchemaId,
}

/// Split a name into its leading decimal number and the rest.
///
/// Returns `None` when the name does not start with a digit or the number
/// overflows.
pub fn leading_number(name: &str) -> Option<(u64, &str)> {
    let end = name
        .bytes()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(name.len());
    if end == 0 {
        return None;
    }
    let value = name[..end].parse::<u64>().ok()?;
    Some((value, &name[end..]))
}

/// The `by-name` entry for a process: `"<pid> <comm>"`.
///
/// `None` when the command name cannot form a path component (it contains
/// `/` or NUL) or the entry would not fit a packed record. Such processes
/// have no by-name link: listing, sizing and lookup all skip them.
pub fn process_entry_name(pid: i32, comm: &str) -> Option<String> {
    if comm.contains(['/', '\0']) {
        return None;
    }
    let name = format!("{pid} {comm}");
    (name.len() <= MAX_DIRENT_NAME).then_some(name)
}

/// Identity of a directory's parent.
///
/// The parent keeps the pid only if its schema node is process-owned, and
/// the object id only if it is thread-owned. The root is its own parent.
pub fn parent_of(schema: &Schema, dir: &NodeIdentity, dir_schema: SchemaId) -> Resolved {
    let Some(parent) = schema.parent(dir_schema) else {
        return Resolved {
            identity: *dir,
            schema: dir_schema,
        };
    };
    let p = schema.node(parent);
    let identity = NodeIdentity {
        mount: dir.mount,
        pid: dir.pid.filter(|_| p.flags.contains(SchemaFlags::PROCESS)),
        object: dir.object.filter(|_| p.flags.contains(SchemaFlags::THREAD)),
        base: p.base,
    };
    Resolved {
        identity,
        schema: parent,
    }
}

/// Resolve `name` inside the directory `dir` (schema position `dir_schema`).
pub fn resolve(
    scope: &Scope<'_>,
    dir: &NodeIdentity,
    dir_schema: SchemaId,
    name: &str,
) -> ProcResult<Resolved> {
    let schema = scope.schema;
    let dnode = schema.node(dir_schema);
    if !dnode.kind.is_directory() {
        return Err(ProcError::not_a_directory(dir.to_string()));
    }
    if name.is_empty() || name.contains('/') {
        return Err(ProcError::invalid_path(name));
    }

    if name == ".." {
        return Ok(parent_of(schema, dir, dir_schema));
    }
    if name == "." {
        return Ok(Resolved {
            identity: *dir,
            schema: dir_schema,
        });
    }

    for &child in schema.children(dir_schema) {
        let c = schema.node(child);
        if !c.name.is_empty() && c.name == name {
            trace!(%dir, name, "literal match");
            return Ok(Resolved {
                identity: dir.rebased(c.base),
                schema: child,
            });
        }

        match c.kind {
            NodeKind::DescriptorDir => {
                return resolve_descriptor(scope, dir, child, name);
            }
            NodeKind::ProcessDir | NodeKind::ProcessByName | NodeKind::ThreadDir => {
                let Some((number, rest)) = leading_number(name) else {
                    continue;
                };
                if c.kind != NodeKind::ProcessByName && !rest.is_empty() {
                    continue;
                }
                return resolve_numbered(scope, dir, child, name, number);
            }
            _ => {}
        }
    }
    Err(ProcError::not_found(name))
}

fn resolve_descriptor(
    scope: &Scope<'_>,
    dir: &NodeIdentity,
    child: SchemaId,
    name: &str,
) -> ProcResult<Resolved> {
    let Some((fd, "")) = leading_number(name) else {
        return Err(ProcError::not_found(name));
    };
    let Ok(fd) = i32::try_from(fd) else {
        return Err(ProcError::not_found(name));
    };
    let pid = dir.pid.ok_or_else(|| ProcError::not_found(name))?;
    let fds = scope
        .registry
        .descriptors(pid)
        .ok_or_else(|| ProcError::no_such_process(pid.to_string()))?;
    if !fds.contains(&fd) {
        return Err(ProcError::not_found(name));
    }
    Ok(Resolved {
        identity: dir
            .rebased(scope.schema.node(child).base)
            .with_object(Some(fd as u64)),
        schema: child,
    })
}

fn resolve_numbered(
    scope: &Scope<'_>,
    dir: &NodeIdentity,
    child: SchemaId,
    name: &str,
    number: u64,
) -> ProcResult<Resolved> {
    let c = scope.schema.node(child);
    let thread = c.kind == NodeKind::ThreadDir;

    let (pid, object) = if thread {
        let pid = dir.pid.ok_or_else(|| ProcError::not_found(name))?;
        (pid, Some(number))
    } else {
        let pid = i32::try_from(number).map_err(|_| ProcError::not_found(name))?;
        (pid, dir.object)
    };

    let Some(process) = scope.registry.process(pid) else {
        return Err(if thread {
            ProcError::no_such_process(pid.to_string())
        } else {
            ProcError::not_found(name)
        });
    };

    if c.kind == NodeKind::ProcessByName
        && process_entry_name(pid, &process.comm).as_deref() != Some(name)
    {
        return Err(ProcError::not_found(name));
    }

    if !scope.permits(&process) {
        trace!(pid, uid = scope.cred.uid, "hiding process from caller");
        return Err(ProcError::not_found(name));
    }

    if thread {
        let tids = scope
            .registry
            .thread_ids(pid)
            .ok_or_else(|| ProcError::no_such_process(pid.to_string()))?;
        if !tids.contains(&number) {
            return Err(ProcError::not_found(name));
        }
    }

    Ok(Resolved {
        identity: NodeIdentity {
            mount: dir.mount,
            pid: Some(pid),
            object,
            base: c.base,
        },
        schema: child,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessPolicy;
    use crate::registry::{DescriptorRecord, MemoryRegistry, ProcessRecord, ThreadRecord};
    use synproc_types::{Credential, MountId};

    #[test]
    fn test_leading_number() {
        assert_eq!(leading_number("123"), Some((123, "")));
        assert_eq!(leading_number("12 zsh"), Some((12, " zsh")));
        assert_eq!(leading_number("x12"), None);
        assert_eq!(leading_number(""), None);
        assert_eq!(leading_number("99999999999999999999999"), None);
    }

    struct Fixture {
        schema: Schema,
        reg: MemoryRegistry,
        mount: MountId,
    }

    impl Fixture {
        fn new() -> Self {
            let reg = MemoryRegistry::new();
            reg.insert_process(ProcessRecord::new(10, "mine").with_owner(501, 20));
            reg.insert_process(ProcessRecord::new(11, "theirs").with_owner(0, 0));
            reg.add_thread(10, ThreadRecord::new(77, "t"));
            reg.add_descriptor(10, DescriptorRecord::file(4, "/etc/hosts"));
            Self {
                schema: Schema::build(),
                reg,
                mount: MountId::from_raw(3),
            }
        }

        fn scope<'a>(&'a self, cred: &'a Credential) -> Scope<'a> {
            Scope::new(&self.schema, &self.reg, AccessPolicy::default(), cred)
        }

        fn root(&self) -> (NodeIdentity, SchemaId) {
            (NodeIdentity::root(self.mount), self.schema.root())
        }

        fn walk(&self, cred: &Credential, path: &[&str]) -> ProcResult<Resolved> {
            let scope = self.scope(cred);
            let (mut id, mut sid) = self.root();
            for name in path {
                let r = resolve(&scope, &id, sid, name)?;
                id = r.identity;
                sid = r.schema;
            }
            Ok(Resolved {
                identity: id,
                schema: sid,
            })
        }
    }

    #[test]
    fn test_literal_and_process() {
        let fx = Fixture::new();
        let cred = Credential::new(10, 501, 20);
        let r = fx.walk(&cred, &["10", "ppid"]).unwrap();
        assert_eq!(r.identity.pid, Some(10));
        assert_eq!(fx.schema.node(r.schema).name, "ppid");

        let byname = fx.walk(&cred, &["byname"]).unwrap();
        assert_eq!(byname.identity.pid, None);
    }

    #[test]
    fn test_hidden_process_is_not_found() {
        let fx = Fixture::new();
        let cred = Credential::new(10, 501, 20);
        let err = fx.walk(&cred, &["11"]).unwrap_err();
        assert!(matches!(err, ProcError::NotFound(_)));
        // Root sees it.
        assert!(fx.walk(&Credential::root(1), &["11"]).is_ok());
    }

    #[test]
    fn test_missing_and_malformed() {
        let fx = Fixture::new();
        let cred = Credential::root(1);
        assert!(matches!(fx.walk(&cred, &["12"]), Err(ProcError::NotFound(_))));
        assert!(matches!(fx.walk(&cred, &["10x"]), Err(ProcError::NotFound(_))));
        assert!(matches!(fx.walk(&cred, &["nope"]), Err(ProcError::NotFound(_))));
        assert!(matches!(
            fx.walk(&cred, &["10", "pid", "x"]),
            Err(ProcError::NotADirectory(_))
        ));
    }

    #[test]
    fn test_by_name_requires_exact_match() {
        let fx = Fixture::new();
        let cred = Credential::root(1);
        let r = fx.walk(&cred, &["byname", "10 mine"]).unwrap();
        assert_eq!(r.identity.pid, Some(10));
        assert_eq!(fx.schema.node(r.schema).kind, NodeKind::ProcessByName);
        assert!(fx.walk(&cred, &["byname", "10 other"]).is_err());
        assert!(fx.walk(&cred, &["byname", "10"]).is_err());
    }

    #[test]
    fn test_entry_name_needs_a_clean_command() {
        assert_eq!(process_entry_name(7, "zsh").as_deref(), Some("7 zsh"));
        assert_eq!(process_entry_name(7, "kworker/0:1"), None);
        assert_eq!(process_entry_name(7, "a\0b"), None);
        assert_eq!(process_entry_name(7, &"x".repeat(300)), None);
        // "7 " plus 253 bytes is exactly the longest record name.
        assert!(process_entry_name(7, &"x".repeat(253)).is_some());
        assert!(process_entry_name(7, &"x".repeat(254)).is_none());
    }

    #[test]
    fn test_by_name_skips_unlinkable_commands() {
        let fx = Fixture::new();
        let long = "x".repeat(300);
        fx.reg.insert_process(ProcessRecord::new(12, long.clone()));
        let cred = Credential::root(1);
        let err = fx.walk(&cred, &["byname", &format!("12 {long}")]).unwrap_err();
        assert!(matches!(err, ProcError::NotFound(_)));
        // The process itself is still reachable by pid.
        assert!(fx.walk(&cred, &["12"]).is_ok());
    }

    #[test]
    fn test_threads_and_descriptors() {
        let fx = Fixture::new();
        let cred = Credential::root(1);
        let t = fx.walk(&cred, &["10", "threads", "77"]).unwrap();
        assert_eq!(t.identity.object, Some(77));
        assert!(matches!(
            fx.walk(&cred, &["10", "threads", "78"]),
            Err(ProcError::NotFound(_))
        ));

        let info = fx.walk(&cred, &["10", "threads", "77", "info"]).unwrap();
        assert_eq!(info.identity.object, Some(77));

        let fd = fx.walk(&cred, &["10", "fd", "4", "details"]).unwrap();
        assert_eq!(fd.identity.object, Some(4));
        assert!(fx.walk(&cred, &["10", "fd", "5"]).is_err());
        assert!(fx.walk(&cred, &["10", "fd", "4 "]).is_err());
    }

    #[test]
    fn test_vanished_owner_is_esrch() {
        let fx = Fixture::new();
        let cred = Credential::root(1);
        let threads = fx.walk(&cred, &["10", "threads"]).unwrap();
        fx.reg.remove_process(10);
        let scope = fx.scope(&cred);
        let err = resolve(&scope, &threads.identity, threads.schema, "77").unwrap_err();
        assert!(matches!(err, ProcError::NoSuchProcess(_)));
    }

    #[test]
    fn test_dotdot_round_trips() {
        let fx = Fixture::new();
        let cred = Credential::root(1);
        let scope = fx.scope(&cred);
        for path in [
            &["10"][..],
            &["10", "fd"],
            &["10", "fd", "4"],
            &["10", "threads", "77"],
            &["byname"],
        ] {
            let dir = fx.walk(&cred, path).unwrap();
            let parent = resolve(&scope, &dir.identity, dir.schema, "..").unwrap();
            let back = resolve(&scope, &parent.identity, parent.schema, path[path.len() - 1]).unwrap();
            assert_eq!(back, dir, "round trip through .. for {path:?}");
        }
    }

    #[test]
    fn test_root_is_its_own_parent() {
        let fx = Fixture::new();
        let cred = Credential::root(1);
        let scope = fx.scope(&cred);
        let (id, sid) = fx.root();
        let up = resolve(&scope, &id, sid, "..").unwrap();
        assert_eq!(up.identity, id);
        let here = resolve(&scope, &id, sid, ".").unwrap();
        assert_eq!(here.identity, id);
    }
}
