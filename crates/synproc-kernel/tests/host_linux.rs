//! The namespace over the real `/proc`.

#![cfg(target_os = "linux")]

use std::path::Path;
use std::sync::Arc;

use synproc_kernel::{
    Credential, HostRegistry, MountOptions, ProcFs, ProcFsOps, ProcSession, ProcessRegistry,
    data::ProcInfoBlock,
};

fn session() -> ProcSession {
    let reg = Arc::new(HostRegistry::new().expect("host /proc"));
    let fs = ProcFs::new(reg);
    let mount = fs.mount(MountOptions::default()).unwrap();
    ProcSession::new(Arc::new(mount), Credential::current())
}

#[test]
fn own_process_is_visible() {
    let s = session();
    let me = std::process::id() as i32;

    let link = s.readlink(Path::new("/curproc")).unwrap();
    assert_eq!(link.to_str().unwrap(), me.to_string());

    let pid = s.read_all(Path::new("/curproc/pid")).unwrap();
    assert_eq!(pid, me.to_ne_bytes());

    let entries = s.readdir(Path::new("/")).unwrap();
    assert!(entries.iter().any(|e| e.name == me.to_string()));
}

#[test]
fn own_info_block_decodes() {
    let s = session();
    let me = std::process::id();
    let bytes = s.read_all(Path::new(&format!("/{me}/info"))).unwrap();
    assert_eq!(bytes.len() as u64, ProcInfoBlock::SIZE);
    let block: ProcInfoBlock = bytemuck::pod_read_unaligned(&bytes);
    assert_eq!(block.pid, me);
    assert_eq!(block.uid, Credential::current().uid);
}

#[test]
fn own_threads_and_descriptors_are_listed() {
    let reg = HostRegistry::new().unwrap();
    let me = std::process::id() as i32;
    let tids = reg.thread_ids(me).unwrap();
    assert!(tids.contains(&(me as u64)));
    assert!(!reg.descriptors(me).unwrap().is_empty());

    let s = session();
    let fds = s.readdir(Path::new(&format!("/{me}/fd"))).unwrap();
    assert!(fds.len() > 2);
}
