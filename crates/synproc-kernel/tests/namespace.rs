//! End-to-end behaviour of a mounted namespace over an in-memory registry.

use std::path::Path;
use std::sync::Arc;

use synproc_kernel::{
    Credential, DescriptorRecord, DirEntry, DirentBuffer, FileType, MemoryRegistry, MountOptions,
    ProcError, ProcFs, ProcFsOps, ProcMount, ProcSession, ProcessRecord, SocketRecord,
    ThreadRecord, dirent_size, readdir::parse_dirents,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

struct World {
    reg: Arc<MemoryRegistry>,
    fs: ProcFs,
    mount: Arc<ProcMount>,
}

fn world(opts: &str) -> World {
    init_tracing();
    let reg = Arc::new(MemoryRegistry::new());
    reg.insert_process(ProcessRecord::new(1, "init").with_parent(0));
    reg.insert_process(ProcessRecord::new(30, "daemon"));
    reg.insert_process(ProcessRecord::new(400, "shell").with_owner(501, 20));
    reg.insert_process(ProcessRecord::new(401, "vim").with_owner(501, 20).with_parent(400));
    reg.add_thread(400, ThreadRecord::new(402, "helper"));

    let fs = ProcFs::new(reg.clone());
    let mount = Arc::new(fs.mount(MountOptions::parse_opts(opts).unwrap()).unwrap());
    World { reg, fs, mount }
}

fn names(entries: &[DirEntry]) -> Vec<&str> {
    entries.iter().map(|e| e.name.as_str()).collect()
}

#[test]
fn every_process_has_a_dir_and_one_by_name_link() {
    let w = world("");
    let s = ProcSession::new(w.mount.clone(), Credential::root(1));
    let byname = s.readdir(Path::new("/byname")).unwrap();

    for pid in [1, 30, 400, 401] {
        let attr = s.getattr(Path::new(&format!("/{pid}"))).unwrap();
        assert!(attr.is_dir());

        let prefix = format!("{pid} ");
        let links: Vec<_> = byname
            .iter()
            .filter(|e| e.name.starts_with(&prefix))
            .collect();
        assert_eq!(links.len(), 1, "pid {pid}");
        assert_eq!(links[0].kind, FileType::Symlink);
        let target = s
            .readlink(&Path::new("/byname").join(&links[0].name))
            .unwrap();
        assert_eq!(target, Path::new(&format!("../{pid}")));
    }
}

#[test]
fn root_listing_matches_root_size() {
    let w = world("");
    let cred = Credential::new(400, 501, 20);
    let s = ProcSession::new(w.mount.clone(), cred);

    let entries = s.readdir(Path::new("/")).unwrap();
    assert_eq!(names(&entries), vec![".", "..", "curproc", "byname", "400", "401"]);
    assert_eq!(s.getattr(Path::new("/")).unwrap().size, entries.len() as u64);

    let root = ProcSession::new(w.mount.clone(), Credential::root(1));
    let all = root.readdir(Path::new("/")).unwrap();
    assert_eq!(all.len(), 8);
    assert_eq!(root.getattr(Path::new("/")).unwrap().size, 8);
}

#[test]
fn paged_listing_sees_every_entry_once() {
    let w = world("noprocperms");
    let cred = Credential::new(400, 501, 20);
    let root = w.mount.root();

    let mut seen = Vec::new();
    let mut offset = 0;
    loop {
        let mut raw = [0u8; 40];
        let mut buf = DirentBuffer::new(&mut raw);
        let outcome = w.mount.readdir(&root, offset, &mut buf, &cred).unwrap();
        let used = buf.used();
        for (_, _, name) in parse_dirents(&raw[..used]) {
            offset += dirent_size(&name) as u64;
            seen.push(name);
        }
        assert_eq!(outcome.next_offset, offset);
        if outcome.eof {
            break;
        }
    }
    assert_eq!(
        seen,
        vec![".", "..", "curproc", "byname", "1", "30", "400", "401"]
    );
}

fn open_descriptors(reg: &MemoryRegistry, pid: i32) {
    for fd in [0, 1, 2, 10] {
        reg.add_descriptor(pid, DescriptorRecord::file(fd, "/dev/pts/3"));
    }
    reg.add_descriptor(pid, DescriptorRecord::socket(11, SocketRecord::default()));
}

#[test]
fn directory_sizes_match_their_listings() {
    let w = world("");
    open_descriptors(&w.reg, 400);
    let root = ProcSession::new(w.mount.clone(), Credential::root(1));
    let owner = ProcSession::new(w.mount.clone(), Credential::new(400, 501, 20));

    for s in [&root, &owner] {
        for path in ["/byname", "/400/fd", "/400/fd/10", "/400/fd/11"] {
            let p = Path::new(path);
            let entries = s.readdir(p).unwrap();
            assert_eq!(s.getattr(p).unwrap().size, entries.len() as u64, "{path}");
        }
    }

    // Processes 1 and 30 are hidden from the owner; size skips them too.
    let mine = owner.readdir(Path::new("/byname")).unwrap();
    assert_eq!(names(&mine), vec![".", "..", "400 shell", "401 vim"]);
    assert_eq!(owner.getattr(Path::new("/byname")).unwrap().size, 4);
    assert_eq!(root.getattr(Path::new("/byname")).unwrap().size, 6);

    let fd = root.readdir(Path::new("/400/fd/11")).unwrap();
    assert_eq!(names(&fd), vec![".", "..", "details", "socket"]);
}

#[test]
fn descriptor_listing_pages_through_small_buffers() {
    let w = world("");
    open_descriptors(&w.reg, 400);
    let cred = Credential::new(400, 501, 20);
    let dir = w.mount.walk("/400/fd", &cred, true).unwrap();

    let mut seen = Vec::new();
    let mut offset = 0;
    let mut pages = 0;
    loop {
        // Two 16-byte records per page.
        let mut raw = [0u8; 40];
        let mut buf = DirentBuffer::new(&mut raw);
        let outcome = w.mount.readdir(&dir, offset, &mut buf, &cred).unwrap();
        let used = buf.used();
        let page = parse_dirents(&raw[..used]);
        assert!(page.len() <= 2);
        for (_, kind, name) in page {
            assert_eq!(kind, FileType::Directory.dirent_type(), "{name}");
            offset += dirent_size(&name) as u64;
            seen.push(name);
        }
        assert_eq!(outcome.next_offset, offset);
        pages += 1;
        if outcome.eof {
            break;
        }
    }
    assert!(pages >= 3);

    let s = ProcSession::new(w.mount.clone(), cred);
    let full = s.readdir(Path::new("/400/fd")).unwrap();
    assert_eq!(seen, names(&full));
    assert_eq!(seen, vec![".", "..", "0", "1", "2", "10", "11"]);
}

#[test]
fn dotdot_then_name_round_trips() {
    let w = world("");
    let cred = Credential::root(1);
    let m = &w.mount;

    for path in ["/400", "/400/fd", "/400/threads", "/400/threads/402", "/byname"] {
        let dir = m.walk(path, &cred, true).unwrap();
        let name = path.rsplit('/').next().unwrap();
        let parent = m.lookup(&dir, "..", &cred).unwrap();
        let again = m.lookup(&parent, name, &cred).unwrap();
        assert!(Arc::ptr_eq(&dir, &again), "{path}");
    }
}

#[test]
fn curproc_points_at_caller() {
    let w = world("");
    for pid in [400, 401] {
        let s = ProcSession::new(w.mount.clone(), Credential::new(pid, 501, 20));
        let target = s.readlink(Path::new("/curproc")).unwrap();
        assert_eq!(target.to_str().unwrap(), pid.to_string());
        let bytes = s.read_all(Path::new("/curproc/pid")).unwrap();
        assert_eq!(bytes, pid.to_ne_bytes());
    }
}

#[test]
fn pid_file_reads_exactly_and_stops_at_end() {
    let w = world("");
    let s = ProcSession::new(w.mount.clone(), Credential::new(400, 501, 20));
    let p = Path::new("/401/pid");
    assert_eq!(s.read(p, 0, 64).unwrap(), 401i32.to_ne_bytes());
    assert_eq!(s.read(p, 2, 64).unwrap(), &401i32.to_ne_bytes()[2..]);
    assert!(s.read(p, 4, 64).unwrap().is_empty());
    assert!(s.read(p, 1 << 40, 64).unwrap().is_empty());
}

#[test]
fn exited_process_reads_fail_with_no_such_process() {
    let w = world("");
    let cred = Credential::root(1);
    let info = w.mount.walk("/401/info", &cred, true).unwrap();
    w.reg.remove_process(401);

    let mut buf = [0u8; 256];
    assert!(matches!(
        w.mount.read(&info, 0, &mut buf, &cred),
        Err(ProcError::NoSuchProcess(_))
    ));
    assert!(matches!(
        w.mount.getattr(&info, &cred),
        Err(ProcError::NoSuchProcess(_))
    ));
    // A fresh lookup no longer finds it.
    assert!(matches!(
        w.mount.walk("/401", &cred, true),
        Err(ProcError::NotFound(_))
    ));
}

#[test]
fn hidden_processes_are_indistinguishable_from_missing() {
    let w = world("");
    let s = ProcSession::new(w.mount.clone(), Credential::new(400, 501, 20));
    let hidden = s.getattr(Path::new("/30")).unwrap_err();
    let missing = s.getattr(Path::new("/31")).unwrap_err();
    assert!(matches!(hidden, ProcError::NotFound(_)));
    assert!(matches!(missing, ProcError::NotFound(_)));
    assert!(!s.exists(Path::new("/byname/30 daemon")));

    let open = world("noprocperms");
    let s = ProcSession::new(open.mount.clone(), Credential::new(400, 501, 20));
    assert!(s.exists(Path::new("/30")));
    assert_eq!(s.getattr(Path::new("/30/pid")).unwrap().perm, 0o555);
}

#[test]
fn permission_masks_follow_mount_mode() {
    let strict = world("");
    let s = ProcSession::new(strict.mount.clone(), Credential::root(1));
    assert_eq!(s.getattr(Path::new("/")).unwrap().perm, 0o555);
    assert_eq!(s.getattr(Path::new("/byname")).unwrap().perm, 0o550);
    assert_eq!(s.getattr(Path::new("/curproc")).unwrap().perm, 0o777);
    assert_eq!(s.getattr(Path::new("/400/fd")).unwrap().perm, 0o550);
    assert_eq!(s.getattr(Path::new("/400/info")).unwrap().perm, 0o550);
}

#[test]
fn stranger_cannot_read_world_hidden_bits() {
    // Visible through open mode, but file bits still come from the mask.
    let w = world("noprocperms");
    let s = ProcSession::new(w.mount.clone(), Credential::new(9, 777, 777));
    assert!(s.read(Path::new("/400/pid"), 0, 4).is_ok());

    let strict = world("");
    let s = ProcSession::new(strict.mount.clone(), Credential::new(9, 777, 20));
    // Group match makes the process visible and the group bits readable.
    assert!(s.read(Path::new("/400/pid"), 0, 4).is_ok());
}

#[test]
fn threads_directory_lists_and_sizes_agree() {
    let w = world("");
    let s = ProcSession::new(w.mount.clone(), Credential::root(1));
    let entries = s.readdir(Path::new("/400/threads")).unwrap();
    assert_eq!(names(&entries), vec![".", "..", "400", "402"]);
    assert_eq!(s.getattr(Path::new("/400/threads")).unwrap().size, 4);
    assert!(s.exists(Path::new("/400/threads/402/info")));
    assert!(!s.exists(Path::new("/400/threads/403")));
    // A thread id of another process is not a thread of this one.
    assert!(!s.exists(Path::new("/401/threads/402")));
}

#[test]
fn attributes_serialize() {
    let w = world("");
    let s = ProcSession::new(w.mount.clone(), Credential::root(1));
    let attr = s.getattr(Path::new("/400/tty")).unwrap();
    let json = serde_json::to_value(&attr).unwrap();
    assert_eq!(json["kind"], "file");
    assert_eq!(json["size"], 0);
}

#[test]
fn live_nodes_drain_when_handles_drop() {
    let w = world("");
    let cred = Credential::root(1);
    let baseline = w.fs.live_nodes();
    {
        let a = w.mount.walk("/400/threads/402/info", &cred, true).unwrap();
        let b = w.mount.walk("/400/threads/402/info", &cred, true).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(w.fs.live_nodes(), baseline + 1);
    }
    assert_eq!(w.fs.live_nodes(), baseline);
}
