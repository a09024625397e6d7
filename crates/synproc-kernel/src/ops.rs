//! Path-based operations.
//!
//! [`ProcFsOps`] is the surface a host file-access layer (or the CLI) talks
//! to: paths in, attributes and bytes out. [`ProcSession`] implements it for
//! one caller on one mount. Every mutating operation fails with
//! [`ProcError::ReadOnly`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use synproc_types::Credential;

use crate::error::{ProcError, ProcResult};
use crate::mount::ProcMount;
use crate::types::{DirEntry, FileAttr, SetAttr, StatFs};
use crate::vnode::Vnode;

/// Largest chunk [`ProcFsOps::read_all`] asks for at a time.
const READ_CHUNK: u32 = 4096;

/// Filesystem operations, path-based.
///
/// Paths are relative to the mount root; a leading `/` is optional.
pub trait ProcFsOps: Send + Sync {
    // ========================================================================
    // Reading
    // ========================================================================

    /// Attributes of the node at `path`. A final symlink is not followed.
    fn getattr(&self, path: &Path) -> ProcResult<FileAttr>;

    /// All entries of the directory at `path`, `.` and `..` included.
    fn readdir(&self, path: &Path) -> ProcResult<Vec<DirEntry>>;

    /// Read up to `size` bytes at `offset`. Short at end of data.
    fn read(&self, path: &Path, offset: u64, size: u32) -> ProcResult<Vec<u8>>;

    /// Target of the symlink at `path`.
    fn readlink(&self, path: &Path) -> ProcResult<PathBuf>;

    // ========================================================================
    // Writing
    // ========================================================================

    fn write(&self, path: &Path, offset: u64, data: &[u8]) -> ProcResult<u32>;

    fn create(&self, path: &Path, mode: u32) -> ProcResult<FileAttr>;

    fn mkdir(&self, path: &Path, mode: u32) -> ProcResult<FileAttr>;

    fn unlink(&self, path: &Path) -> ProcResult<()>;

    fn rmdir(&self, path: &Path) -> ProcResult<()>;

    fn rename(&self, from: &Path, to: &Path) -> ProcResult<()>;

    fn truncate(&self, path: &Path, size: u64) -> ProcResult<()>;

    fn setattr(&self, path: &Path, attr: SetAttr) -> ProcResult<FileAttr>;

    fn symlink(&self, path: &Path, target: &Path) -> ProcResult<FileAttr>;

    fn link(&self, oldpath: &Path, newpath: &Path) -> ProcResult<FileAttr>;

    fn setxattr(&self, path: &Path, name: &str, value: &[u8]) -> ProcResult<()>;

    /// Map a file into memory. `writable` requests a shared writable
    /// mapping.
    fn mmap(&self, path: &Path, writable: bool) -> ProcResult<()>;

    // ========================================================================
    // Metadata
    // ========================================================================

    fn read_only(&self) -> bool;

    fn statfs(&self) -> ProcResult<StatFs>;

    // ========================================================================
    // Convenience methods (default implementations)
    // ========================================================================

    /// Check if a path exists.
    fn exists(&self, path: &Path) -> bool {
        self.getattr(path).is_ok()
    }

    /// Read everything from offset zero until a short read.
    ///
    /// Reported sizes are not always byte counts (directories count
    /// entries), so this reads until the data runs out instead of trusting
    /// `getattr`.
    fn read_all(&self, path: &Path) -> ProcResult<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            let chunk = self.read(path, out.len() as u64, READ_CHUNK)?;
            let short = chunk.len() < READ_CHUNK as usize;
            out.extend_from_slice(&chunk);
            if short {
                return Ok(out);
            }
        }
    }
}

/// One caller's view of a mount.
#[derive(Debug, Clone)]
pub struct ProcSession {
    mount: Arc<ProcMount>,
    cred: Credential,
}

impl ProcSession {
    pub fn new(mount: Arc<ProcMount>, cred: Credential) -> Self {
        Self { mount, cred }
    }

    pub fn mount(&self) -> &ProcMount {
        &self.mount
    }

    pub fn credential(&self) -> &Credential {
        &self.cred
    }

    fn node(&self, path: &Path, follow: bool) -> ProcResult<Arc<Vnode>> {
        let path = path
            .to_str()
            .ok_or_else(|| ProcError::invalid_path(path.display().to_string()))?;
        self.mount.walk(path, &self.cred, follow)
    }
}

/// Whether `cred` may open a node with `attr` for reading.
///
/// Owner bits apply when the uid matches, else group bits when the gid
/// matches, else the other bits. The superuser always may.
pub fn may_read(cred: &Credential, attr: &FileAttr) -> bool {
    if cred.is_privileged() {
        return true;
    }
    let bits = if cred.uid == attr.uid {
        attr.perm >> 6
    } else if cred.gid == attr.gid {
        attr.perm >> 3
    } else {
        attr.perm
    };
    bits & 0o4 != 0
}

impl ProcFsOps for ProcSession {
    fn getattr(&self, path: &Path) -> ProcResult<FileAttr> {
        let node = self.node(path, false)?;
        self.mount.getattr(&node, &self.cred)
    }

    fn readdir(&self, path: &Path) -> ProcResult<Vec<DirEntry>> {
        let dir = self.node(path, true)?;
        let mut entries = Vec::new();
        self.mount.readdir(&dir, 0, &mut entries, &self.cred)?;
        Ok(entries)
    }

    fn read(&self, path: &Path, offset: u64, size: u32) -> ProcResult<Vec<u8>> {
        let node = self.node(path, true)?;
        if !node.is_dir() {
            let attr = self.mount.getattr(&node, &self.cred)?;
            if !may_read(&self.cred, &attr) {
                return Err(ProcError::access_denied(path.display().to_string()));
            }
        }
        let mut buf = vec![0u8; size as usize];
        let n = self.mount.read(&node, offset, &mut buf, &self.cred)?;
        buf.truncate(n);
        Ok(buf)
    }

    fn readlink(&self, path: &Path) -> ProcResult<PathBuf> {
        let node = self.node(path, false)?;
        self.mount.readlink(&node, &self.cred).map(PathBuf::from)
    }

    fn write(&self, _path: &Path, _offset: u64, _data: &[u8]) -> ProcResult<u32> {
        Err(ProcError::ReadOnly)
    }

    fn create(&self, _path: &Path, _mode: u32) -> ProcResult<FileAttr> {
        Err(ProcError::ReadOnly)
    }

    fn mkdir(&self, _path: &Path, _mode: u32) -> ProcResult<FileAttr> {
        Err(ProcError::ReadOnly)
    }

    fn unlink(&self, _path: &Path) -> ProcResult<()> {
        Err(ProcError::ReadOnly)
    }

    fn rmdir(&self, _path: &Path) -> ProcResult<()> {
        Err(ProcError::ReadOnly)
    }

    fn rename(&self, _from: &Path, _to: &Path) -> ProcResult<()> {
        Err(ProcError::ReadOnly)
    }

    fn truncate(&self, _path: &Path, _size: u64) -> ProcResult<()> {
        Err(ProcError::ReadOnly)
    }

    fn setattr(&self, _path: &Path, _attr: SetAttr) -> ProcResult<FileAttr> {
        Err(ProcError::ReadOnly)
    }

    fn symlink(&self, _path: &Path, _target: &Path) -> ProcResult<FileAttr> {
        Err(ProcError::ReadOnly)
    }

    fn link(&self, _oldpath: &Path, _newpath: &Path) -> ProcResult<FileAttr> {
        Err(ProcError::ReadOnly)
    }

    fn setxattr(&self, _path: &Path, _name: &str, _value: &[u8]) -> ProcResult<()> {
        Err(ProcError::ReadOnly)
    }

    fn mmap(&self, _path: &Path, _writable: bool) -> ProcResult<()> {
        Err(ProcError::ReadOnly)
    }

    fn read_only(&self) -> bool {
        true
    }

    fn statfs(&self) -> ProcResult<StatFs> {
        Ok(self.mount.statfs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MountOptions;
    use crate::mount::ProcFs;
    use crate::registry::{MemoryRegistry, ProcessRecord};
    use crate::types::FileType;

    fn session(cred: Credential, opts: &str) -> ProcSession {
        let reg = Arc::new(MemoryRegistry::new());
        reg.insert_process(ProcessRecord::new(1, "init"));
        reg.insert_process(
            ProcessRecord::new(77, "editor")
                .with_owner(501, 20)
                .with_tty("/dev/pts/3"),
        );
        let fs = ProcFs::new(reg);
        let mount = fs.mount(MountOptions::parse_opts(opts).unwrap()).unwrap();
        ProcSession::new(Arc::new(mount), cred)
    }

    #[test]
    fn test_read_own_process() {
        let s = session(Credential::new(77, 501, 20), "");
        assert_eq!(s.read_all(Path::new("/77/tty")).unwrap(), b"/dev/pts/3");
        assert_eq!(
            s.read(Path::new("curproc/tty"), 5, 100).unwrap(),
            b"pts/3"
        );
        assert_eq!(s.getattr(Path::new("/77/tty")).unwrap().size, 10);
    }

    #[test]
    fn test_mode_bits_deny_other() {
        // Open permissions make the process visible, but its files are
        // still 0555 masked to 0755, so another user can read them.
        let s = session(Credential::new(5, 600, 600), "noprocperms");
        assert!(s.read(Path::new("/1/pid"), 0, 4).is_ok());

        let attr = FileAttr {
            perm: 0o550,
            uid: 0,
            gid: 0,
            ..s.getattr(Path::new("/1/pid")).unwrap()
        };
        assert!(!may_read(&Credential::new(5, 600, 600), &attr));
        assert!(may_read(&Credential::new(5, 600, 0), &attr));
        assert!(may_read(&Credential::root(5), &attr));
    }

    #[test]
    fn test_readdir_and_readlink() {
        let s = session(Credential::root(1), "");
        let entries = s.readdir(Path::new("/77")).unwrap();
        let fd = entries.iter().find(|e| e.name == "fd").unwrap();
        assert_eq!(fd.kind, FileType::Directory);
        assert_eq!(
            s.readlink(Path::new("/byname/77 editor")).unwrap(),
            PathBuf::from("../77")
        );
        assert_eq!(s.readlink(Path::new("/curproc")).unwrap(), PathBuf::from("1"));
        assert!(s.exists(Path::new("/77/taskinfo")));
        assert!(!s.exists(Path::new("/78")));
    }

    #[test]
    fn test_mutations_are_read_only() {
        let s = session(Credential::root(1), "");
        let p = Path::new("/77/pid");
        assert!(s.read_only());
        assert!(matches!(s.write(p, 0, b"x"), Err(ProcError::ReadOnly)));
        assert!(matches!(s.create(p, 0o644), Err(ProcError::ReadOnly)));
        assert!(matches!(s.mkdir(p, 0o755), Err(ProcError::ReadOnly)));
        assert!(matches!(s.unlink(p), Err(ProcError::ReadOnly)));
        assert!(matches!(s.rmdir(p), Err(ProcError::ReadOnly)));
        assert!(matches!(s.rename(p, p), Err(ProcError::ReadOnly)));
        assert!(matches!(s.truncate(p, 0), Err(ProcError::ReadOnly)));
        assert!(matches!(s.setattr(p, SetAttr::default()), Err(ProcError::ReadOnly)));
        assert!(matches!(s.symlink(p, p), Err(ProcError::ReadOnly)));
        assert!(matches!(s.link(p, p), Err(ProcError::ReadOnly)));
        assert!(matches!(s.setxattr(p, "user.x", b""), Err(ProcError::ReadOnly)));
        assert!(matches!(s.mmap(p, true), Err(ProcError::ReadOnly)));
    }
}
