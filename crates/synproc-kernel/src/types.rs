//! Attribute and directory-entry types returned by the namespace.
//!
//! These are plain serializable values. The CLI prints them directly and a
//! host adapter converts them to its own stat/dirent layouts.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// File type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FileType {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
}

impl FileType {
    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }

    /// Returns true if this is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        matches!(self, FileType::Symlink)
    }

    /// `d_type` value for packed directory records.
    pub fn dirent_type(&self) -> u8 {
        match self {
            FileType::File => 8,      // DT_REG
            FileType::Directory => 4, // DT_DIR
            FileType::Symlink => 10,  // DT_LNK
        }
    }

    /// The type bits `ls -l` would show.
    pub fn mode_char(&self) -> char {
        match self {
            FileType::File => '-',
            FileType::Directory => 'd',
            FileType::Symlink => 'l',
        }
    }
}

/// File attributes (metadata).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAttr {
    /// Size in bytes for files, entry count for directories.
    pub size: u64,
    /// File type.
    pub kind: FileType,
    /// Unix permissions (e.g., 0o555).
    pub perm: u32,
    /// Packed node identity.
    pub file_id: u64,
    /// Mount instance id.
    pub fsid: u32,
    /// Modification time. Access, change and birth times are the same.
    pub mtime: SystemTime,
    /// Number of hard links.
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
}

impl FileAttr {
    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    /// Returns true if this is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        self.kind.is_symlink()
    }

    /// `drwxr-x---` style rendering.
    pub fn mode_string(&self) -> String {
        let mut s = String::with_capacity(10);
        s.push(self.kind.mode_char());
        for shift in [6u32, 3, 0] {
            let bits = (self.perm >> shift) & 0o7;
            s.push(if bits & 0o4 != 0 { 'r' } else { '-' });
            s.push(if bits & 0o2 != 0 { 'w' } else { '-' });
            s.push(if bits & 0o1 != 0 { 'x' } else { '-' });
        }
        s
    }
}

/// Directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Entry name (not full path).
    pub name: String,
    /// Entry type.
    pub kind: FileType,
    /// Packed node identity of the entry.
    pub file_id: u64,
}

impl DirEntry {
    /// Create a new directory entry.
    pub fn new(name: impl Into<String>, kind: FileType, file_id: u64) -> Self {
        Self {
            name: name.into(),
            kind,
            file_id,
        }
    }
}

/// Requested attribute changes. The namespace is read-only, so every
/// request is refused; the type exists so hosts can pass one through.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetAttr {
    pub size: Option<u64>,
    pub mtime: Option<SystemTime>,
    pub perm: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

/// Filesystem statistics. The namespace has no backing storage, so these
/// are fixed values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatFs {
    /// Total blocks.
    pub blocks: u64,
    /// Free blocks.
    pub bfree: u64,
    /// Available blocks (to non-root).
    pub bavail: u64,
    /// Total inodes.
    pub files: u64,
    /// Free inodes.
    pub ffree: u64,
    /// Block size.
    pub bsize: u32,
    /// Maximum name length.
    pub namelen: u32,
    /// Fragment size.
    pub frsize: u32,
}

impl Default for StatFs {
    fn default() -> Self {
        Self {
            blocks: 0,
            bfree: 0,
            bavail: 0,
            files: 0,
            ffree: 0,
            bsize: 4096,
            namelen: 255,
            frsize: 4096,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_type() {
        assert!(FileType::File.is_file());
        assert!(!FileType::File.is_dir());
        assert!(FileType::Directory.is_dir());
        assert!(FileType::Symlink.is_symlink());
        assert_eq!(FileType::Symlink.to_string(), "symlink");
    }

    #[test]
    fn test_mode_string() {
        let attr = FileAttr {
            size: 0,
            kind: FileType::Directory,
            perm: 0o550,
            file_id: 1,
            fsid: 1,
            mtime: SystemTime::UNIX_EPOCH,
            nlink: 2,
            uid: 0,
            gid: 0,
        };
        assert_eq!(attr.mode_string(), "dr-xr-x---");
    }

    #[test]
    fn test_statfs_is_empty() {
        let st = StatFs::default();
        assert_eq!(st.blocks, 0);
        assert_eq!(st.namelen, 255);
    }
}
