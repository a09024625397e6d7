//! Namespace error types.

use std::io;
use thiserror::Error;

/// Namespace error type.
#[derive(Debug, Error)]
pub enum ProcError {
    /// Name does not resolve. Also returned when the target exists but the
    /// caller may not see it.
    #[error("not found: {0}")]
    NotFound(String),

    /// A process, thread or descriptor that was valid earlier has gone away.
    #[error("no such process: {0}")]
    NoSuchProcess(String),

    /// Credential check failed on a path whose existence is already implied.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Allocation failed while creating a node.
    #[error("out of memory")]
    OutOfMemory,

    /// Operation not supported by this node.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a file.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// The namespace is read-only.
    #[error("filesystem is read-only")]
    ReadOnly,

    /// Too many symbolic links while walking a path.
    #[error("too many symbolic links")]
    TooManySymlinks,

    /// Invalid path.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// I/O error from a host registry.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl ProcError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create a NoSuchProcess error.
    pub fn no_such_process(what: impl Into<String>) -> Self {
        Self::NoSuchProcess(what.into())
    }

    /// Create an AccessDenied error.
    pub fn access_denied(path: impl Into<String>) -> Self {
        Self::AccessDenied(path.into())
    }

    /// Create an InvalidOperation error.
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Create an Other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// POSIX errno a host adapter should surface for this error.
    pub fn errno(&self) -> i32 {
        match self {
            ProcError::NotFound(_) => 2,          // ENOENT
            ProcError::NoSuchProcess(_) => 3,     // ESRCH
            ProcError::Io(e) => e.raw_os_error().unwrap_or(5), // EIO
            ProcError::OutOfMemory => 12,         // ENOMEM
            ProcError::AccessDenied(_) => 13,     // EACCES
            ProcError::NotADirectory(_) => 20,    // ENOTDIR
            ProcError::IsADirectory(_) => 21,     // EISDIR
            ProcError::InvalidOperation(_) | ProcError::InvalidPath(_) => 22, // EINVAL
            ProcError::ReadOnly => 30,            // EROFS
            ProcError::TooManySymlinks => 40,     // ELOOP
            ProcError::Other(_) => 5,
        }
    }
}

/// Convert ProcError to std::io::Error for compatibility.
impl From<ProcError> for io::Error {
    fn from(e: ProcError) -> Self {
        match e {
            ProcError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            ProcError::NoSuchProcess(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            ProcError::AccessDenied(msg) => io::Error::new(io::ErrorKind::PermissionDenied, msg),
            ProcError::OutOfMemory => io::Error::from(io::ErrorKind::OutOfMemory),
            ProcError::InvalidOperation(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            ProcError::NotADirectory(msg) => io::Error::new(io::ErrorKind::NotADirectory, msg),
            ProcError::IsADirectory(msg) => io::Error::new(io::ErrorKind::IsADirectory, msg),
            ProcError::ReadOnly => {
                io::Error::new(io::ErrorKind::ReadOnlyFilesystem, "filesystem is read-only")
            }
            ProcError::TooManySymlinks => io::Error::other("too many symbolic links"),
            ProcError::InvalidPath(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            ProcError::Io(e) => e,
            ProcError::Other(msg) => io::Error::other(msg),
        }
    }
}

/// Namespace result type.
pub type ProcResult<T> = Result<T, ProcError>;
