//! VFS error types.

use std::io;
use thiserror::Error;

/// VFS error type.
///
/// Every variant is a recoverable condition the caller is expected to check.
/// Provider failures travel through [`VfsError::Provider`] (or any other
/// variant the provider chooses) and are passed back unchanged.
#[derive(Debug, Error)]
pub enum VfsError {
    /// File or directory not found.
    #[error("no such file or directory: {0}")]
    NotFound(String),

    /// A provider is already bound at the mount point.
    #[error("another filesystem is already mounted here: {0}")]
    AlreadyMounted(String),

    /// Nothing is bound at the mount point.
    #[error("no filesystem mounted at: {0}")]
    NotMounted(String),

    /// Open mode outside `r`, `rb`, `w`, `wb`, `a`, `ab`.
    #[error("unsupported mode: {0}")]
    BadMode(String),

    /// Mutation attempted on a virtual or mount-root directory.
    #[error("cannot modify virtual directory: {0}")]
    VirtualDirectory(String),

    /// Invalid path, or no provider bound where one is required.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Operation on a stream that has already been closed.
    #[error("file is closed")]
    Closed,

    /// Provider address prefix matched more than one registered provider.
    #[error("ambiguous address: {0}")]
    AmbiguousAddress(String),

    /// Filesystem is read-only.
    #[error("filesystem is read-only")]
    ReadOnly,

    /// Path escapes a provider's root.
    #[error("path escapes root: {0}")]
    PathEscapesRoot(String),

    /// Byte transfer aborted part-way; the destination may hold partial data.
    #[error("copy from {from} to {to} aborted: {source}")]
    CopyAborted {
        from: String,
        to: String,
        #[source]
        source: Box<VfsError>,
    },

    /// Failure reported by a provider.
    #[error("{0}")]
    Provider(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl VfsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create an AlreadyMounted error.
    pub fn already_mounted(path: impl Into<String>) -> Self {
        Self::AlreadyMounted(path.into())
    }

    /// Create a NotMounted error.
    pub fn not_mounted(path: impl Into<String>) -> Self {
        Self::NotMounted(path.into())
    }

    /// Create a BadMode error.
    pub fn bad_mode(mode: impl Into<String>) -> Self {
        Self::BadMode(mode.into())
    }

    /// Create a VirtualDirectory error.
    pub fn virtual_directory(path: impl Into<String>) -> Self {
        Self::VirtualDirectory(path.into())
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Create a PathEscapesRoot error.
    pub fn path_escapes_root(path: impl Into<String>) -> Self {
        Self::PathEscapesRoot(path.into())
    }

    /// Create a Provider error.
    pub fn provider(reason: impl Into<String>) -> Self {
        Self::Provider(reason.into())
    }

    /// Wrap a failure that interrupted a copy.
    pub fn copy_aborted(from: impl Into<String>, to: impl Into<String>, source: VfsError) -> Self {
        Self::CopyAborted {
            from: from.into(),
            to: to.into(),
            source: Box::new(source),
        }
    }

    /// Returns true for the NotFound variant.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Convert VfsError to std::io::Error for compatibility.
impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        match e {
            VfsError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            VfsError::AlreadyMounted(msg) => io::Error::new(io::ErrorKind::AlreadyExists, msg),
            VfsError::NotMounted(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            VfsError::BadMode(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            VfsError::VirtualDirectory(msg) => {
                io::Error::new(io::ErrorKind::PermissionDenied, msg)
            }
            VfsError::InvalidPath(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            VfsError::Closed => io::Error::other("file is closed"),
            VfsError::AmbiguousAddress(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            VfsError::ReadOnly => {
                io::Error::new(io::ErrorKind::PermissionDenied, "filesystem is read-only")
            }
            VfsError::PathEscapesRoot(msg) => {
                io::Error::new(io::ErrorKind::PermissionDenied, msg)
            }
            e @ VfsError::CopyAborted { .. } => io::Error::other(e.to_string()),
            VfsError::Provider(msg) => io::Error::other(msg),
            VfsError::Io(e) => e,
        }
    }
}

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_aborted_keeps_source() {
        let err = VfsError::copy_aborted("/a", "/b", VfsError::not_found("x"));
        assert_eq!(
            err.to_string(),
            "copy from /a to /b aborted: no such file or directory: x"
        );
        let source = std::error::Error::source(&err).unwrap();
        assert!(source.to_string().contains("x"));
    }

    #[test]
    fn test_io_conversion() {
        let io_err: io::Error = VfsError::not_found("gone").into();
        assert_eq!(io_err.kind(), io::ErrorKind::NotFound);

        let io_err: io::Error = VfsError::bad_mode("q").into();
        assert_eq!(io_err.kind(), io::ErrorKind::InvalidInput);
    }
}
