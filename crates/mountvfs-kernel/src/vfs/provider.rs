//! Provider capability trait.
//!
//! A provider is a storage backend that can be mounted into the tree. All
//! paths passed to a provider are relative to its own root; the facade does
//! the translation.

use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;

use super::error::{VfsError, VfsResult};

/// Opaque handle issued by a provider's `open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Stream open mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// `r`
    Read,
    /// `rb`
    ReadBinary,
    /// `w`
    Write,
    /// `wb`
    WriteBinary,
    /// `a`
    Append,
    /// `ab`
    AppendBinary,
}

impl OpenMode {
    /// Returns true for the read modes.
    pub fn is_read(&self) -> bool {
        matches!(self, OpenMode::Read | OpenMode::ReadBinary)
    }

    /// Returns true for the write and append modes.
    pub fn is_write(&self) -> bool {
        !self.is_read()
    }

    /// Returns true for the append modes.
    pub fn is_append(&self) -> bool {
        matches!(self, OpenMode::Append | OpenMode::AppendBinary)
    }

    /// Mode string as accepted by [`OpenMode::from_str`].
    pub fn as_str(&self) -> &'static str {
        match self {
            OpenMode::Read => "r",
            OpenMode::ReadBinary => "rb",
            OpenMode::Write => "w",
            OpenMode::WriteBinary => "wb",
            OpenMode::Append => "a",
            OpenMode::AppendBinary => "ab",
        }
    }
}

impl FromStr for OpenMode {
    type Err = VfsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "r" => Ok(OpenMode::Read),
            "rb" => Ok(OpenMode::ReadBinary),
            "w" => Ok(OpenMode::Write),
            "wb" => Ok(OpenMode::WriteBinary),
            "a" => Ok(OpenMode::Append),
            "ab" => Ok(OpenMode::AppendBinary),
            other => Err(VfsError::bad_mode(other)),
        }
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Origin for [`Provider::seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// Absolute offset from the start.
    Set,
    /// Relative to the current position.
    Cur,
    /// Relative to the end.
    End,
}

/// Storage backend capability set.
///
/// Providers are identified by a stable [`address`](Provider::address); two
/// mount points holding providers with the same address are the same backend.
///
/// Directory names returned by [`list`](Provider::list) carry a trailing `/`.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable identity of this provider.
    fn address(&self) -> &str;

    /// Human-readable label, if the provider has one.
    fn label(&self) -> Option<String> {
        None
    }

    /// Returns true if this provider rejects writes.
    fn is_read_only(&self) -> bool {
        false
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    async fn exists(&self, path: &str) -> bool;

    /// Size in bytes; 0 for directories and missing paths.
    async fn size(&self, path: &str) -> u64;

    async fn is_directory(&self, path: &str) -> bool;

    /// Modification time in milliseconds since the Unix epoch; 0 if unknown.
    async fn last_modified(&self, path: &str) -> u64;

    /// Names in the directory, sorted, directories suffixed with `/`.
    async fn list(&self, path: &str) -> VfsResult<Vec<String>>;

    async fn space_total(&self) -> Option<u64>;

    async fn space_used(&self) -> Option<u64>;

    // ========================================================================
    // Mutation
    // ========================================================================

    async fn make_directory(&self, path: &str) -> VfsResult<bool>;

    async fn remove(&self, path: &str) -> VfsResult<bool>;

    async fn rename(&self, from: &str, to: &str) -> VfsResult<bool>;

    // ========================================================================
    // Handles
    // ========================================================================

    async fn open(&self, path: &str, mode: OpenMode) -> VfsResult<HandleId>;

    /// Read up to `count` bytes. `Ok(None)` signals end-of-data.
    async fn read(&self, handle: HandleId, count: usize) -> VfsResult<Option<Vec<u8>>>;

    /// Move the cursor; returns the new absolute position.
    async fn seek(&self, handle: HandleId, whence: Whence, offset: i64) -> VfsResult<u64>;

    async fn write(&self, handle: HandleId, data: &[u8]) -> VfsResult<bool>;

    async fn close(&self, handle: HandleId);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_mode_parse() {
        assert_eq!("r".parse::<OpenMode>().unwrap(), OpenMode::Read);
        assert_eq!("ab".parse::<OpenMode>().unwrap(), OpenMode::AppendBinary);
        assert!(matches!("q".parse::<OpenMode>(), Err(VfsError::BadMode(_))));
        assert!(matches!("rw".parse::<OpenMode>(), Err(VfsError::BadMode(_))));
    }

    #[test]
    fn test_open_mode_flags() {
        assert!(OpenMode::ReadBinary.is_read());
        assert!(OpenMode::Write.is_write());
        assert!(OpenMode::Append.is_append());
        assert!(!OpenMode::WriteBinary.is_append());
        assert_eq!(OpenMode::AppendBinary.to_string(), "ab");
    }
}
