//! Local filesystem provider.
//!
//! Exposes a host directory, with path security to prevent escaping the
//! root directory.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::UNIX_EPOCH;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::provider::{HandleId, OpenMode, Provider, Whence};

type SharedFile = Arc<tokio::sync::Mutex<fs::File>>;

/// Largest buffer a single `read` allocates.
const MAX_READ: usize = 1 << 20;

/// Local filesystem provider.
///
/// All operations are relative to `root`. For example, if `root` is
/// `/srv/disk0`, then `open("docs/a.txt")` opens `/srv/disk0/docs/a.txt`.
///
/// Path security is enforced: attempts to escape via `..` or symlinks are
/// blocked.
#[derive(Debug)]
pub struct LocalProvider {
    address: String,
    root: PathBuf,
    read_only: bool,
    handles: Mutex<HashMap<HandleId, SharedFile>>,
    next_handle: AtomicU64,
}

impl LocalProvider {
    /// Create a provider rooted at the given path.
    ///
    /// The root is canonicalized at construction time to handle symlinks
    /// (e.g. macOS `/tmp` → `/private/tmp`). The address is derived from the
    /// canonical root, so the same directory always gets the same identity.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        let root = root.canonicalize().unwrap_or(root);
        let address =
            uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_URL, root.as_os_str().as_encoded_bytes())
                .to_string();
        Self {
            address,
            root,
            read_only: false,
            handles: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Create a read-only provider.
    pub fn read_only(root: impl Into<PathBuf>) -> Self {
        Self {
            read_only: true,
            ..Self::new(root)
        }
    }

    /// Override the derived address.
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Get the root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative path to an absolute path within the root.
    ///
    /// Returns an error if the path escapes the root.
    fn resolve(&self, path: &str) -> VfsResult<PathBuf> {
        let relative = Path::new(path.trim_start_matches(['/', '\\']));
        if relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(VfsError::path_escapes_root(path));
        }

        // Handle empty path (root)
        if relative.as_os_str().is_empty() {
            return Ok(self.root.clone());
        }

        let full = self.root.join(relative);

        // Canonicalize to resolve symlinks. For new files, canonicalize the
        // parent and append the filename.
        let canonical = if full.exists() {
            full.canonicalize()?
        } else {
            let parent = full
                .parent()
                .ok_or_else(|| VfsError::invalid_path("no parent"))?;
            let filename = full
                .file_name()
                .ok_or_else(|| VfsError::invalid_path("no filename"))?;

            if parent.exists() {
                parent.canonicalize()?.join(filename)
            } else {
                // Parent doesn't exist, will fail on actual operation
                full
            }
        };

        if !canonical.starts_with(&self.root) {
            return Err(VfsError::path_escapes_root(format!(
                "{} is not under {}",
                canonical.display(),
                self.root.display()
            )));
        }

        Ok(canonical)
    }

    /// Resolve a path without following a symlink in its last component.
    ///
    /// The parent is resolved and checked like any other path; the final name
    /// is joined as-is so the entry itself is addressed rather than its target.
    fn resolve_entry(&self, path: &str) -> VfsResult<PathBuf> {
        let relative = Path::new(path.trim_start_matches(['/', '\\']));
        let (Some(parent), Some(name)) = (relative.parent(), relative.file_name()) else {
            return self.resolve(path);
        };
        Ok(self.resolve(&parent.to_string_lossy())?.join(name))
    }

    /// Check if write operations are allowed.
    fn check_writable(&self) -> VfsResult<()> {
        if self.read_only {
            Err(VfsError::ReadOnly)
        } else {
            Ok(())
        }
    }

    fn file(&self, handle: HandleId) -> VfsResult<SharedFile> {
        self.handles
            .lock()
            .get(&handle)
            .cloned()
            .ok_or_else(|| VfsError::provider(format!("bad file descriptor {handle}")))
    }

    async fn metadata(&self, path: &str) -> Option<std::fs::Metadata> {
        let full_path = self.resolve(path).ok()?;
        fs::metadata(&full_path).await.ok()
    }
}

#[async_trait]
impl Provider for LocalProvider {
    fn address(&self) -> &str {
        &self.address
    }

    fn label(&self) -> Option<String> {
        self.root.file_name().map(|n| n.to_string_lossy().into_owned())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    async fn exists(&self, path: &str) -> bool {
        self.metadata(path).await.is_some()
    }

    async fn size(&self, path: &str) -> u64 {
        self.metadata(path)
            .await
            .filter(|m| m.is_file())
            .map(|m| m.len())
            .unwrap_or(0)
    }

    async fn is_directory(&self, path: &str) -> bool {
        self.metadata(path).await.is_some_and(|m| m.is_dir())
    }

    async fn last_modified(&self, path: &str) -> u64 {
        self.metadata(path)
            .await
            .and_then(|m| m.modified().ok())
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    async fn list(&self, path: &str) -> VfsResult<Vec<String>> {
        let full_path = self.resolve(path)?;
        let mut names = Vec::new();
        let mut dir = fs::read_dir(&full_path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => VfsError::not_found(path),
            _ => VfsError::from(e),
        })?;

        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await?.is_dir() {
                names.push(format!("{name}/"));
            } else {
                names.push(name);
            }
        }

        names.sort();
        Ok(names)
    }

    #[cfg(unix)]
    async fn space_total(&self) -> Option<u64> {
        let stat = rustix::fs::statvfs(&self.root).ok()?;
        Some(stat.f_blocks.saturating_mul(stat.f_frsize))
    }

    #[cfg(unix)]
    async fn space_used(&self) -> Option<u64> {
        let stat = rustix::fs::statvfs(&self.root).ok()?;
        Some(
            stat.f_blocks
                .saturating_sub(stat.f_bfree)
                .saturating_mul(stat.f_frsize),
        )
    }

    #[cfg(not(unix))]
    async fn space_total(&self) -> Option<u64> {
        None
    }

    #[cfg(not(unix))]
    async fn space_used(&self) -> Option<u64> {
        None
    }

    async fn make_directory(&self, path: &str) -> VfsResult<bool> {
        self.check_writable()?;
        let full_path = self.resolve(path)?;
        if full_path.exists() {
            return Ok(false);
        }
        fs::create_dir_all(&full_path).await?;
        Ok(true)
    }

    async fn remove(&self, path: &str) -> VfsResult<bool> {
        self.check_writable()?;
        let full_path = self.resolve_entry(path)?;
        if full_path == self.root {
            return Err(VfsError::provider("cannot remove root"));
        }
        let meta = fs::symlink_metadata(&full_path)
            .await
            .map_err(|_| VfsError::not_found(path))?;
        if meta.is_dir() {
            fs::remove_dir_all(&full_path).await?;
        } else {
            fs::remove_file(&full_path).await?;
        }
        Ok(true)
    }

    async fn rename(&self, from: &str, to: &str) -> VfsResult<bool> {
        self.check_writable()?;
        let from_path = self.resolve_entry(from)?;
        let to_path = self.resolve_entry(to)?;

        // Ensure parent of destination exists
        if let Some(parent) = to_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        fs::rename(&from_path, &to_path).await?;
        Ok(true)
    }

    async fn open(&self, path: &str, mode: OpenMode) -> VfsResult<HandleId> {
        if mode.is_write() {
            self.check_writable()?;
        }
        let full_path = self.resolve(path)?;
        if full_path.is_dir() {
            return Err(VfsError::provider(format!("is a directory: {path}")));
        }

        let mut options = fs::OpenOptions::new();
        match mode {
            OpenMode::Read | OpenMode::ReadBinary => options.read(true),
            OpenMode::Write | OpenMode::WriteBinary => {
                options.write(true).create(true).truncate(true)
            }
            OpenMode::Append | OpenMode::AppendBinary => options.append(true).create(true),
        };
        let file = options.open(&full_path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => VfsError::not_found(path),
            _ => VfsError::from(e),
        })?;

        let handle = HandleId(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.handles
            .lock()
            .insert(handle, Arc::new(tokio::sync::Mutex::new(file)));
        Ok(handle)
    }

    async fn read(&self, handle: HandleId, count: usize) -> VfsResult<Option<Vec<u8>>> {
        let file = self.file(handle)?;
        let mut file = file.lock().await;
        let mut buffer = vec![0u8; count.min(MAX_READ)];
        let bytes_read = file.read(&mut buffer).await?;
        if bytes_read == 0 && count > 0 {
            return Ok(None);
        }
        buffer.truncate(bytes_read);
        Ok(Some(buffer))
    }

    async fn seek(&self, handle: HandleId, whence: Whence, offset: i64) -> VfsResult<u64> {
        let file = self.file(handle)?;
        let mut file = file.lock().await;
        let target = match whence {
            Whence::Set => SeekFrom::Start(
                u64::try_from(offset).map_err(|_| VfsError::provider("invalid offset"))?,
            ),
            Whence::Cur => SeekFrom::Current(offset),
            Whence::End => SeekFrom::End(offset),
        };
        Ok(file.seek(target).await?)
    }

    async fn write(&self, handle: HandleId, data: &[u8]) -> VfsResult<bool> {
        let file = self.file(handle)?;
        let mut file = file.lock().await;
        file.write_all(data).await?;
        Ok(true)
    }

    async fn close(&self, handle: HandleId) {
        let file = self.handles.lock().remove(&handle);
        if let Some(file) = file {
            let mut file = file.lock().await;
            if let Err(e) = file.flush().await {
                tracing::warn!(address = %self.address, %handle, error = %e, "flush on close failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, LocalProvider) {
        let dir = TempDir::new().unwrap();
        let fs = LocalProvider::new(dir.path());
        (dir, fs)
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (_dir, fs) = setup();
        let h = fs.open("hello.txt", OpenMode::Write).await.unwrap();
        assert!(fs.write(h, b"hello local").await.unwrap());
        fs.close(h).await;

        assert_eq!(fs.size("hello.txt").await, 11);
        let h = fs.open("hello.txt", OpenMode::Read).await.unwrap();
        assert_eq!(fs.read(h, 5).await.unwrap().unwrap(), b"hello");
        assert_eq!(fs.seek(h, Whence::Set, 6).await.unwrap(), 6);
        assert_eq!(fs.read(h, 100).await.unwrap().unwrap(), b"local");
        assert_eq!(fs.read(h, 100).await.unwrap(), None);
        fs.close(h).await;
    }

    #[tokio::test]
    async fn test_list_marks_directories() {
        let (dir, fs) = setup();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();

        assert_eq!(fs.list("").await.unwrap(), vec!["a.txt", "b.txt", "sub/"]);
        assert!(fs.is_directory("sub").await);
        assert!(fs.list("missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_path_escape_blocked() {
        let (_dir, fs) = setup();
        assert!(matches!(
            fs.open("../outside.txt", OpenMode::Write).await,
            Err(VfsError::PathEscapesRoot(_))
        ));
        assert!(!fs.exists("../../etc/passwd").await);
    }

    #[tokio::test]
    async fn test_remove_and_rename() {
        let (dir, fs) = setup();
        std::fs::write(dir.path().join("old.txt"), "content").unwrap();

        assert!(fs.rename("old.txt", "moved/new.txt").await.unwrap());
        assert!(!fs.exists("old.txt").await);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("moved/new.txt")).unwrap(),
            "content"
        );

        assert!(fs.remove("moved").await.unwrap());
        assert!(!fs.exists("moved").await);
        assert!(fs.remove("moved").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_read_with_huge_count() {
        let (dir, fs) = setup();
        std::fs::write(dir.path().join("f"), "small").unwrap();

        let h = fs.open("f", OpenMode::ReadBinary).await.unwrap();
        assert_eq!(fs.read(h, usize::MAX).await.unwrap().unwrap(), b"small");
        assert_eq!(fs.read(h, usize::MAX).await.unwrap(), None);
        fs.close(h).await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_remove_symlink_keeps_target() {
        let (dir, fs) = setup();
        let outside = TempDir::new().unwrap();
        std::fs::write(dir.path().join("target.txt"), "keep").unwrap();
        std::fs::write(outside.path().join("data"), "keep").unwrap();
        std::os::unix::fs::symlink("target.txt", dir.path().join("link")).unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("out")).unwrap();

        assert!(fs.remove("link").await.unwrap());
        assert!(fs.remove("out").await.unwrap());

        assert!(dir.path().join("link").symlink_metadata().is_err());
        assert!(dir.path().join("out").symlink_metadata().is_err());
        assert_eq!(std::fs::read_to_string(dir.path().join("target.txt")).unwrap(), "keep");
        assert_eq!(std::fs::read_to_string(outside.path().join("data")).unwrap(), "keep");
    }

    #[tokio::test]
    async fn test_read_only_rejects_writes() {
        let dir = TempDir::new().unwrap();
        let fs = LocalProvider::read_only(dir.path());
        assert!(matches!(fs.make_directory("d").await, Err(VfsError::ReadOnly)));
        assert!(matches!(fs.open("f", OpenMode::Append).await, Err(VfsError::ReadOnly)));
    }

    #[tokio::test]
    async fn test_address_is_stable() {
        let dir = TempDir::new().unwrap();
        let a = LocalProvider::new(dir.path());
        let b = LocalProvider::new(dir.path());
        assert_eq!(a.address(), b.address());
        #[cfg(unix)]
        assert!(a.space_total().await.unwrap() > 0);
    }
}
