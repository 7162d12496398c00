//! In-memory provider.
//!
//! Used for `/tmp` and testing. All data is ephemeral.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::path;
use crate::vfs::provider::{HandleId, OpenMode, Provider, Whence};

/// Entry in the memory filesystem.
#[derive(Debug, Clone)]
enum Entry {
    File { data: Vec<u8>, mtime: u64 },
    Directory { mtime: u64 },
}

impl Entry {
    fn mtime(&self) -> u64 {
        match self {
            Entry::File { mtime, .. } => *mtime,
            Entry::Directory { mtime } => *mtime,
        }
    }
}

/// Cursor state of an open handle.
#[derive(Debug, Clone)]
struct OpenFile {
    path: String,
    mode: OpenMode,
    position: u64,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// In-memory provider.
///
/// Thread-safe via internal `RwLock`. All data is lost when dropped.
#[derive(Debug)]
pub struct MemoryProvider {
    address: String,
    label: Option<String>,
    capacity: Option<u64>,
    read_only: bool,
    entries: RwLock<HashMap<String, Entry>>,
    handles: RwLock<HashMap<HandleId, OpenFile>>,
    next_handle: AtomicU64,
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProvider {
    /// Create an empty provider with a random address.
    pub fn new() -> Self {
        Self::with_address(uuid::Uuid::new_v4().to_string())
    }

    /// Create an empty provider with a fixed address.
    pub fn with_address(address: impl Into<String>) -> Self {
        let mut entries = HashMap::new();
        // Root directory always exists
        entries.insert(String::new(), Entry::Directory { mtime: now_millis() });
        Self {
            address: address.into(),
            label: None,
            capacity: None,
            read_only: false,
            entries: RwLock::new(entries),
            handles: RwLock::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Set the label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Report a fixed capacity from `space_total`.
    pub fn with_capacity(mut self, bytes: u64) -> Self {
        self.capacity = Some(bytes);
        self
    }

    /// Reject every mutation.
    pub fn into_read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Store a file directly, creating parent directories.
    ///
    /// Seeding helper that bypasses the read-only flag.
    pub fn insert_file(&self, path: &str, data: impl Into<Vec<u8>>) -> VfsResult<()> {
        let normalized = Self::normalize(path);
        let mut entries = self.write_entries()?;
        Self::ensure_parents(&mut entries, &normalized);
        entries.insert(
            normalized,
            Entry::File {
                data: data.into(),
                mtime: now_millis(),
            },
        );
        Ok(())
    }

    /// Full contents of a file, if it exists.
    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        let entries = self.entries.read().ok()?;
        match entries.get(&Self::normalize(path)) {
            Some(Entry::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    /// Number of handles currently open.
    pub fn open_handles(&self) -> usize {
        self.handles.read().map(|h| h.len()).unwrap_or(0)
    }

    /// Normalize a path: no leading `/`, `.` and `..` resolved.
    fn normalize(path: &str) -> String {
        path::segments(path).join("/")
    }

    fn parent_of(path: &str) -> Option<&str> {
        if path.is_empty() {
            None
        } else {
            Some(path.rfind('/').map(|i| &path[..i]).unwrap_or(""))
        }
    }

    fn read_entries(&self) -> VfsResult<std::sync::RwLockReadGuard<'_, HashMap<String, Entry>>> {
        self.entries
            .read()
            .map_err(|_| VfsError::provider("lock poisoned"))
    }

    fn write_entries(
        &self,
    ) -> VfsResult<std::sync::RwLockWriteGuard<'_, HashMap<String, Entry>>> {
        self.entries
            .write()
            .map_err(|_| VfsError::provider("lock poisoned"))
    }

    /// Ensure all parent directories exist.
    fn ensure_parents(entries: &mut HashMap<String, Entry>, path: &str) {
        let mut current = Self::parent_of(path);
        while let Some(dir) = current {
            entries
                .entry(dir.to_string())
                .or_insert(Entry::Directory { mtime: now_millis() });
            current = Self::parent_of(dir);
        }
    }

    fn is_descendant(candidate: &str, ancestor: &str) -> bool {
        ancestor.is_empty() && !candidate.is_empty()
            || candidate
                .strip_prefix(ancestor)
                .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Check if write operations are allowed.
    fn check_writable(&self) -> VfsResult<()> {
        if self.read_only {
            Err(VfsError::ReadOnly)
        } else {
            Ok(())
        }
    }

    fn handle(&self, handle: HandleId) -> VfsResult<OpenFile> {
        self.handles
            .read()
            .map_err(|_| VfsError::provider("lock poisoned"))?
            .get(&handle)
            .cloned()
            .ok_or_else(|| VfsError::provider(format!("bad file descriptor {handle}")))
    }

    fn set_position(&self, handle: HandleId, position: u64) -> VfsResult<()> {
        let mut handles = self
            .handles
            .write()
            .map_err(|_| VfsError::provider("lock poisoned"))?;
        if let Some(open) = handles.get_mut(&handle) {
            open.position = position;
        }
        Ok(())
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    fn address(&self) -> &str {
        &self.address
    }

    fn label(&self) -> Option<String> {
        self.label.clone()
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    async fn exists(&self, path: &str) -> bool {
        self.read_entries()
            .map(|e| e.contains_key(&Self::normalize(path)))
            .unwrap_or(false)
    }

    async fn size(&self, path: &str) -> u64 {
        match self.read_entries() {
            Ok(entries) => match entries.get(&Self::normalize(path)) {
                Some(Entry::File { data, .. }) => data.len() as u64,
                _ => 0,
            },
            Err(_) => 0,
        }
    }

    async fn is_directory(&self, path: &str) -> bool {
        self.read_entries()
            .map(|e| matches!(e.get(&Self::normalize(path)), Some(Entry::Directory { .. })))
            .unwrap_or(false)
    }

    async fn last_modified(&self, path: &str) -> u64 {
        self.read_entries()
            .ok()
            .and_then(|e| e.get(&Self::normalize(path)).map(Entry::mtime))
            .unwrap_or(0)
    }

    async fn list(&self, path: &str) -> VfsResult<Vec<String>> {
        let normalized = Self::normalize(path);
        let entries = self.read_entries()?;

        match entries.get(&normalized) {
            Some(Entry::Directory { .. }) => {}
            Some(Entry::File { .. }) => {
                return Err(VfsError::provider(format!("not a directory: {normalized}")));
            }
            None => return Err(VfsError::not_found(normalized)),
        }

        let mut names: Vec<String> = entries
            .iter()
            .filter(|(entry_path, _)| {
                !entry_path.is_empty() && Self::parent_of(entry_path) == Some(normalized.as_str())
            })
            .map(|(entry_path, entry)| {
                let name = entry_path.rsplit('/').next().unwrap_or(entry_path);
                match entry {
                    Entry::Directory { .. } => format!("{name}/"),
                    Entry::File { .. } => name.to_string(),
                }
            })
            .collect();

        // Sort for consistent ordering
        names.sort();
        Ok(names)
    }

    async fn space_total(&self) -> Option<u64> {
        self.capacity
    }

    async fn space_used(&self) -> Option<u64> {
        let entries = self.read_entries().ok()?;
        Some(
            entries
                .values()
                .map(|e| match e {
                    Entry::File { data, .. } => data.len() as u64,
                    Entry::Directory { .. } => 0,
                })
                .sum(),
        )
    }

    async fn make_directory(&self, path: &str) -> VfsResult<bool> {
        self.check_writable()?;
        let normalized = Self::normalize(path);
        let mut entries = self.write_entries()?;

        if entries.contains_key(&normalized) {
            return Ok(false);
        }
        Self::ensure_parents(&mut entries, &normalized);
        entries.insert(normalized, Entry::Directory { mtime: now_millis() });
        Ok(true)
    }

    async fn remove(&self, path: &str) -> VfsResult<bool> {
        self.check_writable()?;
        let normalized = Self::normalize(path);
        if normalized.is_empty() {
            return Err(VfsError::provider("cannot remove root"));
        }

        let mut entries = self.write_entries()?;
        if entries.remove(&normalized).is_none() {
            return Err(VfsError::not_found(normalized));
        }
        entries.retain(|k, _| !Self::is_descendant(k, &normalized));
        Ok(true)
    }

    async fn rename(&self, from: &str, to: &str) -> VfsResult<bool> {
        self.check_writable()?;
        let from_normalized = Self::normalize(from);
        let to_normalized = Self::normalize(to);
        if from_normalized.is_empty() || to_normalized.is_empty() {
            return Err(VfsError::provider("cannot rename root"));
        }
        if Self::is_descendant(&to_normalized, &from_normalized) {
            return Err(VfsError::provider("cannot move a directory into itself"));
        }

        let mut entries = self.write_entries()?;
        let entry = entries
            .remove(&from_normalized)
            .ok_or_else(|| VfsError::not_found(from_normalized.clone()))?;

        // If it's a directory, we need to rename all children too
        if matches!(entry, Entry::Directory { .. }) {
            let children: Vec<_> = entries
                .keys()
                .filter(|k| Self::is_descendant(k, &from_normalized))
                .cloned()
                .collect();

            for child in children {
                if let Some(child_entry) = entries.remove(&child) {
                    let relative = &child[from_normalized.len()..];
                    entries.insert(format!("{to_normalized}{relative}"), child_entry);
                }
            }
        }

        Self::ensure_parents(&mut entries, &to_normalized);
        entries.insert(to_normalized, entry);
        Ok(true)
    }

    async fn open(&self, path: &str, mode: OpenMode) -> VfsResult<HandleId> {
        let normalized = Self::normalize(path);
        let mut position = 0;

        if mode.is_read() {
            let entries = self.read_entries()?;
            match entries.get(&normalized) {
                Some(Entry::File { .. }) => {}
                Some(Entry::Directory { .. }) => {
                    return Err(VfsError::provider(format!("is a directory: {normalized}")));
                }
                None => return Err(VfsError::not_found(normalized)),
            }
        } else {
            self.check_writable()?;
            let mut entries = self.write_entries()?;
            match entries.get_mut(&normalized) {
                Some(Entry::Directory { .. }) => {
                    return Err(VfsError::provider(format!("is a directory: {normalized}")));
                }
                Some(Entry::File { data, mtime }) => {
                    if mode.is_append() {
                        position = data.len() as u64;
                    } else {
                        data.clear();
                        *mtime = now_millis();
                    }
                }
                None => {
                    Self::ensure_parents(&mut entries, &normalized);
                    entries.insert(
                        normalized.clone(),
                        Entry::File {
                            data: Vec::new(),
                            mtime: now_millis(),
                        },
                    );
                }
            }
        }

        let handle = HandleId(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.handles
            .write()
            .map_err(|_| VfsError::provider("lock poisoned"))?
            .insert(
                handle,
                OpenFile {
                    path: normalized,
                    mode,
                    position,
                },
            );
        Ok(handle)
    }

    async fn read(&self, handle: HandleId, count: usize) -> VfsResult<Option<Vec<u8>>> {
        let open = self.handle(handle)?;
        if !open.mode.is_read() {
            return Err(VfsError::provider("file not opened for reading"));
        }

        let chunk = {
            let entries = self.read_entries()?;
            let data = match entries.get(&open.path) {
                Some(Entry::File { data, .. }) => data,
                _ => return Err(VfsError::not_found(open.path)),
            };
            let start = (open.position as usize).min(data.len());
            if start >= data.len() {
                return Ok(None);
            }
            let end = start.saturating_add(count).min(data.len());
            data[start..end].to_vec()
        };

        self.set_position(handle, open.position + chunk.len() as u64)?;
        Ok(Some(chunk))
    }

    async fn seek(&self, handle: HandleId, whence: Whence, offset: i64) -> VfsResult<u64> {
        let open = self.handle(handle)?;
        let len = match self.read_entries()?.get(&open.path) {
            Some(Entry::File { data, .. }) => data.len() as i64,
            _ => 0,
        };
        let base = match whence {
            Whence::Set => 0,
            Whence::Cur => open.position as i64,
            Whence::End => len,
        };
        let target = base
            .checked_add(offset)
            .filter(|t| *t >= 0)
            .ok_or_else(|| VfsError::provider("invalid offset"))?;
        self.set_position(handle, target as u64)?;
        Ok(target as u64)
    }

    async fn write(&self, handle: HandleId, data: &[u8]) -> VfsResult<bool> {
        let open = self.handle(handle)?;
        if open.mode.is_read() {
            return Err(VfsError::provider("file not opened for writing"));
        }

        let end = {
            let mut entries = self.write_entries()?;
            let (file_data, mtime) = match entries.get_mut(&open.path) {
                Some(Entry::File { data, mtime }) => (data, mtime),
                _ => return Err(VfsError::not_found(open.path)),
            };
            let offset = if open.mode.is_append() {
                file_data.len()
            } else {
                usize::try_from(open.position)
                    .map_err(|_| VfsError::provider("write offset out of range"))?
            };
            let end = offset
                .checked_add(data.len())
                .ok_or_else(|| VfsError::provider("write offset out of range"))?;
            // Extend if necessary
            if end > file_data.len() {
                file_data
                    .try_reserve(end - file_data.len())
                    .map_err(|e| VfsError::provider(format!("cannot grow file to {end} bytes: {e}")))?;
                file_data.resize(end, 0);
            }
            file_data[offset..end].copy_from_slice(data);
            *mtime = now_millis();
            end
        };

        self.set_position(handle, end as u64)?;
        Ok(true)
    }

    async fn close(&self, handle: HandleId) {
        if let Ok(mut handles) = self.handles.write() {
            handles.remove(&handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn write_file(fs: &MemoryProvider, path: &str, data: &[u8]) {
        let h = fs.open(path, OpenMode::Write).await.unwrap();
        fs.write(h, data).await.unwrap();
        fs.close(h).await;
    }

    #[tokio::test]
    async fn test_create_and_read() {
        let fs = MemoryProvider::new();
        write_file(&fs, "test.txt", b"hello world").await;

        let h = fs.open("test.txt", OpenMode::Read).await.unwrap();
        assert_eq!(fs.read(h, 100).await.unwrap().unwrap(), b"hello world");
        assert_eq!(fs.read(h, 100).await.unwrap(), None);
        fs.close(h).await;
        assert_eq!(fs.open_handles(), 0);
    }

    #[tokio::test]
    async fn test_partial_read_and_seek() {
        let fs = MemoryProvider::new();
        fs.insert_file("test.txt", "hello world").unwrap();

        let h = fs.open("test.txt", OpenMode::Read).await.unwrap();
        assert_eq!(fs.seek(h, Whence::Set, 6).await.unwrap(), 6);
        assert_eq!(fs.read(h, 5).await.unwrap().unwrap(), b"world");
        assert_eq!(fs.seek(h, Whence::End, -5).await.unwrap(), 6);
        assert_eq!(fs.seek(h, Whence::Cur, -6).await.unwrap(), 0);
        assert!(fs.seek(h, Whence::Cur, -1).await.is_err());
    }

    #[tokio::test]
    async fn test_append() {
        let fs = MemoryProvider::new();
        fs.insert_file("log", "one\n").unwrap();

        let h = fs.open("log", OpenMode::Append).await.unwrap();
        fs.write(h, b"two\n").await.unwrap();
        fs.close(h).await;
        assert_eq!(fs.contents("log").unwrap(), b"one\ntwo\n");
    }

    #[tokio::test]
    async fn test_write_past_addressable_range_fails() {
        let fs = MemoryProvider::new();
        write_file(&fs, "f", b"abc").await;

        let h = fs.open("f", OpenMode::Write).await.unwrap();
        assert_eq!(fs.seek(h, Whence::Set, i64::MAX).await.unwrap(), i64::MAX as u64);
        let err = fs.write(h, b"x").await.unwrap_err();
        assert!(matches!(err, VfsError::Provider(_)));
        fs.close(h).await;
        assert!(fs.contents("f").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_write_truncates() {
        let fs = MemoryProvider::new();
        fs.insert_file("f", "long contents").unwrap();
        write_file(&fs, "f", b"short").await;
        assert_eq!(fs.contents("f").unwrap(), b"short");
        assert_eq!(fs.size("f").await, 5);
    }

    #[tokio::test]
    async fn test_mkdir_and_list() {
        let fs = MemoryProvider::new();
        assert!(fs.make_directory("subdir").await.unwrap());
        assert!(!fs.make_directory("subdir").await.unwrap());
        fs.insert_file("subdir/file.txt", "x").unwrap();
        fs.insert_file("root.txt", "y").unwrap();

        assert_eq!(fs.list("").await.unwrap(), vec!["root.txt", "subdir/"]);
        assert_eq!(fs.list("/subdir").await.unwrap(), vec!["file.txt"]);
        assert!(fs.list("missing").await.unwrap_err().is_not_found());
        assert!(fs.list("root.txt").await.is_err());
    }

    #[tokio::test]
    async fn test_remove_recursive() {
        let fs = MemoryProvider::new();
        fs.insert_file("a/b/c.txt", "x").unwrap();
        fs.insert_file("ab.txt", "y").unwrap();

        assert!(fs.remove("a").await.unwrap());
        assert!(!fs.exists("a/b/c.txt").await);
        assert!(!fs.exists("a/b").await);
        assert!(fs.exists("ab.txt").await);
        assert!(fs.remove("a").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_rename_directory() {
        let fs = MemoryProvider::new();
        fs.insert_file("old/inner.txt", "content").unwrap();

        assert!(fs.rename("old", "new").await.unwrap());
        assert!(!fs.exists("old").await);
        assert!(fs.is_directory("new").await);
        assert_eq!(fs.contents("new/inner.txt").unwrap(), b"content");
    }

    #[tokio::test]
    async fn test_rename_into_self_fails() {
        let fs = MemoryProvider::new();
        fs.make_directory("d").await.unwrap();
        assert!(fs.rename("d", "d/e").await.is_err());
    }

    #[tokio::test]
    async fn test_read_only() {
        let fs = MemoryProvider::new().into_read_only();
        fs.insert_file("seed", "x").unwrap();
        assert!(fs.is_read_only());
        assert!(matches!(fs.make_directory("d").await, Err(VfsError::ReadOnly)));
        assert!(matches!(fs.open("seed", OpenMode::Write).await, Err(VfsError::ReadOnly)));
        assert!(fs.open("seed", OpenMode::Read).await.is_ok());
    }

    #[tokio::test]
    async fn test_space() {
        let fs = MemoryProvider::new().with_capacity(4096);
        fs.insert_file("a", vec![0u8; 100]).unwrap();
        fs.insert_file("b/c", vec![0u8; 20]).unwrap();
        assert_eq!(fs.space_total().await, Some(4096));
        assert_eq!(fs.space_used().await, Some(120));
    }

    #[tokio::test]
    async fn test_path_normalization() {
        let fs = MemoryProvider::new();
        fs.insert_file("/a/b/c.txt", "x").unwrap();

        assert!(fs.exists("a/b/c.txt").await);
        assert!(fs.exists("/a/b/c.txt").await);
        assert!(fs.exists("a/./b/c.txt").await);
        assert!(fs.exists("a/b/../b/c.txt").await);
    }
}
