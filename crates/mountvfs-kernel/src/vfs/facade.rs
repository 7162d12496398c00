//! Filesystem facade.
//!
//! [`Vfs`] is the public operation set. Every path argument is canonicalized
//! and resolved against the [`MountTree`]; the call is then either answered
//! from the tree itself (virtual and mount-root directories) or delegated to
//! the owning provider with a provider-relative path.
//!
//! The tree lock is only held while resolving. Providers are cloned out of
//! the tree before any `.await`, so a slow provider never blocks mounts.

use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::error::{VfsError, VfsResult};
use super::path;
use super::provider::{OpenMode, Provider};
use super::registry::ProviderRegistry;
use super::stream::{CHUNK_SIZE, LeakPolicy, Stream};
use super::tree::MountTree;
use crate::config::VfsConfig;
use crate::scheduler::{Scheduler, TokioScheduler};

/// Outcome of resolving a path.
enum Resolved {
    /// The path names a tree node.
    Virtual {
        provider: Option<Arc<dyn Provider>>,
        children: Vec<String>,
    },
    /// The path lies inside a provider.
    Delegated {
        provider: Arc<dyn Provider>,
        path: String,
    },
    /// Nothing is mounted at the deepest node reached.
    Missing,
}

/// Names returned by [`Vfs::list`].
///
/// Finite and consumed once. Directory names carry a trailing `/`.
#[derive(Debug)]
pub struct Listing {
    names: std::vec::IntoIter<String>,
}

impl Iterator for Listing {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.names.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.names.size_hint()
    }
}

impl ExactSizeIterator for Listing {}

/// Mount-routing virtual filesystem.
///
/// Share it through an `Arc`; every method takes `&self`.
pub struct Vfs {
    tree: RwLock<MountTree>,
    registry: ProviderRegistry,
    autorun: AtomicBool,
    scheduler: Arc<dyn Scheduler>,
    leaks: Arc<AtomicUsize>,
    leak_cleanup: bool,
}

impl std::fmt::Debug for Vfs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vfs")
            .field("tree", &*self.tree.read())
            .field("registry", &self.registry)
            .field("autorun", &self.autorun.load(Ordering::Relaxed))
            .field("leaks", &self.leaks.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new(Arc::new(TokioScheduler::default()))
    }
}

impl Vfs {
    /// Create an empty VFS with default settings.
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self::with_config(&VfsConfig::default(), scheduler)
    }

    /// Create an empty VFS from configuration.
    pub fn with_config(config: &VfsConfig, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            tree: RwLock::new(MountTree::new()),
            registry: ProviderRegistry::new(),
            autorun: AtomicBool::new(config.autorun),
            scheduler,
            leaks: Arc::new(AtomicUsize::new(0)),
            leak_cleanup: config.leak_cleanup,
        }
    }

    fn resolve(&self, path: &str) -> Resolved {
        let tree = self.tree.read();
        let found = tree.lookup(path);
        let provider = tree.provider(found.node).cloned();

        if found.is_exact() {
            let children = tree.children(found.node).map(|c| format!("{c}/")).collect();
            return Resolved::Virtual { provider, children };
        }

        match provider {
            Some(provider) => {
                tracing::trace!(
                    path,
                    mount = %found.node_path,
                    rest = %found.remainder,
                    "delegating"
                );
                Resolved::Delegated {
                    provider,
                    path: found.remainder,
                }
            }
            None => Resolved::Missing,
        }
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    /// Returns true if the path names a tree node or an existing provider entry.
    pub async fn exists(&self, path: &str) -> bool {
        match self.resolve(path) {
            Resolved::Virtual { .. } => true,
            Resolved::Delegated { provider, path } => provider.exists(&path).await,
            Resolved::Missing => false,
        }
    }

    /// Size in bytes; 0 for directories and missing paths.
    pub async fn size(&self, path: &str) -> u64 {
        match self.resolve(path) {
            Resolved::Delegated { provider, path } => provider.size(&path).await,
            _ => 0,
        }
    }

    pub async fn is_directory(&self, path: &str) -> bool {
        match self.resolve(path) {
            Resolved::Virtual { .. } => true,
            Resolved::Delegated { provider, path } => provider.is_directory(&path).await,
            Resolved::Missing => false,
        }
    }

    /// Modification time in milliseconds since the Unix epoch; 0 if unknown.
    pub async fn last_modified(&self, path: &str) -> u64 {
        match self.resolve(path) {
            Resolved::Delegated { provider, path } => provider.last_modified(&path).await,
            _ => 0,
        }
    }

    /// Entries of a directory, sorted and de-duplicated.
    ///
    /// Tree nodes below the path are merged into the provider's own listing.
    pub async fn list(&self, path: &str) -> VfsResult<Listing> {
        let names = match self.resolve(path) {
            Resolved::Virtual { provider, children } => {
                let mut merged: BTreeSet<String> = children.into_iter().collect();
                if let Some(provider) = provider {
                    merged.extend(provider.list("").await?);
                }
                merged.into_iter().collect()
            }
            Resolved::Delegated { provider, path } => {
                let mut entries = provider.list(&path).await?;
                entries.sort();
                entries.dedup();
                entries
            }
            Resolved::Missing => return Err(VfsError::not_found(path::canonicalize(path))),
        };

        Ok(Listing {
            names: names.into_iter(),
        })
    }

    /// Total capacity of the provider backing the path.
    pub async fn space_total(&self, path: &str) -> VfsResult<Option<u64>> {
        let (provider, _) = self
            .get(path)
            .map_err(|_| VfsError::invalid_path(path::canonicalize(path)))?;
        Ok(provider.space_total().await)
    }

    /// Used capacity of the provider backing the path.
    pub async fn space_used(&self, path: &str) -> VfsResult<Option<u64>> {
        let (provider, _) = self
            .get(path)
            .map_err(|_| VfsError::invalid_path(path::canonicalize(path)))?;
        Ok(provider.space_used().await)
    }

    /// Provider bound at the node the path resolves to, and that node's path.
    pub fn get(&self, path: &str) -> VfsResult<(Arc<dyn Provider>, String)> {
        let tree = self.tree.read();
        let found = tree.lookup(path);
        match tree.provider(found.node) {
            Some(provider) => Ok((provider.clone(), found.node_path)),
            None => Err(VfsError::not_found(path::canonicalize(path))),
        }
    }

    /// Returns true if the provider backing the path rejects writes.
    pub fn is_read_only(&self, path: &str) -> VfsResult<bool> {
        self.get(path).map(|(provider, _)| provider.is_read_only())
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    pub async fn make_directory(&self, path: &str) -> VfsResult<bool> {
        match self.resolve(path) {
            Resolved::Delegated { provider, path } => provider.make_directory(&path).await,
            Resolved::Virtual { .. } => Err(VfsError::virtual_directory(path::canonicalize(path))),
            Resolved::Missing => Err(VfsError::not_found(path::canonicalize(path))),
        }
    }

    pub async fn remove(&self, path: &str) -> VfsResult<bool> {
        match self.resolve(path) {
            Resolved::Delegated { provider, path } => provider.remove(&path).await,
            Resolved::Virtual { .. } => Err(VfsError::virtual_directory(path::canonicalize(path))),
            Resolved::Missing => Err(VfsError::not_found(path::canonicalize(path))),
        }
    }

    /// Move an entry.
    ///
    /// When both paths resolve into the same provider this is a single
    /// provider rename. Otherwise it is a copy followed by a remove of the
    /// source; if the remove fails the copy is left in place and the remove
    /// error is returned.
    pub async fn rename(&self, from: &str, to: &str) -> VfsResult<bool> {
        if let (
            Resolved::Delegated {
                provider: source,
                path: source_path,
            },
            Resolved::Delegated {
                provider: target,
                path: target_path,
            },
        ) = (self.resolve(from), self.resolve(to))
            && source.address() == target.address()
        {
            tracing::debug!(from, to, address = %source.address(), "rename within provider");
            return source.rename(&source_path, &target_path).await;
        }

        tracing::debug!(from, to, "rename by copy");
        self.copy(from, to).await?;
        match self.remove(from).await {
            Ok(removed) => Ok(removed),
            Err(e) => {
                tracing::warn!(from, to, error = %e, "rename copied but could not remove source");
                Err(e)
            }
        }
    }

    /// Copy a file's bytes in [`CHUNK_SIZE`] chunks.
    ///
    /// Any failure closes both streams and surfaces as
    /// [`VfsError::CopyAborted`]; the destination may hold partial data.
    pub async fn copy(&self, from: &str, to: &str) -> VfsResult<()> {
        let from = path::canonicalize(from);
        let to = path::canonicalize(to);
        if from == to {
            return Err(VfsError::invalid_path(format!("cannot copy {from} onto itself")));
        }

        match self.transfer(&from, &to).await {
            Ok(bytes) => {
                tracing::debug!(%from, %to, bytes, "copied");
                Ok(())
            }
            Err(e) => Err(VfsError::copy_aborted(from, to, e)),
        }
    }

    async fn transfer(&self, from: &str, to: &str) -> VfsResult<u64> {
        let mut source = self.open_mode(from, OpenMode::ReadBinary).await?;
        let mut target = match self.open_mode(to, OpenMode::WriteBinary).await {
            Ok(target) => target,
            Err(e) => {
                source.close().await;
                return Err(e);
            }
        };

        let result = pump(&source, &target).await;
        source.close().await;
        target.close().await;
        result
    }

    // ========================================================================
    // Streams
    // ========================================================================

    /// Open a stream. `mode` is one of `r`, `rb`, `w`, `wb`, `a`, `ab`.
    ///
    /// The mode is checked before any provider is consulted.
    pub async fn open(&self, path: &str, mode: &str) -> VfsResult<Stream> {
        let mode: OpenMode = mode.parse()?;
        self.open_mode(path, mode).await
    }

    /// Open a stream with an already-parsed mode.
    pub async fn open_mode(&self, path: &str, mode: OpenMode) -> VfsResult<Stream> {
        let Resolved::Delegated {
            provider,
            path: relative,
        } = self.resolve(path)
        else {
            return Err(VfsError::not_found(path::canonicalize(path)));
        };

        let handle = provider.open(&relative, mode).await?;
        tracing::trace!(path, %mode, %handle, "opened");
        Ok(Stream::new(
            provider,
            handle,
            mode,
            path::canonicalize(path),
            self.leak_policy(),
        ))
    }

    /// Open a stream, run `f` on it, and close it however `f` returns.
    pub async fn with_open<T>(
        &self,
        path: &str,
        mode: &str,
        f: impl AsyncFnOnce(&mut Stream) -> VfsResult<T>,
    ) -> VfsResult<T> {
        let mut stream = self.open(path, mode).await?;
        let result = f(&mut stream).await;
        stream.close().await;
        result
    }

    fn leak_policy(&self) -> LeakPolicy {
        LeakPolicy {
            leaks: Arc::clone(&self.leaks),
            cleanup: self.leak_cleanup.then(|| Arc::clone(&self.scheduler)),
        }
    }

    /// Number of streams dropped without being closed.
    pub fn leaked_streams(&self) -> usize {
        self.leaks.load(Ordering::Relaxed)
    }

    // ========================================================================
    // Mount management
    // ========================================================================

    /// Bind a provider at the path.
    pub fn mount(&self, provider: Arc<dyn Provider>, path: &str) -> VfsResult<()> {
        let address = provider.address().to_string();
        self.tree.write().mount(provider, path)?;
        tracing::info!(path = %path::canonicalize(path), %address, "mounted");
        Ok(())
    }

    /// Mount a registered provider by unique address prefix.
    pub fn mount_address(&self, prefix: &str, path: &str) -> VfsResult<()> {
        let provider = self.registry.resolve(prefix)?;
        self.mount(provider, path)
    }

    /// Snapshot of every `(provider, mount path)` pair.
    pub fn mounts(&self) -> std::vec::IntoIter<(Arc<dyn Provider>, String)> {
        let tree = self.tree.read();
        tree.iter()
            .map(|(provider, path)| (provider.clone(), path))
            .collect::<Vec<_>>()
            .into_iter()
    }

    /// Unbind the provider mounted exactly at the path.
    pub fn unmount(&self, path: &str) -> VfsResult<Arc<dyn Provider>> {
        let provider = self.tree.write().unmount(path)?;
        tracing::info!(path = %path::canonicalize(path), address = %provider.address(), "unmounted");
        Ok(provider)
    }

    /// Unbind every mount of the provider with this address.
    pub fn unmount_provider(&self, address: &str) -> usize {
        let removed = self.tree.write().unmount_provider(address);
        if removed > 0 {
            tracing::info!(%address, removed, "unmounted provider");
        }
        removed
    }

    /// Read the autorun flag, setting it first when `enabled` is given.
    pub fn autorun(&self, enabled: Option<bool>) -> bool {
        if let Some(enabled) = enabled {
            self.autorun.store(enabled, Ordering::Relaxed);
        }
        self.autorun.load(Ordering::Relaxed)
    }

    /// Registered provider by label or unique address prefix.
    pub fn proxy(&self, filter: &str) -> VfsResult<Arc<dyn Provider>> {
        self.registry.proxy(filter)
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }
}

async fn pump(source: &Stream, target: &Stream) -> VfsResult<u64> {
    let mut copied = 0u64;
    while let Some(chunk) = source.read(CHUNK_SIZE).await? {
        if chunk.is_empty() {
            break;
        }
        if !target.write(&chunk).await? {
            return Err(VfsError::provider(format!("write to {} rejected", target.path())));
        }
        copied += chunk.len() as u64;
    }
    Ok(copied)
}
