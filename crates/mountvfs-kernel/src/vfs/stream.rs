//! Open file streams.
//!
//! A [`Stream`] wraps a provider-issued handle. Release it with
//! [`Stream::close`], or use [`Vfs::with_open`](super::Vfs::with_open) which
//! closes on every exit path. A stream dropped while still open is reported
//! as a leak and, when enabled, closed on a later scheduler tick.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::error::{VfsError, VfsResult};
use super::provider::{HandleId, OpenMode, Provider, Whence};
use crate::scheduler::Scheduler;

/// Chunk size used for whole-file reads and copies.
pub const CHUNK_SIZE: usize = 1024;

/// What happens when an open stream is dropped.
#[derive(Clone)]
pub(crate) struct LeakPolicy {
    pub(crate) leaks: Arc<AtomicUsize>,
    /// Set when leaked handles should be closed on a later tick.
    pub(crate) cleanup: Option<Arc<dyn Scheduler>>,
}

/// A caller-facing wrapper around a provider's open handle.
pub struct Stream {
    provider: Arc<dyn Provider>,
    handle: Option<HandleId>,
    mode: OpenMode,
    path: String,
    policy: LeakPolicy,
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("provider", &self.provider.address())
            .field("handle", &self.handle)
            .field("mode", &self.mode)
            .field("path", &self.path)
            .finish()
    }
}

impl Stream {
    pub(crate) fn new(
        provider: Arc<dyn Provider>,
        handle: HandleId,
        mode: OpenMode,
        path: String,
        policy: LeakPolicy,
    ) -> Self {
        Self {
            provider,
            handle: Some(handle),
            mode,
            path,
            policy,
        }
    }

    /// Mode the stream was opened with.
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Canonical VFS path the stream was opened on.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns true once [`close`](Stream::close) has run.
    pub fn is_closed(&self) -> bool {
        self.handle.is_none()
    }

    fn live_handle(&self) -> VfsResult<HandleId> {
        self.handle.ok_or(VfsError::Closed)
    }

    /// Read up to `count` bytes. `Ok(None)` at end-of-data.
    pub async fn read(&self, count: usize) -> VfsResult<Option<Vec<u8>>> {
        let handle = self.live_handle()?;
        self.provider.read(handle, count).await
    }

    /// Read from the current position to end-of-data.
    pub async fn read_to_end(&self) -> VfsResult<Vec<u8>> {
        let mut data = Vec::new();
        while let Some(chunk) = self.read(CHUNK_SIZE).await? {
            if chunk.is_empty() {
                break;
            }
            data.extend_from_slice(&chunk);
        }
        Ok(data)
    }

    /// Write bytes at the current position.
    pub async fn write(&self, data: &[u8]) -> VfsResult<bool> {
        let handle = self.live_handle()?;
        self.provider.write(handle, data).await
    }

    /// Move the cursor; returns the new absolute position.
    pub async fn seek(&self, whence: Whence, offset: i64) -> VfsResult<u64> {
        let handle = self.live_handle()?;
        self.provider.seek(handle, whence, offset).await
    }

    /// Close the handle. Closing twice is a no-op.
    pub async fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.provider.close(handle).await;
            tracing::trace!(path = %self.path, %handle, "stream closed");
        }
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        self.policy.leaks.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            path = %self.path,
            address = %self.provider.address(),
            %handle,
            "stream dropped without close"
        );

        if let Some(scheduler) = &self.policy.cleanup {
            let provider = Arc::clone(&self.provider);
            scheduler.defer(Box::pin(async move {
                provider.close(handle).await;
                tracing::debug!(address = %provider.address(), %handle, "closed leaked handle");
            }));
        }
    }
}
