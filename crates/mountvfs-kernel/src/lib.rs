//! # mountvfs-kernel
//!
//! Mount-routing virtual filesystem.
//!
//! Storage providers (host directories, in-memory scratch space, removable
//! media announced by discovery) are mounted at arbitrary points in a single
//! path tree. The [`Vfs`] facade resolves every path against that tree and
//! dispatches the operation to the owning provider, answering for the
//! directories the tree creates between mount points itself.
//!
//! ```no_run
//! use std::sync::Arc;
//! use mountvfs_kernel::{MemoryProvider, Vfs};
//!
//! # async fn demo() -> mountvfs_kernel::VfsResult<()> {
//! let vfs = Vfs::default();
//! vfs.mount(Arc::new(MemoryProvider::new()), "/tmp")?;
//! vfs.with_open("/tmp/hello", "w", async |s| s.write(b"hi").await).await?;
//! assert_eq!(vfs.list("/").await?.collect::<Vec<_>>(), vec!["tmp/"]);
//! # Ok(())
//! # }
//! ```

pub mod automount;
pub mod config;
pub mod scheduler;
pub mod vfs;

pub use automount::{AutoMount, AutorunShell, DiscoveryEvent, DRIVE_TYPE, FILESYSTEM_TYPE};
pub use config::{ConfigError, VfsConfig};
pub use scheduler::{ManualScheduler, NamedEvent, Scheduler, TokioScheduler};
pub use vfs::{
    HandleId, Listing, LocalProvider, MemoryProvider, MountTree, OpenMode, Provider,
    ProviderRegistry, Stream, Vfs, VfsError, VfsResult, Whence,
};
