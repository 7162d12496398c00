//! Mount-routing virtual filesystem.
//!
//! Independent storage providers are mounted at arbitrary points in one
//! logical path tree. Key components:
//!
//! - [`path`] - Canonicalization of `/`-separated paths
//! - [`MountTree`] - Arena of nodes, each bound to at most one provider
//! - [`Provider`] - Capability trait every storage backend implements
//! - [`Stream`] - Open file handle with leak detection
//! - [`Vfs`] - Public operation set routing calls through the tree
//! - [`ProviderRegistry`] - Live providers by address and label
//!
//! ## Design Decisions
//!
//! - **Tree, not prefix table**: Intermediate nodes exist without a provider
//!   and appear as virtual directories, so `/mnt` lists its mounts even when
//!   nothing is mounted at `/mnt` itself.
//! - **Deepest node wins**: A path is served only by the provider bound at the
//!   deepest tree node it reaches. A root mount is not consulted for `/mnt/y`
//!   once `/mnt` is a tree node.
//! - **Handles, not offsets**: Providers issue handles and keep cursors;
//!   the VFS only tracks whether a stream has been closed.

mod error;
mod facade;
pub mod path;
mod provider;
pub mod providers;
mod registry;
mod stream;
pub mod tree;

pub use error::{VfsError, VfsResult};
pub use facade::{Listing, Vfs};
pub use path::{canonicalize, concat, name};
pub use provider::{HandleId, OpenMode, Provider, Whence};
pub use providers::{LocalProvider, MemoryProvider};
pub use registry::ProviderRegistry;
pub use stream::{CHUNK_SIZE, Stream};
pub use tree::{MountTree, NodeId};
