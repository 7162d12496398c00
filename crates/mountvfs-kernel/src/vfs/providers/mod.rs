//! VFS providers.
//!
//! Providers implement [`Provider`](super::Provider) for different storage types.

mod local;
mod memory;

pub use local::LocalProvider;
pub use memory::MemoryProvider;
