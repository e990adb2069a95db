//! FUSE bridge
//!
//! Exposes any path-based [`Operations`](super::Operations) implementation
//! through fuser's inode-based `Filesystem` trait.

mod filesystem;
mod handle;
mod inode;

pub use filesystem::{DirEntry, FuseBridge};
pub use handle::HandleRegistry;
pub use inode::{file_type, to_file_attr, InodeTable, ROOT_INO};
