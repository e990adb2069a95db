//! Overlay filesystem implementation
//!
//! Path resolution and operation dispatch for the two-layer overlay, the
//! host primitives it runs on, and the FUSE bridge that mounts it.

pub mod bridge;
pub mod handle;
pub mod host;
pub mod operations;
pub mod overlay;
pub mod resolver;

pub use bridge::FuseBridge;
pub use handle::{Handle, HandleMode};
pub use host::{Attributes, FsStats, HostFs, LocalHost, MemoryHost};
pub use operations::Operations;
pub use overlay::OverlayFs;
pub use resolver::PathResolver;
