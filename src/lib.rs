//! layerfs - two-layer overlay filesystem
//!
//! Presents a read-only base tree and a writable overlay tree as one mounted
//! tree. Reads come from the overlay when it has an entry for the path and
//! from the base otherwise; every modification lands in the overlay.

pub mod config;
pub mod error;
pub mod fs;
pub mod session;

pub use config::Config;
pub use error::{Error, Result};
pub use session::{mount, mount_with};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, MountConfig, MountOptions};
    pub use crate::error::{Error, Result};
    pub use crate::fs::{HostFs, Operations, OverlayFs, PathResolver};
}
