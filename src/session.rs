//! Mount session entry points
//!
//! Both functions block until the filesystem is unmounted.

use std::path::Path;
use tracing::info;

use crate::config::{Config, MountConfig};
use crate::error::{Error, Result};
use crate::fs::{FuseBridge, OverlayFs};

/// Mount `root` overlaid with `overlay` at `mountpoint` using default options
pub fn mount(mountpoint: &Path, root: &Path, overlay: &Path) -> Result<()> {
    mount_with(Config::new(MountConfig::new(root, overlay, mountpoint)))
}

/// Validate `config` and serve the overlay until unmounted
pub fn mount_with(mut config: Config) -> Result<()> {
    config.validate()?;

    let fs = OverlayFs::from_config(&config.mount);
    let bridge = FuseBridge::new(fs, config.options.attr_ttl());
    let options = config.options.to_fuser_options();

    info!(
        "Mounting {:?} over {:?} at {:?}",
        config.mount.overlay_root, config.mount.base_root, config.mount.mountpoint
    );

    fuser::mount2(bridge, &config.mount.mountpoint, &options).map_err(Error::Io)?;

    info!("Unmounted {:?}", config.mount.mountpoint);
    Ok(())
}
