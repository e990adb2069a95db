//! Configuration management for layerfs

use crate::error::{Error, Result};
use crate::fs::resolver::normalize;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default attribute/entry cache TTL handed to the kernel (seconds)
pub const DEFAULT_ATTR_TTL_SECS: u64 = 1;

/// Default filesystem name shown in the mount table
pub const DEFAULT_FS_NAME: &str = "layerfs";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// The three paths the session is bound to
    pub mount: MountConfig,

    /// FUSE mount options
    pub options: MountOptions,
}

/// Mount triple, fixed for the lifetime of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountConfig {
    /// Read-only lower tree
    pub base_root: PathBuf,

    /// Writable upper tree receiving every modification
    pub overlay_root: PathBuf,

    /// Where the merged view is mounted
    pub mountpoint: PathBuf,
}

/// Mount options passed through to fuser
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountOptions {
    /// Allow other users to access the mount
    pub allow_other: bool,

    /// Unmount automatically when the process exits
    pub auto_unmount: bool,

    /// Name shown in the mount table
    pub fs_name: String,

    /// Kernel attribute cache TTL in seconds
    pub attr_ttl_secs: u64,
}

impl Default for MountOptions {
    fn default() -> Self {
        MountOptions {
            allow_other: false,
            auto_unmount: false,
            fs_name: DEFAULT_FS_NAME.to_string(),
            attr_ttl_secs: DEFAULT_ATTR_TTL_SECS,
        }
    }
}

impl MountOptions {
    /// Attribute TTL as a duration
    pub fn attr_ttl(&self) -> Duration {
        Duration::from_secs(self.attr_ttl_secs)
    }

    /// Build the fuser option list
    pub fn to_fuser_options(&self) -> Vec<fuser::MountOption> {
        let mut options = vec![fuser::MountOption::FSName(self.fs_name.clone())];
        if self.auto_unmount {
            options.push(fuser::MountOption::AutoUnmount);
        }
        if self.allow_other {
            options.push(fuser::MountOption::AllowOther);
        }
        options
    }
}

impl MountConfig {
    pub fn new(
        base_root: impl Into<PathBuf>,
        overlay_root: impl Into<PathBuf>,
        mountpoint: impl Into<PathBuf>,
    ) -> Self {
        MountConfig {
            base_root: base_root.into(),
            overlay_root: overlay_root.into(),
            mountpoint: mountpoint.into(),
        }
    }

    /// Check that every path is an existing directory and the two layers
    /// are distinct, returning a copy with absolute, lexically normalized
    /// paths. Symlinks in the roots are kept as given.
    pub fn validated(&self) -> Result<Self> {
        let base_root = absolute_path(&self.base_root)?;
        let overlay_root = absolute_path(&self.overlay_root)?;
        let mountpoint = absolute_path(&self.mountpoint)?;

        let real_base = canonical_dir("base", &base_root)?;
        let real_overlay = canonical_dir("overlay", &overlay_root)?;
        canonical_dir("mountpoint", &mountpoint)?;

        if real_base == real_overlay {
            return Err(Error::InvalidConfig(format!(
                "base and overlay must be different directories (both are {:?})",
                real_base
            )));
        }

        Ok(MountConfig {
            base_root,
            overlay_root,
            mountpoint,
        })
    }
}

impl Config {
    pub fn new(mount: MountConfig) -> Self {
        Config {
            mount,
            options: MountOptions::default(),
        }
    }

    /// Apply environment variable overrides to the mount options
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("LAYERFS_ALLOW_OTHER") {
            if let Some(flag) = parse_bool(&value) {
                self.options.allow_other = flag;
            }
        }

        if let Ok(value) = std::env::var("LAYERFS_AUTO_UNMOUNT") {
            if let Some(flag) = parse_bool(&value) {
                self.options.auto_unmount = flag;
            }
        }

        if let Ok(name) = std::env::var("LAYERFS_FS_NAME") {
            let name = name.trim().to_string();
            if !name.is_empty() {
                self.options.fs_name = name;
            }
        }

        if let Ok(ttl) = std::env::var("LAYERFS_ATTR_TTL") {
            if let Ok(secs) = ttl.trim().parse::<u64>() {
                self.options.attr_ttl_secs = secs;
            }
        }
    }

    /// Validate the configuration, canonicalizing the mount paths in place
    pub fn validate(&mut self) -> Result<()> {
        if self.options.fs_name.is_empty() {
            return Err(Error::InvalidConfig(
                "Filesystem name must not be empty".to_string(),
            ));
        }

        self.mount = self.mount.validated()?;
        Ok(())
    }

    /// Serialize for display
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))
    }
}

fn absolute_path(path: &Path) -> Result<PathBuf> {
    Ok(normalize(&std::path::absolute(path)?))
}

fn canonical_dir(role: &str, path: &Path) -> Result<PathBuf> {
    let canonical = std::fs::canonicalize(path)
        .map_err(|_| Error::PathNotFound(format!("{} {}", role, path.display())))?;
    if !canonical.is_dir() {
        return Err(Error::InvalidConfig(format!(
            "{} {:?} is not a directory",
            role, canonical
        )));
    }
    Ok(canonical)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
