//! Path-based filesystem operations
//!
//! One method per call of the conventional userspace-filesystem contract.
//! Paths are virtual (relative to the mount root). A transport adapter such
//! as [`FuseBridge`](super::FuseBridge) drives an implementation of this trait.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::host::{Attributes, FsStats};
use crate::error::Result;

pub trait Operations: Send + Sync {
    /// Token returned by `open`/`create` and consumed by `release`
    type Handle: Send + Sync;

    // Metadata

    fn access(&self, path: &Path, mode: i32) -> Result<()>;

    fn chmod(&self, path: &Path, mode: u32) -> Result<()>;

    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> Result<()>;

    fn getattr(&self, path: &Path) -> Result<Attributes>;

    /// `times` is (atime, mtime); `None` means now
    fn utimens(&self, path: &Path, times: Option<(SystemTime, SystemTime)>) -> Result<()>;

    fn statfs(&self, path: &Path) -> Result<FsStats>;

    // Directories and links

    /// Entry names, starting with `.` and `..`
    fn readdir(&self, path: &Path) -> Result<Vec<OsString>>;

    fn readlink(&self, path: &Path) -> Result<PathBuf>;

    fn mknod(&self, path: &Path, mode: u32, dev: u64) -> Result<()>;

    fn mkdir(&self, path: &Path, mode: u32) -> Result<()>;

    fn rmdir(&self, path: &Path) -> Result<()>;

    fn unlink(&self, path: &Path) -> Result<()>;

    /// Creates a link at `target` whose text is `name`
    fn symlink(&self, name: &Path, target: &Path) -> Result<()>;

    fn rename(&self, old: &Path, new: &Path) -> Result<()>;

    /// Creates `new` as a hard link to `existing`
    fn link(&self, existing: &Path, new: &Path) -> Result<()>;

    // Data and handles

    fn open(&self, path: &Path, flags: i32) -> Result<Self::Handle>;

    fn create(&self, path: &Path, mode: u32) -> Result<Self::Handle>;

    fn read(&self, handle: &Self::Handle, size: usize, offset: u64) -> Result<Vec<u8>>;

    fn write(&self, handle: &Self::Handle, data: &[u8], offset: u64) -> Result<usize>;

    fn truncate(&self, path: &Path, length: u64) -> Result<()>;

    fn flush(&self, handle: &Self::Handle) -> Result<()>;

    fn release(&self, handle: Self::Handle) -> Result<()>;

    fn fsync(&self, handle: &Self::Handle, datasync: bool) -> Result<()>;
}
