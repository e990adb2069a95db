//! Host filesystem capability
//!
//! Every syscall the overlay makes goes through [`HostFs`], so the resolution
//! and dispatch rules can run against [`MemoryHost`] in tests and against
//! [`LocalHost`] when mounted.

mod local;
mod memory;

pub use local::LocalHost;
pub use memory::{MemoryFile, MemoryHost};

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Status of a single entry, taken without following symlinks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attributes {
    pub atime: SystemTime,
    pub ctime: SystemTime,
    pub gid: u32,
    /// File type and permission bits (`st_mode`)
    pub mode: u32,
    pub mtime: SystemTime,
    pub nlink: u64,
    /// Device number for block and character special files
    pub rdev: u64,
    pub size: u64,
    pub uid: u32,
}

impl Attributes {
    /// File-type bits of `mode`
    pub fn file_type(&self) -> u32 {
        self.mode & libc::S_IFMT as u32
    }

    /// Permission bits of `mode`
    pub fn perm(&self) -> u16 {
        (self.mode & 0o7777) as u16
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == libc::S_IFDIR as u32
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type() == libc::S_IFLNK as u32
    }
}

/// Statistics of the filesystem backing a path (`statvfs`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FsStats {
    pub bavail: u64,
    pub bfree: u64,
    pub blocks: u64,
    pub bsize: u64,
    pub favail: u64,
    pub ffree: u64,
    pub files: u64,
    pub flag: u64,
    pub frsize: u64,
    pub namemax: u64,
}

/// Host filesystem primitives used by the overlay.
///
/// Paths are physical. Errors are returned as the host raised them.
pub trait HostFs: Send + Sync {
    /// Open file as returned by [`HostFs::open`]
    type File: Send + Sync;

    /// Whether `path` names something (symlinks are followed, so a dangling
    /// link does not count)
    fn exists(&self, path: &Path) -> bool;

    /// Whether `path` is a directory (symlinks are followed)
    fn is_dir(&self, path: &Path) -> bool;

    fn lstat(&self, path: &Path) -> io::Result<Attributes>;

    /// `access(2)`: true when the check passes
    fn access(&self, path: &Path, mode: i32) -> bool;

    fn chmod(&self, path: &Path, mode: u32) -> io::Result<()>;

    /// `None` leaves the id unchanged
    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> io::Result<()>;

    /// Set (atime, mtime); `None` sets both to the current time
    fn utimens(&self, path: &Path, times: Option<(SystemTime, SystemTime)>) -> io::Result<()>;

    fn statvfs(&self, path: &Path) -> io::Result<FsStats>;

    /// Names in a directory, without `.` and `..`
    fn read_dir(&self, path: &Path) -> io::Result<Vec<OsString>>;

    fn read_link(&self, path: &Path) -> io::Result<PathBuf>;

    fn mknod(&self, path: &Path, mode: u32, dev: u64) -> io::Result<()>;

    fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()>;

    fn rmdir(&self, path: &Path) -> io::Result<()>;

    fn unlink(&self, path: &Path) -> io::Result<()>;

    /// Create a symlink at `link` whose text is `text`
    fn symlink(&self, text: &Path, link: &Path) -> io::Result<()>;

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Create `new` as a hard link to `existing`
    fn link(&self, existing: &Path, new: &Path) -> io::Result<()>;

    /// `open(2)` with raw flags and creation mode
    fn open(&self, path: &Path, flags: i32, mode: u32) -> io::Result<Self::File>;

    /// Seek to `offset`, then a single read of up to `len` bytes
    fn read_at(&self, file: &Self::File, offset: u64, len: usize) -> io::Result<Vec<u8>>;

    /// Seek to `offset`, then a single write
    fn write_at(&self, file: &Self::File, offset: u64, data: &[u8]) -> io::Result<usize>;

    /// Open an existing file for update and set its length
    fn truncate(&self, path: &Path, len: u64) -> io::Result<()>;

    fn sync(&self, file: &Self::File) -> io::Result<()>;

    fn close(&self, file: Self::File) -> io::Result<()>;
}

/// Split open flags into (readable, writable)
pub(crate) fn access_mode(flags: i32) -> (bool, bool) {
    match flags & libc::O_ACCMODE {
        libc::O_WRONLY => (false, true),
        libc::O_RDWR => (true, true),
        _ => (true, false),
    }
}
