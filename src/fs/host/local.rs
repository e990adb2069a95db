//! Host filesystem backed by the real operating system

use nix::sys::stat::{Mode, SFlag, UtimensatFlags};
use nix::sys::time::TimeSpec;
use nix::unistd::AccessFlags;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::{DirBuilderExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::{access_mode, Attributes, FsStats, HostFs};

/// Pass-through to the local filesystem via std, nix and libc
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalHost;

impl LocalHost {
    pub fn new() -> Self {
        LocalHost
    }
}

fn system_time(secs: i64, nsecs: i64) -> SystemTime {
    let nanos = Duration::from_nanos(nsecs.max(0) as u64);
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64) + nanos
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs()) + nanos
    }
}

/// Times before the epoch are clamped to it
fn to_timespec(time: SystemTime) -> TimeSpec {
    TimeSpec::from(time.duration_since(UNIX_EPOCH).unwrap_or_default())
}

impl From<&fs::Metadata> for Attributes {
    fn from(meta: &fs::Metadata) -> Self {
        Attributes {
            atime: system_time(meta.atime(), meta.atime_nsec()),
            ctime: system_time(meta.ctime(), meta.ctime_nsec()),
            gid: meta.gid(),
            mode: meta.mode(),
            mtime: system_time(meta.mtime(), meta.mtime_nsec()),
            nlink: meta.nlink(),
            rdev: meta.rdev(),
            size: meta.size(),
            uid: meta.uid(),
        }
    }
}

impl HostFs for LocalHost {
    type File = File;

    fn exists(&self, path: &Path) -> bool {
        fs::metadata(path).is_ok()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn lstat(&self, path: &Path) -> io::Result<Attributes> {
        fs::symlink_metadata(path).map(|meta| Attributes::from(&meta))
    }

    fn access(&self, path: &Path, mode: i32) -> bool {
        nix::unistd::access(path, AccessFlags::from_bits_truncate(mode)).is_ok()
    }

    fn chmod(&self, path: &Path, mode: u32) -> io::Result<()> {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
    }

    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> io::Result<()> {
        std::os::unix::fs::chown(path, uid, gid)
    }

    fn utimens(&self, path: &Path, times: Option<(SystemTime, SystemTime)>) -> io::Result<()> {
        let (atime, mtime) = times.unwrap_or_else(|| {
            let now = SystemTime::now();
            (now, now)
        });
        nix::sys::stat::utimensat(
            None,
            path,
            &to_timespec(atime),
            &to_timespec(mtime),
            UtimensatFlags::FollowSymlink,
        )
        .map_err(io::Error::from)
    }

    fn statvfs(&self, path: &Path) -> io::Result<FsStats> {
        let stat = nix::sys::statvfs::statvfs(path).map_err(io::Error::from)?;
        Ok(FsStats {
            bavail: stat.blocks_available() as u64,
            bfree: stat.blocks_free() as u64,
            blocks: stat.blocks() as u64,
            bsize: stat.block_size() as u64,
            favail: stat.files_available() as u64,
            ffree: stat.files_free() as u64,
            files: stat.files() as u64,
            flag: stat.flags().bits() as u64,
            frsize: stat.fragment_size() as u64,
            namemax: stat.name_max() as u64,
        })
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<OsString>> {
        fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.file_name()))
            .collect()
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        fs::read_link(path)
    }

    fn mknod(&self, path: &Path, mode: u32, dev: u64) -> io::Result<()> {
        let kind = SFlag::from_bits_truncate(mode & libc::S_IFMT);
        let perm = Mode::from_bits_truncate(mode & 0o7777);
        nix::sys::stat::mknod(path, kind, perm, dev as libc::dev_t).map_err(io::Error::from)
    }

    fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()> {
        fs::DirBuilder::new().mode(mode).create(path)
    }

    fn rmdir(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir(path)
    }

    fn unlink(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn symlink(&self, text: &Path, link: &Path) -> io::Result<()> {
        std::os::unix::fs::symlink(text, link)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn link(&self, existing: &Path, new: &Path) -> io::Result<()> {
        fs::hard_link(existing, new)
    }

    fn open(&self, path: &Path, flags: i32, mode: u32) -> io::Result<File> {
        let (read, write) = access_mode(flags);
        OpenOptions::new()
            .read(read)
            .write(write)
            .custom_flags(flags & !libc::O_ACCMODE)
            .mode(mode)
            .open(path)
    }

    fn read_at(&self, file: &File, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let mut file = file;
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        let bytes_read = file.read(&mut buffer)?;
        buffer.truncate(bytes_read);
        Ok(buffer)
    }

    fn write_at(&self, file: &File, offset: u64, data: &[u8]) -> io::Result<usize> {
        let mut file = file;
        file.seek(SeekFrom::Start(offset))?;
        file.write(data)
    }

    fn truncate(&self, path: &Path, len: u64) -> io::Result<()> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        file.set_len(len)
    }

    fn sync(&self, file: &File) -> io::Result<()> {
        file.sync_all()
    }

    fn close(&self, file: File) -> io::Result<()> {
        drop(file);
        Ok(())
    }
}
