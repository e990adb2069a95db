//! FUSE transport adapter
//!
//! Translates fuser's inode-based callbacks into path-based [`Operations`]
//! calls and turns results into replies.

use fuser::{
    FileAttr, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request, TimeOrNow,
};
use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

use super::handle::HandleRegistry;
use super::inode::{file_type, to_file_attr, InodeTable};
use crate::error::{Error, Result};
use crate::fs::host::FsStats;
use crate::fs::operations::Operations;

/// Directory entry as handed to `ReplyDirectory::add`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub ino: u64,
    pub kind: fuser::FileType,
    pub name: OsString,
}

/// fuser `Filesystem` on top of any [`Operations`] implementation
pub struct FuseBridge<O: Operations> {
    ops: O,
    inodes: InodeTable,
    handles: HandleRegistry<O::Handle>,
    ttl: Duration,
}

fn not_found() -> Error {
    Error::from_errno(libc::ENOENT)
}

fn resolve_time(time: TimeOrNow) -> SystemTime {
    match time {
        TimeOrNow::SpecificTime(time) => time,
        TimeOrNow::Now => SystemTime::now(),
    }
}

impl<O: Operations> FuseBridge<O> {
    pub fn new(ops: O, ttl: Duration) -> Self {
        Self {
            ops,
            inodes: InodeTable::new(),
            handles: HandleRegistry::new(),
            ttl,
        }
    }

    pub fn operations(&self) -> &O {
        &self.ops
    }

    pub fn inodes(&self) -> &InodeTable {
        &self.inodes
    }

    pub fn handles(&self) -> &HandleRegistry<O::Handle> {
        &self.handles
    }

    fn path_of(&self, ino: u64) -> Result<PathBuf> {
        self.inodes.path(ino).ok_or_else(not_found)
    }

    fn child_of(&self, parent: u64, name: &OsStr) -> Result<PathBuf> {
        self.inodes.child_path(parent, name).ok_or_else(not_found)
    }

    /// Attributes of a virtual path under its (possibly new) inode number
    fn entry_for(&self, path: &Path) -> Result<FileAttr> {
        let attrs = self.ops.getattr(path)?;
        Ok(to_file_attr(self.inodes.ino_for(path), &attrs))
    }

    pub fn do_lookup(&self, parent: u64, name: &OsStr) -> Result<FileAttr> {
        let path = self.child_of(parent, name)?;
        self.entry_for(&path)
    }

    pub fn do_getattr(&self, ino: u64) -> Result<FileAttr> {
        let path = self.path_of(ino)?;
        let attrs = self.ops.getattr(&path)?;
        Ok(to_file_attr(ino, &attrs))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn do_setattr(
        &self,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
    ) -> Result<FileAttr> {
        let path = self.path_of(ino)?;

        if let Some(mode) = mode {
            self.ops.chmod(&path, mode)?;
        }
        if uid.is_some() || gid.is_some() {
            self.ops.chown(&path, uid, gid)?;
        }
        if let Some(size) = size {
            self.ops.truncate(&path, size)?;
        }
        if atime.is_some() || mtime.is_some() {
            let (atime, mtime) = match (atime, mtime) {
                (Some(atime), Some(mtime)) => (resolve_time(atime), resolve_time(mtime)),
                (atime, mtime) => {
                    let current = self.ops.getattr(&path)?;
                    (
                        atime.map(resolve_time).unwrap_or(current.atime),
                        mtime.map(resolve_time).unwrap_or(current.mtime),
                    )
                }
            };
            self.ops.utimens(&path, Some((atime, mtime)))?;
        }

        self.do_getattr(ino)
    }

    pub fn do_readlink(&self, ino: u64) -> Result<PathBuf> {
        let path = self.path_of(ino)?;
        self.ops.readlink(&path)
    }

    pub fn do_mknod(&self, parent: u64, name: &OsStr, mode: u32, rdev: u32) -> Result<FileAttr> {
        let path = self.child_of(parent, name)?;
        self.ops.mknod(&path, mode, u64::from(rdev))?;
        self.entry_for(&path)
    }

    pub fn do_mkdir(&self, parent: u64, name: &OsStr, mode: u32) -> Result<FileAttr> {
        let path = self.child_of(parent, name)?;
        self.ops.mkdir(&path, mode)?;
        self.entry_for(&path)
    }

    pub fn do_unlink(&self, parent: u64, name: &OsStr) -> Result<()> {
        let path = self.child_of(parent, name)?;
        self.ops.unlink(&path)?;
        self.inodes.invalidate_path(&path);
        Ok(())
    }

    pub fn do_rmdir(&self, parent: u64, name: &OsStr) -> Result<()> {
        let path = self.child_of(parent, name)?;
        self.ops.rmdir(&path)?;
        self.inodes.invalidate_path(&path);
        Ok(())
    }

    /// Drop an inode the kernel no longer references
    pub fn do_forget(&self, ino: u64) {
        self.inodes.remove(ino);
    }

    /// Release every handle still open; returns how many there were
    pub fn do_destroy(&self) -> usize {
        let leftover = self.handles.drain();
        let count = leftover.len();
        for (fh, handle) in leftover {
            if let Err(e) = self.ops.release(handle) {
                warn!("release of fh {} at unmount: {}", fh, e);
            }
        }
        count
    }

    /// The link path is passed as `name` and the kernel's target text as
    /// `target`, so the link lands at the target path (see `Operations::symlink`).
    pub fn do_symlink(&self, parent: u64, link_name: &OsStr, target: &Path) -> Result<FileAttr> {
        let path = self.child_of(parent, link_name)?;
        self.ops.symlink(&path, target)?;
        self.entry_for(&path)
    }

    pub fn do_rename(
        &self,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
    ) -> Result<()> {
        if flags != 0 {
            return Err(Error::from_errno(libc::EINVAL));
        }
        let old = self.child_of(parent, name)?;
        let new = self.child_of(newparent, newname)?;
        self.ops.rename(&old, &new)?;
        self.inodes.rename(&old, &new);
        Ok(())
    }

    pub fn do_link(&self, ino: u64, newparent: u64, newname: &OsStr) -> Result<FileAttr> {
        let existing = self.path_of(ino)?;
        let new = self.child_of(newparent, newname)?;
        self.ops.link(&existing, &new)?;
        self.entry_for(&new)
    }

    pub fn do_open(&self, ino: u64, flags: i32) -> Result<u64> {
        let path = self.path_of(ino)?;
        let handle = self.ops.open(&path, flags)?;
        Ok(self.handles.register(handle))
    }

    pub fn do_create(&self, parent: u64, name: &OsStr, mode: u32) -> Result<(FileAttr, u64)> {
        let path = self.child_of(parent, name)?;
        let handle = self.ops.create(&path, mode)?;
        match self.entry_for(&path) {
            Ok(attr) => Ok((attr, self.handles.register(handle))),
            Err(e) => {
                if let Err(release_err) = self.ops.release(handle) {
                    warn!("release after failed create of {:?}: {}", path, release_err);
                }
                Err(e)
            }
        }
    }

    pub fn do_read(&self, fh: u64, offset: i64, size: u32) -> Result<Vec<u8>> {
        let offset = u64::try_from(offset).map_err(|_| Error::from_errno(libc::EINVAL))?;
        self.handles
            .with_handle(fh, |handle| self.ops.read(handle, size as usize, offset))
            .ok_or(Error::BadHandle(fh))?
    }

    pub fn do_write(&self, fh: u64, offset: i64, data: &[u8]) -> Result<u32> {
        let offset = u64::try_from(offset).map_err(|_| Error::from_errno(libc::EINVAL))?;
        let written = self
            .handles
            .with_handle(fh, |handle| self.ops.write(handle, data, offset))
            .ok_or(Error::BadHandle(fh))??;
        u32::try_from(written).map_err(|_| Error::Internal(format!("write of {} bytes", written)))
    }

    pub fn do_flush(&self, fh: u64) -> Result<()> {
        self.handles
            .with_handle(fh, |handle| self.ops.flush(handle))
            .ok_or(Error::BadHandle(fh))?
    }

    pub fn do_fsync(&self, fh: u64, datasync: bool) -> Result<()> {
        self.handles
            .with_handle(fh, |handle| self.ops.fsync(handle, datasync))
            .ok_or(Error::BadHandle(fh))?
    }

    pub fn do_release(&self, fh: u64) -> Result<()> {
        let handle = self.handles.remove(fh).ok_or(Error::BadHandle(fh))?;
        self.ops.release(handle)
    }

    /// Full listing of a directory inode, `.` and `..` first
    pub fn do_readdir(&self, ino: u64) -> Result<Vec<DirEntry>> {
        let path = self.path_of(ino)?;
        let names = self.ops.readdir(&path)?;

        Ok(names
            .into_iter()
            .map(|name| {
                if name == "." {
                    DirEntry {
                        ino,
                        kind: fuser::FileType::Directory,
                        name,
                    }
                } else if name == ".." {
                    DirEntry {
                        ino: self.inodes.parent_of(ino),
                        kind: fuser::FileType::Directory,
                        name,
                    }
                } else {
                    let child = path.join(&name);
                    let kind = self
                        .ops
                        .getattr(&child)
                        .map(|attrs| file_type(attrs.mode))
                        .unwrap_or(fuser::FileType::RegularFile);
                    DirEntry {
                        ino: self.inodes.ino_for(&child),
                        kind,
                        name,
                    }
                }
            })
            .collect())
    }

    pub fn do_statfs(&self, ino: u64) -> Result<FsStats> {
        let path = self.path_of(ino)?;
        self.ops.statfs(&path)
    }

    pub fn do_access(&self, ino: u64, mask: i32) -> Result<()> {
        let path = self.path_of(ino)?;
        self.ops.access(&path, mask)
    }
}

/// Log a failed callback and produce the errno for the reply
fn errno(op: &str, err: &Error) -> libc::c_int {
    let code = err.errno();
    if code == libc::ENOENT {
        debug!("{} failed: {}", op, err);
    } else {
        warn!("{} failed: {}", op, err);
    }
    code
}

impl<O: Operations> Filesystem for FuseBridge<O> {
    fn destroy(&mut self) {
        let count = self.do_destroy();
        if count > 0 {
            warn!("{} handles still open at unmount, released", count);
        }
    }

    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        debug!("lookup(parent={}, name={:?})", parent, name);

        match self.do_lookup(parent, name) {
            Ok(attr) => reply.entry(&self.ttl, &attr, 0),
            Err(e) => reply.error(errno("lookup", &e)),
        }
    }

    fn forget(&mut self, _req: &Request, ino: u64, nlookup: u64) {
        debug!("forget(ino={}, nlookup={})", ino, nlookup);
        self.do_forget(ino);
    }

    fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
        debug!("getattr(ino={})", ino);

        match self.do_getattr(ino) {
            Ok(attr) => reply.attr(&self.ttl, &attr),
            Err(e) => reply.error(errno("getattr", &e)),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        debug!(
            "setattr(ino={}, mode={:?}, uid={:?}, gid={:?}, size={:?})",
            ino, mode, uid, gid, size
        );

        match self.do_setattr(ino, mode, uid, gid, size, atime, mtime) {
            Ok(attr) => reply.attr(&self.ttl, &attr),
            Err(e) => reply.error(errno("setattr", &e)),
        }
    }

    fn readlink(&mut self, _req: &Request, ino: u64, reply: ReplyData) {
        debug!("readlink(ino={})", ino);

        match self.do_readlink(ino) {
            Ok(text) => reply.data(text.as_os_str().as_bytes()),
            Err(e) => reply.error(errno("readlink", &e)),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        rdev: u32,
        reply: ReplyEntry,
    ) {
        debug!("mknod(parent={}, name={:?}, mode={:o})", parent, name, mode);

        match self.do_mknod(parent, name, mode & !umask, rdev) {
            Ok(attr) => reply.entry(&self.ttl, &attr, 0),
            Err(e) => reply.error(errno("mknod", &e)),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: ReplyEntry,
    ) {
        debug!("mkdir(parent={}, name={:?}, mode={:o})", parent, name, mode);

        match self.do_mkdir(parent, name, mode & !umask) {
            Ok(attr) => reply.entry(&self.ttl, &attr, 0),
            Err(e) => reply.error(errno("mkdir", &e)),
        }
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        debug!("unlink(parent={}, name={:?})", parent, name);

        match self.do_unlink(parent, name) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno("unlink", &e)),
        }
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        debug!("rmdir(parent={}, name={:?})", parent, name);

        match self.do_rmdir(parent, name) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno("rmdir", &e)),
        }
    }

    fn symlink(
        &mut self,
        _req: &Request,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        debug!(
            "symlink(parent={}, link_name={:?}, target={:?})",
            parent, link_name, target
        );

        match self.do_symlink(parent, link_name, target) {
            Ok(attr) => reply.entry(&self.ttl, &attr, 0),
            Err(e) => reply.error(errno("symlink", &e)),
        }
    }

    fn rename(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        debug!(
            "rename(parent={}, name={:?}, newparent={}, newname={:?})",
            parent, name, newparent, newname
        );

        match self.do_rename(parent, name, newparent, newname, flags) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno("rename", &e)),
        }
    }

    fn link(
        &mut self,
        _req: &Request,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        debug!("link(ino={}, newparent={}, newname={:?})", ino, newparent, newname);

        match self.do_link(ino, newparent, newname) {
            Ok(attr) => reply.entry(&self.ttl, &attr, 0),
            Err(e) => reply.error(errno("link", &e)),
        }
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        debug!("open(ino={}, flags={})", ino, flags);

        match self.do_open(ino, flags) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => reply.error(errno("open", &e)),
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        debug!("read(ino={}, fh={}, offset={}, size={})", ino, fh, offset, size);

        match self.do_read(fh, offset, size) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(errno("read", &e)),
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        debug!(
            "write(ino={}, fh={}, offset={}, size={})",
            ino,
            fh,
            offset,
            data.len()
        );

        match self.do_write(fh, offset, data) {
            Ok(written) => reply.written(written),
            Err(e) => reply.error(errno("write", &e)),
        }
    }

    fn flush(&mut self, _req: &Request, ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        debug!("flush(ino={}, fh={})", ino, fh);

        match self.do_flush(fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno("flush", &e)),
        }
    }

    fn release(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        debug!("release(ino={}, fh={})", ino, fh);

        match self.do_release(fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno("release", &e)),
        }
    }

    fn fsync(&mut self, _req: &Request, ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
        debug!("fsync(ino={}, fh={}, datasync={})", ino, fh, datasync);

        match self.do_fsync(fh, datasync) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno("fsync", &e)),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        debug!("readdir(ino={}, offset={})", ino, offset);

        let entries = match self.do_readdir(ino) {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(errno("readdir", &e));
                return;
            }
        };

        for (i, entry) in entries.iter().enumerate().skip(offset.max(0) as usize) {
            let buffer_full = reply.add(entry.ino, (i + 1) as i64, entry.kind, &entry.name);
            if buffer_full {
                break;
            }
        }

        reply.ok();
    }

    fn statfs(&mut self, _req: &Request, ino: u64, reply: ReplyStatfs) {
        debug!("statfs(ino={})", ino);

        match self.do_statfs(ino) {
            Ok(stats) => reply.statfs(
                stats.blocks,
                stats.bfree,
                stats.bavail,
                stats.files,
                stats.ffree,
                stats.bsize as u32,
                stats.namemax as u32,
                stats.frsize as u32,
            ),
            Err(e) => reply.error(errno("statfs", &e)),
        }
    }

    fn access(&mut self, _req: &Request, ino: u64, mask: i32, reply: ReplyEmpty) {
        debug!("access(ino={}, mask={})", ino, mask);

        match self.do_access(ino, mask) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno("access", &e)),
        }
    }

    fn create(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        debug!(
            "create(parent={}, name={:?}, mode={:o}, flags={})",
            parent, name, mode, flags
        );

        match self.do_create(parent, name, mode & !umask) {
            Ok((attr, fh)) => reply.created(&self.ttl, &attr, 0, fh, 0),
            Err(e) => reply.error(errno("create", &e)),
        }
    }
}
