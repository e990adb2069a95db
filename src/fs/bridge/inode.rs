//! Inode numbering for the FUSE bridge
//!
//! The kernel speaks inode numbers, the overlay speaks virtual paths. Each
//! virtual path gets a number the first time it is seen and keeps it until a
//! rename moves it.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::fs::host::Attributes;

/// Inode number of the mount root
pub const ROOT_INO: u64 = 1;

/// Preferred I/O size reported to the kernel
const BLOCK_SIZE: u32 = 4096;

/// Convert `st_mode` type bits to a fuser file type
pub fn file_type(mode: u32) -> fuser::FileType {
    match mode & libc::S_IFMT {
        libc::S_IFDIR => fuser::FileType::Directory,
        libc::S_IFLNK => fuser::FileType::Symlink,
        libc::S_IFBLK => fuser::FileType::BlockDevice,
        libc::S_IFCHR => fuser::FileType::CharDevice,
        libc::S_IFIFO => fuser::FileType::NamedPipe,
        libc::S_IFSOCK => fuser::FileType::Socket,
        _ => fuser::FileType::RegularFile,
    }
}

/// Convert overlay attributes to fuser FileAttr
pub fn to_file_attr(ino: u64, attrs: &Attributes) -> fuser::FileAttr {
    fuser::FileAttr {
        ino,
        size: attrs.size,
        blocks: attrs.size.div_ceil(512),
        atime: attrs.atime,
        mtime: attrs.mtime,
        ctime: attrs.ctime,
        crtime: attrs.mtime,
        kind: file_type(attrs.mode),
        perm: attrs.perm(),
        nlink: attrs.nlink as u32,
        uid: attrs.uid,
        gid: attrs.gid,
        rdev: attrs.rdev as u32,
        blksize: BLOCK_SIZE,
        flags: 0,
    }
}

/// Two-way map between inode numbers and virtual paths
pub struct InodeTable {
    /// Next inode number
    next_ino: AtomicU64,
    /// ino -> virtual path
    paths: RwLock<HashMap<u64, PathBuf>>,
    /// virtual path -> ino
    path_to_ino: RwLock<HashMap<PathBuf, u64>>,
}

impl InodeTable {
    pub fn new() -> Self {
        let table = Self {
            next_ino: AtomicU64::new(ROOT_INO + 1),
            paths: RwLock::new(HashMap::new()),
            path_to_ino: RwLock::new(HashMap::new()),
        };
        table.paths.write().insert(ROOT_INO, PathBuf::from("/"));
        table.path_to_ino.write().insert(PathBuf::from("/"), ROOT_INO);
        table
    }

    /// Virtual path of an inode
    pub fn path(&self, ino: u64) -> Option<PathBuf> {
        self.paths.read().get(&ino).cloned()
    }

    /// Virtual path of `name` inside directory `parent`
    pub fn child_path(&self, parent: u64, name: &std::ffi::OsStr) -> Option<PathBuf> {
        Some(self.path(parent)?.join(name))
    }

    /// Inode number for a path, allocating one on first sight
    pub fn ino_for(&self, path: &Path) -> u64 {
        if let Some(ino) = self.path_to_ino.read().get(path).copied() {
            return ino;
        }

        let mut path_to_ino = self.path_to_ino.write();
        // Another caller may have raced us between the two locks.
        if let Some(ino) = path_to_ino.get(path).copied() {
            return ino;
        }
        let ino = self.next_ino.fetch_add(1, Ordering::SeqCst);
        path_to_ino.insert(path.to_path_buf(), ino);
        self.paths.write().insert(ino, path.to_path_buf());
        ino
    }

    /// Inode of the directory containing `ino` (the root is its own parent)
    pub fn parent_of(&self, ino: u64) -> u64 {
        match self.path(ino).as_deref().and_then(Path::parent) {
            Some(parent) => self.ino_for(parent),
            None => ROOT_INO,
        }
    }

    /// Move `old` and everything below it to `new`, keeping inode numbers
    pub fn rename(&self, old: &Path, new: &Path) {
        let mut path_to_ino = self.path_to_ino.write();
        let mut paths = self.paths.write();

        if let Some(replaced) = path_to_ino.remove(new) {
            paths.remove(&replaced);
        }

        let moved: Vec<(PathBuf, u64)> = path_to_ino
            .iter()
            .filter(|(path, _)| path.starts_with(old))
            .map(|(path, ino)| (path.clone(), *ino))
            .collect();

        for (path, ino) in moved {
            let renamed = match path.strip_prefix(old) {
                Ok(suffix) if suffix.as_os_str().is_empty() => new.to_path_buf(),
                Ok(suffix) => new.join(suffix),
                Err(_) => continue,
            };
            path_to_ino.remove(&path);
            path_to_ino.insert(renamed.clone(), ino);
            paths.insert(ino, renamed);
        }
    }

    /// Drop an inode the kernel has forgotten. The root is never dropped.
    pub fn remove(&self, ino: u64) -> Option<PathBuf> {
        if ino == ROOT_INO {
            return None;
        }
        let mut path_to_ino = self.path_to_ino.write();
        let path = self.paths.write().remove(&ino)?;
        if path_to_ino.get(&path) == Some(&ino) {
            path_to_ino.remove(&path);
        }
        Some(path)
    }

    /// Drop `path` and every known path below it (on unlink/rmdir)
    pub fn invalidate_path(&self, path: &Path) {
        if path == Path::new("/") {
            return;
        }
        let mut path_to_ino = self.path_to_ino.write();
        let mut paths = self.paths.write();
        path_to_ino.retain(|known, ino| {
            if known.starts_with(path) {
                paths.remove(ino);
                false
            } else {
                true
            }
        });
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}
