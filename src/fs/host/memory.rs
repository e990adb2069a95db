//! In-memory host filesystem
//!
//! A small POSIX-flavoured tree used to exercise the overlay rules without a
//! real mount. Errors carry the same errno values the kernel would return for
//! the cases the overlay can trigger. Only the final path component is
//! checked for symlinks when following.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use super::{access_mode, Attributes, FsStats, HostFs};

const MAX_SYMLINK_HOPS: usize = 40;

#[derive(Debug)]
enum NodeKind {
    File(Vec<u8>),
    Dir,
    Symlink(PathBuf),
    Special { kind: u32, rdev: u64 },
}

#[derive(Debug)]
struct Node {
    kind: NodeKind,
    perm: u32,
    uid: u32,
    gid: u32,
    atime: SystemTime,
    mtime: SystemTime,
    ctime: SystemTime,
    nlink: u64,
}

type NodeRef = Arc<RwLock<Node>>;

impl Node {
    fn new(kind: NodeKind, perm: u32) -> NodeRef {
        let now = SystemTime::now();
        let nlink = if matches!(kind, NodeKind::Dir) { 2 } else { 1 };
        Arc::new(RwLock::new(Node {
            kind,
            perm: perm & 0o7777,
            uid: 0,
            gid: 0,
            atime: now,
            mtime: now,
            ctime: now,
            nlink,
        }))
    }

    fn type_bits(&self) -> u32 {
        match &self.kind {
            NodeKind::File(_) => libc::S_IFREG,
            NodeKind::Dir => libc::S_IFDIR,
            NodeKind::Symlink(_) => libc::S_IFLNK,
            NodeKind::Special { kind, .. } => *kind,
        }
    }

    fn size(&self) -> u64 {
        match &self.kind {
            NodeKind::File(data) => data.len() as u64,
            NodeKind::Dir => 4096,
            NodeKind::Symlink(text) => text.as_os_str().len() as u64,
            NodeKind::Special { .. } => 0,
        }
    }

    fn attributes(&self) -> Attributes {
        Attributes {
            atime: self.atime,
            ctime: self.ctime,
            gid: self.gid,
            mode: self.type_bits() | self.perm,
            mtime: self.mtime,
            nlink: self.nlink,
            rdev: match self.kind {
                NodeKind::Special { rdev, .. } => rdev,
                _ => 0,
            },
            size: self.size(),
            uid: self.uid,
        }
    }

    fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Dir)
    }
}

fn errno(code: i32) -> io::Error {
    io::Error::from_raw_os_error(code)
}

/// Lexically normalize an absolute path (drops `.`, folds `..`)
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::from("/");
    for component in path.components() {
        match component {
            Component::Normal(name) => out.push(name),
            Component::ParentDir => {
                out.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    out
}

/// Open file in a [`MemoryHost`]
#[derive(Debug)]
pub struct MemoryFile {
    node: NodeRef,
    readable: bool,
    writable: bool,
    append: bool,
}

/// In-memory host filesystem rooted at `/`
#[derive(Debug)]
pub struct MemoryHost {
    entries: RwLock<BTreeMap<PathBuf, NodeRef>>,
    stats: FsStats,
    umask: u32,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHost {
    pub fn new() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(PathBuf::from("/"), Node::new(NodeKind::Dir, 0o755));
        MemoryHost {
            entries: RwLock::new(entries),
            stats: FsStats {
                bavail: 500_000,
                bfree: 500_000,
                blocks: 1_000_000,
                bsize: 4096,
                favail: 500_000,
                ffree: 500_000,
                files: 1_000_000,
                flag: 0,
                frsize: 4096,
                namemax: 255,
            },
            umask: 0o022,
        }
    }

    /// Replace the statistics reported by `statvfs`
    pub fn with_stats(mut self, stats: FsStats) -> Self {
        self.stats = stats;
        self
    }

    /// Create a directory and any missing ancestors
    pub fn create_dir_all(&self, path: impl AsRef<Path>) {
        let path = normalize(path.as_ref());
        let mut entries = self.entries.write();
        for ancestor in path.ancestors().collect::<Vec<_>>().into_iter().rev() {
            entries
                .entry(ancestor.to_path_buf())
                .or_insert_with(|| Node::new(NodeKind::Dir, 0o755));
        }
    }

    /// Write a whole file, creating parent directories as needed
    pub fn write_file(&self, path: impl AsRef<Path>, data: &[u8]) {
        let path = normalize(path.as_ref());
        if let Some(parent) = path.parent() {
            self.create_dir_all(parent);
        }
        let existing = self.entries.read().get(&path).cloned();
        match existing {
            Some(node) => {
                let mut node = node.write();
                node.kind = NodeKind::File(data.to_vec());
                node.mtime = SystemTime::now();
            }
            None => {
                self.entries
                    .write()
                    .insert(path, Node::new(NodeKind::File(data.to_vec()), 0o644));
            }
        }
    }

    /// Contents of a regular file, following a final symlink
    pub fn read_file(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        let (_, node) = self.follow(path.as_ref())?;
        let node = node.read();
        match &node.kind {
            NodeKind::File(data) => Some(data.clone()),
            _ => None,
        }
    }

    fn get(&self, path: &Path) -> Option<NodeRef> {
        self.entries.read().get(&normalize(path)).cloned()
    }

    /// Resolve final-component symlinks; returns the path the chain ends at
    /// and its node, or `None` if it ends nowhere.
    fn follow(&self, path: &Path) -> Option<(PathBuf, NodeRef)> {
        let mut current = normalize(path);
        for _ in 0..MAX_SYMLINK_HOPS {
            let node = self.entries.read().get(&current).cloned()?;
            let next = match &node.read().kind {
                NodeKind::Symlink(text) => {
                    let base = current.parent().unwrap_or(Path::new("/"));
                    normalize(&base.join(text))
                }
                _ => return Some((current, node.clone())),
            };
            current = next;
        }
        None
    }

    /// Where a creation through `path` lands (follows a dangling symlink)
    fn follow_target(&self, path: &Path) -> PathBuf {
        let mut current = normalize(path);
        for _ in 0..MAX_SYMLINK_HOPS {
            let Some(node) = self.entries.read().get(&current).cloned() else {
                return current;
            };
            let next = match &node.read().kind {
                NodeKind::Symlink(text) => {
                    let base = current.parent().unwrap_or(Path::new("/"));
                    normalize(&base.join(text))
                }
                _ => return current,
            };
            current = next;
        }
        current
    }

    fn check_parent(&self, path: &Path) -> io::Result<()> {
        let parent = path.parent().ok_or_else(|| errno(libc::EEXIST))?;
        match self.follow(parent) {
            Some((_, node)) if node.read().is_dir() => Ok(()),
            Some(_) => Err(errno(libc::ENOTDIR)),
            None => Err(errno(libc::ENOENT)),
        }
    }

    fn insert_new(&self, path: &Path, node: NodeRef) -> io::Result<()> {
        let path = normalize(path);
        self.check_parent(&path)?;
        let mut entries = self.entries.write();
        if entries.contains_key(&path) {
            return Err(errno(libc::EEXIST));
        }
        entries.insert(path, node);
        Ok(())
    }

    fn has_children(entries: &BTreeMap<PathBuf, NodeRef>, dir: &Path) -> bool {
        entries.keys().any(|key| key.parent() == Some(dir))
    }

    fn followed(&self, path: &Path) -> io::Result<NodeRef> {
        self.follow(path)
            .map(|(_, node)| node)
            .ok_or_else(|| errno(libc::ENOENT))
    }
}

impl HostFs for MemoryHost {
    type File = MemoryFile;

    fn exists(&self, path: &Path) -> bool {
        self.follow(path).is_some()
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.follow(path)
            .map(|(_, node)| node.read().is_dir())
            .unwrap_or(false)
    }

    fn lstat(&self, path: &Path) -> io::Result<Attributes> {
        self.get(path)
            .map(|node| node.read().attributes())
            .ok_or_else(|| errno(libc::ENOENT))
    }

    fn access(&self, path: &Path, mode: i32) -> bool {
        let Some((_, node)) = self.follow(path) else {
            return false;
        };
        let perm = node.read().perm;
        (mode & libc::R_OK == 0 || perm & 0o400 != 0)
            && (mode & libc::W_OK == 0 || perm & 0o200 != 0)
            && (mode & libc::X_OK == 0 || perm & 0o100 != 0)
    }

    fn chmod(&self, path: &Path, mode: u32) -> io::Result<()> {
        let node = self.followed(path)?;
        let mut node = node.write();
        node.perm = mode & 0o7777;
        node.ctime = SystemTime::now();
        Ok(())
    }

    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> io::Result<()> {
        let node = self.followed(path)?;
        let mut node = node.write();
        if let Some(uid) = uid {
            node.uid = uid;
        }
        if let Some(gid) = gid {
            node.gid = gid;
        }
        node.ctime = SystemTime::now();
        Ok(())
    }

    fn utimens(&self, path: &Path, times: Option<(SystemTime, SystemTime)>) -> io::Result<()> {
        let node = self.followed(path)?;
        let (atime, mtime) = times.unwrap_or_else(|| {
            let now = SystemTime::now();
            (now, now)
        });
        let mut node = node.write();
        node.atime = atime;
        node.mtime = mtime;
        node.ctime = SystemTime::now();
        Ok(())
    }

    fn statvfs(&self, path: &Path) -> io::Result<FsStats> {
        self.followed(path)?;
        Ok(self.stats)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<OsString>> {
        let (dir, node) = self.follow(path).ok_or_else(|| errno(libc::ENOENT))?;
        if !node.read().is_dir() {
            return Err(errno(libc::ENOTDIR));
        }
        let entries = self.entries.read();
        Ok(entries
            .keys()
            .filter(|key| key.parent() == Some(dir.as_path()))
            .filter_map(|key| key.file_name().map(|name| name.to_os_string()))
            .collect())
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        let node = self.get(path).ok_or_else(|| errno(libc::ENOENT))?;
        let node = node.read();
        match &node.kind {
            NodeKind::Symlink(text) => Ok(text.clone()),
            _ => Err(errno(libc::EINVAL)),
        }
    }

    fn mknod(&self, path: &Path, mode: u32, dev: u64) -> io::Result<()> {
        let kind = match mode & libc::S_IFMT {
            libc::S_IFREG | 0 => NodeKind::File(Vec::new()),
            libc::S_IFDIR => return Err(errno(libc::EPERM)),
            other => NodeKind::Special {
                kind: other,
                rdev: dev,
            },
        };
        self.insert_new(path, Node::new(kind, mode & !self.umask))
    }

    fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()> {
        self.insert_new(path, Node::new(NodeKind::Dir, mode & !self.umask))
    }

    fn rmdir(&self, path: &Path) -> io::Result<()> {
        let path = normalize(path);
        let mut entries = self.entries.write();
        let node = entries.get(&path).ok_or_else(|| errno(libc::ENOENT))?;
        if !node.read().is_dir() {
            return Err(errno(libc::ENOTDIR));
        }
        if Self::has_children(&entries, &path) {
            return Err(errno(libc::ENOTEMPTY));
        }
        if path == Path::new("/") {
            return Err(errno(libc::EBUSY));
        }
        entries.remove(&path);
        Ok(())
    }

    fn unlink(&self, path: &Path) -> io::Result<()> {
        let path = normalize(path);
        let mut entries = self.entries.write();
        let node = entries.get(&path).ok_or_else(|| errno(libc::ENOENT))?;
        if node.read().is_dir() {
            return Err(errno(libc::EISDIR));
        }
        if let Some(node) = entries.remove(&path) {
            let mut node = node.write();
            node.nlink = node.nlink.saturating_sub(1);
            node.ctime = SystemTime::now();
        }
        Ok(())
    }

    fn symlink(&self, text: &Path, link: &Path) -> io::Result<()> {
        self.insert_new(link, Node::new(NodeKind::Symlink(text.to_path_buf()), 0o777))
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let from = normalize(from);
        let to = normalize(to);
        self.check_parent(&to)?;

        let mut entries = self.entries.write();
        let source = entries.get(&from).cloned().ok_or_else(|| errno(libc::ENOENT))?;
        if from == to {
            return Ok(());
        }
        let source_is_dir = source.read().is_dir();
        if source_is_dir && to.starts_with(&from) {
            return Err(errno(libc::EINVAL));
        }
        let dest_is_dir = entries.get(&to).map(|dest| dest.read().is_dir());
        if let Some(dest_is_dir) = dest_is_dir {
            match (source_is_dir, dest_is_dir) {
                (true, false) => return Err(errno(libc::ENOTDIR)),
                (false, true) => return Err(errno(libc::EISDIR)),
                (true, true) if Self::has_children(&entries, &to) => {
                    return Err(errno(libc::ENOTEMPTY))
                }
                _ => {}
            }
            entries.remove(&to);
        }

        let moved: Vec<PathBuf> = entries
            .keys()
            .filter(|key| key.starts_with(&from))
            .cloned()
            .collect();
        for old in moved {
            if let Some(node) = entries.remove(&old) {
                let suffix = old.strip_prefix(&from).unwrap_or(Path::new(""));
                let new = if suffix.as_os_str().is_empty() {
                    to.clone()
                } else {
                    to.join(suffix)
                };
                entries.insert(new, node);
            }
        }
        Ok(())
    }

    fn link(&self, existing: &Path, new: &Path) -> io::Result<()> {
        let node = self.get(existing).ok_or_else(|| errno(libc::ENOENT))?;
        if node.read().is_dir() {
            return Err(errno(libc::EPERM));
        }
        self.insert_new(new, node.clone())?;
        let mut node = node.write();
        node.nlink += 1;
        node.ctime = SystemTime::now();
        Ok(())
    }

    fn open(&self, path: &Path, flags: i32, mode: u32) -> io::Result<MemoryFile> {
        let (readable, writable) = access_mode(flags);
        let node = match self.follow(path) {
            Some((_, node)) => {
                if flags & libc::O_CREAT != 0 && flags & libc::O_EXCL != 0 {
                    return Err(errno(libc::EEXIST));
                }
                {
                    let mut guard = node.write();
                    if guard.is_dir() && writable {
                        return Err(errno(libc::EISDIR));
                    }
                    if flags & libc::O_TRUNC != 0 && writable {
                        if let NodeKind::File(data) = &mut guard.kind {
                            data.clear();
                            guard.mtime = SystemTime::now();
                        }
                    }
                }
                node
            }
            None if flags & libc::O_CREAT != 0 => {
                let node = Node::new(NodeKind::File(Vec::new()), mode & !self.umask);
                self.insert_new(&self.follow_target(path), node.clone())?;
                node
            }
            None => return Err(errno(libc::ENOENT)),
        };

        Ok(MemoryFile {
            node,
            readable,
            writable,
            append: flags & libc::O_APPEND != 0,
        })
    }

    fn read_at(&self, file: &MemoryFile, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        if !file.readable {
            return Err(errno(libc::EBADF));
        }
        let node = file.node.read();
        match &node.kind {
            NodeKind::File(data) => {
                let start = (offset as usize).min(data.len());
                let end = start.saturating_add(len).min(data.len());
                Ok(data[start..end].to_vec())
            }
            NodeKind::Dir => Err(errno(libc::EISDIR)),
            _ => Ok(Vec::new()),
        }
    }

    fn write_at(&self, file: &MemoryFile, offset: u64, data: &[u8]) -> io::Result<usize> {
        if !file.writable {
            return Err(errno(libc::EBADF));
        }
        let mut node = file.node.write();
        let written = match &mut node.kind {
            NodeKind::File(content) => {
                let start = if file.append {
                    content.len()
                } else {
                    offset as usize
                };
                let end = start + data.len();
                if content.len() < end {
                    content.resize(end, 0);
                }
                content[start..end].copy_from_slice(data);
                data.len()
            }
            NodeKind::Dir => return Err(errno(libc::EISDIR)),
            _ => data.len(),
        };
        node.mtime = SystemTime::now();
        Ok(written)
    }

    fn truncate(&self, path: &Path, len: u64) -> io::Result<()> {
        let node = self.followed(path)?;
        let mut node = node.write();
        match &mut node.kind {
            NodeKind::File(content) => content.resize(len as usize, 0),
            NodeKind::Dir => return Err(errno(libc::EISDIR)),
            _ => return Err(errno(libc::EINVAL)),
        }
        node.mtime = SystemTime::now();
        Ok(())
    }

    fn sync(&self, _file: &MemoryFile) -> io::Result<()> {
        Ok(())
    }

    fn close(&self, _file: MemoryFile) -> io::Result<()> {
        Ok(())
    }
}
