//! Overlay operation dispatch
//!
//! [`OverlayFs`] answers every filesystem call by resolving the virtual path
//! to one physical tree and invoking a single host primitive there:
//!
//! - lookups and reads (`access`, `getattr`, `statfs`, `readdir`, `readlink`,
//!   read-only `open`) go through [`PathResolver::read_path`];
//! - every mutation, metadata edits included, goes through
//!   [`PathResolver::write_path`].
//!
//! Directory listings are never merged: `readdir` shows the one directory the
//! path resolves to. There are no whiteouts, so removing an overlay entry
//! re-exposes a base entry of the same name.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

use super::handle::{Handle, HandleMode};
use super::host::{Attributes, FsStats, HostFs, LocalHost};
use super::operations::Operations;
use super::resolver::PathResolver;
use crate::config::MountConfig;
use crate::error::{Error, Result};

/// Creation mode for the empty file materialized by a write-mode `open`
const PLACEHOLDER_MODE: u32 = 0o777;

/// Flags used by `create`
const CREATE_FLAGS: i32 = libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC;

/// Two-layer overlay over a host filesystem
#[derive(Debug)]
pub struct OverlayFs<H: HostFs = LocalHost> {
    host: H,
    resolver: PathResolver,
}

impl OverlayFs<LocalHost> {
    /// Overlay over the local filesystem using the configured roots
    pub fn from_config(mount: &MountConfig) -> Self {
        Self::new(
            LocalHost::new(),
            PathResolver::new(&mount.base_root, &mount.overlay_root),
        )
    }
}

impl<H: HostFs> OverlayFs<H> {
    pub fn new(host: H, resolver: PathResolver) -> Self {
        Self { host, resolver }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn read_path(&self, path: &Path) -> PathBuf {
        self.resolver.read_path(&self.host, path)
    }

    pub fn write_path(&self, path: &Path) -> PathBuf {
        self.resolver.write_path(path)
    }

    /// Materialize an empty overlay file so a write-mode open has a target.
    /// Base content is not copied.
    fn ensure_placeholder(&self, full_path: &Path) -> Result<()> {
        if self.host.exists(full_path) {
            return Ok(());
        }
        debug!("creating empty overlay placeholder at {:?}", full_path);
        let placeholder = self.host.open(
            full_path,
            libc::O_WRONLY | libc::O_CREAT,
            PLACEHOLDER_MODE,
        )?;
        self.host.close(placeholder)?;
        Ok(())
    }
}

impl<H: HostFs> Operations for OverlayFs<H> {
    type Handle = Handle<H::File>;

    fn access(&self, path: &Path, mode: i32) -> Result<()> {
        let full_path = self.read_path(path);
        if !self.host.access(&full_path, mode) {
            return Err(Error::PermissionDenied(full_path));
        }
        Ok(())
    }

    fn chmod(&self, path: &Path, mode: u32) -> Result<()> {
        Ok(self.host.chmod(&self.write_path(path), mode)?)
    }

    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
        Ok(self.host.chown(&self.write_path(path), uid, gid)?)
    }

    fn getattr(&self, path: &Path) -> Result<Attributes> {
        Ok(self.host.lstat(&self.read_path(path))?)
    }

    fn utimens(&self, path: &Path, times: Option<(SystemTime, SystemTime)>) -> Result<()> {
        Ok(self.host.utimens(&self.write_path(path), times)?)
    }

    fn statfs(&self, path: &Path) -> Result<FsStats> {
        Ok(self.host.statvfs(&self.read_path(path))?)
    }

    fn readdir(&self, path: &Path) -> Result<Vec<OsString>> {
        let full_path = self.read_path(path);
        let mut entries = vec![OsString::from("."), OsString::from("..")];
        if self.host.is_dir(&full_path) {
            entries.extend(self.host.read_dir(&full_path)?);
        }
        Ok(entries)
    }

    fn readlink(&self, path: &Path) -> Result<PathBuf> {
        let text = self.host.read_link(&self.read_path(path))?;
        Ok(self.resolver.sanitize_link(text))
    }

    fn mknod(&self, path: &Path, mode: u32, dev: u64) -> Result<()> {
        Ok(self.host.mknod(&self.write_path(path), mode, dev)?)
    }

    fn mkdir(&self, path: &Path, mode: u32) -> Result<()> {
        Ok(self.host.mkdir(&self.write_path(path), mode)?)
    }

    fn rmdir(&self, path: &Path) -> Result<()> {
        Ok(self.host.rmdir(&self.write_path(path))?)
    }

    fn unlink(&self, path: &Path) -> Result<()> {
        Ok(self.host.unlink(&self.write_path(path))?)
    }

    fn symlink(&self, name: &Path, target: &Path) -> Result<()> {
        Ok(self.host.symlink(name, &self.write_path(target))?)
    }

    fn rename(&self, old: &Path, new: &Path) -> Result<()> {
        Ok(self
            .host
            .rename(&self.write_path(old), &self.write_path(new))?)
    }

    fn link(&self, existing: &Path, new: &Path) -> Result<()> {
        Ok(self
            .host
            .link(&self.write_path(existing), &self.write_path(new))?)
    }

    fn open(&self, path: &Path, flags: i32) -> Result<Self::Handle> {
        let full_path = match HandleMode::from_flags(flags) {
            HandleMode::Write => {
                let full_path = self.write_path(path);
                self.ensure_placeholder(&full_path)?;
                full_path
            }
            HandleMode::Read => self.read_path(path),
        };
        let file = self.host.open(&full_path, flags, PLACEHOLDER_MODE)?;
        Ok(Handle::new(file, full_path, flags))
    }

    fn create(&self, path: &Path, mode: u32) -> Result<Self::Handle> {
        let full_path = self.write_path(path);
        let file = self.host.open(&full_path, CREATE_FLAGS, mode)?;
        Ok(Handle::new(file, full_path, CREATE_FLAGS))
    }

    fn read(&self, handle: &Self::Handle, size: usize, offset: u64) -> Result<Vec<u8>> {
        Ok(self.host.read_at(handle.file(), offset, size)?)
    }

    fn write(&self, handle: &Self::Handle, data: &[u8], offset: u64) -> Result<usize> {
        Ok(self.host.write_at(handle.file(), offset, data)?)
    }

    fn truncate(&self, path: &Path, length: u64) -> Result<()> {
        Ok(self.host.truncate(&self.write_path(path), length)?)
    }

    fn flush(&self, handle: &Self::Handle) -> Result<()> {
        Ok(self.host.sync(handle.file())?)
    }

    fn release(&self, handle: Self::Handle) -> Result<()> {
        debug!("closing {:?} ({:?})", handle.path(), handle.mode());
        Ok(self.host.close(handle.into_file())?)
    }

    fn fsync(&self, handle: &Self::Handle, _datasync: bool) -> Result<()> {
        self.flush(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::host::MemoryHost;
    use std::time::{Duration, UNIX_EPOCH};
    use tempfile::tempdir;

    fn memory_overlay() -> OverlayFs<MemoryHost> {
        let host = MemoryHost::new();
        host.create_dir_all("/base");
        host.create_dir_all("/upper");
        OverlayFs::new(host, PathResolver::new("/base", "/upper"))
    }

    fn errno_of(err: Error) -> i32 {
        err.errno()
    }

    fn names(entries: Vec<OsString>) -> Vec<String> {
        entries
            .into_iter()
            .map(|name| name.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_read_only_open_uses_base_without_copy_up() {
        let fs = memory_overlay();
        fs.host().write_file("/base/a.txt", b"hello");

        let handle = fs.open(Path::new("/a.txt"), libc::O_RDONLY).unwrap();
        assert_eq!(handle.mode(), HandleMode::Read);
        assert_eq!(handle.path(), Path::new("/base/a.txt"));
        assert_eq!(fs.read(&handle, 100, 0).unwrap(), b"hello");
        fs.release(handle).unwrap();

        assert!(!fs.host().exists(Path::new("/upper/a.txt")));
    }

    #[test]
    fn test_write_open_creates_empty_placeholder() {
        let fs = memory_overlay();
        fs.host().write_file("/base/a.txt", b"hello");

        let handle = fs.open(Path::new("/a.txt"), libc::O_WRONLY).unwrap();
        assert_eq!(handle.path(), Path::new("/upper/a.txt"));
        // Base content is not copied up before the first write.
        assert_eq!(fs.host().read_file("/upper/a.txt").unwrap(), b"");
        fs.release(handle).unwrap();

        let reader = fs.open(Path::new("/a.txt"), libc::O_RDONLY).unwrap();
        assert_eq!(fs.read(&reader, 100, 0).unwrap(), b"");
        assert_eq!(fs.getattr(Path::new("/a.txt")).unwrap().size, 0);
        assert_eq!(fs.host().read_file("/base/a.txt").unwrap(), b"hello");
    }

    #[test]
    fn test_append_open_discards_base_content() {
        let fs = memory_overlay();
        fs.host().write_file("/base/log", b"line1\n");

        let handle = fs
            .open(Path::new("/log"), libc::O_WRONLY | libc::O_APPEND)
            .unwrap();
        fs.write(&handle, b"line2\n", 0).unwrap();
        fs.release(handle).unwrap();

        assert_eq!(fs.host().read_file("/upper/log").unwrap(), b"line2\n");
    }

    #[test]
    fn test_getattr_comes_from_overlay() {
        let fs = memory_overlay();
        fs.host().write_file("/upper/b.txt", b"new");

        let attrs = fs.getattr(Path::new("/b.txt")).unwrap();
        assert_eq!(attrs.size, 3);
        assert_eq!(attrs.file_type(), libc::S_IFREG);
    }

    #[test]
    fn test_unlink_base_only_entry_is_enoent() {
        let fs = memory_overlay();
        fs.host().write_file("/base/c.txt", b"keep me");

        let err = fs.unlink(Path::new("/c.txt")).unwrap_err();
        assert_eq!(errno_of(err), libc::ENOENT);
        assert_eq!(fs.host().read_file("/base/c.txt").unwrap(), b"keep me");
        assert!(fs.getattr(Path::new("/c.txt")).is_ok());
    }

    #[test]
    fn test_unlinked_overlay_entry_falls_back_to_base() {
        let fs = memory_overlay();
        fs.host().write_file("/base/c.txt", b"base");
        fs.host().write_file("/upper/c.txt", b"overlay!");

        assert_eq!(fs.getattr(Path::new("/c.txt")).unwrap().size, 8);
        fs.unlink(Path::new("/c.txt")).unwrap();
        assert_eq!(fs.getattr(Path::new("/c.txt")).unwrap().size, 4);
    }

    #[test]
    fn test_create_then_write_shadows_permanently() {
        let fs = memory_overlay();
        fs.host().write_file("/base/doc", b"original");

        let handle = fs.create(Path::new("/doc"), 0o644).unwrap();
        assert_eq!(fs.write(&handle, b"edited", 0).unwrap(), 6);
        fs.flush(&handle).unwrap();
        fs.release(handle).unwrap();

        assert_eq!(fs.read_path(Path::new("/doc")), PathBuf::from("/upper/doc"));
        let reader = fs.open(Path::new("/doc"), libc::O_RDONLY).unwrap();
        assert_eq!(fs.read(&reader, 64, 0).unwrap(), b"edited");
    }

    #[test]
    fn test_write_read_roundtrip_at_offset() {
        let fs = memory_overlay();
        let handle = fs.open(Path::new("/rw"), libc::O_RDWR).unwrap();

        fs.write(&handle, b"0123456789", 0).unwrap();
        fs.write(&handle, b"abc", 4).unwrap();
        assert_eq!(fs.read(&handle, 3, 4).unwrap(), b"abc");
        assert_eq!(fs.read(&handle, 100, 8).unwrap(), b"89");
        fs.fsync(&handle, true).unwrap();
        fs.release(handle).unwrap();
    }

    #[test]
    fn test_create_handle_is_write_only() {
        let fs = memory_overlay();
        let handle = fs.create(Path::new("/new"), 0o600).unwrap();
        assert_eq!(handle.mode(), HandleMode::Write);
        assert_eq!(errno_of(fs.read(&handle, 1, 0).unwrap_err()), libc::EBADF);
    }

    #[test]
    fn test_readdir_shows_one_layer_only() {
        let fs = memory_overlay();
        fs.host().write_file("/base/dir/from-base", b"");
        fs.host().write_file("/base/dir/also-base", b"");

        assert_eq!(
            names(fs.readdir(Path::new("/dir")).unwrap()),
            vec![".", "..", "also-base", "from-base"]
        );

        fs.host().write_file("/upper/dir/from-overlay", b"");
        assert_eq!(
            names(fs.readdir(Path::new("/dir")).unwrap()),
            vec![".", "..", "from-overlay"]
        );
    }

    #[test]
    fn test_readdir_of_non_directory_is_just_dots() {
        let fs = memory_overlay();
        fs.host().write_file("/base/file", b"");

        assert_eq!(names(fs.readdir(Path::new("/file")).unwrap()), vec![".", ".."]);
        assert_eq!(names(fs.readdir(Path::new("/missing")).unwrap()), vec![".", ".."]);
    }

    #[test]
    fn test_readlink_sanitizes_absolute_text() {
        let fs = memory_overlay();
        fs.host().create_dir_all("/base/bin");
        fs.host()
            .symlink(Path::new("/base/bin/tool"), Path::new("/base/abs"))
            .unwrap();
        fs.host()
            .symlink(Path::new("bin/tool"), Path::new("/base/rel"))
            .unwrap();

        assert_eq!(fs.readlink(Path::new("/abs")).unwrap(), PathBuf::from("bin/tool"));
        assert_eq!(fs.readlink(Path::new("/rel")).unwrap(), PathBuf::from("bin/tool"));
    }

    #[test]
    fn test_symlink_parameter_roles_are_literal() {
        let fs = memory_overlay();
        fs.symlink(Path::new("/link-name"), Path::new("/points-here"))
            .unwrap();

        assert!(fs
            .host()
            .lstat(Path::new("/upper/points-here"))
            .unwrap()
            .is_symlink());
        assert_eq!(
            fs.host().read_link(Path::new("/upper/points-here")).unwrap(),
            PathBuf::from("/link-name")
        );
        assert!(!fs.host().exists(Path::new("/upper/link-name")));
    }

    #[test]
    fn test_dangling_overlay_link_does_not_shadow() {
        let fs = memory_overlay();
        fs.host().write_file("/base/a.txt", b"hello");
        fs.symlink(Path::new("missing-target"), Path::new("/a.txt"))
            .unwrap();

        let reader = fs.open(Path::new("/a.txt"), libc::O_RDONLY).unwrap();
        assert_eq!(reader.path(), Path::new("/base/a.txt"));
        assert_eq!(fs.read(&reader, 16, 0).unwrap(), b"hello");
        fs.release(reader).unwrap();

        let writer = fs.open(Path::new("/a.txt"), libc::O_WRONLY).unwrap();
        fs.write(&writer, b"bye", 0).unwrap();
        fs.release(writer).unwrap();

        assert_eq!(fs.host().read_file("/upper/missing-target").unwrap(), b"bye");
        assert_eq!(fs.read_path(Path::new("/a.txt")), PathBuf::from("/upper/a.txt"));
        assert!(fs.getattr(Path::new("/a.txt")).unwrap().is_symlink());
    }

    #[test]
    fn test_concurrent_calls_share_one_overlay() {
        let fs = memory_overlay();
        fs.host().write_file("/base/shared", b"shared base");
        for i in 0..8 {
            fs.host().write_file(format!("/base/dir{}/seed", i), b"seed");
        }

        std::thread::scope(|scope| {
            for i in 0..8 {
                let fs = &fs;
                scope.spawn(move || {
                    let path = PathBuf::from(format!("/file{}", i));
                    let body = format!("worker {}", i);
                    for _ in 0..50 {
                        let writer = fs.create(&path, 0o644).unwrap();
                        fs.write(&writer, body.as_bytes(), 0).unwrap();
                        fs.release(writer).unwrap();

                        let reader = fs.open(&path, libc::O_RDONLY).unwrap();
                        assert_eq!(fs.read(&reader, 64, 0).unwrap(), body.as_bytes());
                        fs.release(reader).unwrap();

                        let shared = fs.open(Path::new("/shared"), libc::O_RDONLY).unwrap();
                        assert_eq!(fs.read(&shared, 64, 0).unwrap(), b"shared base");
                        fs.release(shared).unwrap();

                        let dir = PathBuf::from(format!("/dir{}", i));
                        assert_eq!(names(fs.readdir(&dir).unwrap()), vec![".", "..", "seed"]);
                    }
                });
            }
        });

        for i in 0..8 {
            assert_eq!(
                fs.host().read_file(format!("/upper/file{}", i)).unwrap(),
                format!("worker {}", i).as_bytes()
            );
        }
        assert!(!fs.host().exists(Path::new("/upper/shared")));
    }

    #[test]
    fn test_metadata_edit_needs_overlay_entry() {
        let fs = memory_overlay();
        fs.host().write_file("/base/m", b"");

        assert_eq!(
            errno_of(fs.chmod(Path::new("/m"), 0o600).unwrap_err()),
            libc::ENOENT
        );
        assert_eq!(
            errno_of(fs.chown(Path::new("/m"), Some(1), None).unwrap_err()),
            libc::ENOENT
        );
        assert_eq!(
            errno_of(fs.utimens(Path::new("/m"), None).unwrap_err()),
            libc::ENOENT
        );
        assert_eq!(fs.host().lstat(Path::new("/base/m")).unwrap().perm(), 0o644);
    }

    #[test]
    fn test_metadata_edit_applies_to_overlay() {
        let fs = memory_overlay();
        fs.host().write_file("/base/m", b"");
        fs.host().write_file("/upper/m", b"");
        let stamp = UNIX_EPOCH + Duration::from_secs(42);

        fs.chmod(Path::new("/m"), 0o600).unwrap();
        fs.chown(Path::new("/m"), Some(1000), Some(100)).unwrap();
        fs.utimens(Path::new("/m"), Some((stamp, stamp))).unwrap();

        let attrs = fs.getattr(Path::new("/m")).unwrap();
        assert_eq!(attrs.perm(), 0o600);
        assert_eq!((attrs.uid, attrs.gid), (1000, 100));
        assert_eq!(attrs.mtime, stamp);
        assert_eq!(fs.host().lstat(Path::new("/base/m")).unwrap().perm(), 0o644);
    }

    #[test]
    fn test_access_denied_is_permission_error() {
        let fs = memory_overlay();
        fs.host().write_file("/base/ro", b"");
        fs.host().chmod(Path::new("/base/ro"), 0o444).unwrap();

        assert!(fs.access(Path::new("/ro"), libc::R_OK).is_ok());
        assert!(matches!(
            fs.access(Path::new("/ro"), libc::W_OK),
            Err(Error::PermissionDenied(_))
        ));
        assert!(matches!(
            fs.access(Path::new("/missing"), libc::F_OK),
            Err(Error::PermissionDenied(_))
        ));
    }

    #[test]
    fn test_directory_mutations_land_in_overlay() {
        let fs = memory_overlay();
        fs.host().create_dir_all("/base/old");

        fs.mkdir(Path::new("/fresh"), 0o755).unwrap();
        assert!(fs.host().is_dir(Path::new("/upper/fresh")));
        fs.rmdir(Path::new("/fresh")).unwrap();
        assert!(!fs.host().exists(Path::new("/upper/fresh")));

        assert_eq!(errno_of(fs.rmdir(Path::new("/old")).unwrap_err()), libc::ENOENT);
        assert!(fs.host().is_dir(Path::new("/base/old")));
    }

    #[test]
    fn test_mknod_lands_in_overlay() {
        let fs = memory_overlay();
        fs.mknod(Path::new("/fifo"), libc::S_IFIFO | 0o644, 0).unwrap();

        assert_eq!(
            fs.getattr(Path::new("/fifo")).unwrap().file_type(),
            libc::S_IFIFO
        );
        assert!(fs.host().exists(Path::new("/upper/fifo")));
    }

    #[test]
    fn test_rename_and_link_stay_in_overlay() {
        let fs = memory_overlay();
        fs.host().write_file("/base/base-only", b"b");
        fs.host().write_file("/upper/mine", b"m");

        fs.rename(Path::new("/mine"), Path::new("/renamed")).unwrap();
        assert!(fs.host().exists(Path::new("/upper/renamed")));

        fs.link(Path::new("/renamed"), Path::new("/hard")).unwrap();
        assert_eq!(fs.getattr(Path::new("/hard")).unwrap().nlink, 2);

        assert_eq!(
            errno_of(fs.rename(Path::new("/base-only"), Path::new("/x")).unwrap_err()),
            libc::ENOENT
        );
        assert_eq!(
            errno_of(fs.link(Path::new("/base-only"), Path::new("/y")).unwrap_err()),
            libc::ENOENT
        );
    }

    #[test]
    fn test_truncate_without_handle() {
        let fs = memory_overlay();
        fs.host().write_file("/upper/t", b"0123456789");
        fs.host().write_file("/base/base-t", b"0123456789");

        fs.truncate(Path::new("/t"), 4).unwrap();
        assert_eq!(fs.host().read_file("/upper/t").unwrap(), b"0123");

        assert_eq!(
            errno_of(fs.truncate(Path::new("/base-t"), 1).unwrap_err()),
            libc::ENOENT
        );
    }

    #[test]
    fn test_write_open_in_base_only_directory_fails() {
        let fs = memory_overlay();
        fs.host().write_file("/base/sub/file", b"data");

        let err = fs.open(Path::new("/sub/file"), libc::O_RDWR).unwrap_err();
        assert_eq!(errno_of(err), libc::ENOENT);
    }

    #[test]
    fn test_statfs_reports_host_stats() {
        let host = MemoryHost::new().with_stats(FsStats {
            namemax: 143,
            bsize: 512,
            ..FsStats::default()
        });
        host.create_dir_all("/base");
        host.create_dir_all("/upper");
        let fs = OverlayFs::new(host, PathResolver::new("/base", "/upper"));

        let stats = fs.statfs(Path::new("/")).unwrap();
        assert_eq!(stats.namemax, 143);
        assert_eq!(stats.bsize, 512);
    }

    // Local filesystem

    fn local_overlay() -> (tempfile::TempDir, OverlayFs<LocalHost>) {
        let dir = tempdir().unwrap();
        let mount = MountConfig::new(
            dir.path().join("base"),
            dir.path().join("upper"),
            dir.path().join("mnt"),
        );
        for path in [&mount.base_root, &mount.overlay_root, &mount.mountpoint] {
            std::fs::create_dir(path).unwrap();
        }
        let fs = OverlayFs::from_config(&mount.validated().unwrap());
        (dir, fs)
    }

    #[test]
    fn test_local_scenarios() {
        let (dir, fs) = local_overlay();
        let base = dir.path().join("base");
        let upper = dir.path().join("upper");
        std::fs::write(base.join("a.txt"), b"hello").unwrap();
        std::fs::write(base.join("c.txt"), b"c").unwrap();
        std::fs::write(upper.join("b.txt"), b"new").unwrap();

        let reader = fs.open(Path::new("/a.txt"), libc::O_RDONLY).unwrap();
        assert_eq!(fs.read(&reader, 5, 0).unwrap(), b"hello");
        fs.release(reader).unwrap();
        assert!(!upper.join("a.txt").exists());

        assert_eq!(fs.getattr(Path::new("/b.txt")).unwrap().size, 3);

        let err = fs.unlink(Path::new("/c.txt")).unwrap_err();
        assert_eq!(err.errno(), libc::ENOENT);
        assert!(base.join("c.txt").exists());

        let writer = fs.open(Path::new("/a.txt"), libc::O_WRONLY).unwrap();
        assert_eq!(std::fs::read(upper.join("a.txt")).unwrap(), b"");
        fs.release(writer).unwrap();
        assert_eq!(std::fs::read(base.join("a.txt")).unwrap(), b"hello");
    }

    #[test]
    fn test_local_getattr_does_not_follow_symlink() {
        let (dir, fs) = local_overlay();
        let upper = dir.path().join("upper");
        std::fs::write(upper.join("target"), b"0123456789").unwrap();
        std::os::unix::fs::symlink("target", upper.join("link")).unwrap();

        let attrs = fs.getattr(Path::new("/link")).unwrap();
        assert!(attrs.is_symlink());
        assert_eq!(attrs.size, "target".len() as u64);
    }

    #[test]
    fn test_local_dangling_overlay_link() {
        let (dir, fs) = local_overlay();
        let base = dir.path().join("base");
        let upper = dir.path().join("upper");
        std::fs::write(base.join("a.txt"), b"hello").unwrap();
        std::os::unix::fs::symlink("missing-target", upper.join("a.txt")).unwrap();

        let reader = fs.open(Path::new("/a.txt"), libc::O_RDONLY).unwrap();
        assert_eq!(fs.read(&reader, 16, 0).unwrap(), b"hello");
        fs.release(reader).unwrap();

        let writer = fs.open(Path::new("/a.txt"), libc::O_WRONLY).unwrap();
        fs.write(&writer, b"bye", 0).unwrap();
        fs.release(writer).unwrap();

        assert_eq!(std::fs::read(upper.join("missing-target")).unwrap(), b"bye");
        assert_eq!(std::fs::read(base.join("a.txt")).unwrap(), b"hello");
    }

    #[test]
    fn test_local_readlink_against_symlinked_base_root() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("real/lib")).unwrap();
        std::fs::create_dir(dir.path().join("upper")).unwrap();
        std::fs::create_dir(dir.path().join("mnt")).unwrap();
        let base = dir.path().join("base");
        std::os::unix::fs::symlink(dir.path().join("real"), &base).unwrap();

        let mount = MountConfig::new(&base, dir.path().join("upper"), dir.path().join("mnt"));
        let fs = OverlayFs::from_config(&mount.validated().unwrap());
        std::os::unix::fs::symlink(base.join("lib/x"), base.join("abs")).unwrap();

        assert_eq!(fs.readlink(Path::new("/abs")).unwrap(), PathBuf::from("lib/x"));
    }

    #[test]
    fn test_local_readlink_sanitizes() {
        let (_dir, fs) = local_overlay();
        let base = fs.resolver().base_root().to_path_buf();
        std::os::unix::fs::symlink(base.join("etc/conf"), base.join("abs")).unwrap();

        assert_eq!(
            fs.readlink(Path::new("/abs")).unwrap(),
            PathBuf::from("etc/conf")
        );
    }
}
