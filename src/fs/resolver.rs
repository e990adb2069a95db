//! Virtual to physical path resolution
//!
//! Reads prefer the overlay when it holds an entry for the path and fall back
//! to the base otherwise. Writes always target the overlay, which is the whole
//! copy-up mechanism: once anything is written at a path, the overlay shadows
//! the base there for good.

use std::path::{Component, Path, PathBuf};
use tracing::trace;

use super::host::HostFs;

/// Maps virtual paths onto the base and overlay trees
#[derive(Debug, Clone)]
pub struct PathResolver {
    base_root: PathBuf,
    overlay_root: PathBuf,
}

impl PathResolver {
    pub fn new(base_root: impl Into<PathBuf>, overlay_root: impl Into<PathBuf>) -> Self {
        Self {
            base_root: base_root.into(),
            overlay_root: overlay_root.into(),
        }
    }

    pub fn base_root(&self) -> &Path {
        &self.base_root
    }

    pub fn overlay_root(&self) -> &Path {
        &self.overlay_root
    }

    /// Strip leading separators so the path joins under a root
    pub fn relative(path: &Path) -> &Path {
        path.strip_prefix("/").unwrap_or(path)
    }

    /// Physical path for reading: the overlay entry if one exists, else the base
    pub fn read_path<H: HostFs + ?Sized>(&self, host: &H, path: &Path) -> PathBuf {
        let relative = Self::relative(path);
        let upper = self.overlay_root.join(relative);
        if host.exists(&upper) {
            trace!("read_path({:?}) -> overlay", path);
            upper
        } else {
            trace!("read_path({:?}) -> base", path);
            self.base_root.join(relative)
        }
    }

    /// Physical path for writing: always the overlay
    pub fn write_path(&self, path: &Path) -> PathBuf {
        self.overlay_root.join(Self::relative(path))
    }

    /// Rewrite an absolute symlink text relative to the base root.
    /// Relative texts are returned unchanged.
    pub fn sanitize_link(&self, text: PathBuf) -> PathBuf {
        if text.is_absolute() {
            relpath(&text, &self.base_root)
        } else {
            text
        }
    }
}

fn lexical(path: &Path) -> Vec<Component<'_>> {
    let mut out: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.last(), Some(Component::Normal(_))) {
                    out.pop();
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Fold `.` and `..` without touching the filesystem
pub(crate) fn normalize(path: &Path) -> PathBuf {
    lexical(path).into_iter().collect()
}

/// Lexical relative path from `base` to `target`, both absolute
pub(crate) fn relpath(target: &Path, base: &Path) -> PathBuf {
    let target = lexical(target);
    let base = lexical(base);
    let common = target
        .iter()
        .zip(base.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = PathBuf::new();
    for _ in common..base.len() {
        out.push("..");
    }
    for component in &target[common..] {
        out.push(component.as_os_str());
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}
