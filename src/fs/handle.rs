//! Open file handles
//!
//! A [`Handle`] exists only between `open`/`create` and `release`. It is not
//! `Clone`, and `release` takes it by value, so a handle can neither be
//! aliased nor used after it is closed.

use std::path::{Path, PathBuf};

/// Which side of the state machine a handle was opened into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleMode {
    /// Opened read-only, resolved through `read_path`
    Read,
    /// Opened write-only or read-write, resolved through `write_path`
    Write,
}

impl HandleMode {
    pub fn from_flags(flags: i32) -> Self {
        let accmode = flags & libc::O_ACCMODE;
        if accmode == libc::O_WRONLY || accmode == libc::O_RDWR {
            HandleMode::Write
        } else {
            HandleMode::Read
        }
    }
}

/// Represents an open file
#[derive(Debug)]
pub struct Handle<F> {
    /// Host file
    file: F,
    /// Physical path the file was opened at
    path: PathBuf,
    mode: HandleMode,
}

impl<F> Handle<F> {
    pub(crate) fn new(file: F, path: PathBuf, flags: i32) -> Self {
        Handle {
            file,
            path,
            mode: HandleMode::from_flags(flags),
        }
    }

    pub fn file(&self) -> &F {
        &self.file
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> HandleMode {
        self.mode
    }

    /// Consume the handle, giving back the host file to close
    pub(crate) fn into_file(self) -> F {
        self.file
    }
}
