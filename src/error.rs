//! Error types for layerfs

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for layerfs operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for layerfs
#[derive(Error, Debug)]
pub enum Error {
    /// Failure raised by a host filesystem primitive, carried unmodified
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Host denied an access check
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// File handle is not (or no longer) registered
    #[error("Bad file handle: {0}")]
    BadHandle(u64),

    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Errno to hand back to the kernel for this error
    pub fn errno(&self) -> libc::c_int {
        match self {
            Error::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            Error::PermissionDenied(_) => libc::EACCES,
            Error::BadHandle(_) => libc::EBADF,
            Error::PathNotFound(_) => libc::ENOENT,
            Error::Config(_) | Error::InvalidConfig(_) => libc::EINVAL,
            Error::Internal(_) => libc::EIO,
        }
    }

    /// Build an I/O error from a raw errno
    pub fn from_errno(errno: libc::c_int) -> Self {
        Error::Io(std::io::Error::from_raw_os_error(errno))
    }
}
