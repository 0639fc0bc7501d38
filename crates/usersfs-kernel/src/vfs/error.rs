//! Errors answered by driver operations.

use std::io;
use thiserror::Error;

use crate::accounts::AccountError;
use crate::provision::ProvisionError;

/// Every driver operation answers with one of these; the FUSE adapter maps
/// them onto errno values.
#[derive(Debug, Error)]
pub enum VfsError {
    /// Path or account does not resolve.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The tree forbids this shape of mutation (attribute files, protected accounts).
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Mount (or backing mode) does not accept writes.
    #[error("filesystem is read-only")]
    ReadOnly,

    /// Renames of account entries and the like.
    #[error("operation not supported: {0}")]
    NotSupported(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    #[error("not a symbolic link: {0}")]
    NotASymlink(String),

    /// Invalid path or account name.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Path escapes the backing root.
    #[error("path escapes root: {0}")]
    PathEscapesRoot(String),

    /// Provisioning Bridge call failed.
    #[error("provisioning failed: {0}")]
    Provisioning(#[from] ProvisionError),

    /// Account database could not be read.
    #[error("account source: {0}")]
    Account(#[from] AccountError),

    /// Backing storage I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl VfsError {
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    pub fn permission_denied(path: impl Into<String>) -> Self {
        Self::PermissionDenied(path.into())
    }

    pub fn not_supported(op: impl Into<String>) -> Self {
        Self::NotSupported(op.into())
    }

    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    pub fn path_escapes_root(path: impl Into<String>) -> Self {
        Self::PathEscapesRoot(path.into())
    }

    /// True for backing-storage, provisioning and account-source failures.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Provisioning(_) | Self::Account(_))
    }
}

/// For callers that only speak `std::io`.
impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        match e {
            VfsError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            VfsError::AlreadyExists(msg) => io::Error::new(io::ErrorKind::AlreadyExists, msg),
            VfsError::PermissionDenied(msg) => {
                io::Error::new(io::ErrorKind::PermissionDenied, msg)
            }
            VfsError::ReadOnly => {
                io::Error::new(io::ErrorKind::ReadOnlyFilesystem, "filesystem is read-only")
            }
            VfsError::NotSupported(msg) => io::Error::new(io::ErrorKind::Unsupported, msg),
            VfsError::NotADirectory(msg) => io::Error::new(io::ErrorKind::NotADirectory, msg),
            VfsError::IsADirectory(msg) => io::Error::new(io::ErrorKind::IsADirectory, msg),
            VfsError::NotASymlink(msg) | VfsError::InvalidPath(msg) => {
                io::Error::new(io::ErrorKind::InvalidInput, msg)
            }
            VfsError::PathEscapesRoot(msg) => {
                io::Error::new(io::ErrorKind::PermissionDenied, msg)
            }
            VfsError::Provisioning(e) => io::Error::other(e),
            VfsError::Account(e) => io::Error::other(e),
            VfsError::Io(e) => e,
        }
    }
}

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;
