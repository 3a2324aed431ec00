//! The error taxonomy callers match on (§7).
//!
//! This mirrors the split `backpak-b2`'s `Error` enum drew for its own
//! narrow, external-facing API: a closed set of variants instead of
//! `anyhow`'s free-form chains, because callers of this crate (the gRPC/
//! WebDAV front-ends, out of scope here) need to turn a failure into the
//! right wire status code.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("aborted: {0}")]
    Aborted(String),

    #[error("insufficient storage: {0}")]
    InsufficientStorage(String),

    #[error("checksum mismatch: {0}")]
    ChecksumMismatch(String),

    #[error("locked: {0}")]
    Locked(String),

    #[error("partial content: {0}")]
    PartialContent(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("not supported: {0}")]
    NotSupported(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    /// A short machine-readable name for the variant, for logging and for
    /// front-ends that want to map us to their own status codes.
    pub fn kind(&self) -> &'static str {
        match self {
            StorageError::NotFound(_) => "not-found",
            StorageError::AlreadyExists(_) => "already-exists",
            StorageError::PermissionDenied(_) => "permission-denied",
            StorageError::BadRequest(_) => "bad-request",
            StorageError::PreconditionFailed(_) => "precondition-failed",
            StorageError::Aborted(_) => "aborted",
            StorageError::InsufficientStorage(_) => "insufficient-storage",
            StorageError::ChecksumMismatch(_) => "checksum-mismatch",
            StorageError::Locked(_) => "locked",
            StorageError::PartialContent(_) => "partial-content",
            StorageError::Io(_) => "io",
            StorageError::Internal(_) => "internal",
            StorageError::NotSupported(_) => "not-supported",
        }
    }
}

/// Convenience constructors, so call sites read like the teacher's
/// `anyhow::anyhow!`/`bail!` call sites instead of verbose enum literals.
macro_rules! err_ctor {
    ($name:ident, $variant:ident) => {
        pub fn $name(msg: impl Into<String>) -> StorageError {
            StorageError::$variant(msg.into())
        }
    };
}

err_ctor!(not_found, NotFound);
err_ctor!(already_exists, AlreadyExists);
err_ctor!(permission_denied, PermissionDenied);
err_ctor!(bad_request, BadRequest);
err_ctor!(precondition_failed, PreconditionFailed);
err_ctor!(aborted, Aborted);
err_ctor!(insufficient_storage, InsufficientStorage);
err_ctor!(checksum_mismatch, ChecksumMismatch);
err_ctor!(locked, Locked);
err_ctor!(partial_content, PartialContent);
err_ctor!(internal, Internal);
err_ctor!(not_supported, NotSupported);
