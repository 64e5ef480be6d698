//! Typed error taxonomy for the archive server.
//!
//! Every error that can escape the library maps to exactly one of the
//! wire error kinds. RPC front-end code is expected to match
//! on `ArchiveError::kind()` rather than `Display` text when deciding how
//! to answer a client.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    FailedPrecondition,
    Cancelled,
    Internal,
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ArchiveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ArchiveError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            ArchiveError::NotFound(_) => ErrorKind::NotFound,
            ArchiveError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            ArchiveError::FailedPrecondition(_) => ErrorKind::FailedPrecondition,
            ArchiveError::Cancelled => ErrorKind::Cancelled,
            ArchiveError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        ArchiveError::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ArchiveError::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ArchiveError::Internal(msg.into())
    }
}

impl From<serde_json::Error> for ArchiveError {
    fn from(e: serde_json::Error) -> Self {
        // A decode failure of a stored blob is always internal, never
        // surfaced to the client as not-found.
        ArchiveError::Internal(format!("decode failure: {e}"))
    }
}

impl From<turso::Error> for ArchiveError {
    fn from(e: turso::Error) -> Self {
        ArchiveError::Internal(format!("store I/O failure: {e}"))
    }
}

pub type ArchiveResult<T> = std::result::Result<T, ArchiveError>;
