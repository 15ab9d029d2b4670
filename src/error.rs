//! Error types for bd-claim.
//!
//! Every failure maps onto one of a fixed set of [`ErrorKind`]s, which is
//! what callers see in a structured result. "No issue available" is never an
//! error.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// SQLite primary result codes that signal lock contention.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

#[derive(Debug, Error)]
pub enum Error {
    #[error("store not found: {0}")]
    StoreNotFound(String),

    #[error("store version {found} is older than the minimum supported version {minimum}")]
    SchemaIncompatible { found: String, minimum: String },

    /// Contention outlasted the retry budget.
    #[error("database is busy: {0}")]
    Busy(String),

    #[error("deadline of {0:?} elapsed before the store call completed")]
    DeadlineExceeded(Duration),

    #[error("workspace not found: {0}")]
    WorkspaceNotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The fixed kind this error is reported as.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::StoreNotFound(_) => ErrorKind::StoreNotFound,
            Error::SchemaIncompatible { .. } => ErrorKind::SchemaIncompatible,
            Error::Busy(_) | Error::DeadlineExceeded(_) => ErrorKind::StoreBusy,
            Error::WorkspaceNotFound(_) => ErrorKind::WorkspaceNotFound,
            Error::InvalidArgument(_) | Error::Config(_) => ErrorKind::InvalidArgument,
            Error::Storage(e) if is_busy_sqlx(e) => ErrorKind::StoreBusy,
            Error::Storage(_) | Error::Io(_) | Error::Other(_) => ErrorKind::Unexpected,
        }
    }

    /// Transient lock contention. Only these errors are retried.
    pub fn is_busy(&self) -> bool {
        match self {
            Error::Busy(_) => true,
            Error::Storage(e) => is_busy_sqlx(e),
            _ => false,
        }
    }
}

fn is_busy_sqlx(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => {
            let primary = db
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .map(|code| code & 0xff);
            matches!(primary, Some(SQLITE_BUSY | SQLITE_LOCKED)) || is_busy_message(db.message())
        }
        other => is_busy_message(&other.to_string()),
    }
}

fn is_busy_message(msg: &str) -> bool {
    msg.contains("database is locked")
        || msg.contains("database table is locked")
        || msg.contains("SQLITE_BUSY")
}

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

/// Stable error categories exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "DB_NOT_FOUND")]
    StoreNotFound,
    #[serde(rename = "SCHEMA_INCOMPATIBLE")]
    SchemaIncompatible,
    #[serde(rename = "SQLITE_BUSY")]
    StoreBusy,
    #[serde(rename = "WORKSPACE_NOT_FOUND")]
    WorkspaceNotFound,
    #[serde(rename = "INVALID_ARGUMENT")]
    InvalidArgument,
    #[serde(rename = "UNEXPECTED")]
    Unexpected,
}

impl ErrorKind {
    /// Wire code, as emitted in result documents.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::StoreNotFound => "DB_NOT_FOUND",
            ErrorKind::SchemaIncompatible => "SCHEMA_INCOMPATIBLE",
            ErrorKind::StoreBusy => "SQLITE_BUSY",
            ErrorKind::WorkspaceNotFound => "WORKSPACE_NOT_FOUND",
            ErrorKind::InvalidArgument => "INVALID_ARGUMENT",
            ErrorKind::Unexpected => "UNEXPECTED",
        }
    }

    /// A caller may reinvoke after this kind of failure.
    pub fn is_retryable(self) -> bool {
        self == ErrorKind::StoreBusy
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}
