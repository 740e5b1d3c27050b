//! Error types for omoscope-core

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Classified storage failure kinds.
///
/// These are surfaced to callers instead of raw backend errors so that a
/// failing SQLite read can fall back to the files backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageFailureKind {
    /// Database is locked by a writer
    DbBusy,
    /// Database file is damaged or not a database at all
    DbCorrupt,
    /// Database could not be opened
    DbUnopenable,
    /// Any other query failure
    DbQueryFailed,
    /// Storage directory does not exist
    StorageMissing,
}

impl StorageFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageFailureKind::DbBusy => "db_busy",
            StorageFailureKind::DbCorrupt => "db_corrupt",
            StorageFailureKind::DbUnopenable => "db_unopenable",
            StorageFailureKind::DbQueryFailed => "db_query_failed",
            StorageFailureKind::StorageMissing => "storage_missing",
        }
    }
}

impl std::fmt::Display for StorageFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A storage read that could not be served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageFailure {
    pub kind: StorageFailureKind,
    pub reason: String,
}

impl StorageFailure {
    pub fn new(kind: StorageFailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for StorageFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.reason)
    }
}

/// Main error type for the omoscope-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A path resolved outside every allowed root
    #[error("access denied: {} ({reason})", path.display())]
    AccessDenied { path: PathBuf, reason: String },

    /// Storage backend could not serve a read
    #[error("storage unavailable: {0}")]
    Storage(StorageFailure),
}

impl Error {
    /// Returns the classified failure when this is a storage availability error.
    pub fn storage_failure(&self) -> Option<&StorageFailure> {
        match self {
            Error::Storage(failure) => Some(failure),
            _ => None,
        }
    }
}

impl From<StorageFailure> for Error {
    fn from(failure: StorageFailure) -> Self {
        Error::Storage(failure)
    }
}

/// Result type alias for omoscope-core
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_failure_display() {
        let err: Error = StorageFailure::new(StorageFailureKind::DbBusy, "database is locked").into();
        assert_eq!(
            err.to_string(),
            "storage unavailable: db_busy: database is locked"
        );
        assert_eq!(
            err.storage_failure().map(|f| f.kind),
            Some(StorageFailureKind::DbBusy)
        );
    }

    #[test]
    fn test_access_denied_is_not_storage_failure() {
        let err = Error::AccessDenied {
            path: PathBuf::from("/etc/passwd"),
            reason: "outside allowed roots".to_string(),
        };
        assert!(err.storage_failure().is_none());
        assert!(err.to_string().contains("/etc/passwd"));
    }
}
