//! Primary error type for txfs operations.
//!
//! Structured variants for every failure the core can surface, with
//! convenience constructors and a transience classifier so callers can
//! tell retryable failures (deadlock, cancelled lock waits) from fatal
//! ones.

use thiserror::Error;

/// Primary error type for txfs operations.
#[derive(Error, Debug)]
pub enum TxfsError {
    // === Tree / path errors ===
    /// No file exists at the path.
    #[error("no such file: '{path}'")]
    NoSuchFile { path: String },

    /// No directory exists at the path (or an intermediate component is missing).
    #[error("no such directory: '{path}'")]
    NoSuchDirectory { path: String },

    /// The path resolves to a directory where a file was required.
    #[error("not a file: '{path}'")]
    NotAFile { path: String },

    /// The path resolves to a file where a directory was required.
    #[error("not a directory: '{path}'")]
    NotADirectory { path: String },

    /// The target name is already taken.
    #[error("already exists: '{path}'")]
    AlreadyExists { path: String },

    /// A directory scheduled for removal still has children.
    #[error("directory not empty: '{path}'")]
    NotEmpty { path: String },

    /// The file has not been opened; reads and writes require `open` first.
    #[error("file not open: '{path}'")]
    NotOpen { path: String },

    /// The entry name is empty, contains '/', or is '.'/'..'.
    #[error("invalid name: '{name}'")]
    InvalidName { name: String },

    /// A move would place a directory under its own descendant.
    #[error("cannot move '{src}' under its own descendant '{dst}'")]
    MoveIntoDescendant { src: String, dst: String },

    // === Versioning errors ===
    /// The requested version index is outside the chain.
    #[error("no such version: {requested} (latest is {latest})")]
    NoSuchVersion { requested: u64, latest: u64 },

    /// A stored diff failed validation while being applied.
    #[error("invalid diff: {detail}")]
    InvalidDiff { detail: String },

    // === Transaction errors ===
    /// The transaction id is not known to the manager.
    #[error("unknown transaction: {txn}")]
    UnknownTransaction { txn: String },

    /// The transaction has already reached a terminal state.
    #[error("transaction {txn} is not active (state {state})")]
    TransactionNotActive { txn: String, state: String },

    /// The isolation token is not one of the supported levels.
    #[error("unknown isolation level: '{token}'")]
    IsolationUnknown { token: String },

    // === Lock errors ===
    /// Granting the request would close a cycle in the wait-for graph.
    #[error("deadlock detected for transaction {txn}")]
    Deadlock { txn: String },

    /// The lock wait was torn down (transaction aborted from another thread).
    #[error("lock wait cancelled for transaction {txn}")]
    LockCancelled { txn: String },

    // === Rollback ===
    /// Rollback itself failed; both the rollback cause and the failure
    /// that triggered the rollback are preserved.
    #[error("rollback failed: {cause} (while handling: {original})")]
    RollbackFailed {
        cause: Box<TxfsError>,
        original: Box<TxfsError>,
    },
}

impl TxfsError {
    /// Whether this is a transient failure that may succeed on retry.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Deadlock { .. } | Self::LockCancelled { .. })
    }

    /// Create a `NoSuchFile` error.
    pub fn no_such_file(path: impl Into<String>) -> Self {
        Self::NoSuchFile { path: path.into() }
    }

    /// Create a `NoSuchDirectory` error.
    pub fn no_such_directory(path: impl Into<String>) -> Self {
        Self::NoSuchDirectory { path: path.into() }
    }

    /// Create a `NotAFile` error.
    pub fn not_a_file(path: impl Into<String>) -> Self {
        Self::NotAFile { path: path.into() }
    }

    /// Create a `NotADirectory` error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory { path: path.into() }
    }

    /// Create an `AlreadyExists` error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists { path: path.into() }
    }

    /// Create a `NotEmpty` error.
    pub fn not_empty(path: impl Into<String>) -> Self {
        Self::NotEmpty { path: path.into() }
    }

    /// Create a `NotOpen` error.
    pub fn not_open(path: impl Into<String>) -> Self {
        Self::NotOpen { path: path.into() }
    }

    /// Create an `InvalidName` error.
    pub fn invalid_name(name: impl Into<String>) -> Self {
        Self::InvalidName { name: name.into() }
    }

    /// Create an `InvalidDiff` error.
    pub fn invalid_diff(detail: impl Into<String>) -> Self {
        Self::InvalidDiff {
            detail: detail.into(),
        }
    }

    /// Create an `UnknownTransaction` error from the transaction's display form.
    pub fn unknown_transaction(txn: impl Into<String>) -> Self {
        Self::UnknownTransaction { txn: txn.into() }
    }

    /// Create a `RollbackFailed` error pairing the rollback cause with the
    /// failure that triggered the rollback.
    #[must_use]
    pub fn rollback_failed(cause: Self, original: Self) -> Self {
        Self::RollbackFailed {
            cause: Box::new(cause),
            original: Box::new(original),
        }
    }
}

/// Result type alias using `TxfsError`.
pub type Result<T> = std::result::Result<T, TxfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = TxfsError::no_such_file("/a/b");
        assert_eq!(err.to_string(), "no such file: '/a/b'");

        let err = TxfsError::NoSuchVersion {
            requested: 9,
            latest: 3,
        };
        assert_eq!(err.to_string(), "no such version: 9 (latest is 3)");
    }

    #[test]
    fn error_display_transaction_not_active() {
        let err = TxfsError::TransactionNotActive {
            txn: "txn#4".to_owned(),
            state: "COMMITTED".to_owned(),
        };
        assert_eq!(
            err.to_string(),
            "transaction txn#4 is not active (state COMMITTED)"
        );
    }

    #[test]
    fn is_transient() {
        assert!(TxfsError::Deadlock {
            txn: "txn#1".to_owned()
        }
        .is_transient());
        assert!(TxfsError::LockCancelled {
            txn: "txn#1".to_owned()
        }
        .is_transient());
        assert!(!TxfsError::no_such_file("/x").is_transient());
        assert!(!TxfsError::already_exists("/x").is_transient());
    }

    #[test]
    fn rollback_failed_preserves_both_causes() {
        let original = TxfsError::no_such_directory("/gone");
        let cause = TxfsError::NoSuchVersion {
            requested: 2,
            latest: 1,
        };
        let err = TxfsError::rollback_failed(cause, original);
        assert_eq!(
            err.to_string(),
            "rollback failed: no such version: 2 (latest is 1) \
             (while handling: no such directory: '/gone')"
        );
        assert!(!err.is_transient());
    }

    #[test]
    fn convenience_constructors() {
        assert!(matches!(
            TxfsError::not_open("/f"),
            TxfsError::NotOpen { path } if path == "/f"
        ));
        assert!(matches!(
            TxfsError::invalid_name("a/b"),
            TxfsError::InvalidName { name } if name == "a/b"
        ));
        assert!(matches!(
            TxfsError::unknown_transaction("txn#9"),
            TxfsError::UnknownTransaction { txn } if txn == "txn#9"
        ));
    }
}
