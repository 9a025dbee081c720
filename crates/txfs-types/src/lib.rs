//! Core cross-cutting types for the txfs transactional file store:
//! transaction and file identifiers, version indices, isolation levels,
//! lock modes, and the transaction state machine.

use std::fmt;
use std::num::NonZeroU64;
use std::str::FromStr;

/// Monotonically increasing transaction identifier.
///
/// Domain: `1..=u64::MAX`. Zero is never a valid transaction id, which lets
/// `Option<TxnId>` stay pointer-sized.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct TxnId(NonZeroU64);

impl TxnId {
    /// Construct a `TxnId` if `raw` is non-zero.
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Option<Self> {
        match NonZeroU64::new(raw) {
            Some(nz) => Some(Self(nz)),
            None => None,
        }
    }

    /// Get the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0.get()
    }

    /// Return the next transaction id, or `None` on wraparound.
    #[inline]
    #[must_use]
    pub const fn checked_next(self) -> Option<Self> {
        Self::new(self.get().wrapping_add(1))
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn#{}", self.get())
    }
}

impl TryFrom<u64> for TxnId {
    type Error = InvalidTxnId;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(InvalidTxnId { raw: value })
    }
}

impl FromStr for TxnId {
    type Err = InvalidTxnId;

    /// Parse the display form (`txn#7`) or a bare decimal (`7`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("txn#").unwrap_or(s);
        let raw = digits.parse::<u64>().map_err(|_| InvalidTxnId { raw: 0 })?;
        Self::new(raw).ok_or(InvalidTxnId { raw })
    }
}

/// Error returned when constructing an out-of-domain `TxnId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTxnId {
    raw: u64,
}

impl fmt::Display for InvalidTxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid TxnId {} (must be non-zero)", self.raw)
    }
}

impl std::error::Error for InvalidTxnId {}

/// Stable identity of a tree entry, used as the lock key and the snapshot
/// map key.
///
/// Every entry carries one — directories included, so that structural
/// operations can lock the parent directory. Identities are allocated
/// monotonically and never reused, so a stale id can never alias a new
/// entry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct FileId(u64);

impl FileId {
    /// Identity of the root directory.
    pub const ROOT: Self = Self(1);

    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fid#{}", self.get())
    }
}

/// Index into a file's version chain.
///
/// Version 0 is the empty content a file is created with; version `i > 0`
/// is produced by the `i`-th diff in the chain.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[repr(transparent)]
pub struct VersionNo(u64);

impl VersionNo {
    /// The empty baseline every file starts from.
    pub const ZERO: Self = Self(0);

    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for VersionNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.get())
    }
}

/// Transaction isolation level.
///
/// READ_UNCOMMITTED and READ_COMMITTED are observably equivalent here
/// because writes are buffered until commit; READ_UNCOMMITTED additionally
/// skips the shared read lock.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum IsolationLevel {
    /// Dirty reads allowed in principle; degenerate to READ_COMMITTED.
    ReadUncommitted,
    /// Reads observe the latest committed version at read time.
    #[default]
    ReadCommitted,
    /// Reads observe the version current at transaction start.
    Snapshot,
}

impl IsolationLevel {
    /// The console token for this level.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ_UNCOMMITTED",
            Self::ReadCommitted => "READ_COMMITTED",
            Self::Snapshot => "SNAPSHOT",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IsolationLevel {
    type Err = ParseIsolationLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "READ_UNCOMMITTED" => Ok(Self::ReadUncommitted),
            "READ_COMMITTED" => Ok(Self::ReadCommitted),
            "SNAPSHOT" => Ok(Self::Snapshot),
            _ => Err(ParseIsolationLevelError {
                token: s.to_owned(),
            }),
        }
    }
}

/// Error returned for an unrecognized isolation token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIsolationLevelError {
    token: String,
}

impl ParseIsolationLevelError {
    /// The offending token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Display for ParseIsolationLevelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown isolation level: '{}'", self.token)
    }
}

impl std::error::Error for ParseIsolationLevelError {}

/// Whole-file lock mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum LockMode {
    /// Multi-holder; excludes EXCLUSIVE.
    Shared,
    /// Single-holder; excludes everything.
    Exclusive,
}

impl LockMode {
    /// Whether two holders with these modes may coexist on one file.
    #[must_use]
    pub const fn compatible_with(self, other: Self) -> bool {
        matches!((self, other), (Self::Shared, Self::Shared))
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Shared => "SHARED",
            Self::Exclusive => "EXCLUSIVE",
        })
    }
}

/// Transaction lifecycle state.
///
/// Created ACTIVE; transitions once to exactly one terminal state, and
/// terminal states are sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum TxnState {
    Active,
    Committed,
    /// Client-initiated rollback from ACTIVE.
    Aborted,
    /// Rollback (spontaneous or after a commit failure) succeeded.
    RolledBack,
    /// Rollback itself failed; affected files may be inconsistent.
    RollbackFailed,
}

impl TxnState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Committed => "COMMITTED",
            Self::Aborted => "ABORTED",
            Self::RolledBack => "ROLLED_BACK",
            Self::RollbackFailed => "ROLLBACK_FAILED",
        }
    }
}

impl fmt::Display for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
