//! Per-transaction runtime state: the write buffer, the staged-structure
//! overlay, and the snapshot map.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use parking_lot::Mutex;
use txfs_tree::FileHandle;
use txfs_types::{FileId, IsolationLevel, TxnId, TxnState, VersionNo};

/// A buffered operation awaiting commit. Writes append versions in
/// phase 1 of commit; structural ops apply to the tree in phase 2.
pub(crate) enum PendingOp {
    Write {
        handle: Arc<FileHandle>,
        content: String,
    },
    Touch {
        path: String,
        handle: Arc<FileHandle>,
    },
    Mkdir {
        path: String,
        id: FileId,
    },
    Rm {
        path: String,
    },
    Mv {
        src: String,
        dst: String,
    },
}

/// Overlay state for a path this transaction has structurally changed.
/// Other transactions never see the overlay; commit turns it into tree
/// mutations.
pub(crate) enum Staged {
    /// Created by this transaction; the handle is not yet linked into the
    /// tree.
    CreatedFile(Arc<FileHandle>),
    /// Directory created by this transaction, with its future identity.
    CreatedDir(FileId),
    /// Removed (or moved away) by this transaction.
    Removed,
    /// Moved here; the entry still lives at `from` in the base tree.
    MovedIn { from: String },
}

pub(crate) struct TxnInner {
    pub isolation: IsolationLevel,
    pub state: TxnState,
    pub started_at: u64,
    pub ended_at: Option<u64>,
    /// Ordered write buffer.
    pub ops: Vec<PendingOp>,
    /// Absolute normalized path -> overlay state.
    pub staged: HashMap<String, Staged>,
    /// SNAPSHOT only: file identity -> version observed at begin.
    pub snapshot: Option<HashMap<FileId, VersionNo>>,
    /// SNAPSHOT read memoization, dropped by `close`.
    pub read_cache: HashMap<FileId, String>,
}

pub(crate) struct TxnHandle {
    pub id: TxnId,
    /// Set by an abort/rollback from another thread; a parked lock wait is
    /// torn down via the lock manager and the owner observes this flag.
    pub cancel_requested: AtomicBool,
    pub inner: Mutex<TxnInner>,
}

impl TxnHandle {
    pub(crate) fn new(
        id: TxnId,
        isolation: IsolationLevel,
        started_at: u64,
        snapshot: Option<HashMap<FileId, VersionNo>>,
    ) -> Self {
        Self {
            id,
            cancel_requested: AtomicBool::new(false),
            inner: Mutex::new(TxnInner {
                isolation,
                state: TxnState::Active,
                started_at,
                ended_at: None,
                ops: Vec::new(),
                staged: HashMap::new(),
                snapshot,
                read_cache: HashMap::new(),
            }),
        }
    }
}

/// A transaction's externally visible metadata. Terminal transactions
/// remain queryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxnStatus {
    pub id: TxnId,
    pub isolation: IsolationLevel,
    pub state: TxnState,
    /// Monotonic stamp taken at begin.
    pub started_at: u64,
    /// Monotonic stamp taken at the terminal transition.
    pub ended_at: Option<u64>,
}
