//! Transaction lifecycle: begin, commit, abort, rollback.
//!
//! Commit is the only place exclusive locks are taken: the written files
//! and the structural targets are locked in sorted identity order, the
//! buffered writes are published as new chain versions, then the buffered
//! structural ops are applied to the tree. Any failure while applying
//! rolls the partial work back (chain pointers revert, structural ops
//! invert in reverse order); a failure during *that* parks the
//! transaction in ROLLBACK_FAILED with both causes preserved.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use txfs_error::{Result, TxfsError};
use txfs_lock::LockError;
use txfs_tree::{path, FileHandle, Node, NodeId};
use txfs_types::{FileId, IsolationLevel, LockMode, TxnId, TxnState, VersionNo};

use crate::store::FileStore;
use crate::txn::{PendingOp, TxnHandle, TxnInner, TxnStatus};

/// Inverse of an applied structural op, recorded as commit progresses.
enum UndoOp {
    RemoveNode(NodeId),
    Reattach { parent: NodeId, node: Node },
    MoveBack {
        node: NodeId,
        old_parent: NodeId,
        old_name: String,
    },
}

impl FileStore {
    // -----------------------------------------------------------------------
    // Public lifecycle surface
    // -----------------------------------------------------------------------

    /// Start a transaction. SNAPSHOT isolation captures the current
    /// version of every file in the tree; files created later are not
    /// visible to it.
    pub fn begin(&self, isolation: IsolationLevel) -> TxnId {
        let handle = Arc::new(self.make_handle(isolation));
        let id = handle.id;
        self.registry.lock().insert(id, handle);
        tracing::info!(txn_id = %id, %isolation, "transaction begun");
        id
    }

    /// Make the transaction's buffered operations visible and release its
    /// locks. On failure the buffer is rolled back and the error reports
    /// why.
    pub fn commit(&self, txn: TxnId) -> Result<()> {
        let handle = self.lookup(txn)?;
        let mut inner = handle.inner.lock();
        Self::ensure_active(&handle, &inner)?;
        let result = self.commit_locked(&handle, &mut inner);
        match &result {
            Ok(()) => tracing::info!(txn_id = %txn, "transaction committed"),
            Err(e) => {
                tracing::warn!(txn_id = %txn, state = %inner.state, error = %e, "commit failed");
            }
        }
        result
    }

    /// Client-initiated rollback of an ACTIVE transaction; terminal state
    /// ABORTED. Safe to call from another thread while the owner is parked
    /// on a lock wait.
    pub fn abort(&self, txn: TxnId) -> Result<()> {
        self.terminate(txn, TxnState::Aborted)
    }

    /// Like [`abort`](Self::abort) with terminal state ROLLED_BACK.
    pub fn rollback(&self, txn: TxnId) -> Result<()> {
        self.terminate(txn, TxnState::RolledBack)
    }

    /// A transaction's metadata; terminal transactions remain queryable.
    pub fn txn_status(&self, txn: TxnId) -> Result<TxnStatus> {
        let handle = self.lookup(txn)?;
        let inner = handle.inner.lock();
        Ok(TxnStatus {
            id: handle.id,
            isolation: inner.isolation,
            state: inner.state,
            started_at: inner.started_at,
            ended_at: inner.ended_at,
        })
    }

    /// All explicitly begun transactions, ordered by id.
    #[must_use]
    pub fn transactions(&self) -> Vec<TxnStatus> {
        let mut statuses: Vec<TxnStatus> = self
            .registry
            .lock()
            .values()
            .map(|handle| {
                let inner = handle.inner.lock();
                TxnStatus {
                    id: handle.id,
                    isolation: inner.isolation,
                    state: inner.state,
                    started_at: inner.started_at,
                    ended_at: inner.ended_at,
                }
            })
            .collect();
        statuses.sort_by_key(|s| s.id);
        statuses
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Run `f` under the named transaction, or wrap it in an implicit
    /// auto-commit transaction.
    pub(crate) fn with_txn<R>(
        &self,
        txn: Option<TxnId>,
        f: impl FnOnce(&TxnHandle, &mut TxnInner) -> Result<R>,
    ) -> Result<R> {
        match txn {
            Some(id) => {
                let handle = self.lookup(id)?;
                let mut inner = handle.inner.lock();
                Self::ensure_active(&handle, &inner)?;
                f(&handle, &mut inner)
            }
            None => {
                let handle = self.make_handle(IsolationLevel::ReadCommitted);
                let mut inner = handle.inner.lock();
                match f(&handle, &mut inner) {
                    Ok(value) => {
                        self.commit_locked(&handle, &mut inner)?;
                        Ok(value)
                    }
                    Err(e) => {
                        self.finalize(&handle, &mut inner, TxnState::RolledBack);
                        Err(e)
                    }
                }
            }
        }
    }

    pub(crate) fn make_handle(&self, isolation: IsolationLevel) -> TxnHandle {
        let raw = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let id = TxnId::new(raw).expect("transaction id counter wrapped");
        let snapshot = (isolation == IsolationLevel::Snapshot)
            .then(|| self.tree.read().snapshot_versions());
        let started_at = self.clock.fetch_add(1, Ordering::SeqCst);
        TxnHandle::new(id, isolation, started_at, snapshot)
    }

    pub(crate) fn lookup(&self, txn: TxnId) -> Result<Arc<TxnHandle>> {
        self.registry
            .lock()
            .get(&txn)
            .cloned()
            .ok_or_else(|| TxfsError::unknown_transaction(txn.to_string()))
    }

    pub(crate) fn ensure_active(handle: &TxnHandle, inner: &TxnInner) -> Result<()> {
        if inner.state == TxnState::Active {
            Ok(())
        } else {
            Err(TxfsError::TransactionNotActive {
                txn: handle.id.to_string(),
                state: inner.state.to_string(),
            })
        }
    }

    fn terminate(&self, txn: TxnId, target: TxnState) -> Result<()> {
        let handle = self.lookup(txn)?;
        // Post the cancellation before taking the transaction mutex: if
        // the owner is parked on a lock wait (it holds the mutex while
        // parked), this unparks it and it finalizes itself.
        handle.cancel_requested.store(true, Ordering::Release);
        self.locks.cancel(txn);

        let mut inner = handle.inner.lock();
        match inner.state {
            TxnState::Active => {
                self.finalize(&handle, &mut inner, target);
                tracing::info!(txn_id = %txn, state = %target, "transaction torn down");
                Ok(())
            }
            // The owner consumed our cancellation mid-operation and
            // already finalized.
            TxnState::Aborted | TxnState::RolledBack => Ok(()),
            state => Err(TxfsError::TransactionNotActive {
                txn: handle.id.to_string(),
                state: state.to_string(),
            }),
        }
    }

    /// Transition to a terminal state: drop the buffer and overlay,
    /// release every lock. Terminal transactions hold no locks.
    pub(crate) fn finalize(&self, handle: &TxnHandle, inner: &mut TxnInner, state: TxnState) {
        inner.state = state;
        inner.ended_at = Some(self.clock.fetch_add(1, Ordering::SeqCst));
        inner.ops.clear();
        inner.staged.clear();
        inner.read_cache.clear();
        self.locks.release_all(handle.id);
        tracing::debug!(txn_id = %handle.id, %state, "transaction finalized");
    }

    /// Commit with the transaction mutex already held.
    pub(crate) fn commit_locked(&self, handle: &TxnHandle, inner: &mut TxnInner) -> Result<()> {
        debug_assert_eq!(inner.state, TxnState::Active);

        // Read-only transactions have nothing to publish.
        if inner.ops.is_empty() {
            self.finalize(handle, inner, TxnState::Committed);
            return Ok(());
        }

        // Lock every written file and structural target in sorted identity
        // order, so concurrent commits cannot order-invert against each
        // other.
        let targets = self.lock_targets(inner);
        for fid in &targets {
            if handle.cancel_requested.load(Ordering::Acquire) {
                self.finalize(handle, inner, TxnState::Aborted);
                return Err(TxfsError::LockCancelled {
                    txn: handle.id.to_string(),
                });
            }
            if let Err(e) = self.locks.acquire(handle.id, *fid, LockMode::Exclusive) {
                let state = match e {
                    LockError::Cancelled => TxnState::Aborted,
                    LockError::Deadlock => TxnState::RolledBack,
                };
                // Nothing has been applied yet: rollback is dropping the
                // buffer, which finalize does.
                self.finalize(handle, inner, state);
                return Err(Self::map_lock_err(handle.id, e));
            }
        }

        let mut reverts: Vec<(Arc<FileHandle>, VersionNo)> = Vec::new();
        let mut undos: Vec<UndoOp> = Vec::new();
        match self.apply_ops(inner, &mut reverts, &mut undos) {
            Ok(()) => {
                self.finalize(handle, inner, TxnState::Committed);
                Ok(())
            }
            Err(original) => match self.undo_applied(reverts, undos) {
                Ok(()) => {
                    let state = if handle.cancel_requested.load(Ordering::Acquire) {
                        TxnState::Aborted
                    } else {
                        TxnState::RolledBack
                    };
                    self.finalize(handle, inner, state);
                    Err(original)
                }
                Err(cause) => {
                    self.finalize(handle, inner, TxnState::RollbackFailed);
                    Err(TxfsError::rollback_failed(cause, original))
                }
            },
        }
    }

    /// Identities to lock exclusively: written files, plus for structural
    /// ops the affected entry and the parent directories involved. Targets
    /// that only exist in this transaction's overlay are skipped — nobody
    /// else can reach them.
    fn lock_targets(&self, inner: &TxnInner) -> BTreeSet<FileId> {
        let tree = self.tree.read();
        let root = tree.root();
        let mut targets = BTreeSet::new();
        for op in &inner.ops {
            match op {
                PendingOp::Write { handle, .. } => {
                    targets.insert(handle.id());
                }
                PendingOp::Touch { path: p, .. } | PendingOp::Mkdir { path: p, .. } => {
                    if let Some((parent, _)) = path::split_parent(p) {
                        if let Ok(nid) = tree.resolve(root, parent) {
                            targets.insert(tree.node(nid).id());
                        }
                    }
                }
                PendingOp::Rm { path: p } => {
                    if let Ok(nid) = tree.resolve(root, p) {
                        targets.insert(tree.node(nid).id());
                        targets.insert(tree.node(tree.node(nid).parent()).id());
                    }
                }
                PendingOp::Mv { src, dst } => {
                    if let Ok(nid) = tree.resolve(root, src) {
                        targets.insert(tree.node(nid).id());
                        targets.insert(tree.node(tree.node(nid).parent()).id());
                    }
                    if let Some((parent, _)) = path::split_parent(dst) {
                        if let Ok(nid) = tree.resolve(root, parent) {
                            targets.insert(tree.node(nid).id());
                        }
                    }
                }
            }
        }
        targets
    }

    /// Commit applies in two steps: every buffered write publishes a chain
    /// version, then every structural op applies to the tree.
    fn apply_ops(
        &self,
        inner: &TxnInner,
        reverts: &mut Vec<(Arc<FileHandle>, VersionNo)>,
        undos: &mut Vec<UndoOp>,
    ) -> Result<()> {
        let mut seen = HashSet::new();
        for op in &inner.ops {
            if let PendingOp::Write { handle, content } = op {
                if seen.insert(handle.id()) {
                    reverts.push((Arc::clone(handle), handle.current()));
                }
                handle.append_version(content)?;
            }
        }

        let mut tree = self.tree.write();
        let root = tree.root();
        for op in &inner.ops {
            match op {
                PendingOp::Write { .. } => {}
                PendingOp::Touch { path: p, handle } => {
                    let (parent, leaf) = tree.resolve_parent(root, p)?;
                    let nid = tree.create_file(parent, leaf, Arc::clone(handle))?;
                    undos.push(UndoOp::RemoveNode(nid));
                }
                PendingOp::Mkdir { path: p, id } => {
                    let (parent, leaf) = tree.resolve_parent(root, p)?;
                    let nid = tree.create_dir(parent, leaf, *id)?;
                    undos.push(UndoOp::RemoveNode(nid));
                }
                PendingOp::Rm { path: p } => {
                    let nid = tree.resolve(root, p)?;
                    let parent = tree.node(nid).parent();
                    let node = tree.remove(nid)?;
                    undos.push(UndoOp::Reattach { parent, node });
                }
                PendingOp::Mv { src, dst } => {
                    let nid = tree.resolve(root, src)?;
                    let old_parent = tree.node(nid).parent();
                    let old_name = tree.node(nid).name().to_owned();
                    let (dparent, leaf) = tree.resolve_parent(root, dst)?;
                    tree.rename(nid, dparent, leaf)?;
                    undos.push(UndoOp::MoveBack {
                        node: nid,
                        old_parent,
                        old_name,
                    });
                }
            }
        }
        Ok(())
    }

    /// Undo partially applied commit work, newest first.
    fn undo_applied(
        &self,
        reverts: Vec<(Arc<FileHandle>, VersionNo)>,
        undos: Vec<UndoOp>,
    ) -> Result<()> {
        {
            let mut tree = self.tree.write();
            for undo in undos.into_iter().rev() {
                match undo {
                    UndoOp::RemoveNode(nid) => {
                        tree.remove(nid)?;
                    }
                    UndoOp::Reattach { parent, node } => {
                        tree.attach(parent, node)?;
                    }
                    UndoOp::MoveBack {
                        node,
                        old_parent,
                        old_name,
                    } => {
                        tree.rename(node, old_parent, old_name)?;
                    }
                }
            }
        }
        for (handle, prior) in reverts.into_iter().rev() {
            handle.revert_to(prior)?;
        }
        Ok(())
    }
}
