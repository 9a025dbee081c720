//! Whole-file lock manager.
//!
//! Grants SHARED (multi-holder) and EXCLUSIVE (single-holder) locks keyed
//! by [`FileId`], scoped to a transaction. Incompatible requests park on a
//! condition variable; waiters are served strictly FIFO, except that
//! compatible SHARED waiters at the head of the queue are granted as a
//! batch and a sole-holder upgrade jumps the queue (it can never conflict
//! with anyone).
//!
//! Before parking, the manager walks the wait-for graph (requester →
//! holders of the requested file → files those holders are parked on →
//! ...); if the walk reaches the requester, the request fails with
//! [`LockError::Deadlock`] instead of blocking. [`LockManager::cancel`]
//! unparks a waiter with [`LockError::Cancelled`], which is how an abort
//! from another thread tears down a parked owner.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;
use txfs_types::{FileId, LockMode, TxnId};

/// Error codes for lock acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockError {
    /// Parking the requester would close a cycle in the wait-for graph.
    Deadlock,
    /// The wait was torn down by [`LockManager::cancel`].
    Cancelled,
}

impl fmt::Display for LockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deadlock => write!(f, "deadlock detected"),
            Self::Cancelled => write!(f, "lock wait cancelled"),
        }
    }
}

impl std::error::Error for LockError {}

struct Waiter {
    txn: TxnId,
    mode: LockMode,
}

struct FileLock {
    /// Mode of the current holder group; meaningless when `holders` is empty.
    mode: LockMode,
    holders: SmallVec<[TxnId; 2]>,
    waiters: VecDeque<Waiter>,
}

impl FileLock {
    fn is_unused(&self) -> bool {
        self.holders.is_empty() && self.waiters.is_empty()
    }
}

#[derive(Default)]
struct LockState {
    files: HashMap<FileId, FileLock>,
    /// Which file each parked transaction is waiting on; the wait-for
    /// graph's edges derive from this plus the holder sets.
    waiting_on: HashMap<TxnId, FileId>,
    /// Pending cancellations, consumed by the next (or current) wait.
    cancelled: HashSet<TxnId>,
}

enum Decision {
    Granted,
    Wait,
}

/// Process-wide lock manager.
///
/// One blocking `acquire` may be in flight per transaction at a time;
/// callers serialize per-transaction access (the transaction manager does
/// this by holding the transaction's own mutex across its operations).
#[derive(Default)]
pub struct LockManager {
    state: Mutex<LockState>,
    wakeups: Condvar,
}

impl LockManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire `mode` on `file` for `txn`, parking until compatible.
    ///
    /// Re-requesting a held mode (or SHARED while holding EXCLUSIVE)
    /// succeeds immediately. Upgrading SHARED to EXCLUSIVE succeeds iff the
    /// requester is the sole SHARED holder; otherwise the requester waits
    /// for its co-holders to release.
    ///
    /// # Errors
    ///
    /// [`LockError::Deadlock`] if parking would close a wait-for cycle;
    /// [`LockError::Cancelled`] if [`cancel`](Self::cancel) tears the wait
    /// down.
    pub fn acquire(&self, txn: TxnId, file: FileId, mode: LockMode) -> Result<(), LockError> {
        let mut state = self.state.lock();

        // A cancellation may have been posted before we got here (abort
        // racing with the owner); consume it rather than letting the
        // request proceed.
        if state.cancelled.remove(&txn) {
            return Err(LockError::Cancelled);
        }

        match Self::immediate_decision(&state, txn, file, mode) {
            Decision::Granted => {
                Self::install(&mut state, txn, file, mode);
                return Ok(());
            }
            Decision::Wait => {}
        }

        if Self::would_deadlock(&state, txn, file) {
            tracing::warn!(txn = %txn, file = %file, %mode, "deadlock detected; failing acquire");
            return Err(LockError::Deadlock);
        }

        state
            .files
            .get_mut(&file)
            .expect("contended file must have a lock entry")
            .waiters
            .push_back(Waiter { txn, mode });
        state.waiting_on.insert(txn, file);
        tracing::debug!(txn = %txn, file = %file, %mode, "parked on lock");

        loop {
            self.wakeups.wait(&mut state);

            if state.cancelled.remove(&txn) {
                Self::remove_waiter(&mut state, txn, file);
                state.waiting_on.remove(&txn);
                drop(state);
                // Our departure may unblock waiters queued behind us.
                self.wakeups.notify_all();
                tracing::debug!(txn = %txn, file = %file, "lock wait cancelled");
                return Err(LockError::Cancelled);
            }
            if Self::turn_arrived(&state, txn, file, mode) {
                Self::remove_waiter(&mut state, txn, file);
                state.waiting_on.remove(&txn);
                Self::install(&mut state, txn, file, mode);
                tracing::debug!(txn = %txn, file = %file, %mode, "lock granted after wait");
                return Ok(());
            }
        }
    }

    /// Release whatever `txn` holds on `file` and wake compatible waiters.
    pub fn release(&self, txn: TxnId, file: FileId) {
        let mut state = self.state.lock();
        if let Some(lock) = state.files.get_mut(&file) {
            lock.holders.retain(|h| *h != txn);
            if lock.is_unused() {
                state.files.remove(&file);
            }
        }
        drop(state);
        self.wakeups.notify_all();
    }

    /// Release every lock held by `txn` and clear any unconsumed
    /// cancellation.
    ///
    /// Called when a transaction reaches a terminal state; the caller must
    /// ensure `txn` is not concurrently parked in [`acquire`](Self::acquire).
    pub fn release_all(&self, txn: TxnId) {
        let mut state = self.state.lock();
        state.files.retain(|_, lock| {
            lock.holders.retain(|h| *h != txn);
            !lock.is_unused()
        });
        state.cancelled.remove(&txn);
        drop(state);
        self.wakeups.notify_all();
    }

    /// Tear down `txn`'s pending or imminent lock wait: the parked (or next
    /// to park) `acquire` returns [`LockError::Cancelled`].
    pub fn cancel(&self, txn: TxnId) {
        let mut state = self.state.lock();
        state.cancelled.insert(txn);
        drop(state);
        self.wakeups.notify_all();
    }

    /// The mode `txn` currently holds on `file`, if any.
    #[must_use]
    pub fn held(&self, txn: TxnId, file: FileId) -> Option<LockMode> {
        let state = self.state.lock();
        let lock = state.files.get(&file)?;
        lock.holders.contains(&txn).then_some(lock.mode)
    }

    /// Number of files with at least one holder.
    #[must_use]
    pub fn lock_count(&self) -> usize {
        let state = self.state.lock();
        state
            .files
            .values()
            .filter(|lock| !lock.holders.is_empty())
            .count()
    }

    /// Number of files on which `txn` holds a lock.
    #[must_use]
    pub fn held_count(&self, txn: TxnId) -> usize {
        let state = self.state.lock();
        state
            .files
            .values()
            .filter(|lock| lock.holders.contains(&txn))
            .count()
    }

    /// Number of transactions parked on `file`.
    #[must_use]
    pub fn waiter_count(&self, file: FileId) -> usize {
        let state = self.state.lock();
        state.files.get(&file).map_or(0, |lock| lock.waiters.len())
    }

    fn immediate_decision(state: &LockState, txn: TxnId, file: FileId, mode: LockMode) -> Decision {
        let Some(lock) = state.files.get(&file) else {
            return Decision::Granted;
        };
        if lock.holders.is_empty() && lock.waiters.is_empty() {
            return Decision::Granted;
        }
        if lock.holders.contains(&txn) {
            // Reentrant: an EXCLUSIVE holder may re-request either mode, a
            // SHARED holder may re-request SHARED.
            if lock.mode == LockMode::Exclusive || mode == LockMode::Shared {
                return Decision::Granted;
            }
            // SHARED -> EXCLUSIVE upgrade: immediate iff sole holder.
            if lock.holders.len() == 1 {
                return Decision::Granted;
            }
            return Decision::Wait;
        }
        // Fresh requester: grant only if compatible with the holder group
        // and nobody is already queued (no barging past FIFO waiters).
        if lock.waiters.is_empty()
            && !lock.holders.is_empty()
            && lock.mode.compatible_with(mode)
        {
            return Decision::Granted;
        }
        Decision::Wait
    }

    /// Record a granted lock. Must only be called when the grant is legal.
    fn install(state: &mut LockState, txn: TxnId, file: FileId, mode: LockMode) {
        let lock = state.files.entry(file).or_insert_with(|| FileLock {
            mode,
            holders: SmallVec::new(),
            waiters: VecDeque::new(),
        });
        if lock.holders.contains(&txn) {
            if mode == LockMode::Exclusive {
                // Sole-holder upgrade.
                debug_assert_eq!(lock.holders.len(), 1);
                lock.mode = LockMode::Exclusive;
            }
            return;
        }
        if lock.holders.is_empty() {
            lock.mode = mode;
        }
        lock.holders.push(txn);
    }

    /// FIFO grant rule evaluated by a parked waiter after a wakeup.
    fn turn_arrived(state: &LockState, txn: TxnId, file: FileId, mode: LockMode) -> bool {
        let Some(lock) = state.files.get(&file) else {
            return true;
        };
        let Some(pos) = lock.waiters.iter().position(|w| w.txn == txn) else {
            return true;
        };
        match mode {
            LockMode::Shared => {
                let holders_compatible =
                    lock.holders.is_empty() || lock.mode == LockMode::Shared;
                holders_compatible
                    && lock
                        .waiters
                        .iter()
                        .take(pos)
                        .all(|w| w.mode == LockMode::Shared)
            }
            LockMode::Exclusive => {
                // A parked upgrader becomes grantable the moment its
                // co-holders are gone, regardless of queue position: it
                // already holds the file, so nobody ahead of it can run.
                let sole_upgrade = lock.holders.len() == 1
                    && lock.holders[0] == txn
                    && lock.mode == LockMode::Shared;
                sole_upgrade || (pos == 0 && lock.holders.is_empty())
            }
        }
    }

    fn remove_waiter(state: &mut LockState, txn: TxnId, file: FileId) {
        if let Some(lock) = state.files.get_mut(&file) {
            lock.waiters.retain(|w| w.txn != txn);
            if lock.is_unused() {
                state.files.remove(&file);
            }
        }
    }

    /// Would parking `txn` on `file` close a cycle in the wait-for graph?
    ///
    /// Edge `T -> U` means T is parked on a file U holds. We start from
    /// the holders of the requested file and search for `txn`.
    fn would_deadlock(state: &LockState, txn: TxnId, file: FileId) -> bool {
        let Some(lock) = state.files.get(&file) else {
            return false;
        };
        let mut stack: Vec<TxnId> = lock
            .holders
            .iter()
            .copied()
            .filter(|h| *h != txn)
            .collect();
        let mut seen: HashSet<TxnId> = HashSet::new();
        while let Some(t) = stack.pop() {
            if t == txn {
                return true;
            }
            if !seen.insert(t) {
                continue;
            }
            if let Some(waited) = state.waiting_on.get(&t) {
                if let Some(waited_lock) = state.files.get(waited) {
                    stack.extend(waited_lock.holders.iter().copied().filter(|h| *h != t));
                }
            }
        }
        false
    }
}

impl fmt::Debug for LockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("LockManager")
            .field("locked_files", &state.files.len())
            .field("parked", &state.waiting_on.len())
            .finish_non_exhaustive()
    }
}
