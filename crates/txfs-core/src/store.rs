//! The [`FileStore`] facade: path operations routed through transactions.
//!
//! Every operation takes an optional transaction id; without one it runs
//! as an implicit auto-commit transaction. Reads take transient SHARED
//! locks (except READ_UNCOMMITTED, which skips them); writes and
//! structural changes buffer in the transaction and take EXCLUSIVE locks
//! at commit. A transaction observes its own staged structure through a
//! path overlay that shadows the base tree.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use txfs_error::{Result, TxfsError};
use txfs_lock::{LockError, LockManager};
use txfs_tree::{path, FileHandle, NodeId, Tree};
use txfs_types::{FileId, IsolationLevel, LockMode, TxnId};

use crate::txn::{PendingOp, Staged, TxnHandle, TxnInner};

/// What a path resolves to under a transaction's overlay.
pub(crate) enum Resolved {
    /// A node in the base tree, not shadowed by the overlay.
    BaseNode(NodeId),
    /// A file created by this transaction, not yet linked into the tree.
    StagedFile(Arc<FileHandle>),
    /// A directory created by this transaction.
    StagedDir(FileId),
}

/// A directory reference usable as a parent for creates.
enum DirRef {
    Base(FileId),
    Staged,
}

/// The process-wide file store: one tree, one lock manager, one
/// transaction registry. Instantiate one per test to keep tests hermetic.
pub struct FileStore {
    pub(crate) tree: RwLock<Tree>,
    pub(crate) locks: LockManager,
    pub(crate) registry: Mutex<std::collections::HashMap<TxnId, Arc<TxnHandle>>>,
    pub(crate) next_txn_id: AtomicU64,
    pub(crate) next_file_id: AtomicU64,
    /// Monotonic stamp source for begin/end times.
    pub(crate) clock: AtomicU64,
    /// Store-global working directory, validated against the arena on use
    /// (the directory may have been removed by a committed transaction).
    pub(crate) cwd: Mutex<(NodeId, FileId)>,
}

impl FileStore {
    #[must_use]
    pub fn new() -> Self {
        let tree = Tree::new();
        let root = tree.root();
        Self {
            tree: RwLock::new(tree),
            locks: LockManager::new(),
            registry: Mutex::new(std::collections::HashMap::new()),
            next_txn_id: AtomicU64::new(1),
            next_file_id: AtomicU64::new(FileId::ROOT.get() + 1),
            clock: AtomicU64::new(1),
            cwd: Mutex::new((root, FileId::ROOT)),
        }
    }

    /// The lock manager, exposed for introspection and direct lock-level
    /// scenarios.
    #[must_use]
    pub fn lock_manager(&self) -> &LockManager {
        &self.locks
    }

    // -----------------------------------------------------------------------
    // File operations
    // -----------------------------------------------------------------------

    /// Create an empty file at `path`.
    pub fn touch(&self, path: &str, txn: Option<TxnId>) -> Result<()> {
        self.with_txn(txn, |_, inner| self.touch_in(inner, path))
    }

    /// Create a directory at `path`.
    pub fn mkdir(&self, path: &str, txn: Option<TxnId>) -> Result<()> {
        self.with_txn(txn, |_, inner| self.mkdir_in(inner, path))
    }

    /// Mark the file at `path` open; required before reads and writes.
    pub fn open(&self, path: &str, txn: Option<TxnId>) -> Result<()> {
        self.with_txn(txn, |_, inner| {
            let handle = {
                let tree = self.tree.read();
                let abs = self.absolutize(&tree, path);
                Self::resolve_file_overlay(&tree, inner, &abs)?.0
            };
            handle.mark_open();
            Ok(())
        })
    }

    /// Drop the transaction's cached view of the file. The open flag stays
    /// set; reopening is cheap.
    pub fn close(&self, path: &str, txn: Option<TxnId>) -> Result<()> {
        self.with_txn(txn, |_, inner| {
            let handle = {
                let tree = self.tree.read();
                let abs = self.absolutize(&tree, path);
                Self::resolve_file_overlay(&tree, inner, &abs)?.0
            };
            inner.read_cache.remove(&handle.id());
            Ok(())
        })
    }

    /// Read the file's content as selected by the transaction's isolation
    /// level; the transaction's own buffered writes always win.
    pub fn read(&self, path: &str, txn: Option<TxnId>) -> Result<String> {
        self.with_txn(txn, |handle, inner| self.read_in(handle, inner, path))
    }

    /// Buffer a new version of the file's content.
    pub fn write(&self, path: &str, content: &str, txn: Option<TxnId>) -> Result<()> {
        self.with_txn(txn, |handle, inner| {
            let (file, abs) = {
                let tree = self.tree.read();
                let abs = self.absolutize(&tree, path);
                (Self::resolve_file_overlay(&tree, inner, &abs)?.0, abs)
            };
            if !file.is_open() {
                return Err(TxfsError::not_open(abs));
            }
            inner.ops.push(PendingOp::Write {
                handle: file,
                content: content.to_owned(),
            });
            tracing::debug!(txn_id = %handle.id, path = %abs, "write buffered");
            Ok(())
        })
    }

    /// Remove a file or an empty directory.
    pub fn rm(&self, path: &str, txn: Option<TxnId>) -> Result<()> {
        self.with_txn(txn, |_, inner| self.rm_in(inner, path))
    }

    /// Move `src` to `dst`: into `dst` if it is an existing directory,
    /// renaming to `dst` otherwise.
    pub fn mv(&self, src: &str, dst: &str, txn: Option<TxnId>) -> Result<()> {
        self.with_txn(txn, |_, inner| self.mv_in(inner, src, dst))
    }

    /// Sorted names in the directory at `path`.
    pub fn ls(&self, path: &str, txn: Option<TxnId>) -> Result<Vec<String>> {
        self.with_txn(txn, |handle, inner| self.ls_in(handle, inner, path))
    }

    /// Change the working directory. The working directory is store-global;
    /// a directory that exists only in a transaction's overlay cannot
    /// become it.
    pub fn cd(&self, path: &str, txn: Option<TxnId>) -> Result<()> {
        self.with_txn(txn, |handle, _| {
            let (abs, fid) = {
                let tree = self.tree.read();
                let abs = self.absolutize(&tree, path);
                let dir = tree.resolve_dir(tree.root(), &abs)?;
                (abs, tree.node(dir).id())
            };
            self.with_shared(handle.id, fid, || {
                let tree = self.tree.read();
                // Re-resolve: the directory may have been removed while we
                // waited for the lock.
                let dir = tree.resolve_dir(tree.root(), &abs)?;
                *self.cwd.lock() = (dir, tree.node(dir).id());
                Ok(())
            })
        })
    }

    /// Absolute path of the working directory.
    #[must_use]
    pub fn pwd(&self) -> String {
        let tree = self.tree.read();
        let cwd = self.cwd_node(&tree);
        tree.full_path(cwd)
    }

    /// Full paths of every entry named `name`, depth-first from the root.
    #[must_use]
    pub fn find(&self, name: &str) -> Vec<String> {
        self.tree.read().find(name)
    }

    /// Stable identity of the entry at `path` in the committed tree (the
    /// lock key and snapshot key).
    pub fn file_id(&self, path: &str) -> Result<FileId> {
        let tree = self.tree.read();
        let abs = self.absolutize(&tree, path);
        let nid = tree.resolve(tree.root(), &abs)?;
        Ok(tree.node(nid).id())
    }

    // -----------------------------------------------------------------------
    // Operation bodies (run with the transaction's inner state locked)
    // -----------------------------------------------------------------------

    fn read_in(&self, handle: &TxnHandle, inner: &mut TxnInner, path: &str) -> Result<String> {
        let (file, staged, abs) = {
            let tree = self.tree.read();
            let abs = self.absolutize(&tree, path);
            let (file, staged) = Self::resolve_file_overlay(&tree, inner, &abs)?;
            (file, staged, abs)
        };
        if !file.is_open() {
            return Err(TxfsError::not_open(abs));
        }

        // The transaction's own buffered writes always override the
        // isolation-selected base version.
        for op in inner.ops.iter().rev() {
            if let PendingOp::Write { handle: h, content } = op {
                if Arc::ptr_eq(h, &file) {
                    return Ok(content.clone());
                }
            }
        }
        if staged {
            // Created by this transaction and never written: empty baseline.
            return Ok(String::new());
        }

        match inner.isolation {
            // Degenerate: nothing uncommitted is ever visible, so this is
            // READ_COMMITTED minus the shared lock.
            IsolationLevel::ReadUncommitted => file.read_current(),
            IsolationLevel::ReadCommitted => {
                self.with_shared(handle.id, file.id(), || file.read_current())
            }
            IsolationLevel::Snapshot => {
                if let Some(content) = inner.read_cache.get(&file.id()) {
                    return Ok(content.clone());
                }
                let snapshot = inner
                    .snapshot
                    .as_ref()
                    .expect("SNAPSHOT transactions capture a snapshot at begin");
                let content = self.with_shared(handle.id, file.id(), || {
                    match snapshot.get(&file.id()) {
                        // Created after this transaction began: not visible.
                        None => Err(TxfsError::no_such_file(&abs)),
                        Some(v) => file.read_version(*v),
                    }
                })?;
                inner.read_cache.insert(file.id(), content.clone());
                Ok(content)
            }
        }
    }

    fn touch_in(&self, inner: &mut TxnInner, path: &str) -> Result<()> {
        let abs = {
            let tree = self.tree.read();
            let abs = self.absolutize(&tree, path);
            Self::check_creatable(&tree, inner, &abs)?;
            abs
        };
        let handle = Arc::new(FileHandle::new(self.alloc_file_id()));
        inner
            .staged
            .insert(abs.clone(), Staged::CreatedFile(Arc::clone(&handle)));
        inner.ops.push(PendingOp::Touch { path: abs, handle });
        Ok(())
    }

    fn mkdir_in(&self, inner: &mut TxnInner, path: &str) -> Result<()> {
        let abs = {
            let tree = self.tree.read();
            let abs = self.absolutize(&tree, path);
            Self::check_creatable(&tree, inner, &abs)?;
            abs
        };
        let id = self.alloc_file_id();
        inner.staged.insert(abs.clone(), Staged::CreatedDir(id));
        inner.ops.push(PendingOp::Mkdir { path: abs, id });
        Ok(())
    }

    fn rm_in(&self, inner: &mut TxnInner, path: &str) -> Result<()> {
        let abs = {
            let tree = self.tree.read();
            let abs = self.absolutize(&tree, path);
            if abs == "/" {
                return Err(TxfsError::invalid_name("/"));
            }
            let is_dir = match Self::resolve_overlay(&tree, inner, &abs)? {
                Resolved::StagedFile(_) => false,
                Resolved::StagedDir(_) => true,
                Resolved::BaseNode(nid) => tree.node(nid).is_directory(),
            };
            if is_dir && !Self::list_overlay(&tree, inner, &abs)?.is_empty() {
                return Err(TxfsError::not_empty(abs));
            }
            abs
        };
        inner.staged.insert(abs.clone(), Staged::Removed);
        inner.ops.push(PendingOp::Rm { path: abs });
        Ok(())
    }

    fn mv_in(&self, inner: &mut TxnInner, src: &str, dst: &str) -> Result<()> {
        let (src_abs, final_abs) = {
            let tree = self.tree.read();
            let src_abs = self.absolutize(&tree, src);
            if src_abs == "/" {
                return Err(TxfsError::invalid_name("/"));
            }
            let src_is_dir = match Self::resolve_overlay(&tree, inner, &src_abs)? {
                Resolved::BaseNode(nid) => tree.node(nid).is_directory(),
                Resolved::StagedDir(_) => true,
                Resolved::StagedFile(_) => false,
            };

            let dst_abs = self.absolutize(&tree, dst);
            let final_abs = match Self::resolve_overlay(&tree, inner, &dst_abs) {
                // Existing directory: move inside under the current name.
                Ok(Resolved::BaseNode(nid)) if tree.node(nid).is_directory() => {
                    let (_, leaf) = path::split_parent(&src_abs)
                        .expect("src is not the root");
                    path::join(&dst_abs, leaf)
                }
                Ok(Resolved::StagedDir(_)) => {
                    let (_, leaf) = path::split_parent(&src_abs)
                        .expect("src is not the root");
                    path::join(&dst_abs, leaf)
                }
                Ok(_) => return Err(TxfsError::already_exists(dst_abs)),
                // Missing: rename to dst; its parent must be a directory.
                Err(TxfsError::NoSuchFile { .. } | TxfsError::NoSuchDirectory { .. }) => {
                    let Some((parent, leaf)) = path::split_parent(&dst_abs) else {
                        return Err(TxfsError::invalid_name("/"));
                    };
                    path::validate_name(leaf)?;
                    Self::resolve_dir_overlay(&tree, inner, parent)?;
                    dst_abs.clone()
                }
                Err(e) => return Err(e),
            };

            if final_abs == src_abs
                || Self::resolve_overlay(&tree, inner, &final_abs).is_ok()
            {
                return Err(TxfsError::already_exists(final_abs));
            }
            if src_is_dir && final_abs.starts_with(&format!("{src_abs}/")) {
                return Err(TxfsError::MoveIntoDescendant {
                    src: src_abs,
                    dst: final_abs,
                });
            }
            (src_abs, final_abs)
        };

        // Update the overlay so this transaction sees the entry at its new
        // location (including, for directories, everything underneath it).
        match inner.staged.remove(&src_abs) {
            Some(Staged::CreatedFile(h)) => {
                inner.staged.insert(final_abs.clone(), Staged::CreatedFile(h));
            }
            Some(Staged::CreatedDir(id)) => {
                inner.staged.insert(final_abs.clone(), Staged::CreatedDir(id));
                Self::rekey_staged_prefix(inner, &src_abs, &final_abs);
            }
            Some(Staged::MovedIn { from }) => {
                inner
                    .staged
                    .insert(final_abs.clone(), Staged::MovedIn { from });
                Self::rekey_staged_prefix(inner, &src_abs, &final_abs);
            }
            Some(Staged::Removed) => unreachable!("removed paths do not resolve"),
            None => {
                // Staged entries under the old path (e.g. a buffered child
                // removal) follow the directory to its new home.
                Self::rekey_staged_prefix(inner, &src_abs, &final_abs);
                inner.staged.insert(src_abs.clone(), Staged::Removed);
                inner.staged.insert(
                    final_abs.clone(),
                    Staged::MovedIn {
                        from: src_abs.clone(),
                    },
                );
            }
        }
        inner.ops.push(PendingOp::Mv {
            src: src_abs,
            dst: final_abs,
        });
        Ok(())
    }

    fn ls_in(&self, handle: &TxnHandle, inner: &mut TxnInner, path: &str) -> Result<Vec<String>> {
        let (abs, lock_target) = {
            let tree = self.tree.read();
            let abs = self.absolutize(&tree, path);
            let target = match Self::resolve_dir_overlay(&tree, inner, &abs)? {
                DirRef::Base(fid) => Some(fid),
                DirRef::Staged => None,
            };
            (abs, target)
        };
        match lock_target {
            // Transaction-private directory: nothing to lock.
            None => {
                let tree = self.tree.read();
                Self::list_overlay(&tree, inner, &abs)
            }
            Some(fid) => self.with_shared(handle.id, fid, || {
                let tree = self.tree.read();
                // Re-resolve under the lock.
                Self::resolve_dir_overlay(&tree, inner, &abs)?;
                Self::list_overlay(&tree, inner, &abs)
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Overlay resolution
    // -----------------------------------------------------------------------

    /// Resolve an absolute normalized path through the transaction's
    /// staged-structure overlay, falling back to the base tree.
    pub(crate) fn resolve_overlay(
        tree: &Tree,
        inner: &TxnInner,
        abs: &str,
    ) -> Result<Resolved> {
        if inner.staged.is_empty() {
            return tree.resolve(tree.root(), abs).map(Resolved::BaseNode);
        }
        if let Some(staged) = inner.staged.get(abs) {
            return match staged {
                Staged::CreatedFile(h) => Ok(Resolved::StagedFile(Arc::clone(h))),
                Staged::CreatedDir(id) => Ok(Resolved::StagedDir(*id)),
                Staged::Removed => Err(TxfsError::no_such_file(abs)),
                Staged::MovedIn { from } => {
                    tree.resolve(tree.root(), from).map(Resolved::BaseNode)
                }
            };
        }
        // Longest staged ancestor shadowing this path.
        let mut best: Option<(&String, &Staged)> = None;
        for (p, staged) in &inner.staged {
            let is_ancestor =
                abs.starts_with(p.as_str()) && abs.as_bytes().get(p.len()) == Some(&b'/');
            if is_ancestor && best.is_none_or(|(bp, _)| p.len() > bp.len()) {
                best = Some((p, staged));
            }
        }
        if let Some((prefix, staged)) = best {
            return match staged {
                // A moved directory carries its subtree: rewrite the prefix
                // and resolve at the original location.
                Staged::MovedIn { from } => {
                    let rewritten = format!("{from}{}", &abs[prefix.len()..]);
                    tree.resolve(tree.root(), &rewritten).map(Resolved::BaseNode)
                }
                Staged::Removed | Staged::CreatedDir(_) => Err(TxfsError::no_such_file(abs)),
                Staged::CreatedFile(_) => Err(TxfsError::not_a_directory(abs)),
            };
        }
        tree.resolve(tree.root(), abs).map(Resolved::BaseNode)
    }

    /// Resolve to a file handle; the flag reports whether the file exists
    /// only in this transaction's overlay.
    fn resolve_file_overlay(
        tree: &Tree,
        inner: &TxnInner,
        abs: &str,
    ) -> Result<(Arc<FileHandle>, bool)> {
        match Self::resolve_overlay(tree, inner, abs)? {
            Resolved::StagedFile(h) => Ok((h, true)),
            Resolved::StagedDir(_) => Err(TxfsError::not_a_file(abs)),
            Resolved::BaseNode(nid) => {
                let node = tree.node(nid);
                node.handle()
                    .map(|h| (Arc::clone(h), false))
                    .ok_or_else(|| TxfsError::not_a_file(abs))
            }
        }
    }

    fn resolve_dir_overlay(tree: &Tree, inner: &TxnInner, abs: &str) -> Result<DirRef> {
        match Self::resolve_overlay(tree, inner, abs) {
            Ok(Resolved::BaseNode(nid)) => {
                let node = tree.node(nid);
                if node.is_directory() {
                    Ok(DirRef::Base(node.id()))
                } else {
                    Err(TxfsError::not_a_directory(abs))
                }
            }
            Ok(Resolved::StagedDir(_)) => Ok(DirRef::Staged),
            Ok(Resolved::StagedFile(_)) => Err(TxfsError::not_a_directory(abs)),
            Err(TxfsError::NoSuchFile { path }) => Err(TxfsError::NoSuchDirectory { path }),
            Err(e) => Err(e),
        }
    }

    /// Overlay-aware directory listing, sorted.
    fn list_overlay(tree: &Tree, inner: &TxnInner, abs: &str) -> Result<Vec<String>> {
        let mut names: BTreeSet<String> = match Self::resolve_overlay(tree, inner, abs)? {
            Resolved::BaseNode(nid) => {
                if !tree.node(nid).is_directory() {
                    return Err(TxfsError::not_a_directory(abs));
                }
                tree.list(nid)?.into_iter().collect()
            }
            Resolved::StagedDir(_) => BTreeSet::new(),
            Resolved::StagedFile(_) => return Err(TxfsError::not_a_directory(abs)),
        };
        for (p, staged) in &inner.staged {
            if let Some((parent, leaf)) = path::split_parent(p) {
                if parent == abs {
                    match staged {
                        Staged::Removed => {
                            names.remove(leaf);
                        }
                        Staged::CreatedFile(_)
                        | Staged::CreatedDir(_)
                        | Staged::MovedIn { .. } => {
                            names.insert(leaf.to_owned());
                        }
                    }
                }
            }
        }
        Ok(names.into_iter().collect())
    }

    /// Shared precondition for `touch` and `mkdir`: parent exists and is a
    /// directory, target name is valid and free.
    fn check_creatable(tree: &Tree, inner: &TxnInner, abs: &str) -> Result<()> {
        let Some((parent, leaf)) = path::split_parent(abs) else {
            return Err(TxfsError::invalid_name("/"));
        };
        path::validate_name(leaf)?;
        Self::resolve_dir_overlay(tree, inner, parent)?;
        match Self::resolve_overlay(tree, inner, abs) {
            Ok(_) => Err(TxfsError::already_exists(abs)),
            Err(TxfsError::NoSuchFile { .. } | TxfsError::NoSuchDirectory { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Re-key staged entries under a moved directory's old path.
    fn rekey_staged_prefix(inner: &mut TxnInner, old_prefix: &str, new_prefix: &str) {
        let old = format!("{old_prefix}/");
        let moved: Vec<String> = inner
            .staged
            .keys()
            .filter(|k| k.starts_with(&old))
            .cloned()
            .collect();
        for key in moved {
            if let Some(staged) = inner.staged.remove(&key) {
                let new_key = format!("{new_prefix}/{}", &key[old.len()..]);
                inner.staged.insert(new_key, staged);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Small shared helpers
    // -----------------------------------------------------------------------

    /// Resolve `path` against the working directory into an absolute
    /// normalized path.
    pub(crate) fn absolutize(&self, tree: &Tree, path_str: &str) -> String {
        let cwd = self.cwd_node(tree);
        path::normalize(&tree.full_path(cwd), path_str)
    }

    /// The working directory, falling back to the root if it has been
    /// removed out from under us.
    pub(crate) fn cwd_node(&self, tree: &Tree) -> NodeId {
        let (nid, fid) = *self.cwd.lock();
        match tree.node_opt(nid) {
            Some(node) if node.id() == fid => nid,
            _ => tree.root(),
        }
    }

    /// Run `f` under a transient SHARED lock on `fid`.
    pub(crate) fn with_shared<R>(
        &self,
        txn: TxnId,
        fid: FileId,
        f: impl FnOnce() -> Result<R>,
    ) -> Result<R> {
        self.locks
            .acquire(txn, fid, LockMode::Shared)
            .map_err(|e| Self::map_lock_err(txn, e))?;
        let result = f();
        self.locks.release(txn, fid);
        result
    }

    pub(crate) fn map_lock_err(txn: TxnId, e: LockError) -> TxfsError {
        match e {
            LockError::Deadlock => TxfsError::Deadlock {
                txn: txn.to_string(),
            },
            LockError::Cancelled => TxfsError::LockCancelled {
                txn: txn.to_string(),
            },
        }
    }

    pub(crate) fn alloc_file_id(&self) -> FileId {
        FileId::new(self.next_file_id.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for FileStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("transactions", &self.registry.lock().len())
            .field("locks", &self.locks)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use txfs_types::TxnState;

    fn store() -> FileStore {
        FileStore::new()
    }

    #[test]
    fn auto_commit_structure_ops() {
        let fs = store();
        fs.mkdir("/docs", None).unwrap();
        fs.touch("/docs/a.txt", None).unwrap();
        assert_eq!(fs.ls("/", None).unwrap(), vec!["docs".to_owned()]);
        assert_eq!(fs.ls("/docs", None).unwrap(), vec!["a.txt".to_owned()]);
    }

    #[test]
    fn touch_requires_existing_parent() {
        let fs = store();
        assert!(matches!(
            fs.touch("/no/file", None).unwrap_err(),
            TxfsError::NoSuchDirectory { .. }
        ));
        fs.touch("/a", None).unwrap();
        assert!(matches!(
            fs.touch("/a/b", None).unwrap_err(),
            TxfsError::NotADirectory { .. }
        ));
    }

    #[test]
    fn duplicate_names_rejected() {
        let fs = store();
        fs.touch("/a", None).unwrap();
        assert!(matches!(
            fs.touch("/a", None).unwrap_err(),
            TxfsError::AlreadyExists { .. }
        ));
        assert!(matches!(
            fs.mkdir("/a", None).unwrap_err(),
            TxfsError::AlreadyExists { .. }
        ));
    }

    #[test]
    fn read_write_require_open() {
        let fs = store();
        fs.touch("/f", None).unwrap();
        assert!(matches!(
            fs.read("/f", None).unwrap_err(),
            TxfsError::NotOpen { .. }
        ));
        assert!(matches!(
            fs.write("/f", "x", None).unwrap_err(),
            TxfsError::NotOpen { .. }
        ));

        fs.open("/f", None).unwrap();
        assert_eq!(fs.read("/f", None).unwrap(), "");
        fs.write("/f", "hello", None).unwrap();
        assert_eq!(fs.read("/f", None).unwrap(), "hello");
    }

    #[test]
    fn read_of_directory_is_not_a_file() {
        let fs = store();
        fs.mkdir("/d", None).unwrap();
        assert!(matches!(
            fs.read("/d", None).unwrap_err(),
            TxfsError::NotAFile { .. }
        ));
    }

    #[test]
    fn rm_semantics() {
        let fs = store();
        fs.mkdir("/d", None).unwrap();
        fs.touch("/d/f", None).unwrap();
        assert!(matches!(
            fs.rm("/d", None).unwrap_err(),
            TxfsError::NotEmpty { .. }
        ));
        fs.rm("/d/f", None).unwrap();
        fs.rm("/d", None).unwrap();
        assert!(fs.ls("/", None).unwrap().is_empty());
        assert!(matches!(
            fs.rm("/gone", None).unwrap_err(),
            TxfsError::NoSuchFile { .. }
        ));
        assert!(matches!(
            fs.rm("/", None).unwrap_err(),
            TxfsError::InvalidName { .. }
        ));
    }

    #[test]
    fn mv_renames_or_moves_into_directory() {
        let fs = store();
        fs.mkdir("/dir", None).unwrap();
        fs.touch("/a", None).unwrap();

        // Rename.
        fs.mv("/a", "/b", None).unwrap();
        assert_eq!(fs.ls("/", None).unwrap(), vec!["b".to_owned(), "dir".to_owned()]);

        // Into an existing directory, keeping the name.
        fs.mv("/b", "/dir", None).unwrap();
        assert_eq!(fs.ls("/dir", None).unwrap(), vec!["b".to_owned()]);

        // Content rides along.
        fs.open("/dir/b", None).unwrap();
        fs.write("/dir/b", "payload", None).unwrap();
        fs.mv("/dir/b", "/c", None).unwrap();
        assert_eq!(fs.read("/c", None).unwrap(), "payload");
    }

    #[test]
    fn mv_refuses_descendant_and_duplicates() {
        let fs = store();
        fs.mkdir("/outer", None).unwrap();
        fs.mkdir("/outer/inner", None).unwrap();
        assert!(matches!(
            fs.mv("/outer", "/outer/inner", None).unwrap_err(),
            TxfsError::MoveIntoDescendant { .. }
        ));

        fs.touch("/x", None).unwrap();
        fs.touch("/y", None).unwrap();
        assert!(matches!(
            fs.mv("/x", "/y", None).unwrap_err(),
            TxfsError::AlreadyExists { .. }
        ));
    }

    #[test]
    fn cd_and_pwd() {
        let fs = store();
        assert_eq!(fs.pwd(), "/");
        fs.mkdir("/a", None).unwrap();
        fs.mkdir("/a/b", None).unwrap();
        fs.cd("a", None).unwrap();
        assert_eq!(fs.pwd(), "/a");
        fs.cd("b", None).unwrap();
        assert_eq!(fs.pwd(), "/a/b");
        fs.cd("../..", None).unwrap();
        assert_eq!(fs.pwd(), "/");
        assert!(matches!(
            fs.cd("/missing", None).unwrap_err(),
            TxfsError::NoSuchDirectory { .. }
        ));

        // Relative operations resolve against the working directory.
        fs.cd("/a", None).unwrap();
        fs.touch("rel.txt", None).unwrap();
        assert!(fs.find("rel.txt").contains(&"/a/rel.txt".to_owned()));
    }

    #[test]
    fn removed_cwd_falls_back_to_root() {
        let fs = store();
        fs.mkdir("/tmp", None).unwrap();
        fs.cd("/tmp", None).unwrap();
        fs.rm("/tmp", None).unwrap();
        assert_eq!(fs.pwd(), "/");
    }

    #[test]
    fn staged_structure_is_private_until_commit() {
        let fs = store();
        let txn = fs.begin(IsolationLevel::ReadCommitted);
        fs.mkdir("/work", Some(txn)).unwrap();
        fs.touch("/work/f", Some(txn)).unwrap();

        // Visible inside the transaction.
        assert_eq!(fs.ls("/", Some(txn)).unwrap(), vec!["work".to_owned()]);
        assert_eq!(fs.ls("/work", Some(txn)).unwrap(), vec!["f".to_owned()]);
        // Invisible outside.
        assert!(fs.ls("/", None).unwrap().is_empty());
        assert!(matches!(
            fs.read("/work/f", None).unwrap_err(),
            TxfsError::NoSuchFile { .. }
        ));

        // A staged file reads as the empty baseline once opened.
        fs.open("/work/f", Some(txn)).unwrap();
        assert_eq!(fs.read("/work/f", Some(txn)).unwrap(), "");
        fs.write("/work/f", "draft", Some(txn)).unwrap();
        assert_eq!(fs.read("/work/f", Some(txn)).unwrap(), "draft");

        fs.commit(txn).unwrap();
        assert_eq!(fs.ls("/work", None).unwrap(), vec!["f".to_owned()]);
        assert_eq!(fs.read("/work/f", None).unwrap(), "draft");
    }

    #[test]
    fn staged_removal_shadows_base_entry() {
        let fs = store();
        fs.touch("/f", None).unwrap();
        let txn = fs.begin(IsolationLevel::ReadCommitted);
        fs.rm("/f", Some(txn)).unwrap();

        assert!(fs.ls("/", Some(txn)).unwrap().is_empty());
        assert!(matches!(
            fs.rm("/f", Some(txn)).unwrap_err(),
            TxfsError::NoSuchFile { .. }
        ));
        // Still present outside the transaction.
        assert_eq!(fs.ls("/", None).unwrap(), vec!["f".to_owned()]);

        fs.commit(txn).unwrap();
        assert!(fs.ls("/", None).unwrap().is_empty());
    }

    #[test]
    fn staged_move_rewrites_subtree_paths() {
        let fs = store();
        fs.mkdir("/src", None).unwrap();
        fs.touch("/src/deep", None).unwrap();
        fs.open("/src/deep", None).unwrap();
        fs.write("/src/deep", "content", None).unwrap();
        fs.mkdir("/dst", None).unwrap();

        let txn = fs.begin(IsolationLevel::ReadCommitted);
        fs.mv("/src", "/dst", Some(txn)).unwrap();

        // The subtree is visible at its destination inside the txn...
        assert_eq!(fs.read("/dst/src/deep", Some(txn)).unwrap(), "content");
        assert!(matches!(
            fs.read("/src/deep", Some(txn)).unwrap_err(),
            TxfsError::NoSuchFile { .. }
        ));
        // ...and untouched outside.
        assert_eq!(fs.read("/src/deep", None).unwrap(), "content");

        fs.commit(txn).unwrap();
        assert_eq!(fs.read("/dst/src/deep", None).unwrap(), "content");
        assert!(fs.read("/src/deep", None).is_err());
    }

    #[test]
    fn unknown_and_terminal_transactions_are_rejected() {
        let fs = store();
        let bogus = TxnId::new(999).unwrap();
        assert!(matches!(
            fs.read("/f", Some(bogus)).unwrap_err(),
            TxfsError::UnknownTransaction { .. }
        ));

        fs.touch("/f", None).unwrap();
        let txn = fs.begin(IsolationLevel::ReadCommitted);
        fs.commit(txn).unwrap();
        assert!(matches!(
            fs.write("/f", "x", Some(txn)).unwrap_err(),
            TxfsError::TransactionNotActive { .. }
        ));
        assert!(matches!(
            fs.commit(txn).unwrap_err(),
            TxfsError::TransactionNotActive { .. }
        ));
        assert_eq!(fs.txn_status(txn).unwrap().state, TxnState::Committed);
    }

    #[test]
    fn transactions_listing_is_ordered() {
        let fs = store();
        let a = fs.begin(IsolationLevel::ReadCommitted);
        let b = fs.begin(IsolationLevel::Snapshot);
        fs.commit(a).unwrap();

        let statuses = fs.transactions();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].id, a);
        assert_eq!(statuses[0].state, TxnState::Committed);
        assert_eq!(statuses[1].id, b);
        assert_eq!(statuses[1].state, TxnState::Active);
        assert!(statuses[0].started_at < statuses[1].started_at);
    }

    #[test]
    fn file_id_is_stable_across_moves() {
        let fs = store();
        fs.touch("/a", None).unwrap();
        let before = fs.file_id("/a").unwrap();
        fs.mv("/a", "/b", None).unwrap();
        assert_eq!(fs.file_id("/b").unwrap(), before);
    }
}
