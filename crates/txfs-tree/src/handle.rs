//! Shared file handles.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use txfs_error::Result;
use txfs_types::{FileId, VersionNo};
use txfs_version::VersionChain;

/// A file's identity, open flag, and version chain, shared by `Arc`.
///
/// The tree holds one reference; transactions that have touched the file
/// hold more. A removed file's chain therefore survives until the last
/// in-flight transaction drops its reference.
#[derive(Debug)]
pub struct FileHandle {
    id: FileId,
    /// Set once any client opens the file; reads and writes require it.
    open: AtomicBool,
    chain: Mutex<VersionChain>,
}

impl FileHandle {
    #[must_use]
    pub fn new(id: FileId) -> Self {
        Self {
            id,
            open: AtomicBool::new(false),
            chain: Mutex::new(VersionChain::new()),
        }
    }

    #[must_use]
    pub fn id(&self) -> FileId {
        self.id
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn mark_open(&self) {
        self.open.store(true, Ordering::Release);
    }

    /// The current-version pointer.
    #[must_use]
    pub fn current(&self) -> VersionNo {
        self.chain.lock().current()
    }

    /// The highest materializable version.
    #[must_use]
    pub fn latest(&self) -> VersionNo {
        self.chain.lock().latest()
    }

    /// Materialize version `v`.
    pub fn read_version(&self, v: VersionNo) -> Result<String> {
        self.chain.lock().read(v)
    }

    /// Materialize the current version.
    pub fn read_current(&self) -> Result<String> {
        self.chain.lock().read_current()
    }

    /// Append `content` as a new version and advance the pointer to it.
    pub fn append_version(&self, content: &str) -> Result<VersionNo> {
        self.chain.lock().append_version(content)
    }

    /// Move the current-version pointer without truncating the chain.
    pub fn revert_to(&self, v: VersionNo) -> Result<()> {
        self.chain.lock().revert_to(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_flag_starts_unset() {
        let handle = FileHandle::new(FileId::new(7));
        assert!(!handle.is_open());
        handle.mark_open();
        assert!(handle.is_open());
        assert_eq!(handle.id(), FileId::new(7));
    }

    #[test]
    fn versions_flow_through_the_handle() {
        let handle = FileHandle::new(FileId::new(1));
        assert_eq!(handle.read_current().unwrap(), "");
        let v1 = handle.append_version("data").unwrap();
        assert_eq!(handle.current(), v1);
        assert_eq!(handle.read_current().unwrap(), "data");
        handle.revert_to(VersionNo::ZERO).unwrap();
        assert_eq!(handle.read_current().unwrap(), "");
        assert_eq!(handle.latest(), v1);
    }
}
