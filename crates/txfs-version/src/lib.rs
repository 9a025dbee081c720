//! Per-file version chains.
//!
//! A [`VersionChain`] stores a file's history as an append-only sequence of
//! diffs from the empty baseline: version 0 is the empty content a file is
//! created with, and version `i > 0` is materialized by folding diffs
//! `1..=i` over it. The current-version pointer can move backwards in O(1)
//! (`revert_to`) without truncating the chain, so versions past the
//! pointer stay addressable for in-flight readers.

use txfs_diff::Diff;
use txfs_error::{Result, TxfsError};
use txfs_types::VersionNo;

/// Append-only chain of content versions stored as diffs.
///
/// Diffs are never rewritten in place, only appended; `cur` always points
/// at a reconstructible version.
#[derive(Debug, Clone, Default)]
pub struct VersionChain {
    diffs: Vec<Diff>,
    cur: VersionNo,
}

impl VersionChain {
    /// A fresh chain holding only the empty baseline (version 0).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The highest version the chain can materialize.
    #[must_use]
    pub fn latest(&self) -> VersionNo {
        VersionNo::new(self.diffs.len() as u64)
    }

    /// The current-version pointer.
    #[must_use]
    pub fn current(&self) -> VersionNo {
        self.cur
    }

    /// Materialize version `v` by folding diffs `1..=v` over the empty
    /// baseline.
    pub fn read(&self, v: VersionNo) -> Result<String> {
        let latest = self.latest();
        if v > latest {
            return Err(TxfsError::NoSuchVersion {
                requested: v.get(),
                latest: latest.get(),
            });
        }
        let mut content = String::new();
        for diff in self.diffs.iter().take(v.get() as usize) {
            content = txfs_diff::apply(&content, diff)
                .map_err(|e| TxfsError::invalid_diff(e.to_string()))?;
        }
        Ok(content)
    }

    /// Materialize the version `cur` points at.
    pub fn read_current(&self) -> Result<String> {
        self.read(self.cur)
    }

    /// Append `new_content` as the next version and advance `cur` to it.
    ///
    /// The diff is computed against the chain tail (the latest version),
    /// not against `cur`: after a `revert_to` the two differ, and diffing
    /// against the tail is what keeps fold-from-empty reconstruction
    /// valid. The appended version's content is exactly `new_content`
    /// either way.
    pub fn append_version(&mut self, new_content: &str) -> Result<VersionNo> {
        let tail = self.read(self.latest())?;
        self.diffs.push(txfs_diff::diff(&tail, new_content));
        self.cur = self.latest();
        Ok(self.cur)
    }

    /// Move the current-version pointer to `v` without truncating the
    /// chain. Later versions remain addressable.
    pub fn revert_to(&mut self, v: VersionNo) -> Result<()> {
        let latest = self.latest();
        if v > latest {
            return Err(TxfsError::NoSuchVersion {
                requested: v.get(),
                latest: latest.get(),
            });
        }
        self.cur = v;
        Ok(())
    }
}
