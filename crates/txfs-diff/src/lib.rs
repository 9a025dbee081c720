//! Deterministic diff engine for version chains.
//!
//! A [`Diff`] is an ordered edit script over the *old* content: `Equal`
//! ranges are copied, `Delete` ranges are skipped, `Insert` ops splice in
//! new text. The only contract the rest of the system relies on is
//! `apply(old, &diff(old, new)) == new`, deterministically.
//!
//! The algorithm trims the common prefix and suffix, then runs a
//! longest-common-subsequence pass over the middle. All ranges are in
//! characters, not bytes, so multi-byte content never splits a code point.

use std::fmt;

/// Size cap for the LCS table (`old_len * new_len` in characters). Edits
/// whose middle sections exceed it degrade to a single delete+insert pair.
const MAX_LCS_AREA: usize = 1 << 20;

/// One step of an edit script over the old content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffOp {
    /// Copy `old[start..end]` (character indices) to the output.
    Equal { start: usize, end: usize },
    /// Splice `text` into the output.
    Insert { text: String },
    /// Skip `old[start..end]`; produces no output.
    Delete { start: usize, end: usize },
}

/// An ordered edit script. Applying it to the content it was computed
/// against reconstructs the new content exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    ops: Vec<DiffOp>,
}

impl Diff {
    /// Build a diff from raw ops. Intended for tests and tooling; `diff`
    /// is the normal constructor.
    #[must_use]
    pub fn from_ops(ops: Vec<DiffOp>) -> Self {
        Self { ops }
    }

    /// The edit script, in application order.
    #[must_use]
    pub fn ops(&self) -> &[DiffOp] {
        &self.ops
    }

    /// Whether this diff copies nothing and inserts nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Errors raised while applying a diff to content it does not fit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffError {
    /// A range op points outside the content (or is inverted).
    InvalidRange {
        start: usize,
        end: usize,
        len: usize,
    },
}

impl fmt::Display for DiffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRange { start, end, len } => {
                write!(f, "range {start}..{end} out of bounds for length {len}")
            }
        }
    }
}

impl std::error::Error for DiffError {}

/// Compute the edit script turning `old` into `new`.
#[must_use]
pub fn diff(old: &str, new: &str) -> Diff {
    let old_chars: Vec<char> = old.chars().collect();
    let new_chars: Vec<char> = new.chars().collect();
    let old_len = old_chars.len();
    let new_len = new_chars.len();

    // Common prefix, then common suffix over what the prefix left.
    let mut prefix = 0;
    while prefix < old_len && prefix < new_len && old_chars[prefix] == new_chars[prefix] {
        prefix += 1;
    }
    let mut suffix = 0;
    while suffix < old_len - prefix
        && suffix < new_len - prefix
        && old_chars[old_len - 1 - suffix] == new_chars[new_len - 1 - suffix]
    {
        suffix += 1;
    }

    let mut ops = Vec::new();
    if prefix > 0 {
        push_op(
            &mut ops,
            DiffOp::Equal {
                start: 0,
                end: prefix,
            },
        );
    }

    let old_mid = &old_chars[prefix..old_len - suffix];
    let new_mid = &new_chars[prefix..new_len - suffix];
    if old_mid.len().saturating_mul(new_mid.len()) > MAX_LCS_AREA {
        if !old_mid.is_empty() {
            push_op(
                &mut ops,
                DiffOp::Delete {
                    start: prefix,
                    end: old_len - suffix,
                },
            );
        }
        if !new_mid.is_empty() {
            push_op(
                &mut ops,
                DiffOp::Insert {
                    text: new_mid.iter().collect(),
                },
            );
        }
    } else if !old_mid.is_empty() || !new_mid.is_empty() {
        lcs_ops(old_mid, new_mid, prefix, &mut ops);
    }

    if suffix > 0 {
        push_op(
            &mut ops,
            DiffOp::Equal {
                start: old_len - suffix,
                end: old_len,
            },
        );
    }

    Diff { ops }
}

/// Apply an edit script to `old`, reconstructing the content it encodes.
pub fn apply(old: &str, diff: &Diff) -> Result<String, DiffError> {
    let old_chars: Vec<char> = old.chars().collect();
    let len = old_chars.len();
    let mut out = String::with_capacity(old.len());

    for op in &diff.ops {
        match op {
            DiffOp::Equal { start, end } => {
                check_range(*start, *end, len)?;
                out.extend(&old_chars[*start..*end]);
            }
            DiffOp::Insert { text } => out.push_str(text),
            DiffOp::Delete { start, end } => {
                check_range(*start, *end, len)?;
            }
        }
    }
    Ok(out)
}

fn check_range(start: usize, end: usize, len: usize) -> Result<(), DiffError> {
    if start > end || end > len {
        return Err(DiffError::InvalidRange { start, end, len });
    }
    Ok(())
}

/// Classic LCS backtrack over the trimmed middle sections, emitting merged
/// ops with ranges offset back into the full old content.
fn lcs_ops(old_mid: &[char], new_mid: &[char], offset: usize, ops: &mut Vec<DiffOp>) {
    let rows = old_mid.len();
    let cols = new_mid.len();

    // dp[i][j] = LCS length of old_mid[i..] and new_mid[j..].
    let mut dp = vec![vec![0u32; cols + 1]; rows + 1];
    for i in (0..rows).rev() {
        for j in (0..cols).rev() {
            dp[i][j] = if old_mid[i] == new_mid[j] {
                dp[i + 1][j + 1] + 1
            } else {
                dp[i + 1][j].max(dp[i][j + 1])
            };
        }
    }

    let (mut i, mut j) = (0, 0);
    while i < rows && j < cols {
        if old_mid[i] == new_mid[j] {
            push_op(
                ops,
                DiffOp::Equal {
                    start: offset + i,
                    end: offset + i + 1,
                },
            );
            i += 1;
            j += 1;
        } else if dp[i + 1][j] >= dp[i][j + 1] {
            push_op(
                ops,
                DiffOp::Delete {
                    start: offset + i,
                    end: offset + i + 1,
                },
            );
            i += 1;
        } else {
            push_op(
                ops,
                DiffOp::Insert {
                    text: new_mid[j].to_string(),
                },
            );
            j += 1;
        }
    }
    if i < rows {
        push_op(
            ops,
            DiffOp::Delete {
                start: offset + i,
                end: offset + rows,
            },
        );
    }
    if j < cols {
        push_op(
            ops,
            DiffOp::Insert {
                text: new_mid[j..].iter().collect(),
            },
        );
    }
}

/// Append an op, merging it into the previous op when the two are the same
/// kind and adjacent.
fn push_op(ops: &mut Vec<DiffOp>, op: DiffOp) {
    if let Some(last) = ops.last_mut() {
        match (last, &op) {
            (DiffOp::Equal { end, .. }, DiffOp::Equal { start, end: new_end })
                if *end == *start =>
            {
                *end = *new_end;
                return;
            }
            (DiffOp::Delete { end, .. }, DiffOp::Delete { start, end: new_end })
                if *end == *start =>
            {
                *end = *new_end;
                return;
            }
            (DiffOp::Insert { text }, DiffOp::Insert { text: more }) => {
                text.push_str(more);
                return;
            }
            _ => {}
        }
    }
    ops.push(op);
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn round_trip(old: &str, new: &str) {
        let d = diff(old, new);
        assert_eq!(apply(old, &d).unwrap(), new, "old={old:?} new={new:?}");
    }

    #[test]
    fn identical_content() {
        round_trip("", "");
        round_trip("abc", "abc");
        let d = diff("abc", "abc");
        assert_eq!(d.ops(), &[DiffOp::Equal { start: 0, end: 3 }]);
    }

    #[test]
    fn empty_to_content_and_back() {
        round_trip("", "hello");
        round_trip("hello", "");
        let d = diff("", "hello");
        assert_eq!(
            d.ops(),
            &[DiffOp::Insert {
                text: "hello".to_owned()
            }]
        );
    }

    #[test]
    fn prefix_and_suffix_are_preserved() {
        round_trip("the quick fox", "the slow fox");
        let d = diff("the quick fox", "the slow fox");
        assert!(matches!(d.ops().first(), Some(DiffOp::Equal { start: 0, .. })));
        assert!(matches!(d.ops().last(), Some(DiffOp::Equal { .. })));
    }

    #[test]
    fn overlapping_prefix_suffix() {
        round_trip("aa", "a");
        round_trip("a", "aa");
        round_trip("abab", "ab");
    }

    #[test]
    fn multibyte_content() {
        round_trip("héllo wörld", "héllo würld");
        round_trip("snow☃man", "snow★man★");
        round_trip("日本語テキスト", "日本語のテキスト");
    }

    #[test]
    fn disjoint_content_is_replace() {
        round_trip("abc", "xyz");
        let d = diff("abc", "xyz");
        // No common characters: one delete, one insert.
        assert_eq!(
            d.ops(),
            &[
                DiffOp::Delete { start: 0, end: 3 },
                DiffOp::Insert {
                    text: "xyz".to_owned()
                }
            ]
        );
    }

    #[test]
    fn deterministic() {
        let a = "line one\nline two\nline three";
        let b = "line one\nline 2\nline three\nline four";
        assert_eq!(diff(a, b), diff(a, b));
    }

    #[test]
    fn apply_rejects_out_of_range() {
        let d = Diff::from_ops(vec![DiffOp::Equal { start: 0, end: 9 }]);
        let err = apply("abc", &d).unwrap_err();
        assert_eq!(
            err,
            DiffError::InvalidRange {
                start: 0,
                end: 9,
                len: 3
            }
        );

        let d = Diff::from_ops(vec![DiffOp::Delete { start: 2, end: 1 }]);
        assert!(apply("abc", &d).is_err());
    }

    #[test]
    fn adjacent_ops_are_merged() {
        let d = diff("aXbYc", "abc");
        // Every op kind appears at most in merged runs; no two adjacent
        // same-kind ops with touching ranges.
        for pair in d.ops().windows(2) {
            match pair {
                [DiffOp::Equal { end, .. }, DiffOp::Equal { start, .. }]
                | [DiffOp::Delete { end, .. }, DiffOp::Delete { start, .. }] => {
                    assert_ne!(end, start, "unmerged adjacent ops: {pair:?}");
                }
                [DiffOp::Insert { .. }, DiffOp::Insert { .. }] => {
                    panic!("unmerged adjacent inserts: {pair:?}");
                }
                _ => {}
            }
        }
        round_trip("aXbYc", "abc");
    }

    proptest! {
        #[test]
        fn prop_round_trip(old in ".{0,64}", new in ".{0,64}") {
            let d = diff(&old, &new);
            prop_assert_eq!(apply(&old, &d).unwrap(), new);
        }

        #[test]
        fn prop_round_trip_related(base in "[ab]{0,32}", edit in "[ab]{0,8}", at in 0usize..32) {
            // Edits of related strings exercise the LCS path harder than
            // independent pairs.
            let old = base.clone();
            let split = at.min(base.chars().count());
            let mut new: String = base.chars().take(split).collect();
            new.push_str(&edit);
            new.extend(base.chars().skip(split));
            let d = diff(&old, &new);
            prop_assert_eq!(apply(&old, &d).unwrap(), new);
        }
    }
}
