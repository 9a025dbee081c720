//! Lexical path handling.
//!
//! Paths are forward-slash separated; absolute paths begin with `/`.
//! `.` and `..` resolve lexically (there are no links), and `..` at the
//! root stays at the root.

use txfs_error::{Result, TxfsError};

/// Check that `name` is usable as a directory entry: non-empty, no `/`,
/// and not one of the traversal components.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(TxfsError::invalid_name(name));
    }
    Ok(())
}

/// Resolve `path` against the absolute directory `base`, collapsing `.`,
/// `..`, and duplicate slashes. Returns an absolute normalized path.
#[must_use]
pub fn normalize(base: &str, path: &str) -> String {
    debug_assert!(base.starts_with('/'), "base must be absolute, got {base:?}");
    let mut stack: Vec<&str> = if path.starts_with('/') {
        Vec::new()
    } else {
        base.split('/').filter(|c| !c.is_empty()).collect()
    };
    for comp in path.split('/') {
        match comp {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            name => stack.push(name),
        }
    }
    if stack.is_empty() {
        "/".to_owned()
    } else {
        format!("/{}", stack.join("/"))
    }
}

/// Split a normalized absolute path into its parent path and leaf name.
/// The root has no parent: returns `None` for `/`.
#[must_use]
pub fn split_parent(path: &str) -> Option<(&str, &str)> {
    if path == "/" {
        return None;
    }
    let cut = path.rfind('/').expect("normalized paths contain '/'");
    let parent = if cut == 0 { "/" } else { &path[..cut] };
    Some((parent, &path[cut + 1..]))
}

/// Join a normalized absolute directory path with an entry name.
#[must_use]
pub fn join(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}
