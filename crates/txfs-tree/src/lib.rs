//! Path handling, file handles, and the in-memory directory tree.
//!
//! The tree is an arena of nodes: directories map names to child node
//! ids, files hold an [`Arc<FileHandle>`] wrapping the version chain.
//! Removing a file unlinks the node; transactions still holding the
//! handle keep reading and writing the chain until the last reference
//! drops.

pub mod handle;
pub mod path;
pub mod tree;

pub use handle::FileHandle;
pub use path::{join, normalize, split_parent, validate_name};
pub use tree::{Entry, Node, NodeId, Tree};
