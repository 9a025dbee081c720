//! Arena-backed directory tree.
//!
//! Nodes live in a slot arena with a free list; a [`NodeId`] is a slot
//! index and is only meaningful while the entry is linked. The stable
//! identity used for locking and snapshots is the node's [`FileId`],
//! which is never reused.

use std::collections::HashMap;
use std::sync::Arc;

use txfs_error::{Result, TxfsError};
use txfs_types::{FileId, VersionNo};

use crate::handle::FileHandle;
use crate::path;

/// Index of a node slot in the tree arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

/// A directory entry: either a directory of named children or a file.
#[derive(Debug)]
pub enum Entry {
    Directory { children: HashMap<String, NodeId> },
    File { handle: Arc<FileHandle> },
}

/// A named node in the tree.
#[derive(Debug)]
pub struct Node {
    id: FileId,
    name: String,
    parent: NodeId,
    entry: Entry,
}

impl Node {
    /// Stable identity (lock key, snapshot key).
    #[must_use]
    pub fn id(&self) -> FileId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn parent(&self) -> NodeId {
        self.parent
    }

    #[must_use]
    pub fn is_directory(&self) -> bool {
        matches!(self.entry, Entry::Directory { .. })
    }

    /// The file handle, for file nodes.
    #[must_use]
    pub fn handle(&self) -> Option<&Arc<FileHandle>> {
        match &self.entry {
            Entry::File { handle } => Some(handle),
            Entry::Directory { .. } => None,
        }
    }
}

/// The directory hierarchy. The root is its own parent and has no name.
#[derive(Debug)]
pub struct Tree {
    nodes: Vec<Option<Node>>,
    free: Vec<NodeId>,
}

const ROOT: NodeId = NodeId(0);

impl Tree {
    /// A tree holding only the root directory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: vec![Some(Node {
                id: FileId::ROOT,
                name: String::new(),
                parent: ROOT,
                entry: Entry::Directory {
                    children: HashMap::new(),
                },
            })],
            free: Vec::new(),
        }
    }

    #[must_use]
    pub fn root(&self) -> NodeId {
        ROOT
    }

    /// Look up a node.
    ///
    /// # Panics
    ///
    /// Panics if `id` refers to a freed slot; `NodeId`s must not be held
    /// across removals.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &Node {
        self.nodes[id.0 as usize]
            .as_ref()
            .expect("NodeId refers to a freed slot")
    }

    /// Look up a node, returning `None` for freed slots. For callers that
    /// hold a `NodeId` across tree mutations (e.g. the working directory).
    #[must_use]
    pub fn node_opt(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0 as usize)?.as_ref()
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes[id.0 as usize]
            .as_mut()
            .expect("NodeId refers to a freed slot")
    }

    /// Child lookup within a directory node; `None` for missing names and
    /// for file nodes.
    #[must_use]
    pub fn child_of(&self, dir: NodeId, name: &str) -> Option<NodeId> {
        match &self.node(dir).entry {
            Entry::Directory { children } => children.get(name).copied(),
            Entry::File { .. } => None,
        }
    }

    /// Walk `path` from `start` (or from the root for absolute paths).
    pub fn resolve(&self, start: NodeId, path: &str) -> Result<NodeId> {
        let mut cur = if path.starts_with('/') {
            ROOT
        } else {
            start
        };
        for comp in path.split('/') {
            match comp {
                "" | "." => {}
                ".." => cur = self.node(cur).parent,
                name => {
                    let node = self.node(cur);
                    match &node.entry {
                        Entry::Directory { children } => {
                            cur = *children
                                .get(name)
                                .ok_or_else(|| TxfsError::no_such_file(path))?;
                        }
                        Entry::File { .. } => {
                            return Err(TxfsError::not_a_directory(path));
                        }
                    }
                }
            }
        }
        Ok(cur)
    }

    /// Resolve `path` and require a directory.
    pub fn resolve_dir(&self, start: NodeId, path: &str) -> Result<NodeId> {
        let id = self.resolve(start, path).map_err(|e| match e {
            TxfsError::NoSuchFile { path } => TxfsError::NoSuchDirectory { path },
            other => other,
        })?;
        if self.node(id).is_directory() {
            Ok(id)
        } else {
            Err(TxfsError::not_a_directory(path))
        }
    }

    /// Resolve `path` and require a file.
    pub fn resolve_file(&self, start: NodeId, path: &str) -> Result<NodeId> {
        let id = self.resolve(start, path)?;
        if self.node(id).is_directory() {
            Err(TxfsError::not_a_file(path))
        } else {
            Ok(id)
        }
    }

    /// Resolve the parent directory of `path` and return it with the
    /// validated leaf name. Fails for the root path.
    pub fn resolve_parent(&self, start: NodeId, path: &str) -> Result<(NodeId, String)> {
        let full = path::normalize(&self.full_path(start), path);
        let Some((parent, leaf)) = path::split_parent(&full) else {
            return Err(TxfsError::invalid_name("/"));
        };
        path::validate_name(leaf)?;
        let parent_id = self.resolve_dir(ROOT, parent)?;
        Ok((parent_id, leaf.to_owned()))
    }

    /// Create a file under `parent` from an existing handle.
    pub fn create_file(
        &mut self,
        parent: NodeId,
        name: String,
        handle: Arc<FileHandle>,
    ) -> Result<NodeId> {
        let id = handle.id();
        self.create_node(parent, name, id, Entry::File { handle })
    }

    /// Create a directory under `parent`.
    pub fn create_dir(&mut self, parent: NodeId, name: String, id: FileId) -> Result<NodeId> {
        self.create_node(
            parent,
            name,
            id,
            Entry::Directory {
                children: HashMap::new(),
            },
        )
    }

    fn create_node(
        &mut self,
        parent: NodeId,
        name: String,
        id: FileId,
        entry: Entry,
    ) -> Result<NodeId> {
        path::validate_name(&name)?;
        let parent_node = self.node(parent);
        if !parent_node.is_directory() {
            return Err(TxfsError::not_a_directory(self.full_path(parent)));
        }
        if self.child_of(parent, &name).is_some() {
            return Err(TxfsError::already_exists(path::join(
                &self.full_path(parent),
                &name,
            )));
        }
        let node_id = self.alloc(Node {
            id,
            name: name.clone(),
            parent,
            entry,
        });
        match &mut self.node_mut(parent).entry {
            Entry::Directory { children } => {
                children.insert(name, node_id);
            }
            Entry::File { .. } => unreachable!("parent checked to be a directory"),
        }
        Ok(node_id)
    }

    /// Unlink `target` and return the detached node (for undo re-attach).
    ///
    /// Directories must be empty; the root cannot be removed.
    pub fn remove(&mut self, target: NodeId) -> Result<Node> {
        if target == ROOT {
            return Err(TxfsError::invalid_name("/"));
        }
        let node = self.node(target);
        if let Entry::Directory { children } = &node.entry {
            if !children.is_empty() {
                return Err(TxfsError::not_empty(self.full_path(target)));
            }
        }
        let parent = node.parent;
        let name = node.name.clone();
        match &mut self.node_mut(parent).entry {
            Entry::Directory { children } => {
                children.remove(&name);
            }
            Entry::File { .. } => unreachable!("a node's parent is always a directory"),
        }
        Ok(self.release_slot(target))
    }

    /// Re-attach a node detached by [`remove`](Self::remove) under `parent`.
    pub fn attach(&mut self, parent: NodeId, node: Node) -> Result<NodeId> {
        let Node { id, name, entry, .. } = node;
        self.create_node(parent, name, id, entry)
    }

    /// Atomically re-parent `src` under `dst_parent` as `new_name`.
    ///
    /// Refuses to place a directory under its own descendant (cyclic
    /// references are impossible by construction).
    pub fn rename(&mut self, src: NodeId, dst_parent: NodeId, new_name: String) -> Result<()> {
        if src == ROOT {
            return Err(TxfsError::invalid_name("/"));
        }
        path::validate_name(&new_name)?;
        if !self.node(dst_parent).is_directory() {
            return Err(TxfsError::not_a_directory(self.full_path(dst_parent)));
        }
        // Ancestor check: walking up from the destination must not meet src.
        let mut cur = dst_parent;
        loop {
            if cur == src {
                return Err(TxfsError::MoveIntoDescendant {
                    src: self.full_path(src),
                    dst: self.full_path(dst_parent),
                });
            }
            let parent = self.node(cur).parent;
            if parent == cur {
                break;
            }
            cur = parent;
        }
        if self.child_of(dst_parent, &new_name).is_some() {
            return Err(TxfsError::already_exists(path::join(
                &self.full_path(dst_parent),
                &new_name,
            )));
        }

        let old_parent = self.node(src).parent;
        let old_name = self.node(src).name.clone();
        match &mut self.node_mut(old_parent).entry {
            Entry::Directory { children } => {
                children.remove(&old_name);
            }
            Entry::File { .. } => unreachable!("a node's parent is always a directory"),
        }
        {
            let node = self.node_mut(src);
            node.parent = dst_parent;
            node.name = new_name.clone();
        }
        match &mut self.node_mut(dst_parent).entry {
            Entry::Directory { children } => {
                children.insert(new_name, src);
            }
            Entry::File { .. } => unreachable!("destination checked to be a directory"),
        }
        Ok(())
    }

    /// Sorted child names of a directory.
    pub fn list(&self, dir: NodeId) -> Result<Vec<String>> {
        match &self.node(dir).entry {
            Entry::Directory { children } => {
                let mut names: Vec<String> = children.keys().cloned().collect();
                names.sort_unstable();
                Ok(names)
            }
            Entry::File { .. } => Err(TxfsError::not_a_directory(self.full_path(dir))),
        }
    }

    /// Absolute path of a node.
    #[must_use]
    pub fn full_path(&self, node: NodeId) -> String {
        let mut parts: Vec<&str> = Vec::new();
        let mut cur = node;
        while cur != ROOT {
            let n = self.node(cur);
            parts.push(&n.name);
            cur = n.parent;
        }
        if parts.is_empty() {
            "/".to_owned()
        } else {
            parts.reverse();
            format!("/{}", parts.join("/"))
        }
    }

    /// Full paths of every entry named `name`, depth-first from the root
    /// with children visited in sorted order.
    #[must_use]
    pub fn find(&self, name: &str) -> Vec<String> {
        let mut results = Vec::new();
        self.find_in(ROOT, name, &mut results);
        results
    }

    fn find_in(&self, dir: NodeId, name: &str, results: &mut Vec<String>) {
        let Entry::Directory { children } = &self.node(dir).entry else {
            return;
        };
        let mut names: Vec<&String> = children.keys().collect();
        names.sort_unstable();
        for child_name in names {
            let child = children[child_name];
            if child_name == name {
                results.push(self.full_path(child));
            }
            self.find_in(child, name, results);
        }
    }

    /// Current version of every file in the tree, keyed by identity.
    /// This is the SNAPSHOT capture.
    #[must_use]
    pub fn snapshot_versions(&self) -> HashMap<FileId, VersionNo> {
        self.nodes
            .iter()
            .flatten()
            .filter_map(|node| {
                node.handle()
                    .map(|handle| (handle.id(), handle.current()))
            })
            .collect()
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        if let Some(id) = self.free.pop() {
            let slot = &mut self.nodes[id.0 as usize];
            debug_assert!(slot.is_none(), "free list points at an occupied slot");
            *slot = Some(node);
            return id;
        }
        let idx = u32::try_from(self.nodes.len()).expect("tree arena index overflow");
        self.nodes.push(Some(node));
        NodeId(idx)
    }

    fn release_slot(&mut self, id: NodeId) -> Node {
        let slot = &mut self.nodes[id.0 as usize];
        let node = slot.take().expect("double free of tree node");
        self.free.push(id);
        node
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}
