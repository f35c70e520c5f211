//! In-memory storage backend.
//!
//! A thread-safe nested-tree implementation of [`DocumentStore`],
//! intended for embedded usage, tests, and as the reference backend.
//! The whole tree sits behind one `RwLock`; every mutation holds the
//! write lock for its full path walk, which is what gives multi-step
//! callers (canonical-then-index writes, read-before-delete) a
//! consistent view under preemptive scheduling.

use std::collections::BTreeMap;
use std::sync::RwLock;

use super::path::{KeyPath, Segment};
use super::traits::{DocumentStore, Scalar, StorageError};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// One node of the tree: a scalar leaf or a branch of child nodes.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    Leaf(Scalar),
    Branch(BTreeMap<Segment, Node>),
}

impl Node {
    fn empty_branch() -> Self {
        Self::Branch(BTreeMap::new())
    }

    fn descend(&self, segments: &[Segment]) -> Option<&Self> {
        let mut current = self;
        for segment in segments {
            match current {
                Self::Branch(children) => current = children.get(segment)?,
                Self::Leaf(_) => return None,
            }
        }
        Some(current)
    }

    /// Walks to `segments`, creating branches as needed. A leaf in the
    /// way is replaced by a branch.
    fn descend_mut_create(&mut self, segments: &[Segment]) -> &mut Self {
        let mut current = self;
        for segment in segments {
            if matches!(current, Self::Leaf(_)) {
                *current = Self::empty_branch();
            }
            let Self::Branch(children) = current else {
                unreachable!("leaf replaced above");
            };
            current = children
                .entry(segment.clone())
                .or_insert_with(Self::empty_branch);
        }
        current
    }

    fn to_json(&self, preserve_arrays: bool) -> serde_json::Value {
        match self {
            Self::Leaf(scalar) => scalar.to_json(),
            Self::Branch(children) => {
                if !preserve_arrays && is_dense_sequence(children) {
                    let items = children
                        .values()
                        .map(|child| child.to_json(preserve_arrays))
                        .collect();
                    return serde_json::Value::Array(items);
                }
                let mut object = serde_json::Map::new();
                for (segment, child) in children {
                    object.insert(segment.to_string(), child.to_json(preserve_arrays));
                }
                serde_json::Value::Object(object)
            }
        }
    }

    pub(crate) fn from_json(value: &serde_json::Value) -> Self {
        if let Some(scalar) = Scalar::from_json_leaf(value) {
            return Self::Leaf(scalar);
        }
        match value {
            serde_json::Value::Array(items) => {
                let children = items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| (Segment::from(i), Self::from_json(item)))
                    .collect();
                Self::Branch(children)
            }
            serde_json::Value::Object(fields) => {
                let children = fields
                    .iter()
                    .map(|(key, item)| (Segment::parse(key), Self::from_json(item)))
                    .collect();
                Self::Branch(children)
            }
            _ => unreachable!("leaves handled above"),
        }
    }
}

/// True if the children are keyed by exactly the integers `0..n-1`.
fn is_dense_sequence(children: &BTreeMap<Segment, Node>) -> bool {
    if children.is_empty() {
        return false;
    }
    children
        .keys()
        .enumerate()
        .all(|(i, segment)| segment.as_int() == i64::try_from(i).ok())
}

/// Removes the node at `segments` below `node`, pruning branches left
/// empty on the way back. Returns true if `node` itself should be
/// removed from its parent.
fn delete_below(node: &mut Node, segments: &[Segment]) -> bool {
    let Node::Branch(children) = node else {
        // A leaf in the middle of the path: nothing below it to delete.
        return false;
    };
    let Some((head, rest)) = segments.split_first() else {
        return true;
    };
    let Some(child) = children.get_mut(head) else {
        return false;
    };
    if rest.is_empty() || delete_below(child, rest) {
        children.remove(head);
    }
    children.is_empty()
}

/// Thread-safe in-memory document store.
#[derive(Debug)]
pub struct InMemoryDocumentStore {
    root: RwLock<Node>,
}

impl InMemoryDocumentStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: RwLock::new(Node::empty_branch()),
        }
    }

    pub(crate) fn replace_root(&self, node: Node) -> Result<(), StorageError> {
        let mut root = self.root.write().map_err(|_| lock_err("store.import"))?;
        *root = node;
        Ok(())
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn exists(&self, path: &KeyPath) -> Result<bool, StorageError> {
        let root = self.root.read().map_err(|_| lock_err("store.exists"))?;
        Ok(root.descend(path.segments()).is_some())
    }

    fn get(&self, path: &KeyPath) -> Result<Option<Scalar>, StorageError> {
        let root = self.root.read().map_err(|_| lock_err("store.get"))?;
        Ok(match root.descend(path.segments()) {
            Some(Node::Leaf(scalar)) => Some(scalar.clone()),
            _ => None,
        })
    }

    fn get_document(
        &self,
        path: &KeyPath,
        preserve_arrays: bool,
    ) -> Result<Option<serde_json::Value>, StorageError> {
        let root = self.root.read().map_err(|_| lock_err("store.get_document"))?;
        Ok(root
            .descend(path.segments())
            .map(|node| node.to_json(preserve_arrays)))
    }

    fn put(&self, path: &KeyPath, value: Scalar) -> Result<(), StorageError> {
        let mut root = self.root.write().map_err(|_| lock_err("store.put"))?;
        *root.descend_mut_create(path.segments()) = Node::Leaf(value);
        Ok(())
    }

    fn put_document(
        &self,
        path: &KeyPath,
        document: &serde_json::Value,
    ) -> Result<(), StorageError> {
        let mut root = self.root.write().map_err(|_| lock_err("store.put_document"))?;
        *root.descend_mut_create(path.segments()) = Node::from_json(document);
        Ok(())
    }

    fn delete(&self, path: &KeyPath) -> Result<(), StorageError> {
        let mut root = self.root.write().map_err(|_| lock_err("store.delete"))?;
        if path.is_root() {
            *root = Node::empty_branch();
            return Ok(());
        }
        delete_below(&mut root, path.segments());
        Ok(())
    }

    fn increment(&self, path: &KeyPath) -> Result<i64, StorageError> {
        let mut root = self.root.write().map_err(|_| lock_err("store.increment"))?;
        let node = root.descend_mut_create(path.segments());
        let next = match node {
            Node::Leaf(Scalar::Int(n)) => *n + 1,
            Node::Branch(children) if children.is_empty() => 1,
            _ => {
                return Err(StorageError::NotACounter {
                    path: path.to_string(),
                })
            }
        };
        *node = Node::Leaf(Scalar::Int(next));
        Ok(next)
    }

    fn children(&self, path: &KeyPath) -> Result<Vec<Segment>, StorageError> {
        let root = self.root.read().map_err(|_| lock_err("store.children"))?;
        Ok(match root.descend(path.segments()) {
            Some(Node::Branch(children)) => children.keys().cloned().collect(),
            _ => Vec::new(),
        })
    }
}
