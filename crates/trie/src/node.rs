use std::sync::{Arc, OnceLock};

use crate::hash::{default_hash, fold_hash, hash_pair, Hash};
use crate::path::{Height, Path};

/// A pointer to a child node: either absent (an implicit default subtree) or
/// a shared, immutable node.
#[derive(Clone, Debug)]
pub enum ChildRef {
    Empty,
    Node(Arc<Node>),
}

impl ChildRef {
    pub fn hash(&self, height_if_empty: Height) -> Hash {
        match self {
            ChildRef::Empty => default_hash(height_if_empty),
            ChildRef::Node(node) => node.hash(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, ChildRef::Empty)
    }

    pub fn node(&self) -> Option<&Arc<Node>> {
        match self {
            ChildRef::Empty => None,
            ChildRef::Node(n) => Some(n),
        }
    }
}

/// One leaf, holding exactly one payload, compacted up to `height`.
#[derive(Debug)]
pub struct LeafNode {
    pub path: Path,
    pub height: Height,
    pub hash: Hash,
}

/// Two children; by invariant at least one is non-empty.
#[derive(Debug)]
pub struct BranchNode {
    pub left: ChildRef,
    pub right: ChildRef,
    pub height: Height,
    hash: OnceLock<Hash>,
}

/// Skips `count + 1` bits of a shared prefix above a branch child.
#[derive(Debug)]
pub struct ExtensionNode {
    pub child: ChildRef,
    pub path: Path,
    pub count: u8,
    pub height: Height,
    hash: OnceLock<Hash>,
}

#[derive(Debug)]
pub enum Node {
    Leaf(LeafNode),
    Branch(BranchNode),
    Extension(ExtensionNode),
}

impl Node {
    pub fn height(&self) -> Height {
        match self {
            Node::Leaf(l) => l.height,
            Node::Branch(b) => b.height,
            Node::Extension(e) => e.height,
        }
    }

    /// Returns this node's hash, computing and caching it on first access.
    ///
    /// Because [`crate::mutate`] constructs nodes bottom-up, child hashes
    /// are already known by the time a parent is built; the cache is
    /// therefore always populated eagerly at construction (see
    /// `new_branch`/`new_extension`) and this getter never actually blocks
    /// on computation in practice. It remains lazy-shaped so a node built
    /// any other way still behaves correctly.
    pub fn hash(&self) -> Hash {
        match self {
            Node::Leaf(l) => l.hash,
            Node::Branch(b) => *b.hash.get_or_init(|| {
                let child_height = b.height - 1;
                hash_pair(&b.left.hash(child_height), &b.right.hash(child_height))
            }),
            Node::Extension(e) => *e.hash.get_or_init(|| match e.child.node() {
                Some(child) => match child.as_ref() {
                    Node::Leaf(leaf) => leaf.hash,
                    _ => {
                        let child_height = e.height - e.count as u16 - 1;
                        fold_hash(child.hash(), &e.path, child_height, e.height)
                    }
                },
                None => default_hash(e.height),
            }),
        }
    }
}

pub fn new_leaf(path: Path, value: &[u8], height: Height) -> Node {
    Node::Leaf(LeafNode {
        path,
        height,
        hash: crate::hash::compact_hash(&path, value, height),
    })
}

pub fn new_branch(left: ChildRef, right: ChildRef, height: Height) -> Node {
    let child_height = height - 1;
    let hash = hash_pair(&left.hash(child_height), &right.hash(child_height));
    let cell = OnceLock::new();
    let _ = cell.set(hash);
    Node::Branch(BranchNode {
        left,
        right,
        height,
        hash: cell,
    })
}

pub fn new_extension(child: ChildRef, path: Path, count: u8, height: Height) -> Node {
    debug_assert!(
        !matches!(child.node().map(|n| n.as_ref()), Some(Node::Extension(_))),
        "extension child must never be another extension"
    );
    let cell = OnceLock::new();
    let hash = match child.node().map(|n| n.as_ref()) {
        Some(Node::Leaf(leaf)) => leaf.hash,
        Some(other) => {
            let child_height = height - count as u16 - 1;
            fold_hash(other.hash(), &path, child_height, height)
        }
        None => default_hash(height),
    };
    let _ = cell.set(hash);
    Node::Extension(ExtensionNode {
        child,
        path,
        count,
        height,
        hash: cell,
    })
}
