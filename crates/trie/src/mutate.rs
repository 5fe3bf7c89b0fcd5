use std::collections::HashMap;
use std::sync::Arc;

use crate::error::TrieError;
use crate::hash::Hash;
use crate::node::{new_branch, new_extension, new_leaf, ChildRef, Node};
use crate::path::{Height, Path};
use crate::payload_source::PayloadSource;

/// A write in a mutation batch: either a new value, or a deletion. An empty
/// payload is treated as a deletion, so overwriting a path with nothing
/// restores the exact hash of never having written it.
#[derive(Clone, Debug)]
enum Write {
    Set(Vec<u8>),
    Delete,
}

impl Write {
    fn from_value(value: Vec<u8>) -> Self {
        if value.is_empty() {
            Write::Delete
        } else {
            Write::Set(value)
        }
    }
}

type Entry = (Path, Write);

/// Below this many paths in a group, recursion stays on the calling thread;
/// above it, the two partitions are handed to `rayon::join`.
const PARALLEL_THRESHOLD: usize = 16;

/// Builds the deduplicated, sorted batch for one `mutate` call. Duplicate
/// paths collapse to their last occurrence (last-write-wins).
fn prepare_batch(paths: &[Path], values: Vec<Vec<u8>>) -> Vec<Entry> {
    assert_eq!(paths.len(), values.len(), "mutate: paths/values length mismatch");
    let mut last: HashMap<Path, Write> = HashMap::with_capacity(paths.len());
    for (path, value) in paths.iter().copied().zip(values.into_iter()) {
        last.insert(path, Write::from_value(value));
    }
    let mut entries: Vec<Entry> = last.into_iter().collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries
}

pub(crate) fn mutate_root(
    root: &ChildRef,
    paths: &[Path],
    values: Vec<Vec<u8>>,
    source: &dyn PayloadSource,
) -> Result<ChildRef, TrieError> {
    let entries = prepare_batch(paths, values);
    tracing::debug!(writes = paths.len(), deduped = entries.len(), "mutating trie");
    if entries.is_empty() {
        return Ok(root.clone());
    }
    build(&entries, 0, root, source)
}

/// The root entry point for one subtree: dispatches on the existing node
/// variant occupying this position.
fn build(entries: &[Entry], depth: Height, existing: &ChildRef, source: &dyn PayloadSource) -> Result<ChildRef, TrieError> {
    if entries.is_empty() {
        return Ok(existing.clone());
    }
    match existing {
        ChildRef::Empty => build_fresh(entries, depth, source),
        ChildRef::Node(node) => match node.as_ref() {
            Node::Leaf(leaf) => build_over_leaf(entries, depth, leaf, source),
            Node::Branch(branch) => build_over_branch(entries, depth, node, branch, source),
            Node::Extension(ext) => build_over_extension(entries, depth, node, ext, source),
        },
    }
}

/// Installs a leaf, persisting its payload, or `Empty` for a deletion.
fn install_leaf(path: Path, write: &Write, height: Height, source: &dyn PayloadSource) -> Result<ChildRef, TrieError> {
    match write {
        Write::Delete => Ok(ChildRef::Empty),
        Write::Set(value) => {
            let node = new_leaf(path, value, height);
            let hash = node.hash();
            source.put(hash, value.clone())?;
            Ok(ChildRef::Node(Arc::new(node)))
        }
    }
}

/// Builds a subtree from scratch (no prior structure) out of `entries`,
/// compacting any run of bits all entries agree on into a single extension.
fn build_fresh(entries: &[Entry], depth: Height, source: &dyn PayloadSource) -> Result<ChildRef, TrieError> {
    if entries.len() == 1 {
        let (path, write) = &entries[0];
        return install_leaf(*path, write, Path::BITS - depth, source);
    }

    let run = common_prefix_run(entries, depth);
    if run == 0 {
        let (left, right) = partition(entries, depth);
        let height = Path::BITS - depth;
        let (left_child, right_child) = build_children(&left, &right, depth + 1, source)?;
        if left_child.is_empty() && right_child.is_empty() {
            return Ok(ChildRef::Empty);
        }
        Ok(ChildRef::Node(Arc::new(new_branch(left_child, right_child, height))))
    } else {
        let child = build_fresh(entries, depth + run, source)?;
        if child.is_empty() {
            return Ok(ChildRef::Empty);
        }
        let height = Path::BITS - depth;
        Ok(ChildRef::Node(Arc::new(new_extension(child, entries[0].0, (run - 1) as u8, height))))
    }
}

fn build_children(
    left: &[Entry],
    right: &[Entry],
    depth: Height,
    source: &dyn PayloadSource,
) -> Result<(ChildRef, ChildRef), TrieError> {
    if left.len() + right.len() >= PARALLEL_THRESHOLD && !left.is_empty() && !right.is_empty() {
        tracing::trace!(left = left.len(), right = right.len(), depth, "splitting build across rayon::join");
        let (l, r) = rayon::join(
            || build_fresh(left, depth, source),
            || build_fresh(right, depth, source),
        );
        Ok((l?, r?))
    } else {
        let l = if left.is_empty() { ChildRef::Empty } else { build_fresh(left, depth, source)? };
        let r = if right.is_empty() { ChildRef::Empty } else { build_fresh(right, depth, source)? };
        Ok((l, r))
    }
}

/// Length of the longest run of bits starting at `depth` shared by every
/// entry (0 if they already diverge at `depth`).
fn common_prefix_run(entries: &[Entry], depth: Height) -> Height {
    let mut run = 0;
    while depth + run < Path::BITS {
        let bit = entries[0].0.bit(depth + run);
        if entries.iter().all(|(p, _)| p.bit(depth + run) == bit) {
            run += 1;
        } else {
            break;
        }
    }
    run
}

fn partition(entries: &[Entry], depth: Height) -> (Vec<Entry>, Vec<Entry>) {
    let mut left = Vec::new();
    let mut right = Vec::new();
    for entry in entries {
        if entry.0.bit(depth) {
            right.push(entry.clone());
        } else {
            left.push(entry.clone());
        }
    }
    (left, right)
}

/// A compact leaf is a single existing payload; merging new writes into it
/// is equivalent to re-expanding it as one more "fresh" entry alongside the
/// batch (it carries no internal structure to partially reuse).
fn build_over_leaf(
    entries: &[Entry],
    depth: Height,
    leaf: &crate::node::LeafNode,
    source: &dyn PayloadSource,
) -> Result<ChildRef, TrieError> {
    let overwritten = entries.iter().any(|(p, _)| *p == leaf.path);
    let mut combined: Vec<Entry> = entries.to_vec();
    if !overwritten {
        let old_value = source
            .get(&leaf.hash)?
            .ok_or(TrieError::MissingPayload(leaf.hash))?;
        combined.push((leaf.path, Write::Set(old_value)));
        combined.sort_by(|a, b| a.0.cmp(&b.0));
    }
    build_fresh(&combined, depth, source)
}

fn build_over_branch(
    entries: &[Entry],
    depth: Height,
    existing: &Arc<Node>,
    branch: &crate::node::BranchNode,
    source: &dyn PayloadSource,
) -> Result<ChildRef, TrieError> {
    let (left_entries, right_entries) = partition(entries, depth);
    let (new_left, new_right) = if left_entries.len() + right_entries.len() >= PARALLEL_THRESHOLD
        && !left_entries.is_empty()
        && !right_entries.is_empty()
    {
        let (l, r) = rayon::join(
            || build(&left_entries, depth + 1, &branch.left, source),
            || build(&right_entries, depth + 1, &branch.right, source),
        );
        (l?, r?)
    } else {
        (
            build(&left_entries, depth + 1, &branch.left, source)?,
            build(&right_entries, depth + 1, &branch.right, source)?,
        )
    };

    if refs_equal(&new_left, &branch.left) && refs_equal(&new_right, &branch.right) {
        return Ok(ChildRef::Node(existing.clone()));
    }
    if new_left.is_empty() && new_right.is_empty() {
        return Ok(ChildRef::Empty);
    }
    Ok(ChildRef::Node(Arc::new(new_branch(new_left, new_right, branch.height))))
}

fn build_over_extension(
    entries: &[Entry],
    depth: Height,
    existing: &Arc<Node>,
    ext: &crate::node::ExtensionNode,
    source: &dyn PayloadSource,
) -> Result<ChildRef, TrieError> {
    let span = ext.count as Height + 1;
    let divergence = (0..span).find(|&i| entries.iter().any(|(p, _)| p.bit(depth + i) != ext.path.bit(depth + i)));

    let Some(k) = divergence else {
        // Every entry agrees with the extension's whole span: descend unchanged.
        let new_child = build(entries, depth + span, &ext.child, source)?;
        if refs_equal(&new_child, &ext.child) {
            return Ok(ChildRef::Node(existing.clone()));
        }
        if new_child.is_empty() {
            return Ok(ChildRef::Empty);
        }
        return Ok(ChildRef::Node(Arc::new(new_extension(new_child, ext.path, ext.count, ext.height))));
    };

    let matching_bit = ext.path.bit(depth + k);
    let (matches, diverges): (Vec<Entry>, Vec<Entry>) = entries
        .iter()
        .cloned()
        .partition(|(p, _)| p.bit(depth + k) == matching_bit);

    let suffix_len = span - k - 1;
    let matches_existing = if suffix_len > 0 {
        let child_height = ext.height - span;
        ChildRef::Node(Arc::new(new_extension(
            ext.child.clone(),
            ext.path,
            (suffix_len - 1) as u8,
            child_height + suffix_len,
        )))
    } else {
        ext.child.clone()
    };

    let branch_depth = depth + k + 1;
    let branch_height = Path::BITS - branch_depth;
    let matches_result = build(&matches, branch_depth, &matches_existing, source)?;
    let diverges_result = build(&diverges, branch_depth, &ChildRef::Empty, source)?;

    let (left, right) = if matching_bit {
        (diverges_result, matches_result)
    } else {
        (matches_result, diverges_result)
    };

    if left.is_empty() && right.is_empty() {
        return Ok(ChildRef::Empty);
    }
    let branch = ChildRef::Node(Arc::new(new_branch(left, right, branch_height)));

    if k > 0 {
        Ok(ChildRef::Node(Arc::new(new_extension(branch, ext.path, (k - 1) as u8, ext.height))))
    } else {
        Ok(branch)
    }
}

fn refs_equal(a: &ChildRef, b: &ChildRef) -> bool {
    match (a, b) {
        (ChildRef::Empty, ChildRef::Empty) => true,
        (ChildRef::Node(x), ChildRef::Node(y)) => Arc::ptr_eq(x, y),
        _ => false,
    }
}

pub(crate) fn read_one(root: &ChildRef, path: &Path, source: &dyn PayloadSource) -> Result<Option<Vec<u8>>, TrieError> {
    read_in(root, path, 0, source)
}

fn read_in(node_ref: &ChildRef, path: &Path, depth: Height, source: &dyn PayloadSource) -> Result<Option<Vec<u8>>, TrieError> {
    match node_ref {
        ChildRef::Empty => Ok(None),
        ChildRef::Node(node) => match node.as_ref() {
            Node::Leaf(leaf) => {
                if leaf.path != *path {
                    return Ok(None);
                }
                match source.get(&leaf.hash)? {
                    Some(value) => Ok(Some(value)),
                    None => Err(TrieError::MissingPayload(leaf.hash)),
                }
            }
            Node::Extension(ext) => {
                let span = ext.count as Height + 1;
                if !path.shares_prefix(&ext.path, depth, depth + span) {
                    return Ok(None);
                }
                read_in(&ext.child, path, depth + span, source)
            }
            Node::Branch(branch) => {
                let next = if path.bit(depth) { &branch.right } else { &branch.left };
                read_in(next, path, depth + 1, source)
            }
        },
    }
}

pub(crate) fn collect_leaves<'a>(node_ref: &'a ChildRef, out: &mut Vec<&'a crate::node::LeafNode>) {
    if let ChildRef::Node(node) = node_ref {
        match node.as_ref() {
            Node::Leaf(leaf) => out.push(leaf),
            Node::Extension(ext) => collect_leaves(&ext.child, out),
            Node::Branch(branch) => {
                collect_leaves(&branch.left, out);
                collect_leaves(&branch.right, out);
            }
        }
    }
}

pub(crate) fn root_hash_of(root: &ChildRef) -> Hash {
    root.hash(Path::BITS)
}
