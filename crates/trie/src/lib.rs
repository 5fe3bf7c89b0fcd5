//! A sparse binary Merkle Patricia trie over 256-bit paths.
//!
//! Tries are immutable once built: [`Trie::mutate`] takes a batch of writes
//! and returns a brand new `Trie` that structurally shares every untouched
//! subtree with its parent.

pub mod error;
pub mod hash;
mod mutate;
pub mod node;
pub mod path;
pub mod payload_source;

use std::sync::Arc;

pub use error::TrieError;
pub use hash::Hash;
pub use node::{ChildRef, LeafNode, Node};
pub use path::{Height, Path};
pub use payload_source::{InMemoryPayloadSource, PayloadSource};

/// An immutable, versioned sparse binary trie.
#[derive(Clone)]
pub struct Trie {
    root: ChildRef,
    source: Arc<dyn PayloadSource>,
}

impl std::fmt::Debug for Trie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trie").field("root_hash", &self.root_hash()).finish()
    }
}

impl Trie {
    /// An empty trie backed by `source`. Its root hash is `default_hash(256)`.
    pub fn empty(source: Arc<dyn PayloadSource>) -> Self {
        Trie {
            root: ChildRef::Empty,
            source,
        }
    }

    /// Returns a new trie reflecting this trie's state plus `writes`.
    ///
    /// `writes` pairs each path with its new value; an empty value deletes
    /// the path. Duplicate paths in the batch resolve to their last
    /// occurrence (last-write-wins).
    pub fn mutate(&self, writes: &[(Path, Vec<u8>)]) -> Result<Trie, TrieError> {
        let paths: Vec<Path> = writes.iter().map(|(p, _)| *p).collect();
        let values: Vec<Vec<u8>> = writes.iter().map(|(_, v)| v.clone()).collect();
        let root = mutate::mutate_root(&self.root, &paths, values, self.source.as_ref())?;
        Ok(Trie {
            root,
            source: self.source.clone(),
        })
    }

    pub fn root_hash(&self) -> Hash {
        mutate::root_hash_of(&self.root)
    }

    /// Reads a single path; `Ok(None)` if the path was never written (or
    /// was deleted).
    pub fn read_one(&self, path: &Path) -> Result<Option<Vec<u8>>, TrieError> {
        mutate::read_one(&self.root, path, self.source.as_ref())
    }

    /// Reads `paths` in order, one output per input (possibly `None`).
    pub fn read(&self, paths: &[Path]) -> Result<Vec<Option<Vec<u8>>>, TrieError> {
        paths.iter().map(|p| self.read_one(p)).collect()
    }

    /// All leaves currently reachable from the root.
    pub fn leaves(&self) -> Vec<&LeafNode> {
        let mut out = Vec::new();
        mutate::collect_leaves(&self.root, &mut out);
        out
    }

    /// All paths currently holding a value.
    pub fn paths(&self) -> Vec<Path> {
        self.leaves().into_iter().map(|leaf| leaf.path).collect()
    }

    pub fn root_ref(&self) -> &ChildRef {
        &self.root
    }

    pub fn payload_source(&self) -> &Arc<dyn PayloadSource> {
        &self.source
    }

    /// Reconstructs a trie around an already-built root pointer, e.g. when
    /// restoring from a checkpoint. Not part of the public mutation path.
    pub fn from_root(root: ChildRef, source: Arc<dyn PayloadSource>) -> Self {
        Trie { root, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path_from_u8(tag: u8) -> Path {
        let mut bytes = [0u8; 32];
        bytes[0] = tag;
        Path::from_bytes(bytes)
    }

    fn trie() -> Trie {
        Trie::empty(Arc::new(InMemoryPayloadSource::new()))
    }

    #[test]
    fn empty_trie_root_hash_is_default_at_256() {
        let t = trie();
        assert_eq!(t.root_hash(), hash::default_hash(256));
    }

    #[test]
    fn read_after_write_round_trips_every_entry() {
        let t = trie();
        let writes: Vec<(Path, Vec<u8>)> = (0u8..10)
            .map(|i| (path_from_u8(i), vec![i, i, i]))
            .collect();
        let t2 = t.mutate(&writes).unwrap();
        for (path, value) in &writes {
            assert_eq!(t2.read_one(path).unwrap(), Some(value.clone()));
        }
    }

    #[test]
    fn last_write_wins_on_duplicate_paths() {
        let t = trie();
        let path = path_from_u8(5);
        let writes = vec![
            (path, vec![1]),
            (path, vec![2]),
            (path, vec![3]),
        ];
        let t2 = t.mutate(&writes).unwrap();
        assert_eq!(t2.read_one(&path).unwrap(), Some(vec![3]));
    }

    #[test]
    fn hash_invariant_under_permutation() {
        let writes: Vec<(Path, Vec<u8>)> = (0u8..20)
            .map(|i| (path_from_u8(i), vec![i; 4]))
            .collect();

        let forward = trie().mutate(&writes).unwrap();

        let mut reversed = writes.clone();
        reversed.reverse();
        let backward = trie().mutate(&reversed).unwrap();

        assert_eq!(forward.root_hash(), backward.root_hash());
    }

    #[test]
    fn deleting_every_write_restores_the_empty_root() {
        let writes: Vec<(Path, Vec<u8>)> = (0u8..8)
            .map(|i| (path_from_u8(i), vec![i + 1]))
            .collect();
        let populated = trie().mutate(&writes).unwrap();
        assert_ne!(populated.root_hash(), hash::default_hash(256));

        let deletions: Vec<(Path, Vec<u8>)> = writes.iter().map(|(p, _)| (*p, Vec::new())).collect();
        let emptied = populated.mutate(&deletions).unwrap();
        assert_eq!(emptied.root_hash(), hash::default_hash(256));
    }

    #[test]
    fn deallocation_equivalence_matches_never_having_written() {
        let all: Vec<(Path, Vec<u8>)> = (0u8..6).map(|i| (path_from_u8(i), vec![i + 9])).collect();
        let subset_to_delete = &all[0..3];

        let mut built = trie().mutate(&all).unwrap();
        let deletions: Vec<(Path, Vec<u8>)> = subset_to_delete.iter().map(|(p, _)| (*p, Vec::new())).collect();
        built = built.mutate(&deletions).unwrap();

        let remaining: Vec<(Path, Vec<u8>)> = all[3..].to_vec();
        let direct = trie().mutate(&remaining).unwrap();

        assert_eq!(built.root_hash(), direct.root_hash());
    }

    #[test]
    fn mutation_structurally_shares_untouched_leaves() {
        let writes: Vec<(Path, Vec<u8>)> = (0u8..4).map(|i| (path_from_u8(i), vec![i])).collect();
        let t1 = trie().mutate(&writes).unwrap();
        let t2 = t1.mutate(&[(path_from_u8(200), vec![77])]).unwrap();

        for (path, value) in &writes {
            assert_eq!(t2.read_one(path).unwrap(), Some(value.clone()));
        }
        assert_eq!(t2.read_one(&path_from_u8(200)).unwrap(), Some(vec![77]));
    }
}
