//! A forest of retained tries, indexed by their root-hash commitment.
//!
//! The forest owns every trie version reachable from the most recently
//! finalized one, plus whatever descendants have been produced since, so
//! that ingestion can always look up the parent of an incoming block by
//! commitment.

pub mod error;

use std::collections::HashMap;
use std::sync::RwLock;

use flow_trie::{Hash, Path, Trie};
use rustc_hash::FxHashMap;

pub use error::ForestError;

struct Entry {
    trie: Trie,
    touched: Vec<Path>,
    parent: Option<Hash>,
}

/// A mapping from state commitment to a retained trie and the metadata
/// needed to walk it back toward its parent.
///
/// Single-writer, multi-reader: `add` and `reset` take the write lock and
/// are expected to be called from one ingestion pipeline; `tree`/`has`/
/// `parent`/`trees`/`read` take the read lock and may run concurrently with
/// each other.
pub struct Forest {
    entries: RwLock<FxHashMap<Hash, Entry>>,
}

impl Default for Forest {
    fn default() -> Self {
        Self::new()
    }
}

impl Forest {
    pub fn new() -> Self {
        Forest {
            entries: RwLock::new(HashMap::default()),
        }
    }

    /// Retains `tree` under its own root hash, recording `touched` (the
    /// paths written since `parent`) and `parent`'s commitment.
    pub fn add(&self, tree: Trie, touched: Vec<Path>, parent: Option<Hash>) {
        let commit = tree.root_hash();
        tracing::debug!(%commit, parent = ?parent, touched = touched.len(), "retaining trie in forest");
        let mut entries = self.entries.write().expect("forest lock poisoned");
        entries.insert(
            commit,
            Entry {
                trie: tree,
                touched,
                parent,
            },
        );
    }

    pub fn has(&self, commit: &Hash) -> bool {
        self.entries.read().expect("forest lock poisoned").contains_key(commit)
    }

    /// Returns a clone of the retained trie for `commit`. `Trie` is a thin,
    /// `Arc`-backed handle, so cloning it does not copy node data.
    pub fn tree(&self, commit: &Hash) -> Option<Trie> {
        self.entries
            .read()
            .expect("forest lock poisoned")
            .get(commit)
            .map(|entry| entry.trie.clone())
    }

    pub fn parent(&self, commit: &Hash) -> Option<Hash> {
        self.entries.read().expect("forest lock poisoned").get(commit)?.parent
    }

    pub fn touched(&self, commit: &Hash) -> Option<Vec<Path>> {
        self.entries
            .read()
            .expect("forest lock poisoned")
            .get(commit)
            .map(|entry| entry.touched.clone())
    }

    /// Deletes every retained trie except `finalized`. Node memory shared
    /// by `finalized` is kept alive through its own references; everything
    /// else is dropped once no live `Trie` handle points at it.
    pub fn reset(&self, finalized: Hash) {
        let mut entries = self.entries.write().expect("forest lock poisoned");
        let dropped = entries.len().saturating_sub(1);
        entries.retain(|commit, _| *commit == finalized);
        tracing::info!(%finalized, dropped, "reset forest to a finalized commitment");
    }

    pub fn trees(&self) -> Vec<Trie> {
        self.entries
            .read()
            .expect("forest lock poisoned")
            .values()
            .map(|entry| entry.trie.clone())
            .collect()
    }

    pub fn commitments(&self) -> Vec<Hash> {
        self.entries.read().expect("forest lock poisoned").keys().copied().collect()
    }

    /// Ledger read adapter: finds the trie rooted at `commit` and reads
    /// `paths`, returning one output per input in input order. Duplicate
    /// inputs are deduplicated internally and their results fanned back out.
    pub fn read(&self, commit: &Hash, paths: &[Path]) -> Result<Vec<Option<Vec<u8>>>, ForestError> {
        let trie = self.tree(commit).ok_or(ForestError::UnknownCommitment(*commit))?;

        let mut unique: Vec<Path> = paths.to_vec();
        unique.sort_by_key(|p| p.0);
        unique.dedup();

        let results = trie.read(&unique)?;
        let by_path: FxHashMap<Path, Option<Vec<u8>>> = unique.into_iter().zip(results).collect();

        Ok(paths.iter().map(|p| by_path.get(p).cloned().flatten()).collect())
    }

    /// Ledger update adapter: finds the trie rooted at `commit`, applies
    /// `writes`, retains the resulting trie under its new commitment (with
    /// `commit` as parent), and returns the new root hash.
    pub fn update(&self, commit: &Hash, writes: &[(Path, Vec<u8>)]) -> Result<Hash, ForestError> {
        let parent_trie = self.tree(commit).ok_or(ForestError::UnknownCommitment(*commit))?;
        let next = parent_trie.mutate(writes)?;
        let next_hash = next.root_hash();
        let touched: Vec<Path> = writes.iter().map(|(p, _)| *p).collect();
        self.add(next, touched, Some(*commit));
        Ok(next_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_trie::InMemoryPayloadSource;
    use std::sync::Arc;

    fn path_from_u8(tag: u8) -> Path {
        let mut bytes = [0u8; 32];
        bytes[0] = tag;
        Path::from_bytes(bytes)
    }

    fn empty_trie() -> Trie {
        Trie::empty(Arc::new(InMemoryPayloadSource::new()))
    }

    #[test]
    fn add_and_lookup_round_trips() {
        let forest = Forest::new();
        let root = empty_trie();
        let root_hash = root.root_hash();
        forest.add(root, Vec::new(), None);

        assert!(forest.has(&root_hash));
        assert!(forest.tree(&root_hash).is_some());
        assert_eq!(forest.parent(&root_hash), None);
    }

    #[test]
    fn update_chains_parent_commitments() {
        let forest = Forest::new();
        let root = empty_trie();
        let root_hash = root.root_hash();
        forest.add(root, Vec::new(), None);

        let writes = vec![(path_from_u8(1), vec![9, 9])];
        let next_hash = forest.update(&root_hash, &writes).unwrap();

        assert_eq!(forest.parent(&next_hash), Some(root_hash));
        assert_eq!(forest.touched(&next_hash), Some(vec![path_from_u8(1)]));
    }

    #[test]
    fn read_adapter_preserves_input_order_and_duplicates() {
        let forest = Forest::new();
        let root = empty_trie();
        let root_hash = root.root_hash();
        forest.add(root, Vec::new(), None);

        let writes = vec![(path_from_u8(1), vec![1]), (path_from_u8(2), vec![2])];
        let next_hash = forest.update(&root_hash, &writes).unwrap();

        let queries = vec![path_from_u8(2), path_from_u8(1), path_from_u8(2), path_from_u8(9)];
        let results = forest.read(&next_hash, &queries).unwrap();

        assert_eq!(results, vec![Some(vec![2]), Some(vec![1]), Some(vec![2]), None]);
    }

    #[test]
    fn reset_drops_every_entry_but_the_finalized_one() {
        let forest = Forest::new();
        let root = empty_trie();
        let root_hash = root.root_hash();
        forest.add(root, Vec::new(), None);

        let next_hash = forest.update(&root_hash, &[(path_from_u8(1), vec![1])]).unwrap();
        forest.reset(next_hash);

        assert!(!forest.has(&root_hash));
        assert!(forest.has(&next_hash));
        assert_eq!(forest.commitments(), vec![next_hash]);
    }

    #[test]
    fn unknown_commitment_is_reported_distinctly() {
        let forest = Forest::new();
        let bogus = Hash([7u8; 32]);
        let err = forest.read(&bogus, &[]).unwrap_err();
        assert!(matches!(err, ForestError::UnknownCommitment(_)));
    }
}
