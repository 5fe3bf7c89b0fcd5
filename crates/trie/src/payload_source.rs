use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::TrieError;
use crate::hash::Hash;

/// Content-addressed payload lookup the trie leans on to resolve a leaf
/// hash into its stored value. Implemented by `flow-store`'s `PayloadStore`
/// in the full workspace; an in-memory implementation is provided here for
/// unit tests that don't need a persistent backend.
///
/// Errors are reported as [`TrieError`] rather than a type-erased error, so
/// a caller propagating a [`PayloadSource`] failure through `Trie`'s own
/// `Result<_, TrieError>` API never has to guess what crossed the boundary.
pub trait PayloadSource: Send + Sync {
    fn get(&self, hash: &Hash) -> Result<Option<Vec<u8>>, TrieError>;
    fn put(&self, hash: Hash, value: Vec<u8>) -> Result<(), TrieError>;
}

/// A trivial, unbounded in-memory [`PayloadSource`] used by tests.
#[derive(Default)]
pub struct InMemoryPayloadSource {
    values: Mutex<HashMap<Hash, Vec<u8>>>,
}

impl InMemoryPayloadSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PayloadSource for InMemoryPayloadSource {
    fn get(&self, hash: &Hash) -> Result<Option<Vec<u8>>, TrieError> {
        Ok(self.values.lock().expect("payload source lock poisoned").get(hash).cloned())
    }

    fn put(&self, hash: Hash, value: Vec<u8>) -> Result<(), TrieError> {
        self.values.lock().expect("payload source lock poisoned").insert(hash, value);
        Ok(())
    }
}
