use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use flow_trie::Hash;

use super::PersistentEngine;
use crate::error::StoreError;

/// An in-memory [`PersistentEngine`] with no real size limit, used by tests
/// and by callers that don't need cross-process durability.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEngine(Arc<Mutex<HashMap<Hash, Vec<u8>>>>);

impl InMemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistentEngine for InMemoryEngine {
    fn get(&self, key: &Hash) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .0
            .lock()
            .map_err(|_| StoreError::Io(anyhow::anyhow!("in-memory engine lock poisoned")))?
            .get(key)
            .cloned())
    }

    fn commit_batch(&self, batch: Vec<(Hash, Vec<u8>)>) -> Result<(), StoreError> {
        let mut table = self
            .0
            .lock()
            .map_err(|_| StoreError::Io(anyhow::anyhow!("in-memory engine lock poisoned")))?;
        table.extend(batch);
        Ok(())
    }

    fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
