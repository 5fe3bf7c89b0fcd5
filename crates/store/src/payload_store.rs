use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lru::LruCache;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use flow_trie::{Hash, PayloadSource, TrieError};

use crate::engine::PersistentEngine;
use crate::error::StoreError;

/// Tuning knobs for [`PayloadStore`]. Mirrored (field-for-field) by
/// `flow-config`'s `envy`-loaded configuration struct.
#[derive(Debug, Clone)]
pub struct PayloadStoreOptions {
    /// Maximum number of entries kept in the in-memory LRU.
    pub cache_size: usize,
    /// Maximum number of commits the background writer may have in flight
    /// at once.
    pub commit_concurrency: usize,
    /// How often the flusher commits whatever is pending.
    pub flush_interval: Duration,
    /// How often the proactive persister checks LRU occupancy.
    pub proactive_persist_interval: Duration,
}

impl Default for PayloadStoreOptions {
    fn default() -> Self {
        Self {
            cache_size: 1 << 20,
            commit_concurrency: 16,
            flush_interval: Duration::from_secs(1),
            proactive_persist_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Default)]
struct Staged {
    /// Evicted entries not yet handed to a commit task.
    pending: HashMap<Hash, Vec<u8>>,
    /// Batches currently being committed, kept visible to `retrieve` until
    /// their commit finishes: a value can be evicted from the cache and
    /// handed to a commit task before that commit lands, and reads must
    /// still see it in the meantime.
    in_flight: Vec<Arc<HashMap<Hash, Vec<u8>>>>,
}

struct Inner {
    engine: Arc<dyn PersistentEngine>,
    cache: Mutex<LruCache<Hash, Vec<u8>>>,
    staged: Mutex<Staged>,
    cache_capacity: usize,
    commit_semaphore: Arc<Semaphore>,
    commit_handles: Mutex<Vec<JoinHandle<()>>>,
    closed: std::sync::atomic::AtomicBool,
}

/// An LRU-cached, write-behind mapping from content hash to payload bytes.
///
/// Writes land in the cache and are evicted into a background writer that
/// batches them onto the persistent engine; a periodic flusher and a
/// proactive persister keep both latency and memory bounded under
/// sustained ingestion.
#[derive(Clone)]
pub struct PayloadStore {
    inner: Arc<Inner>,
    _flusher: Arc<JoinHandle<()>>,
    _proactive: Arc<JoinHandle<()>>,
}

impl PayloadStore {
    pub fn new(engine: Arc<dyn PersistentEngine>, options: PayloadStoreOptions) -> Self {
        let cache_capacity = options.cache_size.max(1);
        let inner = Arc::new(Inner {
            engine,
            cache: Mutex::new(LruCache::new(NonZeroUsize::new(cache_capacity).unwrap_or(NonZeroUsize::MIN))),
            staged: Mutex::new(Staged::default()),
            cache_capacity,
            commit_semaphore: Arc::new(Semaphore::new(options.commit_concurrency.max(1))),
            commit_handles: Mutex::new(Vec::new()),
            closed: std::sync::atomic::AtomicBool::new(false),
        });

        let flusher = tokio::spawn(flush_loop(inner.clone(), options.flush_interval));
        let proactive = tokio::spawn(proactive_persist_loop(inner.clone(), options.proactive_persist_interval));

        PayloadStore {
            inner,
            _flusher: Arc::new(flusher),
            _proactive: Arc::new(proactive),
        }
    }

    /// Inserts `value` under `hash`. Never blocks on I/O; eviction from the
    /// LRU (if the cache is at capacity) is handed to the background writer.
    pub fn save(&self, hash: Hash, value: Vec<u8>) -> Result<(), StoreError> {
        if self.inner.closed.load(std::sync::atomic::Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        let evicted = {
            let mut cache = self.inner.cache.lock().expect("payload cache lock poisoned");
            cache.push(hash, value)
        };
        if let Some((evicted_hash, evicted_value)) = evicted {
            self.stage(evicted_hash, evicted_value);
        }
        Ok(())
    }

    /// Looks up `hash` across the cache, any in-flight write-behind batch,
    /// and finally the persistent engine.
    pub fn retrieve(&self, hash: &Hash) -> Result<Vec<u8>, StoreError> {
        if let Some(value) = self.inner.cache.lock().expect("payload cache lock poisoned").get(hash) {
            return Ok(value.clone());
        }
        {
            let staged = self.inner.staged.lock().expect("staged lock poisoned");
            if let Some(value) = staged.pending.get(hash) {
                return Ok(value.clone());
            }
            for batch in staged.in_flight.iter().rev() {
                if let Some(value) = batch.get(hash) {
                    return Ok(value.clone());
                }
            }
        }
        self.inner
            .engine
            .get(hash)?
            .ok_or_else(|| StoreError::Missing(*hash))
    }

    fn stage(&self, hash: Hash, value: Vec<u8>) {
        let mut staged = self.inner.staged.lock().expect("staged lock poisoned");
        staged.pending.insert(hash, value);
    }

    /// Flushes all pending writes, waits for every in-flight commit to
    /// finish, and closes the backing engine. Further calls to `save`/
    /// `retrieve` fail with [`StoreError::Closed`].
    pub async fn close(&self) -> Result<(), StoreError> {
        tracing::info!("closing payload store, flushing remaining writes");
        self.inner.closed.store(true, std::sync::atomic::Ordering::Release);
        rotate_pending(&self.inner);

        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.inner.commit_handles.lock().expect("commit handles lock poisoned");
            std::mem::take(&mut *guard)
        };
        for handle in handles {
            let _ = handle.await;
        }
        self.inner.engine.close()
    }
}

impl PayloadSource for PayloadStore {
    fn get(&self, hash: &Hash) -> Result<Option<Vec<u8>>, TrieError> {
        match self.retrieve(hash) {
            Ok(value) => Ok(Some(value)),
            Err(StoreError::Missing(_)) => Ok(None),
            Err(e) => Err(TrieError::store(e)),
        }
    }

    fn put(&self, hash: Hash, value: Vec<u8>) -> Result<(), TrieError> {
        self.save(hash, value).map_err(TrieError::store)
    }
}

async fn flush_loop(inner: Arc<Inner>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if inner.closed.load(std::sync::atomic::Ordering::Acquire) {
            return;
        }
        rotate_pending(&inner);
    }
}

async fn proactive_persist_loop(inner: Arc<Inner>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if inner.closed.load(std::sync::atomic::Ordering::Acquire) {
            return;
        }
        let half = inner.cache_capacity / 2;
        loop {
            let evicted = {
                let mut cache = inner.cache.lock().expect("payload cache lock poisoned");
                if cache.len() <= half {
                    None
                } else {
                    cache.pop_lru()
                }
            };
            match evicted {
                Some((hash, value)) => {
                    let mut staged = inner.staged.lock().expect("staged lock poisoned");
                    staged.pending.insert(hash, value);
                    tracing::trace!(%hash, "proactively persisted a cache entry");
                }
                None => break,
            }
        }
    }
}

/// Takes whatever is currently pending and hands it to a background commit
/// task, bounded by the commit semaphore.
fn rotate_pending(inner: &Arc<Inner>) {
    let batch_arc = {
        let mut staged = inner.staged.lock().expect("staged lock poisoned");
        if staged.pending.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut staged.pending);
        let batch_arc = Arc::new(batch);
        staged.in_flight.push(batch_arc.clone());
        batch_arc
    };

    tracing::debug!(entries = batch_arc.len(), "rotating pending writes to a commit task");
    let inner = inner.clone();
    let handle = tokio::spawn(async move {
        let permit = inner.commit_semaphore.clone().acquire_owned().await;
        let entries: Vec<(Hash, Vec<u8>)> = batch_arc.iter().map(|(h, v)| (*h, v.clone())).collect();
        let batch_size = entries.len();
        let engine = inner.engine.clone();
        let result = tokio::task::spawn_blocking(move || engine.commit_batch(entries))
            .await
            .unwrap_or_else(|e| Err(StoreError::Io(anyhow::anyhow!("commit task panicked: {e}"))));

        let mut staged = inner.staged.lock().expect("staged lock poisoned");
        staged.in_flight.retain(|b| !Arc::ptr_eq(b, &batch_arc));
        if let Err(ref e) = result {
            tracing::warn!(error = %e, entries = batch_size, "commit failed, requeuing batch for the next tick");
            for (hash, value) in batch_arc.iter() {
                staged.pending.entry(*hash).or_insert_with(|| value.clone());
            }
        } else {
            tracing::debug!(entries = batch_size, "committed batch to the persistent engine");
        }
        drop(permit);
    });

    inner.commit_handles.lock().expect("commit handles lock poisoned").push(handle);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::in_memory::InMemoryEngine;

    fn hash_of(byte: u8) -> Hash {
        Hash([byte; 32])
    }

    #[tokio::test]
    async fn read_after_write_through_cache() {
        let store = PayloadStore::new(Arc::new(InMemoryEngine::new()), PayloadStoreOptions::default());
        store.save(hash_of(1), vec![1, 2, 3]).unwrap();
        assert_eq!(store.retrieve(&hash_of(1)).unwrap(), vec![1, 2, 3]);
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn missing_key_is_distinguished_from_io_error() {
        let store = PayloadStore::new(Arc::new(InMemoryEngine::new()), PayloadStoreOptions::default());
        let err = store.retrieve(&hash_of(2)).unwrap_err();
        assert!(matches!(err, StoreError::Missing(_)));
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn eviction_persists_and_remains_readable() {
        let options = PayloadStoreOptions {
            cache_size: 2,
            ..Default::default()
        };
        let store = PayloadStore::new(Arc::new(InMemoryEngine::new()), options);
        store.save(hash_of(1), vec![1]).unwrap();
        store.save(hash_of(2), vec![2]).unwrap();
        store.save(hash_of(3), vec![3]).unwrap(); // evicts hash_of(1) from the cache
        assert_eq!(store.retrieve(&hash_of(1)).unwrap(), vec![1]);
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn close_flushes_pending_writes_durably() {
        let engine = Arc::new(InMemoryEngine::new());
        let store = PayloadStore::new(engine.clone(), PayloadStoreOptions::default());
        store.save(hash_of(9), vec![9, 9]).unwrap();
        store.close().await.unwrap();
        assert_eq!(engine.get(&hash_of(9)).unwrap(), Some(vec![9, 9]));
    }
}
