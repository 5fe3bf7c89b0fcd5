use std::path::Path as FsPath;
use std::sync::Arc;

use flow_trie::Hash;
use libmdbx::orm::{table, Database};
use libmdbx::{DatabaseOptions, Mode, PageSize, ReadWriteOptions};

use super::PersistentEngine;
use crate::error::StoreError;

/// Recommended libmdbx page size (see libmdbx geometry docs).
const DB_PAGE_SIZE: usize = 4096;
/// Maximum map size for the payload table. Hitting this bound is reported by
/// libmdbx as `MDBX_MAP_FULL`, which [`map_mdbx_error`] turns into
/// [`StoreError::TransactionTooLarge`] so `commit_batch` can finish the
/// current transaction and keep going in a fresh one.
const MAX_MAP_SIZE: isize = 1024_isize.pow(4); // 1 TB

table!(
    /// hash -> payload bytes, the single table this engine needs.
    ( Payloads ) [u8; 32] => Vec<u8>
);

/// A [`PersistentEngine`] backed by libmdbx, collapsed to the single
/// content-addressed table this crate needs.
pub struct LibmdbxEngine {
    db: Arc<Database>,
}

impl std::fmt::Debug for LibmdbxEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibmdbxEngine").finish()
    }
}

impl LibmdbxEngine {
    pub fn open(path: impl AsRef<FsPath>) -> Result<Self, StoreError> {
        tracing::info!(path = %path.as_ref().display(), "opening libmdbx payload engine");
        let tables = [libmdbx::table_info!(Payloads)].into_iter().collect();
        let options = DatabaseOptions {
            page_size: Some(PageSize::Set(DB_PAGE_SIZE)),
            mode: Mode::ReadWrite(ReadWriteOptions {
                max_size: Some(MAX_MAP_SIZE),
                ..Default::default()
            }),
            ..Default::default()
        };
        let db = Database::create_with_options(Some(path.as_ref().to_path_buf()), options, &tables)
            .map_err(|e| StoreError::Io(anyhow::anyhow!(e)))?;
        Ok(Self { db: Arc::new(db) })
    }
}

impl PersistentEngine for LibmdbxEngine {
    fn get(&self, key: &Hash) -> Result<Option<Vec<u8>>, StoreError> {
        let txn = self.db.begin_read().map_err(map_mdbx_error)?;
        txn.get::<Payloads>(*key.as_bytes()).map_err(map_mdbx_error)
    }

    fn commit_batch(&self, batch: Vec<(Hash, Vec<u8>)>) -> Result<(), StoreError> {
        let mut remaining = batch.into_iter();
        'transactions: loop {
            let txn = self.db.begin_readwrite().map_err(map_mdbx_error)?;
            let mut wrote_any = false;
            for (key, value) in remaining.by_ref() {
                match txn.upsert::<Payloads>(*key.as_bytes(), value.clone()) {
                    Ok(()) => wrote_any = true,
                    Err(e) => match map_mdbx_error(e) {
                        StoreError::TransactionTooLarge => {
                            // Commit what we have so far and retry this entry
                            // (and the rest of `remaining`) in a fresh transaction.
                            tracing::warn!("libmdbx transaction too large, committing and retrying in a fresh one");
                            txn.commit().map_err(map_mdbx_error)?;
                            let retry_key = key;
                            let retry_value = value;
                            let rest: Vec<_> = remaining.collect();
                            remaining = std::iter::once((retry_key, retry_value)).chain(rest).collect::<Vec<_>>().into_iter();
                            continue 'transactions;
                        }
                        other => return Err(other),
                    },
                }
            }
            if wrote_any {
                txn.commit().map_err(map_mdbx_error)?;
            }
            return Ok(());
        }
    }

    fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// libmdbx surfaces the map-size limit as an opaque error code
/// (`MDBX_MAP_FULL`); we distinguish it by message so `commit_batch` can
/// commit-and-retry instead of failing the whole batch.
fn map_mdbx_error(err: anyhow::Error) -> StoreError {
    let message = err.to_string();
    if message.contains("MAP_FULL") || message.contains("-30791") {
        StoreError::TransactionTooLarge
    } else {
        StoreError::Io(err)
    }
}
