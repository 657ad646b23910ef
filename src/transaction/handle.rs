//! Scoped transaction handle over a buffer pool.

use super::id::TransactionId;
use crate::access::{HeapFile, HeapScan, Tuple, TupleId};
use crate::concurrency::Permission;
use crate::storage::buffer::{BufferPool, PageHandle};
use crate::storage::error::StorageResult;
use crate::storage::page::{PageId, TableId};
use log::warn;
use std::sync::Arc;

/// A running transaction that aborts on drop unless committed or aborted.
///
/// If `commit` or `abort` fails the handle is dropped unfinished. The drop
/// aborts again, and if that fails too it discards the pages the transaction
/// held exclusively and releases its locks anyway.
pub struct Transaction {
    id: TransactionId,
    pool: BufferPool,
    finished: bool,
}

impl Transaction {
    /// Starts a transaction with a fresh id from `pool`.
    pub fn begin(pool: &BufferPool) -> Self {
        Self {
            id: pool.next_transaction_id(),
            pool: pool.clone(),
            finished: false,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn get_page(&self, page_id: PageId, perm: Permission) -> StorageResult<PageHandle> {
        self.pool.get_page(self.id, page_id, perm)
    }

    pub fn insert(&self, table_id: TableId, row: &[u8]) -> StorageResult<TupleId> {
        self.pool.insert_tuple(self.id, table_id, row)
    }

    pub fn delete(&self, tuple: &Tuple) -> StorageResult<()> {
        self.pool.delete_tuple(self.id, tuple)
    }

    pub fn scan(&self, file: &Arc<HeapFile>) -> StorageResult<HeapScan> {
        file.scan(&self.pool, self.id)
    }

    pub fn commit(mut self) -> StorageResult<()> {
        self.pool.transaction_complete(self.id, true)?;
        self.finished = true;
        Ok(())
    }

    pub fn abort(mut self) -> StorageResult<()> {
        self.pool.transaction_complete(self.id, false)?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.pool.transaction_complete(self.id, false) {
            warn!("failed to abort {} on drop: {}", self.id, e);
            // Unrestorable changes leave the cache; the disk image is reloaded on demand
            let locks = self.pool.lock_manager();
            for page_id in locks.exclusive_pages(self.id) {
                self.pool.discard_page(page_id);
            }
            locks.release_all(self.id);
        }
    }
}
