//! Storage layer error types.

use crate::storage::page::{PageId, TableId};
use crate::transaction::TransactionId;
use thiserror::Error;

/// Errors that can occur in the storage layer.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The requesting transaction would close a wait-for cycle and must be aborted.
    #[error("Deadlock detected: {tid} aborted while waiting for {page_id}")]
    Deadlock { tid: TransactionId, page_id: PageId },

    /// Every resident page is dirty or in use; nothing can be evicted under no-steal.
    #[error("Buffer pool is full: no clean page to evict among {capacity} frames")]
    NoEvictableFrame { capacity: usize },

    #[error("Page {page_id} is out of range (table has {page_count} pages)")]
    PageOutOfRange { page_id: PageId, page_count: u32 },

    #[error("Unknown table: {0}")]
    UnknownTable(TableId),

    #[error("Tuple not found: slot {slot_id} is empty or deleted")]
    TupleNotFound { slot_id: u16 },

    #[error("Invalid slot ID: {slot_id} (max: {max_slot})")]
    InvalidSlotId { slot_id: u16, max_slot: u16 },

    #[error("Page is full: no free slot among {num_slots}")]
    PageFull { num_slots: usize },

    /// A page handle was used for writing after its transaction gave up the lock.
    #[error("{tid} no longer holds an exclusive lock on {page_id}")]
    LockNotHeld { tid: TransactionId, page_id: PageId },

    #[error("Page {0} was fetched read-only")]
    ReadOnlyPage(PageId),

    #[error("Scan has no more tuples")]
    NoMoreTuples,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Whether the caller should abort its transaction and may retry it from scratch.
    pub fn is_deadlock(&self) -> bool {
        matches!(self, StorageError::Deadlock { .. })
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
