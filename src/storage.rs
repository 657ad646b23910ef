//! Storage layer implementation for heapdb.
//!
//! This module provides the page-based foundation the rest of the engine builds on:
//!
//! - **Page**: Fixed-size block of data identified by `(table, page number)`
//! - **PageManager**: Reads and writes pages of one table file
//! - **PageStore**: The per-table contract the buffer pool loads, flushes and mutates through
//! - **BufferPool**: Capacity-bounded page cache with no-steal LRU eviction and
//!   strict two-phase locking on every page it hands out
//! - **HeapPage**: Slot-bitmap page format for fixed-width rows

pub mod buffer;
pub mod disk;
pub mod error;
pub mod page;

pub use buffer::{BufferPool, PageHandle};
pub use disk::PageManager;
pub use error::{StorageError, StorageResult};
pub use page::{HeapPage, HeapPageLayout, Page, PageId, PageStore, TableId};
