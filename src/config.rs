//! Engine configuration.

use crate::storage::error::{StorageError, StorageResult};

/// Default size of one page in bytes.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Default number of pages the buffer pool may hold.
pub const DEFAULT_POOL_PAGES: usize = 50;

/// Sizing knobs shared by the buffer pool and the page stores it serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageConfig {
    /// Bytes per page. Fixed for the lifetime of every store created with it.
    pub page_size: usize,
    /// Maximum number of resident pages in the buffer pool.
    pub pool_capacity: usize,
}

impl StorageConfig {
    pub fn new(page_size: usize, pool_capacity: usize) -> Self {
        Self {
            page_size,
            pool_capacity,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_pool_capacity(mut self, pool_capacity: usize) -> Self {
        self.pool_capacity = pool_capacity;
        self
    }

    pub fn validate(&self) -> StorageResult<()> {
        if self.page_size == 0 {
            return Err(StorageError::InvalidArgument(
                "page size must be non-zero".to_string(),
            ));
        }
        if self.pool_capacity == 0 {
            return Err(StorageError::InvalidArgument(
                "buffer pool capacity must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE, DEFAULT_POOL_PAGES)
    }
}
