use crate::storage::page::PageId;
use std::fmt::Debug;

/// Victim ordering for the buffer pool. The replacer only ranks resident pages;
/// the pool decides whether a candidate is actually evictable.
pub trait Replacer: Send + Sync + Debug {
    /// Record a use of the page, making it the most recently used.
    fn record_access(&mut self, page_id: PageId);

    /// Stop tracking a page that left the pool.
    fn remove(&mut self, page_id: PageId);

    /// Tracked pages in eviction preference order.
    fn candidates(&self) -> Vec<PageId>;
}
