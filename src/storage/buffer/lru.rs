use super::replacer::Replacer;
use crate::storage::page::PageId;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default)]
pub struct LruReplacer {
    /// Access tick -> page, least recently used first
    order: BTreeMap<u64, PageId>,
    /// Page -> its latest access tick
    last_access: HashMap<PageId, u64>,
    clock: u64,
}

impl LruReplacer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Replacer for LruReplacer {
    fn record_access(&mut self, page_id: PageId) {
        self.clock += 1;
        if let Some(previous) = self.last_access.insert(page_id, self.clock) {
            self.order.remove(&previous);
        }
        self.order.insert(self.clock, page_id);
    }

    fn remove(&mut self, page_id: PageId) {
        if let Some(tick) = self.last_access.remove(&page_id) {
            self.order.remove(&tick);
        }
    }

    fn candidates(&self) -> Vec<PageId> {
        self.order.values().copied().collect()
    }
}
