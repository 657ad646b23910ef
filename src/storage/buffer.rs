pub mod lru;
pub mod replacer;

use crate::access::{Tuple, TupleId};
use crate::concurrency::{LockManager, LockMode, Permission};
use crate::config::StorageConfig;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{Page, PageId, PageStore, TableId};
use crate::transaction::{TransactionId, TransactionIdGenerator};
use dashmap::DashMap;
use log::{debug, trace, warn};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use self::lru::LruReplacer;
use self::replacer::Replacer;
use std::sync::Arc;

type CachedPage = Arc<RwLock<Page>>;

/// Capacity-bounded page cache and the single entry point for page access.
///
/// Every page handed out is first locked for the requesting transaction
/// through the pool's own [`LockManager`]. Dirty pages are never evicted
/// (no-steal); they reach disk only when their transaction commits or on an
/// explicit flush.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<BufferPoolInner>,
}

struct BufferPoolInner {
    page_table: DashMap<PageId, CachedPage>,
    replacer: Mutex<Box<dyn Replacer>>,
    /// Serializes loading pages into the table, and with it eviction.
    admission: Mutex<()>,
    stores: DashMap<TableId, Arc<dyn PageStore>>,
    lock_manager: LockManager,
    transaction_ids: TransactionIdGenerator,
    capacity: usize,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Self {
        Self::with_replacer(capacity, Box::new(LruReplacer::new()))
    }

    pub fn from_config(config: &StorageConfig) -> StorageResult<Self> {
        config.validate()?;
        Ok(Self::new(config.pool_capacity))
    }

    pub fn with_replacer(capacity: usize, replacer: Box<dyn Replacer>) -> Self {
        Self {
            inner: Arc::new(BufferPoolInner {
                page_table: DashMap::with_capacity(capacity),
                replacer: Mutex::new(replacer),
                admission: Mutex::new(()),
                stores: DashMap::new(),
                lock_manager: LockManager::new(),
                transaction_ids: TransactionIdGenerator::new(),
                capacity,
            }),
        }
    }

    /// Makes a table's store reachable by its table id.
    pub fn register_store(&self, store: Arc<dyn PageStore>) {
        let table_id = store.table_id();
        if self.inner.stores.insert(table_id, store).is_some() {
            debug!("replaced store for {}", table_id);
        }
    }

    pub fn store(&self, table_id: TableId) -> StorageResult<Arc<dyn PageStore>> {
        self.inner
            .stores
            .get(&table_id)
            .map(|store| Arc::clone(store.value()))
            .ok_or(StorageError::UnknownTable(table_id))
    }

    pub fn next_transaction_id(&self) -> TransactionId {
        self.inner.transaction_ids.next()
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.inner.lock_manager
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Number of resident pages.
    pub fn len(&self) -> usize {
        self.inner.page_table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.page_table.is_empty()
    }

    pub fn is_cached(&self, page_id: PageId) -> bool {
        self.inner.page_table.contains_key(&page_id)
    }

    pub fn is_dirty(&self, page_id: PageId) -> bool {
        self.cached(page_id)
            .map(|page| page.read().is_dirty())
            .unwrap_or(false)
    }

    /// Locks `page_id` for `tid` under `perm` (possibly blocking, possibly
    /// failing with `Deadlock`), then returns the cached page, loading it from
    /// its store and evicting a clean page first if the pool is full.
    pub fn get_page(
        &self,
        tid: TransactionId,
        page_id: PageId,
        perm: Permission,
    ) -> StorageResult<PageHandle> {
        self.inner.lock_manager.acquire(tid, page_id, perm)?;
        let page = self.fetch(page_id)?;

        Ok(PageHandle {
            pool: Arc::clone(&self.inner),
            page,
            page_id,
            tid,
            perm,
        })
    }

    /// Releases one lock before the transaction ends.
    ///
    /// Breaks strict two-phase locking; only for callers that know the page
    /// was never read in a way the transaction depends on.
    pub fn release_page(&self, tid: TransactionId, page_id: PageId) {
        self.inner.lock_manager.release(tid, page_id);
    }

    pub fn holds_lock(&self, tid: TransactionId, page_id: PageId) -> bool {
        self.inner.lock_manager.holds_lock(tid, page_id)
    }

    /// Inserts `row` into `table_id` on behalf of `tid`, returning where it landed.
    pub fn insert_tuple(
        &self,
        tid: TransactionId,
        table_id: TableId,
        row: &[u8],
    ) -> StorageResult<TupleId> {
        let store = self.store(table_id)?;
        let (tuple_id, dirtied) = store.insert_row(self, tid, row)?;
        self.mark_dirty(tid, &dirtied);
        Ok(tuple_id)
    }

    /// Deletes a stored tuple on behalf of `tid`.
    pub fn delete_tuple(&self, tid: TransactionId, tuple: &Tuple) -> StorageResult<()> {
        let tuple_id = tuple.tuple_id.ok_or_else(|| {
            StorageError::InvalidArgument("tuple has no stored location".to_string())
        })?;
        let store = self.store(tuple_id.page_id.table_id)?;
        let dirtied = store.delete_row(self, tid, tuple_id)?;
        self.mark_dirty(tid, &dirtied);
        Ok(())
    }

    /// Commits `tid`.
    pub fn commit(&self, tid: TransactionId) -> StorageResult<()> {
        self.transaction_complete(tid, true)
    }

    /// Ends `tid`. On commit, every page it holds exclusively is written to its
    /// store and stays cached, clean. On abort those pages are reset in place
    /// to their on-disk image. All of `tid`'s locks are then released.
    ///
    /// If writing or re-reading a page fails the locks stay held, so the caller
    /// can retry or abort.
    pub fn transaction_complete(&self, tid: TransactionId, commit: bool) -> StorageResult<()> {
        let pages = self.inner.lock_manager.exclusive_pages(tid);

        for page_id in &pages {
            if commit {
                self.flush_page(*page_id)?;
            } else {
                self.restore_page(*page_id)?;
            }
        }

        self.inner.lock_manager.release_all(tid);
        debug!(
            "{} {} ({} exclusive pages)",
            tid,
            if commit { "committed" } else { "aborted" },
            pages.len()
        );
        Ok(())
    }

    /// Writes every dirty resident page to its store.
    ///
    /// Bypasses no-steal for pages of running transactions; meant for
    /// checkpoints and tests.
    pub fn flush_all_pages(&self) -> StorageResult<()> {
        for page_id in self.resident_pages() {
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    /// Writes every resident page dirtied by `tid` to its store.
    pub fn flush_pages(&self, tid: TransactionId) -> StorageResult<()> {
        for page_id in self.resident_pages() {
            let dirtied_by_tid = self
                .cached(page_id)
                .map(|page| page.read().dirtied_by() == Some(tid))
                .unwrap_or(false);
            if dirtied_by_tid {
                self.flush_page(page_id)?;
            }
        }
        Ok(())
    }

    /// Drops `page_id` from the cache without writing it.
    pub fn discard_page(&self, page_id: PageId) {
        if self.inner.page_table.remove(&page_id).is_some() {
            debug!("discarded {}", page_id);
        }
        self.inner.replacer.lock().remove(page_id);
    }

    fn cached(&self, page_id: PageId) -> Option<CachedPage> {
        self.inner
            .page_table
            .get(&page_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    fn resident_pages(&self) -> Vec<PageId> {
        self.inner
            .page_table
            .iter()
            .map(|entry| *entry.key())
            .collect()
    }

    fn fetch(&self, page_id: PageId) -> StorageResult<CachedPage> {
        if let Some(page) = self.cached(page_id) {
            self.inner.replacer.lock().record_access(page_id);
            trace!("cache hit {}", page_id);
            return Ok(page);
        }

        let _admission = self.inner.admission.lock();

        // Another reader may have loaded it while we waited
        if let Some(page) = self.cached(page_id) {
            self.inner.replacer.lock().record_access(page_id);
            return Ok(page);
        }

        let store = self.store(page_id.table_id)?;
        let page = store.read_page(page_id)?;

        if self.inner.page_table.len() >= self.inner.capacity {
            self.evict_page()?;
        }

        let page = Arc::new(RwLock::new(page));
        self.inner.page_table.insert(page_id, Arc::clone(&page));
        self.inner.replacer.lock().record_access(page_id);
        debug!("loaded {}", page_id);

        Ok(page)
    }

    /// Removes the least recently used page that is clean and not held by any
    /// caller. Must run under the admission lock.
    fn evict_page(&self) -> StorageResult<()> {
        let candidates = self.inner.replacer.lock().candidates();

        for page_id in candidates {
            let evicted = self.inner.page_table.remove_if(&page_id, |_, page| {
                Arc::strong_count(page) == 1 && !page.read().is_dirty()
            });

            if evicted.is_some() || !self.inner.page_table.contains_key(&page_id) {
                self.inner.replacer.lock().remove(page_id);
            }
            if evicted.is_some() {
                debug!("evicted {}", page_id);
                return Ok(());
            }
        }

        warn!(
            "no evictable page among {} resident pages",
            self.inner.page_table.len()
        );
        Err(StorageError::NoEvictableFrame {
            capacity: self.inner.capacity,
        })
    }

    fn flush_page(&self, page_id: PageId) -> StorageResult<()> {
        let Some(page) = self.cached(page_id) else {
            return Ok(());
        };

        let mut page = page.write();
        if page.is_dirty() {
            self.store(page_id.table_id)?.write_page(&page)?;
            page.mark_dirty(None);
            debug!("flushed {}", page_id);
        }
        Ok(())
    }

    fn restore_page(&self, page_id: PageId) -> StorageResult<()> {
        let Some(page) = self.cached(page_id) else {
            return Ok(());
        };

        let image = self.store(page_id.table_id)?.read_page(page_id)?;
        page.write().restore(image);
        debug!("restored {} from disk", page_id);
        Ok(())
    }

    fn mark_dirty(&self, tid: TransactionId, pages: &[PageId]) {
        for page_id in pages {
            if let Some(page) = self.cached(*page_id) {
                page.write().mark_dirty(Some(tid));
            }
        }
    }
}

/// A cached page fetched by one transaction under one permission.
///
/// Holding a handle pins the page: it cannot be evicted until the handle is
/// dropped. Write access is only available to handles fetched `ReadWrite`,
/// and only while the fetching transaction still holds the page exclusively.
pub struct PageHandle {
    pool: Arc<BufferPoolInner>,
    page: CachedPage,
    page_id: PageId,
    tid: TransactionId,
    perm: Permission,
}

impl PageHandle {
    pub fn id(&self) -> PageId {
        self.page_id
    }

    pub fn permission(&self) -> Permission {
        self.perm
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Page> {
        self.page.read()
    }

    /// Write access to the page, which becomes dirty on behalf of the fetching
    /// transaction.
    pub fn write(&self) -> StorageResult<RwLockWriteGuard<'_, Page>> {
        if self.perm != Permission::ReadWrite {
            return Err(StorageError::ReadOnlyPage(self.page_id));
        }
        if self.pool.lock_manager.lock_mode(self.tid, self.page_id) != Some(LockMode::Exclusive) {
            return Err(StorageError::LockNotHeld {
                tid: self.tid,
                page_id: self.page_id,
            });
        }
        let mut page = self.page.write();
        page.mark_dirty(Some(self.tid));
        Ok(page)
    }
}
