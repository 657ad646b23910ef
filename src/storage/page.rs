pub mod heap_page;

use crate::access::TupleId;
use crate::storage::buffer::BufferPool;
use crate::storage::error::StorageResult;
use crate::transaction::TransactionId;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::Path;

pub use heap_page::{HeapPage, HeapPageLayout};

/// Identifier of a table, and of the file backing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableId(pub u32);

impl TableId {
    /// Derives an id from the absolute path of a table file. Stable for the
    /// lifetime of the process, which is all the page cache needs.
    pub fn for_path(path: &Path) -> Self {
        let absolute = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let mut hasher = DefaultHasher::new();
        absolute.hash(&mut hasher);
        TableId(hasher.finish() as u32)
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Table{}", self.0)
    }
}

/// Identity of one physical page: the table it belongs to and its position in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageId {
    pub table_id: TableId,
    pub page_no: u32,
}

impl PageId {
    pub fn new(table_id: TableId, page_no: u32) -> Self {
        Self { table_id, page_no }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Page({}:{})", self.table_id.0, self.page_no)
    }
}

/// In-memory copy of a page. Dirty iff some transaction has mutated it since
/// it was last read from or written to its store.
#[derive(Debug, Clone)]
pub struct Page {
    id: PageId,
    data: Box<[u8]>,
    dirtied_by: Option<TransactionId>,
}

impl Page {
    pub fn new(id: PageId, data: Vec<u8>) -> Self {
        Self {
            id,
            data: data.into_boxed_slice(),
            dirtied_by: None,
        }
    }

    /// A zero-initialized page, which decodes as a heap page with every slot free.
    pub fn empty(id: PageId, page_size: usize) -> Self {
        Self::new(id, vec![0u8; page_size])
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn is_dirty(&self) -> bool {
        self.dirtied_by.is_some()
    }

    /// The transaction that last dirtied this page, if it is dirty.
    pub fn dirtied_by(&self) -> Option<TransactionId> {
        self.dirtied_by
    }

    /// Sets (`Some`) or clears (`None`) the dirty owner.
    pub fn mark_dirty(&mut self, tid: Option<TransactionId>) {
        self.dirtied_by = tid;
    }

    /// Replaces the bytes with a fresh image and marks the page clean.
    pub(crate) fn restore(&mut self, image: Page) {
        self.data = image.data;
        self.dirtied_by = None;
    }
}

/// A table's backing storage, as seen by the buffer pool.
///
/// Physical I/O (`read_page`, `write_page`, `page_count`) never goes through the
/// cache. Row mutation (`insert_row`, `delete_row`) goes through the pool so every
/// page it touches is locked and cached first; both return the pages they dirtied.
pub trait PageStore: Send + Sync {
    fn table_id(&self) -> TableId;

    fn page_size(&self) -> usize;

    fn read_page(&self, page_id: PageId) -> StorageResult<Page>;

    fn write_page(&self, page: &Page) -> StorageResult<()>;

    fn page_count(&self) -> StorageResult<u32>;

    fn insert_row(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        row: &[u8],
    ) -> StorageResult<(TupleId, Vec<PageId>)>;

    fn delete_row(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        tuple_id: TupleId,
    ) -> StorageResult<Vec<PageId>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_id_equality() {
        let a = PageId::new(TableId(1), 2);
        assert_eq!(a, PageId::new(TableId(1), 2));
        assert_ne!(a, PageId::new(TableId(1), 3));
        assert_ne!(a, PageId::new(TableId(2), 2));
        assert_eq!(a.to_string(), "Page(1:2)");
    }

    #[test]
    fn test_dirty_tracking() {
        let mut page = Page::empty(PageId::new(TableId(1), 0), 64);
        assert!(!page.is_dirty());

        page.mark_dirty(Some(TransactionId::new(7)));
        assert!(page.is_dirty());
        assert_eq!(page.dirtied_by(), Some(TransactionId::new(7)));

        page.data_mut()[0] = 1;
        page.restore(Page::empty(page.id(), 64));
        assert!(!page.is_dirty());
        assert_eq!(page.data()[0], 0);
    }

    #[test]
    fn test_table_id_for_path_is_stable() {
        let path = Path::new("/tmp/heapdb-does-not-exist.tbl");
        assert_eq!(TableId::for_path(path), TableId::for_path(path));
    }
}
