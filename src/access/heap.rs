use crate::access::scan::HeapScan;
use crate::access::tuple::TupleId;
use crate::concurrency::Permission;
use crate::storage::buffer::BufferPool;
use crate::storage::disk::PageManager;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{HeapPage, HeapPageLayout, Page, PageId, PageStore, TableId};
use crate::transaction::TransactionId;
use log::debug;
use std::path::Path;
use std::sync::Arc;

/// A table stored as an unordered file of heap pages holding fixed-width rows.
pub struct HeapFile {
    table_id: TableId,
    pages: PageManager,
    layout: HeapPageLayout,
}

impl HeapFile {
    /// Creates an empty table file, truncating anything already at `path`.
    pub fn create(path: &Path, table_id: TableId, layout: HeapPageLayout) -> StorageResult<Self> {
        let pages = PageManager::create(path, layout.page_size())?;
        Ok(Self {
            table_id,
            pages,
            layout,
        })
    }

    pub fn open(path: &Path, table_id: TableId, layout: HeapPageLayout) -> StorageResult<Self> {
        let pages = PageManager::open(path, layout.page_size())?;
        Ok(Self {
            table_id,
            pages,
            layout,
        })
    }

    pub fn layout(&self) -> HeapPageLayout {
        self.layout
    }

    pub fn path(&self) -> &Path {
        self.pages.path()
    }

    /// Appends a zero-filled page. Page numbers are never handed out twice.
    pub fn allocate_page(&self) -> StorageResult<PageId> {
        let page_no = self.pages.allocate_page()?;
        let page_id = PageId::new(self.table_id, page_no);
        debug!("{} grew to {} pages", self.table_id, page_no + 1);
        Ok(page_id)
    }

    /// Opens a cursor over every live row, in page then slot order.
    pub fn scan(self: &Arc<Self>, pool: &BufferPool, tid: TransactionId) -> StorageResult<HeapScan> {
        let mut scan = HeapScan::new(pool.clone(), Arc::clone(self), tid);
        scan.open()?;
        Ok(scan)
    }

    fn check_page(&self, page_id: PageId) -> StorageResult<()> {
        if page_id.table_id != self.table_id {
            return Err(StorageError::InvalidArgument(format!(
                "{} does not belong to {}",
                page_id, self.table_id
            )));
        }
        Ok(())
    }

    /// Puts `row` on `page_id` if it has a free slot.
    ///
    /// The page is inspected under a shared lock and upgraded only when it has
    /// room, so full pages stay readable by others until `tid` completes.
    fn try_insert(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        page_id: PageId,
        row: &[u8],
    ) -> StorageResult<Option<u16>> {
        let has_room = {
            let handle = pool.get_page(tid, page_id, Permission::ReadOnly)?;
            let page = handle.read();
            HeapPage::from_data(page.data(), self.layout)
                .first_free_slot()
                .is_some()
        };
        if !has_room {
            return Ok(None);
        }

        // The shared lock keeps other writers out, so the slot is still free
        let handle = pool.get_page(tid, page_id, Permission::ReadWrite)?;
        let mut page = handle.write()?;
        let slot_id = HeapPage::from_data(page.data_mut(), self.layout).insert_row(row)?;
        Ok(Some(slot_id))
    }
}

impl PageStore for HeapFile {
    fn table_id(&self) -> TableId {
        self.table_id
    }

    fn page_size(&self) -> usize {
        self.layout.page_size()
    }

    fn read_page(&self, page_id: PageId) -> StorageResult<Page> {
        self.check_page(page_id)?;
        let mut data = vec![0u8; self.layout.page_size()];
        self.pages.read_page(page_id, &mut data)?;
        Ok(Page::new(page_id, data))
    }

    fn write_page(&self, page: &Page) -> StorageResult<()> {
        self.check_page(page.id())?;
        self.pages.write_page(page.id(), page.data())
    }

    fn page_count(&self) -> StorageResult<u32> {
        self.pages.num_pages()
    }

    fn insert_row(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        row: &[u8],
    ) -> StorageResult<(TupleId, Vec<PageId>)> {
        if row.len() != self.layout.row_width() {
            return Err(StorageError::InvalidArgument(format!(
                "row is {} bytes, {} rows are {} bytes",
                row.len(),
                self.table_id,
                self.layout.row_width()
            )));
        }

        let mut page_no = 0;
        loop {
            let page_count = self.pages.num_pages()?;
            while page_no < page_count {
                let page_id = PageId::new(self.table_id, page_no);
                if let Some(slot_id) = self.try_insert(pool, tid, page_id, row)? {
                    return Ok((TupleId::new(page_id, slot_id), vec![page_id]));
                }
                page_no += 1;
            }

            // Every page is full. Another inserter may claim the new page
            // first, in which case the next pass moves past it.
            self.allocate_page()?;
        }
    }

    fn delete_row(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        tuple_id: TupleId,
    ) -> StorageResult<Vec<PageId>> {
        let page_id = tuple_id.page_id;
        self.check_page(page_id)?;

        let handle = pool.get_page(tid, page_id, Permission::ReadWrite)?;
        {
            let page = handle.read();
            HeapPage::from_data(page.data(), self.layout).get_row(tuple_id.slot_id)?;
        }

        let mut page = handle.write()?;
        HeapPage::from_data(page.data_mut(), self.layout).delete_row(tuple_id.slot_id)?;
        Ok(vec![page_id])
    }
}
