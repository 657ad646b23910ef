//! Sequential scan cursor over a heap file.

use crate::access::heap::HeapFile;
use crate::access::tuple::{Tuple, TupleId};
use crate::concurrency::Permission;
use crate::storage::buffer::BufferPool;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{HeapPage, PageId, PageStore};
use crate::transaction::TransactionId;
use log::trace;
use std::sync::Arc;
use std::vec;

/// Cursor over every live row of one table, in page order then slot order.
///
/// Pages are fetched through the buffer pool under `ReadOnly`, one at a time
/// as the cursor reaches them. The shared locks taken stay with the
/// transaction until it completes; closing the cursor does not release them.
pub struct HeapScan {
    pool: BufferPool,
    file: Arc<HeapFile>,
    tid: TransactionId,
    next_page_no: u32,
    rows: Option<vec::IntoIter<Tuple>>,
}

impl HeapScan {
    /// A closed cursor. Call [`HeapScan::open`] before reading.
    pub fn new(pool: BufferPool, file: Arc<HeapFile>, tid: TransactionId) -> Self {
        Self {
            pool,
            file,
            tid,
            next_page_no: 0,
            rows: None,
        }
    }

    /// Positions the cursor on the first page holding at least one row.
    pub fn open(&mut self) -> StorageResult<()> {
        self.next_page_no = 0;
        self.rows = Some(Vec::new().into_iter());
        self.advance()?;
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.rows.is_some()
    }

    /// False once every page is exhausted, and on a closed cursor.
    pub fn has_next(&mut self) -> StorageResult<bool> {
        if !self.is_open() {
            return Ok(false);
        }
        self.advance()
    }

    pub fn next_tuple(&mut self) -> StorageResult<Tuple> {
        if !self.has_next()? {
            return Err(StorageError::NoMoreTuples);
        }
        self.rows
            .as_mut()
            .and_then(|rows| rows.next())
            .ok_or(StorageError::NoMoreTuples)
    }

    pub fn rewind(&mut self) -> StorageResult<()> {
        self.close();
        self.open()
    }

    pub fn close(&mut self) {
        self.rows = None;
    }

    /// Moves to the next non-empty page if the current one is used up.
    /// Returns whether a row is available.
    fn advance(&mut self) -> StorageResult<bool> {
        loop {
            let Some(rows) = self.rows.as_ref() else {
                return Ok(false);
            };
            if !rows.as_slice().is_empty() {
                return Ok(true);
            }

            if self.next_page_no >= self.file.page_count()? {
                return Ok(false);
            }

            let page_id = PageId::new(self.file.table_id(), self.next_page_no);
            let rows = self.load_rows(page_id)?;
            self.next_page_no += 1;
            self.rows = Some(rows.into_iter());
        }
    }

    fn load_rows(&self, page_id: PageId) -> StorageResult<Vec<Tuple>> {
        let handle = self.pool.get_page(self.tid, page_id, Permission::ReadOnly)?;
        let page = handle.read();
        let rows = HeapPage::from_data(page.data(), self.file.layout())
            .rows()
            .map(|(slot_id, data)| Tuple::new(TupleId::new(page_id, slot_id), data.to_vec()))
            .collect::<Vec<_>>();

        trace!("{} rows on {}", rows.len(), page_id);
        Ok(rows)
    }
}

impl Iterator for HeapScan {
    type Item = StorageResult<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.has_next() {
            Ok(true) => Some(self.next_tuple()),
            Ok(false) => None,
            Err(e) => {
                self.close();
                Some(Err(e))
            }
        }
    }
}
