use crate::storage::error::{StorageError, StorageResult};

/// Geometry of a heap page holding fixed-width rows.
///
/// A page is a header bitmap followed by `num_slots` row slots of `row_width` bytes.
/// Each row costs `row_width * 8` bits of slot plus one header bit, so
/// `num_slots = floor(page_size * 8 / (row_width * 8 + 1))` and the header is
/// `ceil(num_slots / 8)` bytes. Slot `i` is live iff bit `i % 8` (LSB first) of
/// header byte `i / 8` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapPageLayout {
    page_size: usize,
    row_width: usize,
    num_slots: usize,
    header_len: usize,
}

impl HeapPageLayout {
    pub fn new(page_size: usize, row_width: usize) -> StorageResult<Self> {
        if row_width == 0 {
            return Err(StorageError::InvalidArgument(
                "row width must be non-zero".to_string(),
            ));
        }
        let num_slots = (page_size * 8) / (row_width * 8 + 1);
        if num_slots == 0 {
            return Err(StorageError::InvalidArgument(format!(
                "a {} byte row does not fit in a {} byte page",
                row_width, page_size
            )));
        }
        if num_slots > u16::MAX as usize {
            return Err(StorageError::InvalidArgument(format!(
                "{} slots per page exceeds the slot id range",
                num_slots
            )));
        }
        Ok(Self {
            page_size,
            row_width,
            num_slots,
            header_len: num_slots.div_ceil(8),
        })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn row_width(&self) -> usize {
        self.row_width
    }

    pub fn num_slots(&self) -> usize {
        self.num_slots
    }

    pub fn header_len(&self) -> usize {
        self.header_len
    }

    fn slot_range(&self, slot: usize) -> std::ops::Range<usize> {
        let start = self.header_len + slot * self.row_width;
        start..start + self.row_width
    }
}

/// View over the bytes of one heap page.
///
/// Read accessors work over any byte container; mutation needs `AsMut<[u8]>`.
pub struct HeapPage<T> {
    data: T,
    layout: HeapPageLayout,
}

impl<T: AsRef<[u8]>> HeapPage<T> {
    pub fn from_data(data: T, layout: HeapPageLayout) -> Self {
        debug_assert_eq!(data.as_ref().len(), layout.page_size);
        Self { data, layout }
    }

    pub fn layout(&self) -> HeapPageLayout {
        self.layout
    }

    pub fn is_slot_used(&self, slot_id: u16) -> bool {
        let slot = slot_id as usize;
        if slot >= self.layout.num_slots {
            return false;
        }
        self.data.as_ref()[slot / 8] & (1 << (slot % 8)) != 0
    }

    pub fn num_empty_slots(&self) -> usize {
        (0..self.layout.num_slots)
            .filter(|&slot| !self.is_slot_used(slot as u16))
            .count()
    }

    pub fn first_free_slot(&self) -> Option<u16> {
        (0..self.layout.num_slots as u16).find(|&slot| !self.is_slot_used(slot))
    }

    pub fn get_row(&self, slot_id: u16) -> StorageResult<&[u8]> {
        self.check_slot(slot_id)?;
        if !self.is_slot_used(slot_id) {
            return Err(StorageError::TupleNotFound { slot_id });
        }
        Ok(&self.data.as_ref()[self.layout.slot_range(slot_id as usize)])
    }

    /// Live rows in increasing slot order. Each call starts from slot 0.
    pub fn rows(&self) -> HeapPageRows<'_> {
        HeapPageRows {
            data: self.data.as_ref(),
            layout: self.layout,
            next_slot: 0,
        }
    }

    fn check_slot(&self, slot_id: u16) -> StorageResult<()> {
        if slot_id as usize >= self.layout.num_slots {
            return Err(StorageError::InvalidSlotId {
                slot_id,
                max_slot: (self.layout.num_slots - 1) as u16,
            });
        }
        Ok(())
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> HeapPage<T> {
    /// Writes `row` into the first free slot and marks it live.
    pub fn insert_row(&mut self, row: &[u8]) -> StorageResult<u16> {
        if row.len() != self.layout.row_width {
            return Err(StorageError::InvalidArgument(format!(
                "row is {} bytes, table rows are {} bytes",
                row.len(),
                self.layout.row_width
            )));
        }
        let slot_id = self.first_free_slot().ok_or(StorageError::PageFull {
            num_slots: self.layout.num_slots,
        })?;
        let range = self.layout.slot_range(slot_id as usize);
        self.data.as_mut()[range].copy_from_slice(row);
        self.set_slot(slot_id, true);
        Ok(slot_id)
    }

    /// Clears the slot's header bit. The row bytes stay in place.
    pub fn delete_row(&mut self, slot_id: u16) -> StorageResult<()> {
        self.check_slot(slot_id)?;
        if !self.is_slot_used(slot_id) {
            return Err(StorageError::TupleNotFound { slot_id });
        }
        self.set_slot(slot_id, false);
        Ok(())
    }

    fn set_slot(&mut self, slot_id: u16, used: bool) {
        let slot = slot_id as usize;
        let byte = &mut self.data.as_mut()[slot / 8];
        if used {
            *byte |= 1 << (slot % 8);
        } else {
            *byte &= !(1 << (slot % 8));
        }
    }
}

/// Iterator over the live rows of a heap page, yielding `(slot_id, row bytes)`.
pub struct HeapPageRows<'a> {
    data: &'a [u8],
    layout: HeapPageLayout,
    next_slot: usize,
}

impl<'a> Iterator for HeapPageRows<'a> {
    type Item = (u16, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        while self.next_slot < self.layout.num_slots {
            let slot = self.next_slot;
            self.next_slot += 1;
            if self.data[slot / 8] & (1 << (slot % 8)) != 0 {
                return Some((slot as u16, &self.data[self.layout.slot_range(slot)]));
            }
        }
        None
    }
}
