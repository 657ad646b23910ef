use crate::storage::page::PageId;
use std::fmt;

/// Location of a row: the page holding it and its slot on that page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TupleId {
    pub page_id: PageId,
    pub slot_id: u16,
}

impl TupleId {
    pub fn new(page_id: PageId, slot_id: u16) -> Self {
        Self { page_id, slot_id }
    }
}

impl fmt::Display for TupleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.page_id, self.slot_id)
    }
}

/// A fixed-width row, optionally tagged with where it is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tuple {
    pub tuple_id: Option<TupleId>,
    pub data: Vec<u8>,
}

impl Tuple {
    pub fn new(tuple_id: TupleId, data: Vec<u8>) -> Self {
        Self {
            tuple_id: Some(tuple_id),
            data,
        }
    }

    /// A row that has not been stored yet.
    pub fn unplaced(data: Vec<u8>) -> Self {
        Self {
            tuple_id: None,
            data,
        }
    }
}
