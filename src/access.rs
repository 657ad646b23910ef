//! Row-level access to tables stored as heap files.
//!
//! - **HeapFile**: a table file of fixed-width rows; inserts and deletes go
//!   through the buffer pool so every touched page is locked first
//! - **HeapScan**: a sequential cursor over a table's live rows
//! - **Tuple**: a row's bytes plus its stored location, if any

pub mod heap;
pub mod scan;
pub mod tuple;

pub use heap::HeapFile;
pub use scan::HeapScan;
pub use tuple::{Tuple, TupleId};
