//! Transaction identity and scoped transaction handles.
//!
//! A transaction carries no state of its own: the locks it holds live in the
//! lock manager and the pages it dirtied are tagged in the buffer pool.

pub mod handle;
pub mod id;

pub use handle::Transaction;
pub use id::{TransactionId, TransactionIdGenerator};
