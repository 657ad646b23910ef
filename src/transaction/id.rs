//! Transaction identifiers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque token naming one unit of work. All bookkeeping tied to a
/// transaction (held locks, dirtied pages) lives in the lock manager and the
/// buffer pool, keyed by this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(u64);

impl TransactionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Txn{}", self.0)
    }
}

/// Hands out unique, increasing transaction ids starting from 1.
#[derive(Debug)]
pub struct TransactionIdGenerator {
    next_id: AtomicU64,
}

impl TransactionIdGenerator {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }

    pub fn next(&self) -> TransactionId {
        TransactionId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for TransactionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_display_and_ordering() {
        let id = TransactionId::new(123);
        assert_eq!(id.to_string(), "Txn123");
        assert_eq!(id.value(), 123);
        assert!(TransactionId::new(1) < TransactionId::new(2));
    }

    #[test]
    fn test_generator_sequence() {
        let generator = TransactionIdGenerator::new();
        assert_eq!(generator.next().value(), 1);
        assert_eq!(generator.next().value(), 2);
    }

    #[test]
    fn test_generator_unique_across_threads() {
        let generator = Arc::new(TransactionIdGenerator::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let generator = Arc::clone(&generator);
                thread::spawn(move || (0..100).map(|_| generator.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut ids: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .map(|id| id.value())
            .collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 800);
    }
}
