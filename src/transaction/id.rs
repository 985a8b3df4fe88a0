//! Transaction handles.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque token naming one in-flight transaction. Carries no state of its own;
/// lock tables, the wait-for graph and dirty pages all refer to it by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionId(u64);

impl TransactionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tx{}", self.0)
    }
}

/// Hands out unique transaction ids, starting from 1.
pub struct TransactionIdGenerator {
    next_id: AtomicU64,
}

impl TransactionIdGenerator {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }

    /// Continue numbering after `last`, e.g. the highest id found in a log.
    pub fn starting_after(last: TransactionId) -> Self {
        Self {
            next_id: AtomicU64::new(last.value() + 1),
        }
    }

    pub fn next(&self) -> TransactionId {
        TransactionId::new(self.next_id.fetch_add(1, Ordering::SeqCst))
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
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_display() {
        assert_eq!(TransactionId::new(123).to_string(), "tx123");
    }

    #[test]
    fn test_generator_is_sequential() {
        let generator = TransactionIdGenerator::new();
        assert_eq!(generator.next().value(), 1);
        assert_eq!(generator.next().value(), 2);
        assert_eq!(generator.next().value(), 3);
    }

    #[test]
    fn test_generator_continues_after_last() {
        let generator = TransactionIdGenerator::starting_after(TransactionId::new(41));
        assert_eq!(generator.next(), TransactionId::new(42));
    }

    #[test]
    fn test_generator_unique_across_threads() {
        let generator = Arc::new(TransactionIdGenerator::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gen = Arc::clone(&generator);
                thread::spawn(move || (0..100).map(|_| gen.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(all.insert(id), "duplicate id {}", id);
            }
        }
        assert_eq!(all.len(), 800);
    }
}
