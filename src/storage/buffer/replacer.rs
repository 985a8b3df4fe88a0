use crate::storage::page::PageId;
use std::fmt::Debug;

/// Eviction policy of the buffer pool. Tracks every resident page; the pool
/// reports each access and each removal.
pub trait Replacer: Send + Debug {
    /// Note an access to `page_id`, tracking it if it is new.
    fn record_access(&mut self, page_id: PageId);

    /// Stop tracking `page_id`.
    fn remove(&mut self, page_id: PageId);

    /// The page the policy would evict next among those `is_evictable`
    /// accepts. Does not stop tracking it; the pool calls `remove` once the
    /// eviction actually happened.
    fn victim(&self, is_evictable: &dyn Fn(PageId) -> bool) -> Option<PageId>;

    /// Get the number of tracked pages.
    fn size(&self) -> usize;
}
