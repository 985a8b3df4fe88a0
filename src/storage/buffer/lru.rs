use super::replacer::Replacer;
use crate::storage::page::PageId;
use std::collections::{BTreeMap, HashMap};

/// Least-recently-used replacer over all resident pages.
#[derive(Debug, Default)]
pub struct LruReplacer {
    /// Access tick -> page, oldest first.
    order: BTreeMap<u64, PageId>,
    /// Page -> its latest access tick, for O(log n) refresh and removal.
    last_access: HashMap<PageId, u64>,
    clock: u64,
}

impl LruReplacer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Replacer for LruReplacer {
    fn record_access(&mut self, page_id: PageId) {
        if let Some(tick) = self.last_access.remove(&page_id) {
            self.order.remove(&tick);
        }
        self.clock += 1;
        self.order.insert(self.clock, page_id);
        self.last_access.insert(page_id, self.clock);
    }

    fn remove(&mut self, page_id: PageId) {
        if let Some(tick) = self.last_access.remove(&page_id) {
            self.order.remove(&tick);
        }
    }

    fn victim(&self, is_evictable: &dyn Fn(PageId) -> bool) -> Option<PageId> {
        self.order
            .values()
            .copied()
            .find(|&page_id| is_evictable(page_id))
    }

    fn size(&self) -> usize {
        self.last_access.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TableId;

    fn page(n: u32) -> PageId {
        PageId::new(TableId(1), n)
    }

    fn any(_: PageId) -> bool {
        true
    }

    #[test]
    fn test_empty() {
        let replacer = LruReplacer::new();
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.victim(&any), None);
    }

    #[test]
    fn test_least_recent_first() {
        let mut replacer = LruReplacer::new();
        replacer.record_access(page(1));
        replacer.record_access(page(2));
        replacer.record_access(page(3));
        assert_eq!(replacer.size(), 3);

        assert_eq!(replacer.victim(&any), Some(page(1)));
        replacer.remove(page(1));
        assert_eq!(replacer.victim(&any), Some(page(2)));
    }

    #[test]
    fn test_access_refreshes() {
        let mut replacer = LruReplacer::new();
        replacer.record_access(page(1));
        replacer.record_access(page(2));
        replacer.record_access(page(1));

        assert_eq!(replacer.size(), 2);
        assert_eq!(replacer.victim(&any), Some(page(2)));
    }

    #[test]
    fn test_victim_does_not_remove() {
        let mut replacer = LruReplacer::new();
        replacer.record_access(page(1));

        assert_eq!(replacer.victim(&any), Some(page(1)));
        assert_eq!(replacer.victim(&any), Some(page(1)));
        assert_eq!(replacer.size(), 1);
    }

    #[test]
    fn test_skips_unevictable() {
        let mut replacer = LruReplacer::new();
        replacer.record_access(page(1));
        replacer.record_access(page(2));
        replacer.record_access(page(3));

        let pinned = |p: PageId| p != page(1) && p != page(2);
        assert_eq!(replacer.victim(&pinned), Some(page(3)));
        assert_eq!(replacer.victim(&|_| false), None);
    }

    #[test]
    fn test_remove_unknown_is_safe() {
        let mut replacer = LruReplacer::new();
        replacer.remove(page(999));
        assert_eq!(replacer.size(), 0);
    }
}
