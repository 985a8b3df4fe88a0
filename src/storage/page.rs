pub mod heap_page;

use crate::catalog::TableId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one page of one table file.
///
/// Used as the key of both the buffer pool and the lock table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageId {
    pub table_id: TableId,
    pub page_no: u32,
}

impl PageId {
    pub fn new(table_id: TableId, page_no: u32) -> Self {
        Self { table_id, page_no }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}:p{}", self.table_id.0, self.page_no)
    }
}

pub use heap_page::HeapPage;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_page_id_equality_uses_both_fields() {
        let a = PageId::new(TableId(1), 7);
        let b = PageId::new(TableId(1), 7);
        let c = PageId::new(TableId(2), 7);
        let d = PageId::new(TableId(1), 8);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);

        let set: HashSet<PageId> = [a, b, c, d].into_iter().collect();
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_page_id_display() {
        assert_eq!(PageId::new(TableId(3), 12).to_string(), "t3:p12");
    }
}
