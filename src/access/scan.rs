//! Sequential table scans.

use crate::access::heap::TableHeap;
use crate::access::tuple::Tuple;
use crate::concurrency::lock::LockMode;
use crate::storage::buffer::BufferPoolManager;
use crate::storage::error::StorageResult;
use crate::storage::page::PageId;
use crate::transaction::TransactionId;
use std::sync::Arc;
use std::vec;

/// Iterator over all tuples of a table in page and slot order.
///
/// Each page is locked shared for the scanning transaction when the scan
/// reaches it; the locks are kept until the transaction completes. An error
/// ends the iteration.
pub struct TableScanner {
    buffer_pool: BufferPoolManager,
    heap: Arc<TableHeap>,
    tx: TransactionId,
    next_page_no: u32,
    pending: vec::IntoIter<Tuple>,
    done: bool,
}

impl TableScanner {
    pub fn new(buffer_pool: BufferPoolManager, heap: Arc<TableHeap>, tx: TransactionId) -> Self {
        Self {
            buffer_pool,
            heap,
            tx,
            next_page_no: 0,
            pending: Vec::new().into_iter(),
            done: false,
        }
    }

    /// Start over from the first page.
    pub fn rewind(&mut self) {
        self.next_page_no = 0;
        self.pending = Vec::new().into_iter();
        self.done = false;
    }

    /// Load the tuples of the next page. Returns false past the last page.
    fn load_next_page(&mut self) -> StorageResult<bool> {
        if self.next_page_no >= self.heap.num_pages()? {
            return Ok(false);
        }
        let page_id = PageId::new(self.heap.table_id(), self.next_page_no);
        self.next_page_no += 1;

        let page = self.buffer_pool.get_page(self.tx, page_id, LockMode::Shared)?;
        let tuples = page.read().tuples()?;
        self.pending = tuples.into_iter();
        Ok(true)
    }
}

impl Iterator for TableScanner {
    type Item = StorageResult<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(tuple) = self.pending.next() {
                return Some(Ok(tuple));
            }
            if self.done {
                return None;
            }
            match self.load_next_page() {
                Ok(true) => continue,
                Ok(false) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
