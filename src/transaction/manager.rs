//! Transaction handle.

use super::id::TransactionId;
use crate::access::scan::TableScanner;
use crate::access::tuple::{RecordId, Tuple};
use crate::catalog::TableId;
use crate::concurrency::lock::LockMode;
use crate::storage::buffer::{BufferPoolManager, PageRef};
use crate::storage::error::StorageResult;
use crate::storage::page::PageId;
use log::warn;

/// A running transaction.
///
/// All page access goes through the shared buffer pool under this
/// transaction's id. Consuming the handle with [`commit`](Self::commit) or
/// [`abort`](Self::abort) completes it; dropping it unfinished aborts it.
pub struct Transaction {
    id: TransactionId,
    buffer_pool: BufferPoolManager,
    completed: bool,
}

impl Transaction {
    pub fn new(id: TransactionId, buffer_pool: BufferPoolManager) -> Self {
        Self {
            id,
            buffer_pool,
            completed: false,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn get_page(&self, page_id: PageId, mode: LockMode) -> StorageResult<PageRef> {
        self.buffer_pool.get_page(self.id, page_id, mode)
    }

    pub fn insert_tuple(&self, table_id: TableId, tuple: &mut Tuple) -> StorageResult<RecordId> {
        self.buffer_pool.insert_tuple(self.id, table_id, tuple)
    }

    pub fn delete_tuple(&self, tuple: &Tuple) -> StorageResult<()> {
        self.buffer_pool.delete_tuple(self.id, tuple)
    }

    pub fn scan(&self, table_id: TableId) -> StorageResult<TableScanner> {
        let heap = self.buffer_pool.catalog().table(table_id)?;
        Ok(heap.scan(&self.buffer_pool, self.id))
    }

    /// Write this transaction's dirty pages to disk without completing it.
    pub fn flush(&self) -> StorageResult<()> {
        self.buffer_pool.flush_pages(self.id)
    }

    pub fn commit(mut self) -> StorageResult<()> {
        self.completed = true;
        self.buffer_pool.transaction_complete(self.id, true)
    }

    pub fn abort(mut self) -> StorageResult<()> {
        self.completed = true;
        self.buffer_pool.transaction_complete(self.id, false)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        warn!("{} dropped while running, aborting", self.id);
        if let Err(e) = self.buffer_pool.transaction_complete(self.id, false) {
            warn!("{} abort on drop failed: {}", self.id, e);
        }
    }
}
