use crate::access::scan::TableScanner;
use crate::access::tuple::{Schema, Tuple};
use crate::catalog::TableId;
use crate::concurrency::lock::LockMode;
use crate::storage::buffer::{BufferPoolManager, PageRef};
use crate::storage::disk::PageManager;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{HeapPage, PageId};
use crate::transaction::TransactionId;
use log::debug;
use parking_lot::Mutex;
use std::sync::Arc;

/// A table stored as a sequence of heap pages in one file.
///
/// Reads and writes of whole pages go straight to the file. Tuple changes go
/// through the buffer pool so that they are locked and cached; the pool is
/// passed in rather than owned, since the pool itself finds tables through
/// the catalog.
pub struct TableHeap {
    table_id: TableId,
    schema: Arc<Schema>,
    page_manager: Mutex<PageManager>,
}

impl TableHeap {
    pub fn new(table_id: TableId, schema: Arc<Schema>, page_manager: PageManager) -> Self {
        Self {
            table_id,
            schema,
            page_manager: Mutex::new(page_manager),
        }
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn page_size(&self) -> usize {
        self.page_manager.lock().page_size()
    }

    pub fn num_pages(&self) -> StorageResult<u32> {
        self.page_manager.lock().num_pages()
    }

    /// Read a page from the file, bypassing the buffer pool.
    pub fn read_page(&self, page_id: PageId) -> StorageResult<HeapPage> {
        if page_id.table_id != self.table_id {
            return Err(StorageError::PageNotFound(page_id));
        }
        let data = self
            .page_manager
            .lock()
            .read_page(page_id.page_no)?
            .ok_or(StorageError::PageNotFound(page_id))?;
        HeapPage::new(page_id, Arc::clone(&self.schema), data)
    }

    /// Write a page to the file, bypassing the buffer pool.
    pub fn write_page(&self, page: &HeapPage) -> StorageResult<()> {
        self.write_raw(page.id(), page.data())
    }

    pub fn write_raw(&self, page_id: PageId, data: &[u8]) -> StorageResult<()> {
        if page_id.table_id != self.table_id {
            return Err(StorageError::PageNotFound(page_id));
        }
        self.page_manager.lock().write_page(page_id.page_no, data)
    }

    /// Put `tuple` in the first page with a free slot, appending a new page
    /// when every existing one is full. Returns the page it modified.
    pub fn insert_tuple(
        &self,
        pool: &BufferPoolManager,
        tx: TransactionId,
        tuple: &mut Tuple,
    ) -> StorageResult<Vec<PageRef>> {
        if tuple.schema().as_ref() != self.schema.as_ref() {
            return Err(StorageError::SchemaMismatch(self.table_id));
        }

        // Every page visited stays exclusively locked until `tx` completes.
        for page_no in 0..self.num_pages()? {
            let page = pool.get_page(tx, PageId::new(self.table_id, page_no), LockMode::Exclusive)?;
            if Self::try_insert(&page, tuple)? {
                return Ok(vec![page]);
            }
        }

        // Another writer may fill a freshly appended page before we lock it.
        loop {
            let page_no = self.page_manager.lock().allocate_page()?;
            debug!("{} appended page {} to table {}", tx, page_no, self.table_id);

            let page = pool.get_page(tx, PageId::new(self.table_id, page_no), LockMode::Exclusive)?;
            if Self::try_insert(&page, tuple)? {
                return Ok(vec![page]);
            }
        }
    }

    /// Remove `tuple` from the page its record id names. Returns the page it
    /// modified.
    pub fn delete_tuple(
        &self,
        pool: &BufferPoolManager,
        tx: TransactionId,
        tuple: &Tuple,
    ) -> StorageResult<Vec<PageRef>> {
        if tuple.schema().as_ref() != self.schema.as_ref() {
            return Err(StorageError::SchemaMismatch(self.table_id));
        }
        let record_id = tuple.record_id().ok_or(StorageError::MissingRecordId)?;
        if record_id.page_id.table_id != self.table_id {
            return Err(StorageError::TupleNotFound {
                page_id: record_id.page_id,
                slot: record_id.slot,
            });
        }

        let page = pool.get_page(tx, record_id.page_id, LockMode::Exclusive)?;
        page.write().delete_tuple(tuple)?;
        Ok(vec![page])
    }

    /// Iterate over every tuple, taking a shared lock on each page visited.
    pub fn scan(self: &Arc<Self>, pool: &BufferPoolManager, tx: TransactionId) -> TableScanner {
        TableScanner::new(pool.clone(), Arc::clone(self), tx)
    }

    fn try_insert(page: &PageRef, tuple: &mut Tuple) -> StorageResult<bool> {
        let mut latch = page.write();
        if latch.free_slots() == 0 {
            return Ok(false);
        }
        latch.insert_tuple(tuple)?;
        Ok(true)
    }
}
