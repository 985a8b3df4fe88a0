//! Buffer pool.
//!
//! Every page access goes through [`BufferPoolManager::get_page`], which first
//! takes the page lock for the requesting transaction and only then serves the
//! page from memory or loads it from its table file. Resident pages are shared
//! with callers as [`PageRef`]s; a page is pinned while any caller still holds
//! its `PageRef` and is never chosen for eviction then.
//!
//! Locking order: the lock manager's mutex is never held across a call into
//! the pool. The pool mutex may be held while taking a page latch, never the
//! other way round, so callers must drop page guards before calling back in.

pub mod lru;
pub mod replacer;

use crate::access::tuple::{RecordId, Tuple};
use crate::catalog::{Catalog, TableId};
use crate::concurrency::lock::{LockManager, LockMode};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{HeapPage, PageId};
use crate::storage::wal::LogSink;
use crate::transaction::TransactionId;
use bytes::Bytes;
use log::debug;
use parking_lot::{Mutex, RwLock};
use replacer::Replacer;
use std::collections::HashMap;
use std::sync::Arc;

pub const DEFAULT_POOL_PAGES: usize = 50;

/// Shared handle to a resident page. The latch only protects memory; which
/// transaction may read or write the page is decided by the lock manager.
pub type PageRef = Arc<RwLock<HeapPage>>;

#[derive(Clone)]
pub struct BufferPoolManager {
    inner: Arc<BufferPoolInner>,
}

struct BufferPoolInner {
    state: Mutex<PoolState>,
    lock_manager: LockManager,
    catalog: Catalog,
    log: Arc<dyn LogSink>,
    capacity: usize,
}

struct PoolState {
    pages: HashMap<PageId, PageRef>,
    replacer: Box<dyn Replacer>,
    /// Pre-transaction images of pages that were written to disk while the
    /// transaction that dirtied them was still running. Abort writes them back.
    stolen: HashMap<TransactionId, HashMap<PageId, Bytes>>,
}

impl BufferPoolManager {
    pub fn new(
        catalog: Catalog,
        log: Arc<dyn LogSink>,
        replacer: Box<dyn Replacer>,
        capacity: usize,
    ) -> Self {
        Self {
            inner: Arc::new(BufferPoolInner {
                state: Mutex::new(PoolState {
                    pages: HashMap::with_capacity(capacity),
                    replacer,
                    stolen: HashMap::new(),
                }),
                lock_manager: LockManager::new(),
                catalog,
                log,
                capacity,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.inner.lock_manager
    }

    /// Fetch `page_id` on behalf of `tx` with the given lock mode.
    ///
    /// Blocks until the lock is granted, or fails with
    /// [`StorageError::Deadlock`] without blocking.
    pub fn get_page(
        &self,
        tx: TransactionId,
        page_id: PageId,
        mode: LockMode,
    ) -> StorageResult<PageRef> {
        self.inner.lock_manager.acquire(tx, page_id, mode)?;

        let mut guard = self.inner.state.lock();
        let state = &mut *guard;

        if let Some(page) = state.pages.get(&page_id) {
            state.replacer.record_access(page_id);
            return Ok(Arc::clone(page));
        }

        // Eviction flush and disk read run inside this one pool critical
        // section: a page id is never loaded twice, and no other pool call
        // proceeds while the I/O is in flight.
        if state.pages.len() >= self.inner.capacity {
            self.evict_page(state)?;
        }

        let heap = self.inner.catalog.table(page_id.table_id)?;
        let page = Arc::new(RwLock::new(heap.read_page(page_id)?));
        state.pages.insert(page_id, Arc::clone(&page));
        state.replacer.record_access(page_id);
        debug!("{} loaded {}", tx, page_id);

        Ok(page)
    }

    /// Add `tuple` to table `table_id`, stamping its record id.
    pub fn insert_tuple(
        &self,
        tx: TransactionId,
        table_id: TableId,
        tuple: &mut Tuple,
    ) -> StorageResult<RecordId> {
        let heap = self.inner.catalog.table(table_id)?;
        let dirtied = heap.insert_tuple(self, tx, tuple)?;
        self.mark_dirty(tx, dirtied)?;
        tuple.record_id().ok_or(StorageError::MissingRecordId)
    }

    /// Remove `tuple` from the table its record id points into.
    pub fn delete_tuple(&self, tx: TransactionId, tuple: &Tuple) -> StorageResult<()> {
        let record_id = tuple.record_id().ok_or(StorageError::MissingRecordId)?;
        let heap = self.inner.catalog.table(record_id.page_id.table_id)?;
        let dirtied = heap.delete_tuple(self, tx, tuple)?;
        self.mark_dirty(tx, dirtied)
    }

    /// Mark `pages` as dirtied by `tx` and make them the resident version,
    /// replacing whatever copy the pool holds.
    pub fn mark_dirty(&self, tx: TransactionId, pages: Vec<PageRef>) -> StorageResult<()> {
        for page in pages {
            let page_id = {
                let mut latch = page.write();
                latch.mark_dirty(Some(tx));
                latch.id()
            };

            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            if !state.pages.contains_key(&page_id) && state.pages.len() >= self.inner.capacity {
                self.evict_page(state)?;
            }
            state.pages.insert(page_id, page);
            state.replacer.record_access(page_id);
        }
        Ok(())
    }

    /// Write `page_id` to disk if it is resident and dirty.
    pub fn flush_page(&self, page_id: PageId) -> StorageResult<()> {
        let mut guard = self.inner.state.lock();
        self.flush_locked(&mut guard, page_id)
    }

    /// Write every dirty page of `tx` to disk without completing it.
    pub fn flush_pages(&self, tx: TransactionId) -> StorageResult<()> {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        for page_id in Self::dirty_pages(state, Some(tx)) {
            self.flush_locked(state, page_id)?;
        }
        Ok(())
    }

    /// Write every dirty resident page to disk. Only for tests and shutdown:
    /// it writes uncommitted changes too.
    pub fn flush_all_dirty(&self) -> StorageResult<()> {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        for page_id in Self::dirty_pages(state, None) {
            self.flush_locked(state, page_id)?;
        }
        Ok(())
    }

    /// Drop `page_id` from the pool without writing it.
    pub fn discard(&self, page_id: PageId) {
        let mut state = self.inner.state.lock();
        state.pages.remove(&page_id);
        state.replacer.remove(page_id);
    }

    /// Finish `tx`. On commit its dirty pages are flushed; on abort they are
    /// dropped and any of them already written to disk are restored. The
    /// transaction's locks are released in every case, including when the
    /// commit flush itself fails.
    pub fn transaction_complete(&self, tx: TransactionId, commit: bool) -> StorageResult<()> {
        let outcome = if commit {
            self.commit_pages(tx)
        } else {
            self.abort_pages(tx)
        };

        self.inner.lock_manager.release_all(tx);
        debug!(
            "{} {}",
            tx,
            if commit { "committed" } else { "aborted" }
        );
        outcome
    }

    /// Release one page lock before the transaction ends. This breaks strict
    /// two-phase locking; only callers that know the page was not used to
    /// make a decision may do it.
    pub fn release_page(&self, tx: TransactionId, page_id: PageId) {
        self.inner.lock_manager.release(tx, page_id);
    }

    pub fn holds_lock(&self, tx: TransactionId, page_id: PageId) -> bool {
        self.inner.lock_manager.holds(tx, page_id)
    }

    pub fn is_resident(&self, page_id: PageId) -> bool {
        self.inner.state.lock().pages.contains_key(&page_id)
    }

    pub fn resident_pages(&self) -> Vec<PageId> {
        let state = self.inner.state.lock();
        let mut pages: Vec<_> = state.pages.keys().copied().collect();
        pages.sort();
        pages
    }

    fn commit_pages(&self, tx: TransactionId) -> StorageResult<()> {
        {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            let flushed = Self::dirty_pages(state, Some(tx))
                .into_iter()
                .try_for_each(|page_id| self.flush_locked(state, page_id));
            // Commit never undoes, so saved images go whether or not the
            // flush went through.
            state.stolen.remove(&tx);
            flushed?;
        }

        self.inner.log.log_commit(tx)?;
        self.inner.log.force()
    }

    fn abort_pages(&self, tx: TransactionId) -> StorageResult<()> {
        {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            let dirtied = Self::dirty_pages(state, Some(tx));
            let mut stolen = state.stolen.remove(&tx).unwrap_or_default();

            for page_id in dirtied.iter().chain(stolen.keys()) {
                state.pages.remove(page_id);
                state.replacer.remove(*page_id);
            }

            let restored = self.restore_stolen(tx, &mut stolen);
            if !stolen.is_empty() {
                state.stolen.insert(tx, stolen);
            }
            restored?;
        }

        self.inner.log.log_abort(tx)?;
        self.inner.log.force()
    }

    /// Write saved images back in page order, dropping each one only once it
    /// is on disk. On failure the unwritten ones remain in `images`.
    fn restore_stolen(
        &self,
        tx: TransactionId,
        images: &mut HashMap<PageId, Bytes>,
    ) -> StorageResult<()> {
        let mut pending: Vec<_> = images.keys().copied().collect();
        pending.sort();

        for page_id in pending {
            debug!("{} restoring {} written before abort", tx, page_id);
            let heap = self.inner.catalog.table(page_id.table_id)?;
            if let Some(image) = images.get(&page_id) {
                heap.write_raw(page_id, image)?;
            }
            images.remove(&page_id);
        }
        Ok(())
    }

    #[cfg(test)]
    fn saved_image_count(&self, tx: TransactionId) -> usize {
        self.inner
            .state
            .lock()
            .stolen
            .get(&tx)
            .map_or(0, |images| images.len())
    }

    /// Log, then write one dirty page. On any failure the page keeps its
    /// dirty mark and content.
    fn flush_locked(&self, state: &mut PoolState, page_id: PageId) -> StorageResult<()> {
        let Some(page) = state.pages.get(&page_id) else {
            return Ok(());
        };
        let mut page = page.write();
        let Some(dirtier) = page.is_dirty() else {
            return Ok(());
        };

        let heap = self.inner.catalog.table(page_id.table_id)?;
        self.inner
            .log
            .log_write(dirtier, page_id, page.before_image(), page.data())?;
        self.inner.log.force()?;
        heap.write_page(&page)?;

        state
            .stolen
            .entry(dirtier)
            .or_default()
            .entry(page_id)
            .or_insert_with(|| page.before_image().clone());
        page.mark_dirty(None);
        page.set_before_image();
        debug!("flushed {} dirtied by {}", page_id, dirtier);

        Ok(())
    }

    /// Make room for one page: flush and drop the least recently used
    /// resident page that no caller is holding.
    fn evict_page(&self, state: &mut PoolState) -> StorageResult<()> {
        let pages = &state.pages;
        let victim = state
            .replacer
            .victim(&|page_id| {
                pages
                    .get(&page_id)
                    .map_or(true, |page| Arc::strong_count(page) == 1)
            })
            .ok_or(StorageError::BufferPoolFull)?;

        self.flush_locked(state, victim)?;
        state.pages.remove(&victim);
        state.replacer.remove(victim);
        debug!("evicted {}", victim);

        Ok(())
    }

    /// Resident pages dirtied by `tx`, or by anyone when `tx` is `None`.
    fn dirty_pages(state: &PoolState, tx: Option<TransactionId>) -> Vec<PageId> {
        let mut dirty: Vec<_> = state
            .pages
            .iter()
            .filter(|(_, page)| {
                let dirtier = page.read().is_dirty();
                match tx {
                    Some(tx) => dirtier == Some(tx),
                    None => dirtier.is_some(),
                }
            })
            .map(|(page_id, _)| *page_id)
            .collect();
        dirty.sort();
        dirty
    }
}
