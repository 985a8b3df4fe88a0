//! Table registry.
//!
//! Maps table ids to the [`TableHeap`] that stores them, so the buffer pool
//! can find the file behind any [`PageId`](crate::storage::PageId).

use crate::access::TableHeap;
use crate::storage::error::{StorageError, StorageResult};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableId(pub u32);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct CatalogInner {
    tables: DashMap<TableId, Arc<TableHeap>>,
    names: DashMap<String, TableId>,
    next_table_id: AtomicU32,
}

/// Cheaply cloneable handle to the shared table registry.
#[derive(Clone)]
pub struct Catalog {
    inner: Arc<CatalogInner>,
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CatalogInner {
                tables: DashMap::new(),
                names: DashMap::new(),
                next_table_id: AtomicU32::new(1),
            }),
        }
    }

    /// Reserve a fresh table id.
    pub fn allocate_table_id(&self) -> TableId {
        TableId(self.inner.next_table_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Register `heap` under `name`. A table registered again under the same
    /// name replaces the previous mapping.
    pub fn add_table(&self, name: &str, heap: impl Into<Arc<TableHeap>>) -> Arc<TableHeap> {
        let heap = heap.into();
        let table_id = heap.table_id();
        self.inner.tables.insert(table_id, Arc::clone(&heap));
        self.inner.names.insert(name.to_string(), table_id);
        heap
    }

    /// Unregister `name`. The table file stays on disk.
    pub fn remove_table(&self, name: &str) -> Option<Arc<TableHeap>> {
        let (_, table_id) = self.inner.names.remove(name)?;
        self.inner.tables.remove(&table_id).map(|(_, heap)| heap)
    }

    pub fn table(&self, table_id: TableId) -> StorageResult<Arc<TableHeap>> {
        self.inner
            .tables
            .get(&table_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(StorageError::TableNotFound(table_id))
    }

    pub fn table_id(&self, name: &str) -> Option<TableId> {
        self.inner.names.get(name).map(|entry| *entry.value())
    }

    pub fn table_ids(&self) -> Vec<TableId> {
        let mut ids: Vec<_> = self.inner.tables.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}
