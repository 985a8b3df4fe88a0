use crate::access::tuple::Schema;
use crate::access::TableHeap;
use crate::catalog::{Catalog, TableId};
use crate::storage::buffer::lru::LruReplacer;
use crate::storage::buffer::{BufferPoolManager, DEFAULT_POOL_PAGES};
use crate::storage::disk::{PageManager, DEFAULT_PAGE_SIZE};
use crate::storage::wal::{WalConfig, WalManager};
use crate::transaction::{Transaction, TransactionId, TransactionIdGenerator};
use anyhow::{bail, Context, Result};
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const WAL_FILE: &str = "wal.log";

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Directory holding one `<table>.tbl` file per table and the log.
    pub data_dir: PathBuf,
    /// Page size for newly created table files.
    pub page_size: usize,
    /// Buffer pool capacity in pages.
    pub buffer_pool_pages: usize,
    /// Sync the log file on every force.
    pub sync_log: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./pagedb_data"),
            page_size: DEFAULT_PAGE_SIZE,
            buffer_pool_pages: DEFAULT_POOL_PAGES,
            sync_log: true,
        }
    }
}

/// High-level database interface that integrates all layers
pub struct Database {
    config: DatabaseConfig,
    catalog: Catalog,
    buffer_pool: BufferPoolManager,
    wal_path: PathBuf,
    tx_ids: TransactionIdGenerator,
}

impl Database {
    /// Open the database in `config.data_dir`, creating the directory if
    /// needed. Tables must be registered again with
    /// [`create_table`](Self::create_table); existing files are reopened.
    pub fn open(config: DatabaseConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir).with_context(|| {
            format!("failed to create data directory {}", config.data_dir.display())
        })?;

        let wal_path = config.data_dir.join(WAL_FILE);
        let last_tx = if wal_path.exists() {
            WalManager::read_records(&wal_path)
                .with_context(|| format!("failed to read log {}", wal_path.display()))?
                .iter()
                .map(|record| record.transaction_id)
                .max()
        } else {
            None
        };
        let tx_ids = match last_tx {
            Some(last) => TransactionIdGenerator::starting_after(last),
            None => TransactionIdGenerator::new(),
        };

        let wal = WalManager::open(WalConfig {
            path: wal_path.clone(),
            sync_on_force: config.sync_log,
        })
        .with_context(|| format!("failed to open log {}", wal_path.display()))?;

        let catalog = Catalog::new();
        let buffer_pool = BufferPoolManager::new(
            catalog.clone(),
            Arc::new(wal),
            Box::new(LruReplacer::new()),
            config.buffer_pool_pages,
        );

        Ok(Self {
            config,
            catalog,
            buffer_pool,
            wal_path,
            tx_ids,
        })
    }

    /// Register table `name`, creating `<name>.tbl` or reopening it if it
    /// already exists.
    pub fn create_table(&self, name: &str, schema: Schema) -> Result<TableId> {
        if self.catalog.table_id(name).is_some() {
            bail!("table '{}' already exists", name);
        }

        let path = self.config.data_dir.join(format!("{}.tbl", name));
        let page_manager = PageManager::open_or_create(&path, self.config.page_size)
            .with_context(|| format!("failed to open table file {}", path.display()))?;
        let table_id = self.catalog.allocate_table_id();
        let heap = TableHeap::new(table_id, Arc::new(schema), page_manager);
        let pages = heap.num_pages()?;
        self.catalog.add_table(name, heap);

        info!("table '{}' registered as {} with {} pages", name, table_id, pages);
        Ok(table_id)
    }

    pub fn table_id(&self, name: &str) -> Option<TableId> {
        self.catalog.table_id(name)
    }

    pub fn schema(&self, table_id: TableId) -> Result<Arc<Schema>> {
        Ok(Arc::clone(self.catalog.table(table_id)?.schema()))
    }

    pub fn begin(&self) -> Transaction {
        Transaction::new(self.tx_ids.next(), self.buffer_pool.clone())
    }

    pub fn next_transaction_id(&self) -> TransactionId {
        self.tx_ids.next()
    }

    /// Write every dirty page, committed or not. Meant for shutdown.
    pub fn flush_all(&self) -> Result<()> {
        self.buffer_pool
            .flush_all_dirty()
            .context("failed to flush buffer pool")
    }

    pub fn buffer_pool(&self) -> &BufferPoolManager {
        &self.buffer_pool
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn wal_path(&self) -> &Path {
        &self.wal_path
    }
}
