//! Storage layer.
//!
//! - **PageManager**: fixed-size page I/O on one table file
//! - **HeapPage**: slot bitmap page format holding fixed-width tuples
//! - **BufferPoolManager**: transactional page cache with LRU eviction
//! - **WalManager**: append-only log written ahead of every page write

pub mod buffer;
pub mod disk;
pub mod error;
pub mod page;
pub mod wal;

pub use buffer::{BufferPoolManager, PageRef};
pub use disk::{PageManager, DEFAULT_PAGE_SIZE};
pub use error::{StorageError, StorageResult};
pub use page::{HeapPage, PageId};
