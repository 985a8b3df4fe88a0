//! Write-ahead log.
//!
//! The buffer pool appends an update record carrying a page's before- and
//! after-image ahead of every page write, plus a commit or abort record at
//! the end of each transaction.

pub mod manager;
pub mod record;

pub use manager::{LogSink, WalConfig, WalManager};
pub use record::{Lsn, WalRecord, WalRecordPayload};
