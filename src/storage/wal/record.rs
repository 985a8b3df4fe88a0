//! WAL record types.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::storage::error::StorageResult;
use crate::storage::PageId;
use crate::transaction::TransactionId;

/// Log Sequence Number. Monotonically increasing across the whole log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Lsn(pub u64);

impl Lsn {
    pub fn next(&self) -> Self {
        Lsn(self.0 + 1)
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LSN({})", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WalRecordPayload {
    /// Full page images around one flush of a dirty page.
    Update {
        page_id: PageId,
        before: Vec<u8>,
        after: Vec<u8>,
    },
    Commit,
    Abort,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalRecord {
    pub lsn: Lsn,
    pub transaction_id: TransactionId,
    pub payload: WalRecordPayload,
}

impl WalRecord {
    pub fn serialize(&self) -> StorageResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn deserialize(data: &[u8]) -> StorageResult<Self> {
        Ok(bincode::deserialize(data)?)
    }
}
