//! WAL manager implementation.
//!
//! Records are appended to a single log file as a 4-byte little-endian length
//! followed by the bincode-encoded [`WalRecord`]. Appends are buffered; only
//! [`LogSink::force`] makes them durable.

use byteorder::{ByteOrder, LittleEndian};
use log::warn;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use super::record::{Lsn, WalRecord, WalRecordPayload};
use crate::storage::error::StorageResult;
use crate::storage::PageId;
use crate::transaction::TransactionId;

/// Where the buffer pool sends before/after images and transaction outcomes.
///
/// The buffer pool calls `force` after `log_write` and before writing the page
/// itself, so an implementation only has to make everything appended so far
/// durable when `force` returns.
pub trait LogSink: Send + Sync {
    fn log_write(
        &self,
        tx: TransactionId,
        page_id: PageId,
        before: &[u8],
        after: &[u8],
    ) -> StorageResult<Lsn>;

    fn log_commit(&self, tx: TransactionId) -> StorageResult<Lsn>;

    fn log_abort(&self, tx: TransactionId) -> StorageResult<Lsn>;

    fn force(&self) -> StorageResult<()>;
}

/// WAL manager configuration.
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Log file path.
    pub path: PathBuf,
    /// Whether `force` also syncs the file to disk.
    pub sync_on_force: bool,
}

impl WalConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sync_on_force: true,
        }
    }
}

struct WalState {
    writer: BufWriter<File>,
    next_lsn: Lsn,
    flushed_lsn: Lsn,
}

/// Append-only write-ahead log.
pub struct WalManager {
    config: WalConfig,
    state: Mutex<WalState>,
}

impl WalManager {
    /// Open the log at `config.path`, continuing LSNs after any records
    /// already in it. A torn record at the tail is cut off first, so new
    /// records follow the last complete one.
    pub fn open(config: WalConfig) -> StorageResult<Self> {
        let last_lsn = if config.path.exists() {
            let (records, valid_len) = Self::scan(&config.path)?;
            let file = OpenOptions::new().write(true).open(&config.path)?;
            if file.metadata()?.len() > valid_len {
                warn!(
                    "truncating torn tail of {} at byte {}",
                    config.path.display(),
                    valid_len
                );
                file.set_len(valid_len)?;
            }
            records.last().map(|record| record.lsn).unwrap_or(Lsn(0))
        } else {
            Lsn(0)
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.path)?;

        Ok(Self {
            config,
            state: Mutex::new(WalState {
                writer: BufWriter::new(file),
                next_lsn: last_lsn.next(),
                flushed_lsn: last_lsn,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Highest LSN known to be on disk.
    pub fn flushed_lsn(&self) -> Lsn {
        self.state.lock().flushed_lsn
    }

    fn append(&self, tx: TransactionId, payload: WalRecordPayload) -> StorageResult<Lsn> {
        let mut state = self.state.lock();
        let record = WalRecord {
            lsn: state.next_lsn,
            transaction_id: tx,
            payload,
        };
        let serialized = record.serialize()?;

        let mut len = [0u8; 4];
        LittleEndian::write_u32(&mut len, serialized.len() as u32);
        state.writer.write_all(&len)?;
        state.writer.write_all(&serialized)?;

        state.next_lsn = record.lsn.next();
        Ok(record.lsn)
    }

    /// Decode every complete record in the log at `path`. A torn record at
    /// the tail is ignored.
    pub fn read_records(path: &Path) -> StorageResult<Vec<WalRecord>> {
        Self::scan(path).map(|(records, _)| records)
    }

    /// Complete records plus the byte offset where the last one ends.
    fn scan(path: &Path) -> StorageResult<(Vec<WalRecord>, u64)> {
        let mut file = File::open(path)?;
        let mut records = Vec::new();
        let mut valid_len = 0u64;

        loop {
            let mut len = [0u8; 4];
            match file.read_exact(&mut len) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }

            let mut data = vec![0u8; LittleEndian::read_u32(&len) as usize];
            match file.read_exact(&mut data) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }

            records.push(WalRecord::deserialize(&data)?);
            valid_len += (len.len() + data.len()) as u64;
        }

        Ok((records, valid_len))
    }
}

impl LogSink for WalManager {
    fn log_write(
        &self,
        tx: TransactionId,
        page_id: PageId,
        before: &[u8],
        after: &[u8],
    ) -> StorageResult<Lsn> {
        self.append(
            tx,
            WalRecordPayload::Update {
                page_id,
                before: before.to_vec(),
                after: after.to_vec(),
            },
        )
    }

    fn log_commit(&self, tx: TransactionId) -> StorageResult<Lsn> {
        self.append(tx, WalRecordPayload::Commit)
    }

    fn log_abort(&self, tx: TransactionId) -> StorageResult<Lsn> {
        self.append(tx, WalRecordPayload::Abort)
    }

    fn force(&self) -> StorageResult<()> {
        let mut state = self.state.lock();
        state.writer.flush()?;
        if self.config.sync_on_force {
            state.writer.get_ref().sync_data()?;
        }
        state.flushed_lsn = Lsn(state.next_lsn.0 - 1);
        Ok(())
    }
}
