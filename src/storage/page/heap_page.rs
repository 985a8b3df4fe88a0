//! Fixed-length slotted page.
//!
//! Layout for a schema whose tuples take `S` bytes on a page of `P` bytes:
//!
//! ```text
//! | used-slot bitmap: ceil(N / 8) bytes | slot 0 | slot 1 | ... | slot N-1 | padding |
//! ```
//!
//! where `N = floor(P * 8 / (S * 8 + 1))`, so each slot costs its bytes plus one
//! header bit. An all-zero buffer is a valid empty page, which lets the page
//! manager append new pages without knowing the schema.

use crate::access::tuple::{RecordId, Schema, Tuple};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;
use crate::transaction::TransactionId;
use bytes::Bytes;
use std::sync::Arc;

/// In-memory image of one heap page plus its cache bookkeeping: which
/// transaction dirtied it and what it looked like at the last flush.
#[derive(Debug)]
pub struct HeapPage {
    id: PageId,
    schema: Arc<Schema>,
    data: Vec<u8>,
    dirtier: Option<TransactionId>,
    before_image: Bytes,
}

impl HeapPage {
    pub fn new(id: PageId, schema: Arc<Schema>, data: Vec<u8>) -> StorageResult<Self> {
        let min_size = schema.tuple_size() + 1;
        if Self::slot_count(data.len(), schema.tuple_size()) == 0 {
            return Err(StorageError::InvalidPageSize {
                expected: min_size,
                actual: data.len(),
            });
        }

        let before_image = Bytes::copy_from_slice(&data);
        Ok(Self {
            id,
            schema,
            data,
            dirtier: None,
            before_image,
        })
    }

    pub fn empty(id: PageId, schema: Arc<Schema>, page_size: usize) -> StorageResult<Self> {
        Self::new(id, schema, vec![0u8; page_size])
    }

    fn slot_count(page_size: usize, tuple_size: usize) -> usize {
        (page_size * 8) / (tuple_size * 8 + 1)
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn page_size(&self) -> usize {
        self.data.len()
    }

    pub fn num_slots(&self) -> usize {
        Self::slot_count(self.data.len(), self.schema.tuple_size())
    }

    fn header_len(&self) -> usize {
        self.num_slots().div_ceil(8)
    }

    fn slot_range(&self, slot: usize) -> std::ops::Range<usize> {
        let size = self.schema.tuple_size();
        let start = self.header_len() + slot * size;
        start..start + size
    }

    pub fn is_slot_used(&self, slot: usize) -> bool {
        slot < self.num_slots() && self.data[slot / 8] & (1 << (slot % 8)) != 0
    }

    fn set_slot_used(&mut self, slot: usize, used: bool) {
        if used {
            self.data[slot / 8] |= 1 << (slot % 8);
        } else {
            self.data[slot / 8] &= !(1 << (slot % 8));
        }
    }

    pub fn free_slots(&self) -> usize {
        (0..self.num_slots())
            .filter(|&slot| !self.is_slot_used(slot))
            .count()
    }

    /// Store `tuple` in the first free slot and stamp its record id.
    pub fn insert_tuple(&mut self, tuple: &mut Tuple) -> StorageResult<RecordId> {
        if tuple.schema().as_ref() != self.schema.as_ref() {
            return Err(StorageError::SchemaMismatch(self.id.table_id));
        }

        let slot = (0..self.num_slots())
            .find(|&slot| !self.is_slot_used(slot))
            .ok_or(StorageError::PageFull(self.id))?;

        let range = self.slot_range(slot);
        self.schema.encode(tuple.values(), &mut self.data[range])?;
        self.set_slot_used(slot, true);

        let record_id = RecordId::new(self.id, slot as u16);
        tuple.set_record_id(Some(record_id));
        Ok(record_id)
    }

    pub fn delete_tuple(&mut self, tuple: &Tuple) -> StorageResult<()> {
        if tuple.schema().as_ref() != self.schema.as_ref() {
            return Err(StorageError::SchemaMismatch(self.id.table_id));
        }
        let record_id = tuple.record_id().ok_or(StorageError::MissingRecordId)?;
        let slot = record_id.slot as usize;
        if record_id.page_id != self.id || !self.is_slot_used(slot) {
            return Err(StorageError::TupleNotFound {
                page_id: record_id.page_id,
                slot: record_id.slot,
            });
        }

        let range = self.slot_range(slot);
        self.data[range].fill(0);
        self.set_slot_used(slot, false);
        Ok(())
    }

    pub fn get_tuple(&self, slot: usize) -> StorageResult<Option<Tuple>> {
        if !self.is_slot_used(slot) {
            return Ok(None);
        }
        let values = self.schema.decode(&self.data[self.slot_range(slot)])?;
        let mut tuple = Tuple::new(self.schema.clone(), values)?;
        tuple.set_record_id(Some(RecordId::new(self.id, slot as u16)));
        Ok(Some(tuple))
    }

    /// All stored tuples in slot order.
    pub fn tuples(&self) -> StorageResult<Vec<Tuple>> {
        let mut tuples = Vec::new();
        for slot in 0..self.num_slots() {
            if let Some(tuple) = self.get_tuple(slot)? {
                tuples.push(tuple);
            }
        }
        Ok(tuples)
    }

    /// The transaction that last dirtied this page, if it is dirty.
    pub fn is_dirty(&self) -> Option<TransactionId> {
        self.dirtier
    }

    pub fn mark_dirty(&mut self, dirtier: Option<TransactionId>) {
        self.dirtier = dirtier;
    }

    pub fn before_image(&self) -> &Bytes {
        &self.before_image
    }

    /// Snapshot the current content as the new before-image.
    pub fn set_before_image(&mut self) {
        self.before_image = Bytes::copy_from_slice(&self.data);
    }
}
