use crate::access::value::{DataType, Value};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;
use std::fmt;
use std::sync::Arc;

/// Location of a tuple: the page it lives on and its slot within that page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot: u16,
}

impl RecordId {
    pub fn new(page_id: PageId, slot: u16) -> Self {
        Self { page_id, slot }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
}

/// Ordered column list of a table. Two schemas are the same table layout
/// iff they compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<(&str, DataType)>) -> Self {
        Self {
            columns: columns
                .into_iter()
                .map(|(name, data_type)| Column {
                    name: name.to_string(),
                    data_type,
                })
                .collect(),
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Bytes occupied by one tuple of this schema.
    pub fn tuple_size(&self) -> usize {
        self.columns.iter().map(|c| c.data_type.encoded_len()).sum()
    }

    /// Encode `values` into a slot buffer of exactly `tuple_size()` bytes.
    pub fn encode(&self, values: &[Value], buf: &mut [u8]) -> StorageResult<()> {
        let mut offset = 0;
        for (value, column) in values.iter().zip(&self.columns) {
            let len = column.data_type.encoded_len();
            value.encode(column.data_type, &mut buf[offset..offset + len])?;
            offset += len;
        }
        Ok(())
    }

    pub fn decode(&self, buf: &[u8]) -> StorageResult<Vec<Value>> {
        let mut offset = 0;
        let mut values = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            let len = column.data_type.encoded_len();
            values.push(Value::decode(column.data_type, &buf[offset..offset + len])?);
            offset += len;
        }
        Ok(values)
    }
}

/// A row together with its schema and, once stored, its location.
#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    schema: Arc<Schema>,
    values: Vec<Value>,
    record_id: Option<RecordId>,
}

impl Tuple {
    pub fn new(schema: Arc<Schema>, values: Vec<Value>) -> StorageResult<Self> {
        if values.len() != schema.len() {
            return Err(StorageError::TypeMismatch(format!(
                "expected {} values, got {}",
                schema.len(),
                values.len()
            )));
        }
        for (value, column) in values.iter().zip(schema.columns()) {
            if !value.is_compatible_with(column.data_type) {
                return Err(StorageError::TypeMismatch(format!(
                    "column {} is {:?}, got {:?}",
                    column.name, column.data_type, value
                )));
            }
        }

        Ok(Self {
            schema,
            values,
            record_id: None,
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.record_id
    }

    pub fn set_record_id(&mut self, record_id: Option<RecordId>) {
        self.record_id = record_id;
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields: Vec<String> = self.values.iter().map(|v| v.to_string()).collect();
        write!(f, "{}", fields.join(","))
    }
}
