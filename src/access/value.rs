use crate::storage::error::{StorageError, StorageResult};
use byteorder::{ByteOrder, LittleEndian};
use std::fmt;

/// Column types. Every type has a fixed encoded width so a schema maps to a
/// fixed tuple size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Boolean,
    Int32,
    Int64,
    /// String of at most `n` bytes, stored with a 2-byte length prefix.
    Char(u16),
}

impl DataType {
    /// Number of bytes a value of this type occupies inside a slot.
    pub fn encoded_len(&self) -> usize {
        match self {
            DataType::Boolean => 1,
            DataType::Int32 => 4,
            DataType::Int64 => 8,
            DataType::Char(n) => 2 + *n as usize,
        }
    }
}

/// Values that can be stored in a column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Char(String),
}

impl Value {
    /// Check if this value can be stored in a column of the given type.
    pub fn is_compatible_with(&self, data_type: DataType) -> bool {
        match (self, data_type) {
            (Value::Boolean(_), DataType::Boolean) => true,
            (Value::Int32(_), DataType::Int32) => true,
            (Value::Int64(_), DataType::Int64) => true,
            (Value::Char(s), DataType::Char(n)) => s.len() <= n as usize,
            _ => false,
        }
    }

    /// Encode into `buf`, which must be exactly `data_type.encoded_len()` long.
    pub fn encode(&self, data_type: DataType, buf: &mut [u8]) -> StorageResult<()> {
        if !self.is_compatible_with(data_type) {
            return Err(StorageError::TypeMismatch(format!(
                "{:?} cannot be stored as {:?}",
                self, data_type
            )));
        }

        match self {
            Value::Boolean(b) => buf[0] = u8::from(*b),
            Value::Int32(i) => LittleEndian::write_i32(buf, *i),
            Value::Int64(i) => LittleEndian::write_i64(buf, *i),
            Value::Char(s) => {
                let bytes = s.as_bytes();
                LittleEndian::write_u16(&mut buf[..2], bytes.len() as u16);
                buf[2..2 + bytes.len()].copy_from_slice(bytes);
                buf[2 + bytes.len()..].fill(0);
            }
        }
        Ok(())
    }

    /// Decode a value of `data_type` from `buf`.
    pub fn decode(data_type: DataType, buf: &[u8]) -> StorageResult<Self> {
        let value = match data_type {
            DataType::Boolean => Value::Boolean(buf[0] != 0),
            DataType::Int32 => Value::Int32(LittleEndian::read_i32(buf)),
            DataType::Int64 => Value::Int64(LittleEndian::read_i64(buf)),
            DataType::Char(n) => {
                let len = LittleEndian::read_u16(&buf[..2]) as usize;
                if len > n as usize {
                    return Err(StorageError::TypeMismatch(format!(
                        "stored string length {} exceeds CHAR({})",
                        len, n
                    )));
                }
                let s = std::str::from_utf8(&buf[2..2 + len])
                    .map_err(|e| StorageError::TypeMismatch(e.to_string()))?;
                Value::Char(s.to_string())
            }
        };
        Ok(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Int32(i) => write!(f, "{}", i),
            Value::Int64(i) => write!(f, "{}", i),
            Value::Char(s) => write!(f, "{}", s),
        }
    }
}
