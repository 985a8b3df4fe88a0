//! Access layer for tuple-oriented operations.
//!
//! - **TableHeap**: a table stored as a sequence of heap pages in one file
//! - **TableScanner**: sequential iteration that locks pages as it goes
//! - **Tuple** / **Schema**: fixed-width records and their layout
//! - **Value** / **DataType**: typed column values and their encoding

pub mod heap;
pub mod scan;
pub mod tuple;
pub mod value;

pub use heap::TableHeap;
pub use scan::TableScanner;
pub use tuple::{Column, RecordId, Schema, Tuple};
pub use value::{DataType, Value};
