//! Transaction identity and lifecycle.

pub mod id;
pub mod manager;

pub use id::{TransactionId, TransactionIdGenerator};
pub use manager::Transaction;
