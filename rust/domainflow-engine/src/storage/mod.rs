//! State persistence and transactional mutation
//!
//! [`StateStore`] is the typed facade over the embedded database;
//! [`TransactionRunner`] wraps every multi-statement mutation in a retryable,
//! commit-serialised transaction with an operation label.

pub mod keys;
pub mod store;
pub mod tx;

pub use store::{trees, StateStore};
pub use tx::{TransactionRunner, Tx, TxOptions};
