//! In-memory table store for tablemap
//!
//! This crate provides an ephemeral implementation of the
//! [`TableStore`](tablemap_core::TableStore) capability: key-condition
//! queries with pagination, conditional writes, batch writes and atomic
//! write transactions, all held in process memory.

pub mod expression;
pub mod storage;


pub use expression::ExpressionError;
pub use storage::{EphemeralStore, IndexDefinition, TableDefinition};
