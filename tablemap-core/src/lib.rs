//! Core types and traits for tablemap
//!
//! This crate provides the wire value shared by the mapper and every store
//! implementation, plus the store capability trait itself.

pub mod attribute;
pub mod error;
pub mod store;

pub use attribute::{AttributeValue, Item};
pub use error::{BoxError, ErrorCode, StoreError};
pub use store::{
    BatchWriteRequest, ConditionExpression, DeleteItemRequest, ExpressionValues, GetItemRequest,
    PutItemRequest, PutOutcome, QueryOutput, QueryRequest, TableStore, TransactOutcome,
    TransactWriteItem, WriteRequest, MAX_BATCH_WRITE_ITEMS, MAX_TRANSACT_ITEMS,
};
