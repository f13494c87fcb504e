//! The store capability consumed by the mapper

use async_trait::async_trait;
use std::collections::HashMap;

use crate::attribute::{AttributeValue, Item};
use crate::error::StoreError;

/// Maximum number of requests in one batch write
pub const MAX_BATCH_WRITE_ITEMS: usize = 25;

/// Maximum number of operations in one write transaction
pub const MAX_TRANSACT_ITEMS: usize = 25;

/// Placeholder name to value table (`:v1` -> value)
pub type ExpressionValues = HashMap<String, AttributeValue>;

/// A condition expression with its placeholder table
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionExpression {
    pub expression: String,
    pub values: ExpressionValues,
}

impl ConditionExpression {
    pub fn new(expression: impl Into<String>, values: ExpressionValues) -> Self {
        Self {
            expression: expression.into(),
            values,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GetItemRequest {
    pub table_name: String,
    pub key: Item,
}

/// A single-partition key-condition query
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub table_name: String,
    pub index_name: Option<String>,
    pub key_condition_expression: String,
    pub expression_attribute_values: ExpressionValues,
    pub limit: Option<usize>,
    pub exclusive_start_key: Option<Item>,
    pub scan_index_forward: bool,
}

impl QueryRequest {
    pub fn new(table_name: impl Into<String>, key_condition_expression: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            index_name: None,
            key_condition_expression: key_condition_expression.into(),
            expression_attribute_values: ExpressionValues::new(),
            limit: None,
            exclusive_start_key: None,
            scan_index_forward: true,
        }
    }
}

/// One page of query results
#[derive(Debug, Clone, Default)]
pub struct QueryOutput {
    pub items: Vec<Item>,
    /// Continuation token, present only when more items remain
    pub last_evaluated_key: Option<Item>,
}

#[derive(Debug, Clone)]
pub struct PutItemRequest {
    pub table_name: String,
    pub item: Item,
    pub condition: Option<ConditionExpression>,
}

/// Result of a (conditional) put
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Written,
    ConditionFailed,
}

#[derive(Debug, Clone)]
pub struct DeleteItemRequest {
    pub table_name: String,
    pub key: Item,
}

/// One entry of a batch write
#[derive(Debug, Clone, PartialEq)]
pub enum WriteRequest {
    Put { item: Item },
    Delete { key: Item },
}

#[derive(Debug, Clone)]
pub struct BatchWriteRequest {
    pub table_name: String,
    pub requests: Vec<WriteRequest>,
}

/// One operation of a write transaction
#[derive(Debug, Clone, PartialEq)]
pub enum TransactWriteItem {
    Put {
        table_name: String,
        item: Item,
        condition: Option<ConditionExpression>,
    },
    Delete {
        table_name: String,
        key: Item,
        condition: Option<ConditionExpression>,
    },
    ConditionCheck {
        table_name: String,
        key: Item,
        condition: ConditionExpression,
    },
}

impl TransactWriteItem {
    pub fn table_name(&self) -> &str {
        match self {
            Self::Put { table_name, .. }
            | Self::Delete { table_name, .. }
            | Self::ConditionCheck { table_name, .. } => table_name,
        }
    }
}

/// Result of a write transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactOutcome {
    Committed,
    /// The store refused the transaction; one reason per operation, `None`
    /// for operations that were not at fault.
    Cancelled { reasons: Vec<Option<String>> },
}

/// Key-value table store.
///
/// Implementations translate these calls into their own transport. Expected
/// negative outcomes (a failed put guard, a cancelled transaction) are
/// values, not errors.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Read a single item by its full primary key
    async fn get_item(&self, request: GetItemRequest) -> Result<Option<Item>, StoreError>;

    /// Run one page of a key-condition query
    async fn query(&self, request: QueryRequest) -> Result<QueryOutput, StoreError>;

    /// Write an item, optionally guarded by a condition
    async fn put_item(&self, request: PutItemRequest) -> Result<PutOutcome, StoreError>;

    /// Delete an item by its full primary key (no-op if absent)
    async fn delete_item(&self, request: DeleteItemRequest) -> Result<(), StoreError>;

    /// Apply up to [`MAX_BATCH_WRITE_ITEMS`] puts/deletes against one table
    async fn batch_write_item(&self, request: BatchWriteRequest) -> Result<(), StoreError>;

    /// Apply up to [`MAX_TRANSACT_ITEMS`] operations atomically
    async fn transact_write_items(
        &self,
        items: Vec<TransactWriteItem>,
    ) -> Result<TransactOutcome, StoreError>;
}
