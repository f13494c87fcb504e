//! Atomic multi-item writes
//!
//! A [`Transaction`] collects up to [`MAX_TRANSACT_ITEMS`] operations and
//! sends them in one atomic request on [`Transaction::commit`]. A handle
//! dropped with pending operations commits them once: in the background on
//! a tokio runtime, or on the dropping thread outside one.

use std::sync::Arc;
use tablemap_core::{
    ConditionExpression, TableStore, TransactOutcome, TransactWriteItem, MAX_TRANSACT_ITEMS,
};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::condition::Condition;
use crate::entity::Entity;
use crate::error::{MapperError, Result};
use crate::schema::ItemSchema;

/// Single-owner transaction handle from
/// [`Mapper::begin_transaction`](crate::Mapper::begin_transaction)
pub struct Transaction {
    store: Arc<dyn TableStore>,
    operations: Vec<TransactWriteItem>,
    committed: bool,
}

impl Transaction {
    pub(crate) fn new(store: Arc<dyn TableStore>) -> Self {
        Self {
            store,
            operations: Vec::new(),
            committed: false,
        }
    }

    /// Add operations for items of one schema
    pub fn with_schema<'t, T: Entity>(&'t mut self, schema: &ItemSchema<T>) -> TransactionScope<'t, T> {
        TransactionScope {
            transaction: self,
            schema: schema.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Apply every operation atomically.
    ///
    /// Returns `false` when the store cancelled the transaction, for example
    /// because a condition did not hold; nothing was written in that case.
    pub async fn commit(mut self) -> Result<bool> {
        self.committed = true;
        let operations = std::mem::take(&mut self.operations);
        if operations.is_empty() {
            return Ok(true);
        }

        let count = operations.len();
        match self.store.transact_write_items(operations).await? {
            TransactOutcome::Committed => {
                info!(operations = count, "Transaction committed");
                Ok(true)
            }
            TransactOutcome::Cancelled { reasons } => {
                debug!(operations = count, ?reasons, "Transaction cancelled");
                Ok(false)
            }
        }
    }

    /// Discard every pending operation
    pub fn rollback(mut self) {
        self.committed = true;
        debug!(operations = self.operations.len(), "Transaction rolled back");
    }

    fn push(&mut self, operation: TransactWriteItem) {
        self.operations.push(operation);
    }

    fn ensure_capacity(&self) -> Result<()> {
        if self.operations.len() >= MAX_TRANSACT_ITEMS {
            return Err(MapperError::TransactionCapacity {
                limit: MAX_TRANSACT_ITEMS,
            });
        }
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.committed || self.operations.is_empty() {
            return;
        }

        let operations = std::mem::take(&mut self.operations);
        let store = Arc::clone(&self.store);
        match Handle::try_current() {
            Ok(handle) => {
                warn!(
                    operations = operations.len(),
                    "Transaction dropped without commit, committing in the background"
                );
                handle.spawn(commit_dropped(store, operations));
            }
            Err(_) => {
                warn!(
                    operations = operations.len(),
                    "Transaction dropped without commit outside a tokio runtime, committing now"
                );
                futures::executor::block_on(commit_dropped(store, operations));
            }
        }
    }
}

async fn commit_dropped(store: Arc<dyn TableStore>, operations: Vec<TransactWriteItem>) {
    let count = operations.len();
    match store.transact_write_items(operations).await {
        Ok(TransactOutcome::Committed) => {
            info!(operations = count, "Dropped transaction committed");
        }
        Ok(TransactOutcome::Cancelled { reasons }) => {
            warn!(operations = count, ?reasons, "Dropped transaction cancelled");
        }
        Err(err) => {
            warn!(operations = count, error = %err, "Dropped transaction failed");
        }
    }
}

/// Operations on items of one schema inside a [`Transaction`].
///
/// Every method checks capacity first: the operation that would exceed
/// [`MAX_TRANSACT_ITEMS`] fails with [`MapperError::TransactionCapacity`]
/// and is not added.
pub struct TransactionScope<'t, T> {
    transaction: &'t mut Transaction,
    schema: ItemSchema<T>,
}

impl<'t, T: Entity> TransactionScope<'t, T> {
    pub fn upsert(&mut self, item: &T) -> Result<&mut Self> {
        self.put(item, Condition::none())
    }

    /// Write `item` only if `condition` holds for the stored item
    pub fn upsert_if(&mut self, item: &T, condition: Condition) -> Result<&mut Self> {
        self.put(item, condition)
    }

    pub fn delete<'k>(
        &mut self,
        partition: &str,
        sort: impl Into<Option<&'k str>>,
    ) -> Result<&mut Self> {
        self.remove(partition, sort.into(), Condition::none())
    }

    pub fn delete_if<'k>(
        &mut self,
        partition: &str,
        sort: impl Into<Option<&'k str>>,
        condition: Condition,
    ) -> Result<&mut Self> {
        self.remove(partition, sort.into(), condition)
    }

    /// Require `condition` to hold for another item without writing it.
    ///
    /// The condition must carry the item's key, see [`Condition::keyed`].
    pub fn check(&mut self, condition: Condition) -> Result<&mut Self> {
        self.transaction.ensure_capacity()?;
        let rendered = condition.render(1);
        let Some((partition, sort)) = rendered.key else {
            return Err(MapperError::InvalidCondition(
                "a condition check needs a keyed condition".to_string(),
            ));
        };
        if rendered.expression.is_empty() {
            return Err(MapperError::InvalidCondition(
                "a condition check needs a condition that renders to an expression".to_string(),
            ));
        }

        let key = self.schema.key(&partition, sort.as_deref())?;
        self.transaction.push(TransactWriteItem::ConditionCheck {
            table_name: self.schema.table_name().to_string(),
            key,
            condition: ConditionExpression::new(rendered.expression, rendered.values),
        });
        Ok(self)
    }

    fn put(&mut self, item: &T, condition: Condition) -> Result<&mut Self> {
        self.transaction.ensure_capacity()?;
        let item = self.schema.to_item(item)?;
        self.transaction.push(TransactWriteItem::Put {
            table_name: self.schema.table_name().to_string(),
            item,
            condition: condition.to_expression(),
        });
        Ok(self)
    }

    fn remove(
        &mut self,
        partition: &str,
        sort: Option<&str>,
        condition: Condition,
    ) -> Result<&mut Self> {
        self.transaction.ensure_capacity()?;
        let key = self.schema.key(partition, sort)?;
        self.transaction.push(TransactWriteItem::Delete {
            table_name: self.schema.table_name().to_string(),
            key,
            condition: condition.to_expression(),
        });
        Ok(self)
    }
}
