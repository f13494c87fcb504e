//! Single and batched writes

use std::sync::Arc;
use tablemap_core::{
    BatchWriteRequest, PutItemRequest, PutOutcome, TableStore, WriteRequest, MAX_BATCH_WRITE_ITEMS,
};
use tracing::debug;

use crate::condition::Condition;
use crate::entity::Entity;
use crate::error::Result;
use crate::schema::ItemSchema;

/// Write operations for one item schema, from [`Mapper::put`](crate::Mapper::put)
pub struct PutBuilder<T> {
    store: Arc<dyn TableStore>,
    schema: ItemSchema<T>,
}

impl<T: Entity> PutBuilder<T> {
    pub(crate) fn new(store: Arc<dyn TableStore>, schema: ItemSchema<T>) -> Self {
        Self { store, schema }
    }

    /// Insert or replace one item
    pub async fn upsert(&self, item: &T) -> Result<()> {
        let request = PutItemRequest {
            table_name: self.schema.table_name().to_string(),
            item: self.schema.to_item(item)?,
            condition: None,
        };
        self.store.put_item(request).await?;
        Ok(())
    }

    /// Insert or replace many items in batches of at most
    /// [`MAX_BATCH_WRITE_ITEMS`], one batch after another.
    ///
    /// Every item is converted before the first batch is sent, so a
    /// conversion error writes nothing.
    pub async fn upsert_all<'a, I>(&self, items: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a T>,
        T: 'a,
    {
        let requests = items
            .into_iter()
            .map(|item| self.schema.to_item(item).map(|item| WriteRequest::Put { item }))
            .collect::<Result<Vec<_>>>()?;
        batch_write(self.store.as_ref(), self.schema.table_name(), requests).await
    }

    /// Write `item` only if no item with the same primary key exists.
    ///
    /// Returns `false` when an item was already there; it is left unchanged.
    pub async fn put_if_not_exists(&self, item: &T) -> Result<bool> {
        let table = self.schema.table();
        let guard = match table.sort_key() {
            Some(sort_key) => Condition::attribute_not_exists(table.partition_key())
                .and(Condition::attribute_not_exists(sort_key)),
            None => Condition::attribute_not_exists(table.partition_key()),
        };

        let request = PutItemRequest {
            table_name: table.name().to_string(),
            item: self.schema.to_item(item)?,
            condition: guard.to_expression(),
        };
        let outcome = self.store.put_item(request).await?;
        if outcome == PutOutcome::ConditionFailed {
            debug!(table = %table.name(), "Item already exists, put skipped");
        }
        Ok(outcome == PutOutcome::Written)
    }
}

/// Send `requests` as sequential batch writes of at most
/// [`MAX_BATCH_WRITE_ITEMS`] each
pub(crate) async fn batch_write(
    store: &dyn TableStore,
    table_name: &str,
    mut requests: Vec<WriteRequest>,
) -> Result<()> {
    let total = requests.len();
    let mut batches = 0;

    while !requests.is_empty() {
        let rest = requests.split_off(requests.len().min(MAX_BATCH_WRITE_ITEMS));
        let batch = std::mem::replace(&mut requests, rest);
        store
            .batch_write_item(BatchWriteRequest {
                table_name: table_name.to_string(),
                requests: batch,
            })
            .await?;
        batches += 1;
    }

    debug!(table = %table_name, requests = total, batches, "Batch write complete");
    Ok(())
}
