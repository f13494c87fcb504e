//! Point and range deletes

use std::sync::Arc;
use tablemap_core::{DeleteItemRequest, TableStore, WriteRequest, MAX_BATCH_WRITE_ITEMS};
use tracing::debug;

use crate::entity::Entity;
use crate::error::Result;
use crate::put::batch_write;
use crate::query::QueryBuilder;
use crate::schema::ItemSchema;
use crate::sort_key::SortKey;

/// Delete operations for one item schema, from [`Mapper::delete`](crate::Mapper::delete)
pub struct DeleteBuilder<T> {
    store: Arc<dyn TableStore>,
    schema: ItemSchema<T>,
}

impl<T: Entity> DeleteBuilder<T> {
    pub(crate) fn new(store: Arc<dyn TableStore>, schema: ItemSchema<T>) -> Self {
        Self { store, schema }
    }

    /// Delete the item with this primary key; a missing item is not an error
    pub async fn delete_by_key<'k>(
        &self,
        partition: &str,
        sort: impl Into<Option<&'k str>>,
    ) -> Result<()> {
        let key = self.schema.key(partition, sort.into())?;
        self.store
            .delete_item(DeleteItemRequest {
                table_name: self.schema.table_name().to_string(),
                key,
            })
            .await?;
        Ok(())
    }

    /// Delete the item stored under `item`'s primary key
    pub async fn delete_item(&self, item: &T) -> Result<()> {
        let key = self.schema.key_of(item)?;
        self.store
            .delete_item(DeleteItemRequest {
                table_name: self.schema.table_name().to_string(),
                key,
            })
            .await?;
        Ok(())
    }

    /// Delete every item of `partition` whose sort key matches `predicate`.
    ///
    /// Matches are fetched a page of [`MAX_BATCH_WRITE_ITEMS`] at a time and
    /// removed with one batch delete per page. An exact predicate becomes a
    /// single point delete. Returns the number of delete requests issued.
    pub async fn delete_matching(&self, partition: &str, predicate: SortKey) -> Result<usize> {
        if let Some(sort) = predicate.exact() {
            self.delete_by_key(partition, sort).await?;
            return Ok(1);
        }

        let table_name = self.schema.table_name();
        let mut cursor = QueryBuilder::new(Arc::clone(&self.store), self.schema.clone())
            .with_partition(partition)
            .with_sort(predicate)
            .to_list(Some(MAX_BATCH_WRITE_ITEMS))
            .await?;
        let mut deleted = 0;

        loop {
            if !cursor.keys().is_empty() {
                let requests: Vec<_> = cursor
                    .keys()
                    .iter()
                    .cloned()
                    .map(|key| WriteRequest::Delete { key })
                    .collect();
                deleted += requests.len();
                batch_write(self.store.as_ref(), table_name, requests).await?;
            }
            if !cursor.has_next_page() {
                break;
            }
            cursor = cursor.next_page().await?;
        }

        debug!(table = %table_name, partition, deleted, "Deleted matching items");
        Ok(deleted)
    }
}
