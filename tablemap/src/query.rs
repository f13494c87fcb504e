//! Key-condition queries and result pagination
//!
//! A query is assembled in stages: `with_partition` fixes the partition
//! value, `with_sort` adds a [`SortKey`] predicate and `on_index` switches to
//! a secondary index. The result is a [`QueryCursor`], one page at a time.

use std::ops::Deref;
use std::sync::Arc;
use tablemap_core::{AttributeValue, ExpressionValues, Item, QueryRequest, TableStore};
use tracing::debug;

use crate::entity::Entity;
use crate::error::{MapperError, Result};
use crate::schema::ItemSchema;
use crate::sort_key::SortKey;
use crate::table::TableSchema;

const PARTITION_VALUE: &str = ":pkVal";

/// Entry point returned by [`Mapper::query`](crate::Mapper::query)
pub struct QueryBuilder<T> {
    store: Arc<dyn TableStore>,
    schema: ItemSchema<T>,
}

impl<T: Entity> QueryBuilder<T> {
    pub(crate) fn new(store: Arc<dyn TableStore>, schema: ItemSchema<T>) -> Self {
        Self { store, schema }
    }

    pub fn with_partition(self, value: impl Into<String>) -> PartitionQuery<T> {
        PartitionQuery {
            query: Query {
                store: self.store,
                schema: self.schema,
                partition: value.into(),
                sort: None,
                index_name: None,
            },
        }
    }
}

/// A query over a whole partition, narrowed further with [`with_sort`](Self::with_sort)
pub struct PartitionQuery<T> {
    query: Query<T>,
}

impl<T: Entity> PartitionQuery<T> {
    pub fn with_sort(mut self, predicate: SortKey) -> Query<T> {
        self.query.sort = Some(predicate);
        self.query
    }

    pub fn on_index(self, index_name: impl Into<String>) -> Query<T> {
        self.query.on_index(index_name)
    }

    pub async fn first_or_default(self) -> Result<Option<T>> {
        self.query.first_or_default().await
    }

    pub async fn to_list(self, limit: Option<usize>) -> Result<QueryCursor<T>> {
        self.query.to_list(limit).await
    }
}

/// A fully specified query, ready to run
pub struct Query<T> {
    store: Arc<dyn TableStore>,
    schema: ItemSchema<T>,
    partition: String,
    sort: Option<SortKey>,
    index_name: Option<String>,
}

impl<T: Entity> Query<T> {
    /// Query a secondary index instead of the table
    pub fn on_index(mut self, index_name: impl Into<String>) -> Self {
        self.index_name = Some(index_name.into());
        self
    }

    /// The first matching item, if any
    pub async fn first_or_default(self) -> Result<Option<T>> {
        let cursor = self.to_list(Some(1)).await?;
        Ok(cursor.into_items().into_iter().next())
    }

    /// One page of at most `limit` items
    pub async fn to_list(self, limit: Option<usize>) -> Result<QueryCursor<T>> {
        let prepared = Arc::new(self.prepare(limit)?);
        execute(self.store, self.schema, prepared, None).await
    }

    fn prepare(&self, limit: Option<usize>) -> Result<PreparedQuery> {
        let table = self.schema.table();
        let index_name = self.index_name.as_deref();
        let partition_attribute = table.partition_attribute_for(index_name)?;

        let mut key_condition = format!("{partition_attribute} = {PARTITION_VALUE}");
        let mut values = ExpressionValues::from([(
            PARTITION_VALUE.to_string(),
            AttributeValue::string(self.partition.as_str()),
        )]);

        if let Some(sort) = &self.sort {
            let sort_attribute = table.sort_attribute_for(index_name)?.ok_or_else(|| {
                MapperError::SchemaResolution(format!(
                    "{} of table '{}' has no sort key to apply {sort:?} to",
                    index_name.map_or_else(|| "primary key".to_string(), |i| format!("index '{i}'")),
                    table.name()
                ))
            })?;
            key_condition.push_str(" AND ");
            key_condition.push_str(&sort.render(sort_attribute));
            values.extend(sort.values());
        }

        Ok(PreparedQuery {
            table_name: table.name().to_string(),
            index_name: self.index_name.clone(),
            key_condition,
            values,
            limit,
        })
    }
}

/// Query parameters shared by every page of one logical query
#[derive(Debug, Clone)]
struct PreparedQuery {
    table_name: String,
    index_name: Option<String>,
    key_condition: String,
    values: ExpressionValues,
    limit: Option<usize>,
}

impl PreparedQuery {
    fn request(&self, exclusive_start_key: Option<Item>) -> QueryRequest {
        QueryRequest {
            index_name: self.index_name.clone(),
            expression_attribute_values: self.values.clone(),
            limit: self.limit,
            exclusive_start_key,
            ..QueryRequest::new(self.table_name.as_str(), self.key_condition.as_str())
        }
    }
}

async fn execute<T: Entity>(
    store: Arc<dyn TableStore>,
    schema: ItemSchema<T>,
    query: Arc<PreparedQuery>,
    exclusive_start_key: Option<Item>,
) -> Result<QueryCursor<T>> {
    let output = store.query(query.request(exclusive_start_key)).await?;

    let items = output
        .items
        .iter()
        .map(|item| schema.hydrate(item))
        .collect::<Result<Vec<_>>>()?;
    let keys = output
        .items
        .iter()
        .map(|item| primary_key(schema.table(), item))
        .collect();

    debug!(
        table = %query.table_name,
        index = ?query.index_name,
        items = items.len(),
        has_next_page = output.last_evaluated_key.is_some(),
        "Fetched query page"
    );

    Ok(QueryCursor {
        items,
        keys,
        last_evaluated_key: output.last_evaluated_key,
        query,
        store,
        schema,
    })
}

fn primary_key(table: &TableSchema, item: &Item) -> Item {
    [Some(table.partition_key()), table.sort_key()]
        .into_iter()
        .flatten()
        .filter_map(|attribute| {
            item.get(attribute)
                .map(|value| (attribute.to_string(), value.clone()))
        })
        .collect()
}

/// One page of hydrated query results.
///
/// A cursor is never advanced in place; [`next_page`](Self::next_page)
/// returns a new cursor for the following page.
pub struct QueryCursor<T> {
    items: Vec<T>,
    keys: Vec<Item>,
    last_evaluated_key: Option<Item>,
    query: Arc<PreparedQuery>,
    store: Arc<dyn TableStore>,
    schema: ItemSchema<T>,
}

impl<T: Entity> QueryCursor<T> {
    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    pub fn has_next_page(&self) -> bool {
        self.last_evaluated_key.is_some()
    }

    /// The store's last evaluated key for this page
    pub fn continuation_token(&self) -> Option<&Item> {
        self.last_evaluated_key.as_ref()
    }

    /// Primary keys of the items on this page, in page order
    pub(crate) fn keys(&self) -> &[Item] {
        &self.keys
    }

    /// Run the same query again from this page's continuation token
    pub async fn next_page(&self) -> Result<QueryCursor<T>> {
        let token = self.last_evaluated_key.clone().ok_or_else(|| {
            MapperError::Pagination(format!(
                "no continuation token for query on table '{}'; check has_next_page first",
                self.query.table_name
            ))
        })?;
        execute(
            Arc::clone(&self.store),
            self.schema.clone(),
            Arc::clone(&self.query),
            Some(token),
        )
        .await
    }
}

impl<T> std::fmt::Debug for QueryCursor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCursor").finish_non_exhaustive()
    }
}

impl<T> Deref for QueryCursor<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.items
    }
}

impl<T> IntoIterator for QueryCursor<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a QueryCursor<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
