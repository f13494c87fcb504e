//! The mapper facade

use std::fmt;
use std::sync::Arc;
use tablemap_core::{GetItemRequest, TableStore};

use crate::delete::DeleteBuilder;
use crate::entity::Entity;
use crate::error::Result;
use crate::put::PutBuilder;
use crate::query::QueryBuilder;
use crate::schema::ItemSchema;
use crate::transaction::Transaction;

/// Typed access to a [`TableStore`].
///
/// Cloning is cheap; clones share the store.
#[derive(Clone)]
pub struct Mapper {
    store: Arc<dyn TableStore>,
}

impl Mapper {
    pub fn new(store: Arc<dyn TableStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn TableStore> {
        &self.store
    }

    pub fn query<T: Entity>(&self, schema: &ItemSchema<T>) -> QueryBuilder<T> {
        QueryBuilder::new(Arc::clone(&self.store), schema.clone())
    }

    pub fn put<T: Entity>(&self, schema: &ItemSchema<T>) -> PutBuilder<T> {
        PutBuilder::new(Arc::clone(&self.store), schema.clone())
    }

    pub fn delete<T: Entity>(&self, schema: &ItemSchema<T>) -> DeleteBuilder<T> {
        DeleteBuilder::new(Arc::clone(&self.store), schema.clone())
    }

    /// Point read by primary key
    pub async fn get<'k, T: Entity>(
        &self,
        schema: &ItemSchema<T>,
        partition: &str,
        sort: impl Into<Option<&'k str>>,
    ) -> Result<Option<T>> {
        let key = schema.key(partition, sort.into())?;
        let item = self
            .store
            .get_item(GetItemRequest {
                table_name: schema.table_name().to_string(),
                key,
            })
            .await?;
        item.map(|item| schema.hydrate(&item)).transpose()
    }

    pub fn begin_transaction(&self) -> Transaction {
        Transaction::new(Arc::clone(&self.store))
    }

    /// Build a transaction in `f` and commit it once `f` returns.
    ///
    /// If `f` fails, nothing is sent and its error is returned.
    pub async fn transact<F>(&self, f: F) -> Result<bool>
    where
        F: FnOnce(&mut Transaction) -> Result<()>,
    {
        let mut transaction = self.begin_transaction();
        match f(&mut transaction) {
            Ok(()) => transaction.commit().await,
            Err(err) => {
                transaction.rollback();
                Err(err)
            }
        }
    }
}

impl fmt::Debug for Mapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mapper").finish_non_exhaustive()
    }
}
