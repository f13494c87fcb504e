//! Typed object mapper for partition-key/sort-key table stores
//!
//! Application types describe themselves once through [`Entity`]; an
//! [`ItemSchema`] binds such a type to a [`TableSchema`]; a [`Mapper`] runs
//! queries, writes, deletes and transactions against any [`TableStore`].
//!
//! ```ignore
//! let table = Arc::new(TableSchema::new("app"));
//! let users = ItemSchema::<User>::builder(table)
//!     .partition_key_with(|u| format!("user#{}", u.id))
//!     .sort_key_with(|_| "profile".to_string())
//!     .build()?;
//!
//! let mapper = Mapper::new(store);
//! mapper.put(&users).upsert(&user).await?;
//! let found = mapper
//!     .query(&users)
//!     .with_partition("user#1")
//!     .with_sort(SortKey::exactly("profile"))
//!     .first_or_default()
//!     .await?;
//! ```

pub mod codec;
pub mod condition;
pub mod config;
pub mod delete;
pub mod entity;
pub mod error;
mod hydrate;
pub mod mapper;
pub mod put;
pub mod query;
pub mod registry;
pub mod schema;
pub mod sort_key;
pub mod table;
pub mod transaction;

#[cfg(test)]
mod schema_tests;

pub use codec::{Codec, CodecError, WireCodec};
pub use condition::{Comparator, Condition, ConditionKey, RenderedCondition};
pub use config::{IndexConfig, MapperConfig, TableConfig};
pub use delete::DeleteBuilder;
pub use entity::{Constructor, ConstructorArgs, Entity, EntityMapping, Property, MAX_DEPTH};
pub use error::{MapperError, Result};
pub use mapper::Mapper;
pub use put::PutBuilder;
pub use query::{PartitionQuery, Query, QueryBuilder, QueryCursor};
pub use registry::{ConverterRegistry, ConverterRegistryBuilder};
pub use schema::{ItemSchema, ItemSchemaBuilder};
pub use sort_key::SortKey;
pub use table::{IndexSchema, TableSchema};
pub use transaction::{Transaction, TransactionScope};

pub use bigdecimal::BigDecimal;
pub use tablemap_core::{
    AttributeValue, BoxError, ErrorCode, Item, StoreError, TableStore, MAX_BATCH_WRITE_ITEMS,
    MAX_TRANSACT_ITEMS,
};
