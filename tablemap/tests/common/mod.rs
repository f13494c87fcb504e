//! Shared fixtures for the mapper integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tablemap::{
    Entity, EntityMapping, ItemSchema, Mapper, Property, StoreError, TableSchema, TableStore,
};
use tablemap_core::{
    BatchWriteRequest, DeleteItemRequest, GetItemRequest, Item, PutItemRequest, PutOutcome,
    QueryOutput, QueryRequest, TransactOutcome, TransactWriteItem,
};
use tablemap_ephemeral::{EphemeralStore, IndexDefinition, TableDefinition};
use tracing_subscriber::EnvFilter;

pub const TABLE: &str = "app";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Call counters per store operation
#[derive(Debug, Default)]
pub struct Calls {
    pub get_item: AtomicUsize,
    pub query: AtomicUsize,
    pub put_item: AtomicUsize,
    pub delete_item: AtomicUsize,
    pub batch_write_item: AtomicUsize,
    pub transact_write_items: AtomicUsize,
}

impl Calls {
    pub fn total(&self) -> usize {
        [
            &self.get_item,
            &self.query,
            &self.put_item,
            &self.delete_item,
            &self.batch_write_item,
            &self.transact_write_items,
        ]
        .iter()
        .map(|c| c.load(Ordering::SeqCst))
        .sum()
    }
}

/// In-memory store that counts every call it serves
#[derive(Default)]
pub struct RecordingStore {
    pub inner: EphemeralStore,
    pub calls: Calls,
    batch_sizes: Mutex<Vec<usize>>,
}

impl RecordingStore {
    pub fn count(&self, counter: impl Fn(&Calls) -> &AtomicUsize) -> usize {
        counter(&self.calls).load(Ordering::SeqCst)
    }

    /// Request counts of the batch writes seen, in order
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().unwrap().clone()
    }
}

#[async_trait]
impl TableStore for RecordingStore {
    async fn get_item(&self, request: GetItemRequest) -> Result<Option<Item>, StoreError> {
        self.calls.get_item.fetch_add(1, Ordering::SeqCst);
        self.inner.get_item(request).await
    }

    async fn query(&self, request: QueryRequest) -> Result<QueryOutput, StoreError> {
        self.calls.query.fetch_add(1, Ordering::SeqCst);
        self.inner.query(request).await
    }

    async fn put_item(&self, request: PutItemRequest) -> Result<PutOutcome, StoreError> {
        self.calls.put_item.fetch_add(1, Ordering::SeqCst);
        self.inner.put_item(request).await
    }

    async fn delete_item(&self, request: DeleteItemRequest) -> Result<(), StoreError> {
        self.calls.delete_item.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_item(request).await
    }

    async fn batch_write_item(&self, request: BatchWriteRequest) -> Result<(), StoreError> {
        self.calls.batch_write_item.fetch_add(1, Ordering::SeqCst);
        self.batch_sizes.lock().unwrap().push(request.requests.len());
        self.inner.batch_write_item(request).await
    }

    async fn transact_write_items(
        &self,
        items: Vec<TransactWriteItem>,
    ) -> Result<TransactOutcome, StoreError> {
        self.calls.transact_write_items.fetch_add(1, Ordering::SeqCst);
        self.inner.transact_write_items(items).await
    }
}

/// Table with keys `pk`/`sk` and a `by_status` index on `gsi1pk`/`gsi1sk`
pub fn app_table() -> Arc<TableSchema> {
    Arc::new(
        TableSchema::new(TABLE)
            .with_index("by_status", "gsi1pk", Some("gsi1sk"))
            .unwrap(),
    )
}

/// A recording store holding an empty table laid out like `schema`
pub fn store_for(schema: &TableSchema) -> Arc<RecordingStore> {
    let store = RecordingStore::default();
    let mut definition = TableDefinition::new(schema.name(), schema.partition_key());
    if let Some(sort_key) = schema.sort_key() {
        definition = definition.with_sort_key(sort_key);
    }
    for (name, index) in schema.indexes() {
        let mut index_definition = IndexDefinition::new(name, &index.partition_key);
        if let Some(sort_key) = &index.sort_key {
            index_definition = index_definition.with_sort_key(sort_key);
        }
        definition = definition.with_index(index_definition);
    }
    store.inner.create_table(definition).unwrap();
    Arc::new(store)
}

pub fn mapper(store: &Arc<RecordingStore>) -> Mapper {
    Mapper::new(store.clone())
}

/// A calendar entry: keys by convention, status feeds the `by_status` index
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Event {
    pub pk: String,
    pub sk: String,
    pub title: String,
    pub status: Option<String>,
}

impl Event {
    pub fn new(pk: &str, sk: &str, title: &str) -> Self {
        Self {
            pk: pk.to_string(),
            sk: sk.to_string(),
            title: title.to_string(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: &str) -> Self {
        self.status = Some(status.to_string());
        self
    }
}

impl Entity for Event {
    fn mapping() -> EntityMapping<Self> {
        EntityMapping::builder()
            .default_constructor(Event::default)
            .property(Property::new("pk", |e: &Event| &e.pk, |e, v| e.pk = v))
            .property(Property::new("sk", |e: &Event| &e.sk, |e, v| e.sk = v))
            .property(Property::new("title", |e: &Event| &e.title, |e, v| e.title = v))
            .property(Property::new("status", |e: &Event| &e.status, |e, v| e.status = v))
            .build()
    }
}

pub fn event_schema(table: Arc<TableSchema>) -> ItemSchema<Event> {
    ItemSchema::builder(table)
        .map_index_partition_key("by_status", "status")
        .index_sort_key_with("by_status", |e: &Event| Some(e.sk.clone()))
        .build()
        .unwrap()
}
