//! In-memory table storage

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use tablemap_core::{
    AttributeValue, BatchWriteRequest, ConditionExpression, DeleteItemRequest, ErrorCode,
    GetItemRequest, Item, PutItemRequest, PutOutcome, QueryOutput, QueryRequest, StoreError,
    TableStore, TransactOutcome, TransactWriteItem, WriteRequest, MAX_BATCH_WRITE_ITEMS,
    MAX_TRANSACT_ITEMS,
};
use tracing::{debug, info};

use crate::expression::{
    evaluate_condition, evaluate_key_conditions, parse_condition, parse_key_condition,
    ExpressionContext, ExpressionError,
};

/// Separates key components in a composite storage key
const KEY_SEPARATOR: char = '\u{1f}';

impl From<ExpressionError> for StoreError {
    fn from(err: ExpressionError) -> Self {
        StoreError::validation(err.to_string()).with_source(err)
    }
}

/// Secondary index definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    pub index_name: String,
    pub partition_key: String,
    pub sort_key: Option<String>,
}

impl IndexDefinition {
    pub fn new(index_name: impl Into<String>, partition_key: impl Into<String>) -> Self {
        Self {
            index_name: index_name.into(),
            partition_key: partition_key.into(),
            sort_key: None,
        }
    }

    pub fn with_sort_key(mut self, sort_key: impl Into<String>) -> Self {
        self.sort_key = Some(sort_key.into());
        self
    }
}

/// Table definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    pub table_name: String,
    pub partition_key: String,
    pub sort_key: Option<String>,
    pub indexes: Vec<IndexDefinition>,
}

impl TableDefinition {
    pub fn new(table_name: impl Into<String>, partition_key: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            partition_key: partition_key.into(),
            sort_key: None,
            indexes: Vec::new(),
        }
    }

    pub fn with_sort_key(mut self, sort_key: impl Into<String>) -> Self {
        self.sort_key = Some(sort_key.into());
        self
    }

    pub fn with_index(mut self, index: IndexDefinition) -> Self {
        self.indexes.push(index);
        self
    }
}

/// Hash and optional range attribute of a table or index
#[derive(Debug, Clone)]
struct KeySchema {
    partition_key: String,
    sort_key: Option<String>,
}

impl KeySchema {
    fn attributes(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.partition_key.as_str()).chain(self.sort_key.as_deref())
    }

    fn is_key_attribute(&self, name: &str) -> bool {
        self.attributes().any(|a| a == name)
    }

    /// Composite key string, or `None` when a key attribute is missing or not a scalar
    fn key_string(&self, item: &Item) -> Option<String> {
        let mut key = String::new();
        for attr in self.attributes() {
            let component = key_component(item.get(attr)?)?;
            if !key.is_empty() {
                key.push(KEY_SEPARATOR);
            }
            key.push_str(&component);
        }
        Some(key)
    }
}

fn key_component(value: &AttributeValue) -> Option<String> {
    match value {
        AttributeValue::S(s) => Some(format!("S:{s}")),
        AttributeValue::N(n) => Some(format!("N:{n}")),
        AttributeValue::B(b) => Some(b.iter().fold(String::from("B:"), |mut acc, byte| {
            acc.push_str(&format!("{byte:02x}"));
            acc
        })),
        _ => None,
    }
}

/// Secondary index storage
struct SecondaryIndex {
    schema: KeySchema,
    /// Maps index key to primary keys
    items: DashMap<String, Vec<String>>,
}

impl SecondaryIndex {
    fn new(schema: KeySchema) -> Self {
        Self {
            schema,
            items: DashMap::new(),
        }
    }

    /// Add an item to the index (items missing an index key attribute are not projected)
    fn add_item(&self, item: &Item, primary_key: &str) {
        if let Some(index_key) = self.schema.key_string(item) {
            self.items
                .entry(index_key)
                .or_default()
                .push(primary_key.to_string());
        }
    }

    /// Remove an item from the index
    fn remove_item(&self, item: &Item, primary_key: &str) {
        if let Some(index_key) = self.schema.key_string(item) {
            let now_empty = match self.items.get_mut(&index_key) {
                Some(mut keys) => {
                    keys.retain(|k| k != primary_key);
                    keys.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.items.remove_if(&index_key, |_, keys| keys.is_empty());
            }
        }
    }

    fn primary_keys(&self) -> Vec<String> {
        self.items
            .iter()
            .flat_map(|entry| entry.value().clone())
            .collect()
    }
}

/// A table with its items
struct Table {
    definition: TableDefinition,
    primary: KeySchema,
    items: DashMap<String, Item>,
    indexes: HashMap<String, SecondaryIndex>,
}

impl Table {
    fn new(definition: TableDefinition) -> Self {
        let primary = KeySchema {
            partition_key: definition.partition_key.clone(),
            sort_key: definition.sort_key.clone(),
        };

        let indexes = definition
            .indexes
            .iter()
            .map(|index| {
                (
                    index.index_name.clone(),
                    SecondaryIndex::new(KeySchema {
                        partition_key: index.partition_key.clone(),
                        sort_key: index.sort_key.clone(),
                    }),
                )
            })
            .collect();

        Self {
            definition,
            primary,
            items: DashMap::new(),
            indexes,
        }
    }

    /// Get the primary key for an item
    fn get_key(&self, item: &Item) -> Result<String, StoreError> {
        for attr in self.primary.attributes() {
            match item.get(attr) {
                None => {
                    return Err(StoreError::validation(format!(
                        "Missing key attribute: {attr}"
                    )))
                }
                Some(value) if key_component(value).is_none() => {
                    return Err(StoreError::validation(format!(
                        "Invalid key attribute type for {attr}: {}",
                        value.type_tag()
                    )))
                }
                Some(_) => {}
            }
        }
        self.primary
            .key_string(item)
            .ok_or_else(|| StoreError::validation("Invalid key"))
    }

    /// Extract key attributes from an item
    fn extract_key(&self, item: &Item, schema: &KeySchema) -> Item {
        self.primary
            .attributes()
            .chain(schema.attributes())
            .filter_map(|attr| item.get(attr).map(|v| (attr.to_string(), v.clone())))
            .collect()
    }

    fn check_condition(
        &self,
        key: &str,
        condition: Option<&ConditionExpression>,
    ) -> Result<bool, StoreError> {
        let Some(condition) = condition else {
            return Ok(true);
        };
        let Some(parsed) = parse_condition(&condition.expression)? else {
            return Ok(true);
        };

        let existing = self.items.get(key).map(|r| r.value().clone());
        let empty_item = Item::new();
        let ctx = ExpressionContext::new(&condition.values);
        Ok(evaluate_condition(
            &parsed,
            existing.as_ref().unwrap_or(&empty_item),
            &ctx,
        )?)
    }

    fn write(&self, key: String, item: Item) {
        let old_item = self.items.get(&key).map(|r| r.value().clone());
        self.update_indexes(old_item.as_ref(), Some(&item), &key);
        self.items.insert(key, item);
    }

    fn remove(&self, key: &str) {
        if let Some((_, old)) = self.items.remove(key) {
            self.update_indexes(Some(&old), None, key);
        }
    }

    /// Update secondary indexes when an item changes
    fn update_indexes(&self, old_item: Option<&Item>, new_item: Option<&Item>, primary_key: &str) {
        if let Some(old) = old_item {
            for index in self.indexes.values() {
                index.remove_item(old, primary_key);
            }
        }

        if let Some(new) = new_item {
            for index in self.indexes.values() {
                index.add_item(new, primary_key);
            }
        }
    }
}

/// Helper to compare optional attribute values
fn compare_attribute_values_opt(a: Option<&AttributeValue>, b: Option<&AttributeValue>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(av), Some(bv)) => av.compare(bv).unwrap_or(Ordering::Equal),
    }
}

/// In-memory table store
pub struct EphemeralStore {
    tables: DashMap<String, Table>,
    /// Serializes writers so a transaction's checks and writes are atomic
    write_gate: Mutex<()>,
}

impl Default for EphemeralStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EphemeralStore {
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
            write_gate: Mutex::new(()),
        }
    }

    /// Create a new table
    pub fn create_table(&self, definition: TableDefinition) -> Result<(), StoreError> {
        let name = definition.table_name.clone();
        if self.tables.contains_key(&name) {
            return Err(StoreError::new(
                ErrorCode::ResourceInUseException,
                format!("Table already exists: {name}"),
            )
            .with_table(name));
        }

        info!(table = %name, indexes = definition.indexes.len(), "Creating table");
        self.tables.insert(name, Table::new(definition));
        Ok(())
    }

    /// Delete a table and all of its items
    pub fn delete_table(&self, table_name: &str) -> Result<TableDefinition, StoreError> {
        let (_, table) = self
            .tables
            .remove(table_name)
            .ok_or_else(|| StoreError::table_not_found(table_name))?;
        info!(table = %table_name, "Deleted table");
        Ok(table.definition)
    }

    /// List all tables
    pub fn list_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of items currently stored in a table
    pub fn item_count(&self, table_name: &str) -> Result<usize, StoreError> {
        Ok(self.table(table_name)?.items.len())
    }

    fn table(
        &self,
        table_name: &str,
    ) -> Result<dashmap::mapref::one::Ref<'_, String, Table>, StoreError> {
        self.tables
            .get(table_name)
            .ok_or_else(|| StoreError::table_not_found(table_name))
    }

    fn get_item_sync(&self, request: &GetItemRequest) -> Result<Option<Item>, StoreError> {
        let table = self.table(&request.table_name)?;
        let key = table.get_key(&request.key)?;
        let item = table.items.get(&key).map(|r| r.value().clone());
        debug!(table = %request.table_name, found = item.is_some(), "GetItem");
        Ok(item)
    }

    fn delete_item_sync(&self, request: &DeleteItemRequest) -> Result<(), StoreError> {
        let _gate = self.write_gate.lock();
        let table = self.table(&request.table_name)?;
        let key = table.get_key(&request.key)?;
        table.remove(&key);
        debug!(table = %request.table_name, "DeleteItem");
        Ok(())
    }

    fn put_item_sync(&self, request: PutItemRequest) -> Result<PutOutcome, StoreError> {
        let _gate = self.write_gate.lock();
        let table = self.table(&request.table_name)?;
        let key = table.get_key(&request.item)?;

        if !table.check_condition(&key, request.condition.as_ref())? {
            debug!(table = %request.table_name, "Put condition failed");
            return Ok(PutOutcome::ConditionFailed);
        }

        table.write(key, request.item);
        Ok(PutOutcome::Written)
    }

    fn query_sync(&self, request: &QueryRequest) -> Result<QueryOutput, StoreError> {
        let table = self.table(&request.table_name)?;
        let ctx = ExpressionContext::new(&request.expression_attribute_values);
        let key_conditions = parse_key_condition(&request.key_condition_expression)?;

        if request.limit == Some(0) {
            return Err(StoreError::validation("Limit must be greater than 0"));
        }

        // Get candidate items from index or table
        let (schema, candidates): (KeySchema, Vec<(String, Item)>) = match &request.index_name {
            Some(index_name) => {
                let index = table.indexes.get(index_name).ok_or_else(|| {
                    StoreError::validation(format!("Index not found: {index_name}"))
                })?;
                let items = index
                    .primary_keys()
                    .into_iter()
                    .filter_map(|pk| table.items.get(&pk).map(|r| (pk, r.value().clone())))
                    .collect();
                (index.schema.clone(), items)
            }
            None => (
                table.primary.clone(),
                table
                    .items
                    .iter()
                    .map(|r| (r.key().clone(), r.value().clone()))
                    .collect(),
            ),
        };

        let partition_condition = key_conditions
            .iter()
            .filter(|c| c.attribute() == schema.partition_key && c.is_equality())
            .count();
        if partition_condition != 1
            || key_conditions
                .iter()
                .any(|c| !schema.is_key_attribute(c.attribute()))
        {
            return Err(StoreError::validation(format!(
                "Query key condition not supported: {}",
                request.key_condition_expression
            )));
        }

        let mut matched = Vec::new();
        for (pk, item) in candidates {
            if evaluate_key_conditions(&key_conditions, &item, &ctx)? {
                matched.push((pk, item));
            }
        }

        // Sort by the (index) sort key, ties broken by primary key
        let sort_attr = schema.sort_key.as_deref();
        let position = |a_item: &Item, a_pk: &str, b_item: &Item, b_pk: &str| {
            sort_attr
                .map_or(Ordering::Equal, |attr| {
                    compare_attribute_values_opt(a_item.get(attr), b_item.get(attr))
                })
                .then_with(|| a_pk.cmp(b_pk))
        };
        matched.sort_by(|(a_pk, a), (b_pk, b)| position(a, a_pk.as_str(), b, b_pk.as_str()));
        if !request.scan_index_forward {
            matched.reverse();
        }

        // Resume after the exclusive start key, whether or not that item still exists
        let start_pos = match &request.exclusive_start_key {
            Some(start_key) => {
                let start_pk = table.get_key(start_key)?;
                matched
                    .iter()
                    .position(|(pk, item)| {
                        let ord = position(item, pk.as_str(), start_key, start_pk.as_str());
                        if request.scan_index_forward {
                            ord == Ordering::Greater
                        } else {
                            ord == Ordering::Less
                        }
                    })
                    .unwrap_or(matched.len())
            }
            None => 0,
        };
        let mut remaining: Vec<Item> = matched
            .into_iter()
            .skip(start_pos)
            .map(|(_, item)| item)
            .collect();

        let last_evaluated_key = match request.limit {
            Some(limit) if remaining.len() > limit => {
                remaining.truncate(limit);
                remaining.last().map(|item| table.extract_key(item, &schema))
            }
            _ => None,
        };

        debug!(
            table = %request.table_name,
            index = ?request.index_name,
            count = remaining.len(),
            more = last_evaluated_key.is_some(),
            "Query"
        );

        Ok(QueryOutput {
            items: remaining,
            last_evaluated_key,
        })
    }

    fn batch_write_sync(&self, request: BatchWriteRequest) -> Result<(), StoreError> {
        if request.requests.is_empty() || request.requests.len() > MAX_BATCH_WRITE_ITEMS {
            return Err(StoreError::validation(format!(
                "BatchWriteItem accepts 1 to {MAX_BATCH_WRITE_ITEMS} requests, got {}",
                request.requests.len()
            )));
        }

        let _gate = self.write_gate.lock();
        let table = self.table(&request.table_name)?;

        // Validate every key before applying anything
        let mut seen = HashSet::new();
        let mut keyed = Vec::with_capacity(request.requests.len());
        for write in request.requests {
            let key = match &write {
                WriteRequest::Put { item } => table.get_key(item)?,
                WriteRequest::Delete { key } => table.get_key(key)?,
            };
            if !seen.insert(key.clone()) {
                return Err(StoreError::validation(
                    "Provided list of item keys contains duplicates",
                ));
            }
            keyed.push((key, write));
        }

        let count = keyed.len();
        for (key, write) in keyed {
            match write {
                WriteRequest::Put { item } => table.write(key, item),
                WriteRequest::Delete { .. } => table.remove(&key),
            }
        }

        debug!(table = %request.table_name, count, "BatchWriteItem");
        Ok(())
    }

    fn transact_sync(&self, items: Vec<TransactWriteItem>) -> Result<TransactOutcome, StoreError> {
        if items.is_empty() || items.len() > MAX_TRANSACT_ITEMS {
            return Err(StoreError::validation(format!(
                "TransactWriteItems accepts 1 to {MAX_TRANSACT_ITEMS} operations, got {}",
                items.len()
            )));
        }

        let _gate = self.write_gate.lock();

        // Resolve tables and keys
        let mut seen = HashSet::new();
        let mut resolved = Vec::with_capacity(items.len());
        for op in &items {
            let table = self.table(op.table_name())?;
            let key = match op {
                TransactWriteItem::Put { item, .. } => table.get_key(item)?,
                TransactWriteItem::Delete { key, .. }
                | TransactWriteItem::ConditionCheck { key, .. } => table.get_key(key)?,
            };
            if !seen.insert((op.table_name().to_string(), key.clone())) {
                return Err(StoreError::validation(
                    "Transaction request cannot include multiple operations on one item",
                ));
            }
            resolved.push((table, key));
        }

        // Check every condition before writing anything
        let mut reasons = Vec::with_capacity(items.len());
        for (op, (table, key)) in items.iter().zip(&resolved) {
            let condition = match op {
                TransactWriteItem::Put { condition, .. }
                | TransactWriteItem::Delete { condition, .. } => condition.as_ref(),
                TransactWriteItem::ConditionCheck { condition, .. } => Some(condition),
            };
            let passed = table.check_condition(key, condition)?;
            reasons.push((!passed).then(|| "ConditionalCheckFailed".to_string()));
        }

        if reasons.iter().any(Option::is_some) {
            info!(operations = items.len(), "Transaction cancelled");
            return Ok(TransactOutcome::Cancelled { reasons });
        }

        let count = items.len();
        for (op, (table, key)) in items.into_iter().zip(resolved) {
            match op {
                TransactWriteItem::Put { item, .. } => table.write(key, item),
                TransactWriteItem::Delete { .. } => table.remove(&key),
                TransactWriteItem::ConditionCheck { .. } => {}
            }
        }

        debug!(operations = count, "Transaction committed");
        Ok(TransactOutcome::Committed)
    }
}

#[async_trait]
impl TableStore for EphemeralStore {
    async fn get_item(&self, request: GetItemRequest) -> Result<Option<Item>, StoreError> {
        self.get_item_sync(&request)
    }

    async fn query(&self, request: QueryRequest) -> Result<QueryOutput, StoreError> {
        self.query_sync(&request)
    }

    async fn put_item(&self, request: PutItemRequest) -> Result<PutOutcome, StoreError> {
        debug!(table = %request.table_name, conditional = request.condition.is_some(), "PutItem");
        self.put_item_sync(request)
    }

    async fn delete_item(&self, request: DeleteItemRequest) -> Result<(), StoreError> {
        self.delete_item_sync(&request)
    }

    async fn batch_write_item(&self, request: BatchWriteRequest) -> Result<(), StoreError> {
        self.batch_write_sync(request)
    }

    async fn transact_write_items(
        &self,
        items: Vec<TransactWriteItem>,
    ) -> Result<TransactOutcome, StoreError> {
        self.transact_sync(items)
    }
}
