//! Per-type key schema
//!
//! An [`ItemSchema`] binds an [`Entity`] type to a [`TableSchema`]: it knows
//! how to pull the partition key, sort key and secondary-index keys out of a
//! value, how to lay the value out as an item, and how to hydrate it back.
//!
//! Key extractors are resolved once, at [`ItemSchemaBuilder::build`], with
//! this precedence:
//!
//! 1. a function supplied with `partition_key_with` / `sort_key_with`
//! 2. a property marked [`Property::hash_key`](crate::Property::hash_key) /
//!    [`Property::range_key`](crate::Property::range_key)
//! 3. a text property named like the table's key attribute (case-insensitive)
//! 4. a property named with `map_partition_key` / `map_sort_key`
//!
//! A key that cannot be resolved is only reported when a key is first
//! extracted, as [`MapperError::SchemaResolution`].

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tablemap_core::{AttributeValue, Item};

use crate::codec::Codec;
use crate::entity::{Entity, EntityMapping, KeyAnnotation, MapContext, MappingCache};
use crate::error::{MapperError, Result};
use crate::hydrate::{self, KeyLookup};
use crate::registry::ConverterRegistry;
use crate::table::TableSchema;

type KeyFn<T> = Arc<dyn Fn(&T) -> String + Send + Sync>;
type IndexKeyFn<T> = Arc<dyn Fn(&T) -> Option<String> + Send + Sync>;
type ToJsonFn<T> = Arc<dyn Fn(&T) -> serde_json::Result<String> + Send + Sync>;
type FromJsonFn<T> = Arc<dyn Fn(&str) -> serde_json::Result<T> + Send + Sync>;

enum KeySource<T> {
    Function(KeyFn<T>),
    Property(String),
}

enum IndexKeySource<T> {
    Function(IndexKeyFn<T>),
    Property(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum IndexRole {
    Partition,
    Sort,
}

struct IndexKey<T> {
    index_name: String,
    role: IndexRole,
    attribute: String,
    source: IndexKeySource<T>,
}

struct JsonBlob<T> {
    attribute: String,
    to_json: ToJsonFn<T>,
    from_json: FromJsonFn<T>,
}

struct SchemaInner<T> {
    table: Arc<TableSchema>,
    mapping: Arc<EntityMapping<T>>,
    codec: Codec,
    mappings: MappingCache,
    partition: Option<KeySource<T>>,
    sort: Option<KeySource<T>>,
    index_keys: Vec<IndexKey<T>>,
    json: Option<JsonBlob<T>>,
}

/// Key schema and item layout of one entity type in one table
pub struct ItemSchema<T> {
    inner: Arc<SchemaInner<T>>,
}

impl<T> Clone for ItemSchema<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Entity> ItemSchema<T> {
    pub fn builder(table: Arc<TableSchema>) -> ItemSchemaBuilder<T> {
        ItemSchemaBuilder {
            table,
            partition_fn: None,
            sort_fn: None,
            partition_ref: None,
            sort_ref: None,
            index_keys: Vec::new(),
            json: None,
            converters: ConverterRegistry::default(),
        }
    }

    /// Schema relying on annotations and naming conventions only
    pub fn new(table: Arc<TableSchema>) -> Result<Self> {
        Self::builder(table).build()
    }

    pub fn table(&self) -> &TableSchema {
        &self.inner.table
    }

    pub fn table_name(&self) -> &str {
        self.inner.table.name()
    }

    pub fn mapping(&self) -> &EntityMapping<T> {
        &self.inner.mapping
    }

    pub fn codec(&self) -> &Codec {
        &self.inner.codec
    }

    pub fn json_attribute(&self) -> Option<&str> {
        self.inner.json.as_ref().map(|blob| blob.attribute.as_str())
    }

    pub fn partition_key(&self, value: &T) -> Result<String> {
        self.inner
            .extract_key(self.inner.partition.as_ref(), "partition", value)
    }

    pub fn sort_key(&self, value: &T) -> Result<String> {
        self.inner.extract_key(self.inner.sort.as_ref(), "sort", value)
    }

    /// Whether `property` is the property the partition key is read from
    pub fn is_partition_key_attribute(&self, property: &str) -> bool {
        self.inner.is_partition_key_attribute(property)
    }

    /// Whether `property` is the property the sort key is read from
    pub fn is_sort_key_attribute(&self, property: &str) -> bool {
        self.inner.is_sort_key_attribute(property)
    }

    /// Physical secondary-index attribute fed by `property`, if any
    pub fn gsi_attribute_for(&self, property: &str) -> Option<&str> {
        self.inner.gsi_attribute_for(property)
    }

    /// Secondary-index key attributes of `value`; keys whose source is null
    /// are left out so the item stays out of that index
    pub fn index_keys(&self, value: &T) -> Result<Vec<(String, String)>> {
        let ctx = self.inner.context();
        let mut keys = Vec::with_capacity(self.inner.index_keys.len());
        for index_key in &self.inner.index_keys {
            let key = match &index_key.source {
                IndexKeySource::Function(f) => f(value),
                IndexKeySource::Property(name) => match self.inner.read_property(name, value, &ctx)? {
                    Some(attribute) => Some(self.inner.key_text(&attribute, name)?),
                    None => None,
                },
            };
            if let Some(key) = key {
                keys.push((index_key.attribute.clone(), key));
            }
        }
        Ok(keys)
    }

    /// Primary key item for the given key values
    pub fn key(&self, partition: &str, sort: Option<&str>) -> Result<Item> {
        let table = &self.inner.table;
        let mut key = Item::new();
        key.insert(
            table.partition_key().to_string(),
            AttributeValue::string(partition),
        );
        match (table.sort_key(), sort) {
            (Some(attribute), Some(sort)) => {
                key.insert(attribute.to_string(), AttributeValue::string(sort));
            }
            (Some(attribute), None) => {
                return Err(MapperError::SchemaResolution(format!(
                    "table '{}' requires a value for sort key '{attribute}'",
                    table.name()
                )));
            }
            (None, Some(_)) => {
                return Err(MapperError::SchemaResolution(format!(
                    "table '{}' has no sort key",
                    table.name()
                )));
            }
            (None, None) => {}
        }
        Ok(key)
    }

    /// Primary key item of `value`
    pub fn key_of(&self, value: &T) -> Result<Item> {
        let partition = self.partition_key(value)?;
        let sort = match self.inner.table.sort_key() {
            Some(_) => Some(self.sort_key(value)?),
            None => None,
        };
        self.key(&partition, sort.as_deref())
    }

    /// Lay `value` out as a store item: keys, secondary-index keys, then
    /// either the JSON blob or every non-key property with a value
    pub fn to_item(&self, value: &T) -> Result<Item> {
        let inner = &self.inner;
        let mut item = self.key_of(value)?;
        for (attribute, key) in self.index_keys(value)? {
            item.insert(attribute, AttributeValue::S(key));
        }

        if let Some(blob) = &inner.json {
            item.insert(blob.attribute.clone(), AttributeValue::S((blob.to_json)(value)?));
            return Ok(item);
        }

        let ctx = inner.context();
        for property in inner.mapping.properties() {
            if inner.is_partition_key_attribute(property.name())
                || inner.is_sort_key_attribute(property.name())
            {
                continue;
            }
            if let Some(attribute) = property.read(value, &ctx)? {
                item.entry(property.name().to_string()).or_insert(attribute);
            }
        }
        Ok(item)
    }

    /// Build a `T` from a store item
    pub fn hydrate(&self, item: &Item) -> Result<T> {
        let inner = &self.inner;
        let ctx = inner.context();

        let Some(blob) = &inner.json else {
            let keys: &dyn KeyLookup = inner.as_ref();
            return hydrate::hydrate_entity(&inner.mapping, item, &ctx, Some(keys));
        };

        let text = item
            .get(&blob.attribute)
            .and_then(AttributeValue::as_string)
            .ok_or_else(|| {
                MapperError::hydration(
                    inner.mapping.type_name(),
                    format!("JSON attribute '{}' is missing or not text", blob.attribute),
                )
            })?;
        let mut value = (blob.from_json)(text)?;
        inner.apply_keys(&mut value, item, &ctx)?;
        Ok(value)
    }
}

impl<T: 'static> SchemaInner<T> {
    fn context(&self) -> MapContext<'_> {
        MapContext::root(&self.codec, &self.mappings)
    }

    fn read_property(
        &self,
        name: &str,
        value: &T,
        ctx: &MapContext<'_>,
    ) -> Result<Option<AttributeValue>> {
        let property = self.mapping.property(name).ok_or_else(|| {
            MapperError::SchemaResolution(format!(
                "'{}' has no property named '{name}'",
                self.mapping.type_name()
            ))
        })?;
        property.read(value, ctx)
    }

    fn key_text(&self, attribute: &AttributeValue, property: &str) -> Result<String> {
        attribute.key_text().map(str::to_string).ok_or_else(|| {
            MapperError::SchemaResolution(format!(
                "key property '{property}' of '{}' holds a {} value; keys must be text or numbers",
                self.mapping.type_name(),
                attribute.type_tag()
            ))
        })
    }

    fn extract_key(&self, source: Option<&KeySource<T>>, role: &str, value: &T) -> Result<String> {
        match source {
            None => Err(MapperError::SchemaResolution(format!(
                "no {role} key mapping for '{}' in table '{}'",
                self.mapping.type_name(),
                self.table.name()
            ))),
            Some(KeySource::Function(f)) => Ok(f(value)),
            Some(KeySource::Property(name)) => {
                let ctx = self.context();
                match self.read_property(name, value, &ctx)? {
                    Some(attribute) => self.key_text(&attribute, name),
                    None => Err(MapperError::SchemaResolution(format!(
                        "{role} key property '{name}' of '{}' is null",
                        self.mapping.type_name()
                    ))),
                }
            }
        }
    }

    fn is_partition_key_attribute(&self, property: &str) -> bool {
        matches!(&self.partition, Some(KeySource::Property(name)) if name.eq_ignore_ascii_case(property))
    }

    fn is_sort_key_attribute(&self, property: &str) -> bool {
        matches!(&self.sort, Some(KeySource::Property(name)) if name.eq_ignore_ascii_case(property))
    }

    fn gsi_attribute_for(&self, property: &str) -> Option<&str> {
        self.index_keys
            .iter()
            .find(|key| matches!(&key.source, IndexKeySource::Property(name) if name.eq_ignore_ascii_case(property)))
            .map(|key| key.attribute.as_str())
    }

    /// Copy the key attributes back onto the key properties
    fn apply_keys(&self, value: &mut T, item: &Item, ctx: &MapContext<'_>) -> Result<()> {
        let pairs = [
            (&self.partition, Some(self.table.partition_key())),
            (&self.sort, self.table.sort_key()),
        ];
        for (source, attribute) in pairs {
            let (Some(KeySource::Property(name)), Some(attribute)) = (source, attribute) else {
                continue;
            };
            let (Some(property), Some(key)) = (self.mapping.property(name), item.get(attribute))
            else {
                continue;
            };
            hydrate::write_key(property, value, key, ctx)?;
        }
        Ok(())
    }
}

impl<T: 'static> KeyLookup for SchemaInner<T> {
    fn key_attribute_for(&self, property: &str) -> Option<&str> {
        if self.is_partition_key_attribute(property) {
            Some(self.table.partition_key())
        } else if self.is_sort_key_attribute(property) {
            self.table.sort_key()
        } else {
            None
        }
    }

    fn gsi_attribute_for(&self, property: &str) -> Option<&str> {
        SchemaInner::gsi_attribute_for(self, property)
    }
}

impl<T> fmt::Debug for ItemSchema<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = &self.inner;
        f.debug_struct("ItemSchema")
            .field("type_name", &inner.mapping.type_name())
            .field("table", &inner.table.name())
            .field("index_keys", &inner.index_keys.len())
            .field("json_attribute", &inner.json.as_ref().map(|b| &b.attribute))
            .finish_non_exhaustive()
    }
}

struct PendingIndexKey<T> {
    index_name: String,
    role: IndexRole,
    source: IndexKeySource<T>,
}

pub struct ItemSchemaBuilder<T> {
    table: Arc<TableSchema>,
    partition_fn: Option<KeyFn<T>>,
    sort_fn: Option<KeyFn<T>>,
    partition_ref: Option<String>,
    sort_ref: Option<String>,
    index_keys: Vec<PendingIndexKey<T>>,
    json: Option<JsonBlob<T>>,
    converters: ConverterRegistry,
}

impl<T: Entity> ItemSchemaBuilder<T> {
    pub fn partition_key_with(mut self, f: impl Fn(&T) -> String + Send + Sync + 'static) -> Self {
        self.partition_fn = Some(Arc::new(f));
        self
    }

    pub fn sort_key_with(mut self, f: impl Fn(&T) -> String + Send + Sync + 'static) -> Self {
        self.sort_fn = Some(Arc::new(f));
        self
    }

    /// Read the partition key from the named property
    pub fn map_partition_key(mut self, property: impl Into<String>) -> Self {
        self.partition_ref = Some(property.into());
        self
    }

    /// Read the sort key from the named property
    pub fn map_sort_key(mut self, property: impl Into<String>) -> Self {
        self.sort_ref = Some(property.into());
        self
    }

    pub fn index_partition_key_with(
        self,
        index_name: impl Into<String>,
        f: impl Fn(&T) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.index_key(index_name, IndexRole::Partition, IndexKeySource::Function(Arc::new(f)))
    }

    pub fn map_index_partition_key(
        self,
        index_name: impl Into<String>,
        property: impl Into<String>,
    ) -> Self {
        self.index_key(index_name, IndexRole::Partition, IndexKeySource::Property(property.into()))
    }

    pub fn index_sort_key_with(
        self,
        index_name: impl Into<String>,
        f: impl Fn(&T) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.index_key(index_name, IndexRole::Sort, IndexKeySource::Function(Arc::new(f)))
    }

    pub fn map_index_sort_key(
        self,
        index_name: impl Into<String>,
        property: impl Into<String>,
    ) -> Self {
        self.index_key(index_name, IndexRole::Sort, IndexKeySource::Property(property.into()))
    }

    fn index_key(
        mut self,
        index_name: impl Into<String>,
        role: IndexRole,
        source: IndexKeySource<T>,
    ) -> Self {
        self.index_keys.push(PendingIndexKey {
            index_name: index_name.into(),
            role,
            source,
        });
        self
    }

    /// Custom converters used for every property of this schema
    pub fn converters(mut self, converters: ConverterRegistry) -> Self {
        self.converters = converters;
        self
    }

    pub fn build(self) -> Result<ItemSchema<T>> {
        let mapping = Arc::new(T::mapping());
        let table = self.table;

        let partition = resolve_key(
            &mapping,
            self.partition_fn,
            KeyAnnotation::Hash,
            table.partition_key(),
            self.partition_ref,
        );
        let sort = match table.sort_key() {
            Some(attribute) => {
                resolve_key(&mapping, self.sort_fn, KeyAnnotation::Range, attribute, self.sort_ref)
            }
            None => None,
        };

        let mut index_keys = Vec::with_capacity(self.index_keys.len());
        for pending in self.index_keys {
            let index = table
                .index(&pending.index_name)
                .ok_or_else(|| table.unknown_index(&pending.index_name))?;
            let attribute = match pending.role {
                IndexRole::Partition => index.partition_key.clone(),
                IndexRole::Sort => index.sort_key.clone().ok_or_else(|| {
                    MapperError::InvalidSchema(format!(
                        "secondary index '{}' has no sort key",
                        pending.index_name
                    ))
                })?,
            };
            let source = match pending.source {
                IndexKeySource::Property(name) => {
                    let property = mapping.property(&name).ok_or_else(|| {
                        MapperError::InvalidSchema(format!(
                            "'{}' has no property named '{name}' for index '{}'",
                            mapping.type_name(),
                            pending.index_name
                        ))
                    })?;
                    IndexKeySource::Property(property.name().to_string())
                }
                function => function,
            };
            index_keys.push(IndexKey {
                index_name: pending.index_name,
                role: pending.role,
                attribute,
                source,
            });
        }
        index_keys.sort_by(|a, b| (&a.index_name, a.role).cmp(&(&b.index_name, b.role)));

        Ok(ItemSchema {
            inner: Arc::new(SchemaInner {
                table,
                mapping,
                codec: Codec::new(self.converters),
                mappings: MappingCache::default(),
                partition,
                sort,
                index_keys,
                json: self.json,
            }),
        })
    }
}

impl<T: Entity + Serialize + DeserializeOwned> ItemSchemaBuilder<T> {
    /// Store the whole value as JSON text in one attribute, next to its keys
    pub fn json_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.json = Some(JsonBlob {
            attribute: attribute.into(),
            to_json: Arc::new(|value: &T| serde_json::to_string(value)),
            from_json: Arc::new(|text: &str| serde_json::from_str(text)),
        });
        self
    }
}

fn resolve_key<T>(
    mapping: &EntityMapping<T>,
    function: Option<KeyFn<T>>,
    annotation: KeyAnnotation,
    attribute: &str,
    by_reference: Option<String>,
) -> Option<KeySource<T>>
where
    T: 'static,
{
    if let Some(f) = function {
        return Some(KeySource::Function(f));
    }

    let properties = mapping.properties();
    properties
        .iter()
        .find(|p| p.key_annotation() == Some(annotation))
        .or_else(|| {
            properties
                .iter()
                .find(|p| p.is_text() && p.name().eq_ignore_ascii_case(attribute))
        })
        .or_else(|| by_reference.and_then(|name| mapping.property(&name)))
        .map(|p| KeySource::Property(p.name().to_string()))
}
