//! Physical table layout

use std::collections::BTreeMap;

use crate::error::{MapperError, Result};

/// Largest number of secondary indexes a table can declare
pub const MAX_SECONDARY_INDEXES: usize = 6;

pub const DEFAULT_PARTITION_KEY: &str = "pk";
pub const DEFAULT_SORT_KEY: &str = "sk";

/// Key attributes of one secondary index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSchema {
    pub partition_key: String,
    pub sort_key: Option<String>,
}

/// Table name, key attribute names and secondary indexes.
///
/// Immutable once built; item schemas share it through an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    name: String,
    partition_key: String,
    sort_key: Option<String>,
    indexes: BTreeMap<String, IndexSchema>,
}

impl TableSchema {
    /// A table keyed by `pk` and `sk`
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_keys(name, DEFAULT_PARTITION_KEY, Some(DEFAULT_SORT_KEY))
    }

    pub fn with_keys(
        name: impl Into<String>,
        partition_key: impl Into<String>,
        sort_key: Option<&str>,
    ) -> Self {
        Self {
            name: name.into(),
            partition_key: partition_key.into(),
            sort_key: sort_key.map(str::to_string),
            indexes: BTreeMap::new(),
        }
    }

    /// Drop the sort key; items are then addressed by partition key alone
    pub fn without_sort_key(mut self) -> Self {
        self.sort_key = None;
        self
    }

    pub fn with_index(
        mut self,
        index_name: impl Into<String>,
        partition_key: impl Into<String>,
        sort_key: Option<&str>,
    ) -> Result<Self> {
        let index_name = index_name.into();
        if !self.indexes.contains_key(&index_name) && self.indexes.len() >= MAX_SECONDARY_INDEXES {
            return Err(MapperError::InvalidSchema(format!(
                "table '{}' already has {MAX_SECONDARY_INDEXES} secondary indexes, cannot add '{index_name}'",
                self.name
            )));
        }
        self.indexes.insert(
            index_name,
            IndexSchema {
                partition_key: partition_key.into(),
                sort_key: sort_key.map(str::to_string),
            },
        );
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    pub fn sort_key(&self) -> Option<&str> {
        self.sort_key.as_deref()
    }

    pub fn index(&self, index_name: &str) -> Option<&IndexSchema> {
        self.indexes.get(index_name)
    }

    /// Indexes in name order
    pub fn indexes(&self) -> impl Iterator<Item = (&str, &IndexSchema)> {
        self.indexes.iter().map(|(name, index)| (name.as_str(), index))
    }

    /// Sort-key attribute to use when querying `index_name`, or the table's
    /// own sort key when no index is given
    pub(crate) fn sort_attribute_for(&self, index_name: Option<&str>) -> Result<Option<&str>> {
        match index_name {
            None => Ok(self.sort_key()),
            Some(name) => self
                .index(name)
                .map(|index| index.sort_key.as_deref())
                .ok_or_else(|| self.unknown_index(name)),
        }
    }

    pub(crate) fn partition_attribute_for(&self, index_name: Option<&str>) -> Result<&str> {
        match index_name {
            None => Ok(self.partition_key()),
            Some(name) => self
                .index(name)
                .map(|index| index.partition_key.as_str())
                .ok_or_else(|| self.unknown_index(name)),
        }
    }

    pub(crate) fn unknown_index(&self, index_name: &str) -> MapperError {
        MapperError::InvalidSchema(format!(
            "table '{}' has no secondary index named '{index_name}'",
            self.name
        ))
    }
}
