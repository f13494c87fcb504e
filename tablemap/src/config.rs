//! Configuration management
//!
//! Table layouts can be declared in a `tablemap.toml` (or `.json`, `.yaml`)
//! file and overridden from `TABLEMAP__*` environment variables:
//!
//! ```toml
//! [[tables]]
//! name = "orders"
//! partition_key = "pk"
//! sort_key = "sk"
//!
//! [[tables.indexes]]
//! name = "by_status"
//! partition_key = "status"
//! sort_key = "created_at"
//! ```

use serde::Deserialize;
use std::sync::Arc;

use crate::error::Result;
use crate::table::{TableSchema, DEFAULT_PARTITION_KEY, DEFAULT_SORT_KEY};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct MapperConfig {
    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TableConfig {
    pub name: String,

    #[serde(default = "default_partition_key")]
    pub partition_key: String,

    /// An empty string declares a table without a sort key
    #[serde(default = "default_sort_key")]
    pub sort_key: Option<String>,

    #[serde(default)]
    pub indexes: Vec<IndexConfig>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct IndexConfig {
    pub name: String,
    pub partition_key: String,

    #[serde(default)]
    pub sort_key: Option<String>,
}

fn default_partition_key() -> String {
    DEFAULT_PARTITION_KEY.to_string()
}

fn default_sort_key() -> Option<String> {
    Some(DEFAULT_SORT_KEY.to_string())
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|s| !s.is_empty())
}

impl TableConfig {
    pub fn to_schema(&self) -> Result<TableSchema> {
        let mut schema = TableSchema::with_keys(
            &self.name,
            &self.partition_key,
            non_empty(self.sort_key.as_ref()),
        );
        for index in &self.indexes {
            schema = schema.with_index(
                &index.name,
                &index.partition_key,
                non_empty(index.sort_key.as_ref()),
            )?;
        }
        Ok(schema)
    }
}

impl MapperConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("tablemap").required(false))
            .add_source(config::Environment::with_prefix("TABLEMAP").separator("__"))
            .build()?;

        Ok(config.try_deserialize::<MapperConfig>()?)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()?;

        Ok(config.try_deserialize::<MapperConfig>()?)
    }

    pub fn table(&self, name: &str) -> Option<&TableConfig> {
        self.tables.iter().find(|table| table.name == name)
    }

    pub fn table_schemas(&self) -> Result<Vec<Arc<TableSchema>>> {
        self.tables
            .iter()
            .map(|table| table.to_schema().map(Arc::new))
            .collect()
    }
}
