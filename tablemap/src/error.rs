//! Mapper error type

use tablemap_core::{BoxError, StoreError};
use thiserror::Error;

use crate::codec::CodecError;

pub type Result<T, E = MapperError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum MapperError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Key schema resolution failed: {0}")]
    SchemaResolution(String),

    #[error("Could not hydrate '{type_name}': {source}")]
    Hydration {
        type_name: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("Max depth of {depth} exceeded while hydrating '{type_name}'")]
    MaxDepthExceeded { type_name: &'static str, depth: usize },

    #[error("Pagination error: {0}")]
    Pagination(String),

    #[error("Transactions are limited to {limit} operations")]
    TransactionCapacity { limit: usize },

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Invalid condition: {0}")]
    InvalidCondition(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MapperError {
    pub(crate) fn hydration(type_name: &'static str, source: impl Into<BoxError>) -> Self {
        MapperError::Hydration {
            type_name,
            source: source.into(),
        }
    }

    /// Whether the failure came from the store and may succeed on retry
    pub fn is_transient(&self) -> bool {
        matches!(self, MapperError::Store(err) if err.code.is_transient())
    }
}
