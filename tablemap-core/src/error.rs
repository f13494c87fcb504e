//! Store error types

use thiserror::Error;

/// Boxed error carried from a store client
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Store error codes (the subset of DynamoDB codes a mapper can observe)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ResourceNotFoundException,
    ResourceInUseException,
    ValidationException,
    ProvisionedThroughputExceededException,
    TransactionConflictException,
    ServiceUnavailable,
    InternalServerError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResourceNotFoundException => "ResourceNotFoundException",
            Self::ResourceInUseException => "ResourceInUseException",
            Self::ValidationException => "ValidationException",
            Self::ProvisionedThroughputExceededException => {
                "ProvisionedThroughputExceededException"
            }
            Self::TransactionConflictException => "TransactionConflictException",
            Self::ServiceUnavailable => "ServiceUnavailable",
            Self::InternalServerError => "InternalServerError",
        }
    }

    /// Whether a caller could reasonably retry the same request later
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ProvisionedThroughputExceededException
                | Self::TransactionConflictException
                | Self::ServiceUnavailable
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by a [`TableStore`](crate::TableStore)
#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct StoreError {
    pub code: ErrorCode,
    pub message: String,
    pub table: Option<String>,
    #[source]
    pub source: Option<BoxError>,
}

impl StoreError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            table: None,
            source: None,
        }
    }

    pub fn table_not_found(table: impl Into<String>) -> Self {
        let table = table.into();
        Self::new(
            ErrorCode::ResourceNotFoundException,
            format!("Requested resource not found: Table: {table} not found"),
        )
        .with_table(table)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationException, message)
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }
}
