//! Error types for the layered storage system.

use thiserror::Error;

/// Errors raised while constructing a storage stack: loading the schema model
/// and attaching the physical store.
#[derive(Debug, Error)]
pub enum StackError {
    #[error("invalid schema model: {0}")]
    InvalidModel(String),

    #[error("failed to initialize the persistent store")]
    StoreInitialization {
        #[source]
        underlying: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl StackError {
    pub(crate) fn store_init<E>(underlying: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StackError::StoreInitialization {
            underlying: Some(Box::new(underlying)),
        }
    }
}

impl From<config::ConfigError> for StackError {
    fn from(err: config::ConfigError) -> Self {
        StackError::Configuration(err.to_string())
    }
}

/// Errors raised by per-request storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to write to the persistent store")]
    Write,

    #[error("the value type is invalid for this operation")]
    InvalidType,

    #[error("the operation requires a bound context")]
    ContextRequired,

    #[error("failed to fetch from the store: {0}")]
    Fetch(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("storage layer returned an error: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("unknown storage error")]
    Unknown,
}

impl StorageError {
    /// Wrap an arbitrary error, passing existing `StorageError`s through.
    pub fn wrapping<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let boxed: Box<dyn std::error::Error + Send + Sync> = Box::new(error);
        match boxed.downcast::<StorageError>() {
            Ok(storage) => *storage,
            Err(other) => StorageError::Store(other),
        }
    }

    /// A lightweight retry classification. This is a hint for callers; no
    /// operation retries automatically.
    pub fn is_retriable(&self) -> bool {
        match self {
            StorageError::Write => true,
            StorageError::Fetch(_) => true,
            StorageError::Store(_) => true,
            StorageError::Unknown => true,
            StorageError::InvalidType => false,
            StorageError::ContextRequired => false,
            StorageError::InvalidOperation(_) => false,
        }
    }
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::Store(Box::new(err))
    }
}
