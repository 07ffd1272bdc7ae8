//! Strata: layered storage contexts over an embedded persistent store.
//!
//! A convenience layer over the sled embedded engine: a generic
//! Storage/Context abstraction, typed fetch-request builders, and a
//! two-tier (root + main) context hierarchy where background writes merge
//! back into the UI-facing read context through did-save notifications.

pub mod config;
pub mod context;
pub mod entity;
pub mod error;
pub mod logging;
pub mod query;
pub mod schema;
pub mod storage;
pub mod store;
pub mod value;

pub use context::{Context, ContextParent, GraphContext, SaveNotification};
pub use entity::{Entity, RecordId, RecordKey};
pub use error::{StackError, StorageError};
pub use query::{CompareOp, FetchRequest, Predicate, Requestable, SortDescriptor};
pub use schema::{AttributeKind, EntityDescription, Schema, SchemaSource};
pub use storage::{DefaultStorage, Storage};
pub use store::{OpenOptions, StoreCoordinator, StoreLocation};
pub use value::{Record, Value};
