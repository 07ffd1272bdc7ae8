//! Typed fetch-request builder.
//!
//! A `FetchRequest` is a pure value describing one query: an optional bound
//! context, an optional predicate, at most one sort key, an offset, and a
//! limit. Builder calls never mutate in place; each returns a new request
//! with one field changed.

use std::collections::BTreeSet;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::context::{Context, GraphContext};
use crate::entity::Entity;
use crate::error::StorageError;
use crate::query::{Predicate, SortDescriptor};
use crate::value::{Record, Value};

/// Anything that can hand out a context for building fetch requests.
pub trait Requestable {
    fn request_context(&self) -> Arc<GraphContext>;

    /// Build a request for `T` bound to this requestable's context.
    fn request<T: Entity>(&self) -> FetchRequest<T> {
        FetchRequest::bound(self.request_context())
    }
}

/// An immutable, chainable fetch descriptor for entity `T`.
pub struct FetchRequest<T: Entity> {
    context: Option<Arc<GraphContext>>,
    predicate: Option<Predicate>,
    sort: Option<SortDescriptor>,
    offset: usize,
    limit: usize,
    marker: PhantomData<fn() -> T>,
}

impl<T: Entity> FetchRequest<T> {
    /// An unbound request. Only `count` succeeds (returning 0) until the
    /// request is bound to a context.
    pub fn new() -> Self {
        FetchRequest {
            context: None,
            predicate: None,
            sort: None,
            offset: 0,
            limit: 0,
            marker: PhantomData,
        }
    }

    /// A request bound to the given context.
    pub fn bound(context: Arc<GraphContext>) -> Self {
        FetchRequest {
            context: Some(context),
            ..FetchRequest::new()
        }
    }

    // MARK: accessors

    pub fn predicate(&self) -> Option<&Predicate> {
        self.predicate.as_ref()
    }

    pub fn sort(&self) -> Option<&SortDescriptor> {
        self.sort.as_ref()
    }

    pub fn fetch_offset(&self) -> usize {
        self.offset
    }

    pub fn fetch_limit(&self) -> usize {
        self.limit
    }

    /// Whether two requests are bound to the same context (reference
    /// identity). Bound contexts are excluded from `==`; callers that care
    /// about the binding compare it explicitly with this.
    pub fn same_binding(&self, other: &FetchRequest<T>) -> bool {
        match (&self.context, &other.context) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    // MARK: builders

    pub fn filtered(&self, predicate: Predicate) -> FetchRequest<T> {
        FetchRequest {
            predicate: Some(predicate),
            ..self.duplicate()
        }
    }

    pub fn filtered_key_eq(&self, key: &str, value: impl Into<Value>) -> FetchRequest<T> {
        self.filtered(Predicate::eq(key, value))
    }

    pub fn filtered_key_in<V: Into<Value>>(&self, key: &str, values: Vec<V>) -> FetchRequest<T> {
        self.filtered(Predicate::key_in(key, values))
    }

    pub fn filtered_key_not_in<V: Into<Value>>(
        &self,
        key: &str,
        values: Vec<V>,
    ) -> FetchRequest<T> {
        self.filtered(Predicate::key_not_in(key, values))
    }

    pub fn sorted(&self, sort: SortDescriptor) -> FetchRequest<T> {
        FetchRequest {
            sort: Some(sort),
            ..self.duplicate()
        }
    }

    pub fn sorted_by_key(&self, key: &str, ascending: bool) -> FetchRequest<T> {
        self.sorted(SortDescriptor {
            key: key.to_string(),
            ascending,
        })
    }

    pub fn offset(&self, value: usize) -> FetchRequest<T> {
        FetchRequest {
            offset: value,
            ..self.duplicate()
        }
    }

    pub fn limit(&self, value: usize) -> FetchRequest<T> {
        FetchRequest {
            limit: value,
            ..self.duplicate()
        }
    }

    // MARK: synchronous operations

    pub fn fetch(&self) -> Result<Vec<T>, StorageError> {
        self.require_context()?.fetch(self)
    }

    /// Fetch using the given requestable's context instead of the bound one.
    pub fn fetch_from<R: Requestable>(&self, requestable: &R) -> Result<Vec<T>, StorageError> {
        requestable.request_context().fetch(self)
    }

    pub fn fetch_one(&self) -> Result<Option<T>, StorageError> {
        self.require_context()?.fetch_one(self)
    }

    /// Row count for this request. An unbound request counts 0 rather than
    /// failing.
    pub fn count(&self) -> usize {
        match &self.context {
            Some(context) => context.count(self),
            None => 0,
        }
    }

    pub fn query(&self, attributes: &[&str]) -> Result<Vec<Record>, StorageError> {
        self.require_context()?.query(self, attributes)
    }

    pub fn query_one(&self, attributes: &[&str]) -> Result<Option<Record>, StorageError> {
        self.require_context()?.query_one(self, attributes)
    }

    pub fn query_values(&self, attribute: &str) -> Result<Vec<String>, StorageError> {
        self.require_context()?.query_values(self, attribute)
    }

    pub fn query_set(&self, attribute: &str) -> Result<BTreeSet<String>, StorageError> {
        self.require_context()?.query_set(self, attribute)
    }

    // MARK: asynchronous operations

    pub async fn fetch_async(&self) -> Result<Vec<T>, StorageError> {
        self.require_context()?.fetch_async(self).await
    }

    pub async fn fetch_one_async(&self) -> Result<Option<T>, StorageError> {
        self.require_context()?.fetch_one_async(self).await
    }

    pub async fn count_async(&self) -> usize {
        match &self.context {
            Some(context) => context.count_async(self).await,
            None => 0,
        }
    }

    pub async fn query_async(&self, attributes: &[&str]) -> Result<Vec<Record>, StorageError> {
        self.require_context()?.query_async(self, attributes).await
    }

    pub async fn query_one_async(
        &self,
        attributes: &[&str],
    ) -> Result<Option<Record>, StorageError> {
        self.require_context()?
            .query_one_async(self, attributes)
            .await
    }

    pub async fn query_values_async(&self, attribute: &str) -> Result<Vec<String>, StorageError> {
        self.require_context()?
            .query_values_async(self, attribute)
            .await
    }

    pub async fn query_set_async(
        &self,
        attribute: &str,
    ) -> Result<BTreeSet<String>, StorageError> {
        self.require_context()?
            .query_set_async(self, attribute)
            .await
    }

    // MARK: helpers

    fn require_context(&self) -> Result<&Arc<GraphContext>, StorageError> {
        self.context.as_ref().ok_or(StorageError::ContextRequired)
    }

    fn duplicate(&self) -> FetchRequest<T> {
        FetchRequest {
            context: self.context.clone(),
            predicate: self.predicate.clone(),
            sort: self.sort.clone(),
            offset: self.offset,
            limit: self.limit,
            marker: PhantomData,
        }
    }
}

impl<T: Entity> Default for FetchRequest<T> {
    fn default() -> Self {
        FetchRequest::new()
    }
}

impl<T: Entity> Clone for FetchRequest<T> {
    fn clone(&self) -> Self {
        self.duplicate()
    }
}

impl<T: Entity> fmt::Debug for FetchRequest<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchRequest")
            .field("entity", &T::entity_name())
            .field("bound", &self.context.is_some())
            .field("predicate", &self.predicate)
            .field("sort", &self.sort)
            .field("offset", &self.offset)
            .field("limit", &self.limit)
            .finish()
    }
}

// Structural equality over the descriptor fields; the bound context is
// deliberately excluded (see `same_binding`).
impl<T: Entity> PartialEq for FetchRequest<T> {
    fn eq(&self, other: &Self) -> bool {
        self.predicate == other.predicate
            && self.sort == other.sort
            && self.offset == other.offset
            && self.limit == other.limit
    }
}
