//! Contexts: queue-confined handles onto the in-memory object graph.
//!
//! A context is chained to a parent (another context, or the store
//! coordinator at the root) and owns a private set of uncommitted changes.
//! Fetches lazily pull committed rows through the parent chain and overlay
//! the local pending set; saves copy the pending set one level up, reaching
//! the physical store only at the root.

mod notify;
mod queue;

pub use notify::{SaveBus, SaveNotification};

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::entity::{Entity, RecordId, RecordKey};
use crate::error::StorageError;
use crate::query::request::{FetchRequest, Requestable};
use crate::query::Predicate;
use crate::store::StoreCoordinator;
use crate::value::Record;

use queue::SerialQueue;

/// What a context saves into: the physical-store coordinator, or another
/// context. Equality and hashing are by reference identity.
#[derive(Clone)]
pub enum ContextParent {
    Coordinator(Arc<StoreCoordinator>),
    Context(Arc<GraphContext>),
}

impl PartialEq for ContextParent {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ContextParent::Coordinator(a), ContextParent::Coordinator(b)) => Arc::ptr_eq(a, b),
            (ContextParent::Context(a), ContextParent::Context(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for ContextParent {}

impl Hash for ContextParent {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            ContextParent::Coordinator(c) => {
                0u8.hash(state);
                (Arc::as_ptr(c) as usize).hash(state);
            }
            ContextParent::Context(c) => {
                1u8.hash(state);
                (Arc::as_ptr(c) as usize).hash(state);
            }
        }
    }
}

impl fmt::Debug for ContextParent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for ContextParent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextParent::Coordinator(_) => write!(f, "ContextParent::Coordinator"),
            ContextParent::Context(context) => {
                write!(f, "ContextParent::Context({})", context.label())
            }
        }
    }
}

/// An uncommitted change to one row.
#[derive(Debug, Clone)]
enum Pending {
    Upsert(Record),
    Delete,
}

/// State owned by the confinement queue: the lazily loaded committed view
/// plus the pending change set.
#[derive(Default)]
struct ContextState {
    /// Committed rows pulled through the parent chain, keyed by entity.
    /// Absence of an entity means it has not been loaded yet.
    loaded: HashMap<String, HashMap<RecordId, Record>>,
    pending: HashMap<RecordKey, Pending>,
    /// Temporary-to-permanent identifier reassignments performed by the
    /// pre-save hook, so instances holding stale temporary identifiers keep
    /// resolving to the right row.
    remapped: HashMap<u64, RecordId>,
    next_temporary: u64,
}

impl ContextState {
    fn allocate_temporary(&mut self) -> RecordId {
        self.next_temporary += 1;
        RecordId::Temporary(self.next_temporary)
    }

    fn resolve_id(&self, id: RecordId) -> RecordId {
        match id {
            RecordId::Temporary(t) => self.remapped.get(&t).copied().unwrap_or(id),
            permanent => permanent,
        }
    }
}

fn next_context_id() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Assemble the effective row set of one entity: the committed view (loaded
/// through the parent on first touch) overlaid with local pending changes.
fn load_effective_rows(
    state: &mut ContextState,
    parent: &ContextParent,
    entity: &str,
) -> Result<HashMap<RecordId, Record>, StorageError> {
    if !state.loaded.contains_key(entity) {
        let base = match parent {
            ContextParent::Coordinator(coordinator) => coordinator.scan(entity)?,
            ContextParent::Context(context) => context.effective_rows(entity)?,
        };
        state.loaded.insert(entity.to_string(), base);
    }
    let mut rows = state
        .loaded
        .get(entity)
        .cloned()
        .unwrap_or_default();
    for (key, change) in &state.pending {
        if key.entity == entity {
            match change {
                Pending::Upsert(record) => {
                    rows.insert(key.id, record.clone());
                }
                Pending::Delete => {
                    rows.remove(&key.id);
                }
            }
        }
    }
    Ok(rows)
}

fn project(record: &Record, attributes: &[String]) -> Record {
    attributes
        .iter()
        .filter_map(|name| record.get(name).map(|v| (name.clone(), v.clone())))
        .collect()
}

/// The concrete context adapter for the sled-backed store.
pub struct GraphContext {
    id: u64,
    label: String,
    parent: ContextParent,
    coordinator: Arc<StoreCoordinator>,
    bus: Arc<SaveBus>,
    queue: SerialQueue<ContextState>,
    assigns_permanent_ids: bool,
}

impl GraphContext {
    /// Create a context and register its merge observer on the stack bus.
    pub(crate) fn new(
        label: &str,
        parent: ContextParent,
        coordinator: Arc<StoreCoordinator>,
        bus: Arc<SaveBus>,
        assigns_permanent_ids: bool,
    ) -> Arc<Self> {
        let id = next_context_id();
        let context = Arc::new(GraphContext {
            id,
            label: label.to_string(),
            parent,
            coordinator,
            bus: bus.clone(),
            queue: SerialQueue::new(label, ContextState::default()),
            assigns_permanent_ids,
        });

        // Merge persisted changes from sibling contexts by evicting their
        // entities from the loaded view, on this context's own queue.
        let weak = Arc::downgrade(&context);
        bus.observe(move |notification| {
            if notification.source == id {
                return;
            }
            let Some(context) = weak.upgrade() else {
                return;
            };
            let entities: BTreeSet<String> = notification
                .changed
                .iter()
                .map(|key| key.entity.clone())
                .collect();
            trace!(context = %context.label, entities = entities.len(), "merging did-save notification");
            context.queue.perform_detached(move |state| {
                for entity in &entities {
                    state.loaded.remove(entity);
                }
            });
        });

        context
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn parent(&self) -> &ContextParent {
        &self.parent
    }

    /// The effective (committed + pending) rows of one entity, as seen by
    /// this context. Child contexts pull their committed view through this.
    fn effective_rows(&self, entity: &str) -> Result<HashMap<RecordId, Record>, StorageError> {
        let entity = entity.to_string();
        let parent = self.parent.clone();
        self.queue
            .perform_wait(move |state| load_effective_rows(state, &parent, &entity))
    }

    /// Build the queue job for one fetch/query resolution. The request is
    /// translated into its parts here so the closure owns everything it
    /// needs.
    fn query_job<T: Entity>(
        &self,
        request: &FetchRequest<T>,
        limit_override: Option<usize>,
    ) -> impl FnOnce(&mut ContextState) -> Result<Vec<(RecordId, Record)>, StorageError> + Send + 'static
    {
        let entity = T::entity_name();
        let known = self.coordinator.schema().entity(entity).is_some();
        let parent = self.parent.clone();
        let predicate = request.predicate().cloned();
        let sort = request.sort().cloned();
        let offset = request.fetch_offset();
        let limit = limit_override.unwrap_or(request.fetch_limit());

        move |state| {
            if !known {
                return Err(StorageError::InvalidType);
            }
            let rows = load_effective_rows(state, &parent, entity)?;
            let mut hits: Vec<(RecordId, Record)> = rows
                .into_iter()
                .filter(|(_, record)| {
                    predicate
                        .as_ref()
                        .map(|p| p.evaluate(record))
                        .unwrap_or(true)
                })
                .collect();
            match &sort {
                Some(descriptor) => hits.sort_by(|a, b| {
                    descriptor.compare(&a.1, &b.1).then_with(|| a.0.cmp(&b.0))
                }),
                None => hits.sort_by(|a, b| a.0.cmp(&b.0)),
            }
            let mut hits: Vec<_> = hits.into_iter().skip(offset).collect();
            if limit > 0 {
                hits.truncate(limit);
            }
            Ok(hits)
        }
    }

    /// Build the dedicated count job: predicate only, sort and window
    /// ignored.
    fn count_job<T: Entity>(
        &self,
        request: &FetchRequest<T>,
    ) -> impl FnOnce(&mut ContextState) -> Result<usize, StorageError> + Send + 'static {
        let entity = T::entity_name();
        let known = self.coordinator.schema().entity(entity).is_some();
        let parent = self.parent.clone();
        let predicate = request.predicate().cloned();

        move |state| {
            if !known {
                return Err(StorageError::InvalidType);
            }
            let rows = load_effective_rows(state, &parent, entity)?;
            Ok(rows
                .values()
                .filter(|record| {
                    predicate
                        .as_ref()
                        .map(|p| p.evaluate(record))
                        .unwrap_or(true)
                })
                .count())
        }
    }

    fn register_insert(
        &self,
        entity: &'static str,
        hint: Option<RecordId>,
        record: Record,
    ) -> RecordId {
        self.queue.perform_wait(move |state| {
            let id = match hint {
                Some(id) => state.resolve_id(id),
                None => state.allocate_temporary(),
            };
            state
                .pending
                .insert(RecordKey::new(entity, id), Pending::Upsert(record));
            id
        })
    }

    /// Build the save job: run the pre-save hook, hand the pending set to
    /// the parent (or commit it at the root), and fold it into the local
    /// committed view. Returns the notification to publish, or `None` when
    /// there was nothing to save.
    fn save_job(
        &self,
    ) -> impl FnOnce(&mut ContextState) -> Result<Option<SaveNotification>, StorageError> + Send + 'static
    {
        let parent = self.parent.clone();
        let coordinator = self.coordinator.clone();
        let assigns = self.assigns_permanent_ids;
        let source = self.id;

        move |state| {
            if state.pending.is_empty() {
                return Ok(None);
            }

            // Pre-save hook: newly inserted rows must obtain durable
            // identifiers before they cross a context boundary.
            if assigns {
                let temporary: Vec<RecordKey> = state
                    .pending
                    .keys()
                    .filter(|key| !key.id.is_permanent())
                    .cloned()
                    .collect();
                for key in temporary {
                    let durable = coordinator.generate_id()?;
                    state.remapped.insert(key.id.value(), durable);
                    if let Some(change) = state.pending.remove(&key) {
                        state
                            .pending
                            .insert(RecordKey::new(key.entity.clone(), durable), change);
                    }
                }
            }

            let pending = std::mem::take(&mut state.pending);
            let outcome = match &parent {
                ContextParent::Coordinator(coordinator) => {
                    let mut upserts = Vec::new();
                    let mut deletes = Vec::new();
                    for (key, change) in &pending {
                        match change {
                            Pending::Upsert(record) => {
                                upserts.push((key.clone(), record.clone()))
                            }
                            Pending::Delete => deletes.push(key.clone()),
                        }
                    }
                    coordinator.apply(upserts, deletes)
                }
                ContextParent::Context(context) => {
                    context.absorb(pending.clone());
                    Ok(())
                }
            };
            if let Err(err) = outcome {
                // The save failed wholesale; keep the pending set so the
                // caller can retry.
                state.pending = pending;
                return Err(err);
            }

            for (key, change) in &pending {
                if let Some(rows) = state.loaded.get_mut(&key.entity) {
                    match change {
                        Pending::Upsert(record) => {
                            rows.insert(key.id, record.clone());
                        }
                        Pending::Delete => {
                            rows.remove(&key.id);
                        }
                    }
                }
            }

            Ok(Some(SaveNotification {
                source,
                changed: pending.keys().cloned().collect(),
            }))
        }
    }

    /// Take a child's saved changes into this context's pending set.
    fn absorb(&self, changes: HashMap<RecordKey, Pending>) {
        self.queue.perform_wait(move |state| {
            for (key, change) in changes {
                state.pending.insert(key, change);
            }
        });
    }

    fn publish(&self, notification: Option<SaveNotification>) {
        if let Some(notification) = notification {
            debug!(
                context = %self.label,
                changed = notification.changed.len(),
                "context did save"
            );
            self.bus.notify(&notification);
        }
    }
}

impl fmt::Display for GraphContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GraphContext({})", self.label)
    }
}

impl Requestable for Arc<GraphContext> {
    fn request_context(&self) -> Arc<GraphContext> {
        self.clone()
    }
}

/// The capability set every storage context offers. One concrete adapter
/// exists per backing engine; `GraphContext` is the sled adapter.
#[async_trait]
pub trait Context: Send + Sync {
    // MARK: fetching

    fn fetch<T: Entity>(&self, request: &FetchRequest<T>) -> Result<Vec<T>, StorageError>;
    fn fetch_one<T: Entity>(&self, request: &FetchRequest<T>) -> Result<Option<T>, StorageError>;

    async fn fetch_async<T: Entity>(
        &self,
        request: &FetchRequest<T>,
    ) -> Result<Vec<T>, StorageError>;
    async fn fetch_one_async<T: Entity>(
        &self,
        request: &FetchRequest<T>,
    ) -> Result<Option<T>, StorageError>;

    // MARK: creation / insertion

    fn new_instance<T: Entity + Default>(&self) -> Result<T, StorageError>;
    fn create<T: Entity + Default>(&self) -> Result<T, StorageError>;
    fn insert<T: Entity>(&self, instance: &mut T) -> Result<(), StorageError>;

    async fn create_async<T: Entity + Default>(&self) -> Result<T, StorageError>;
    async fn insert_async<T: Entity>(&self, instance: &mut T) -> Result<(), StorageError>;

    // MARK: querying

    fn query<T: Entity>(
        &self,
        request: &FetchRequest<T>,
        attributes: &[&str],
    ) -> Result<Vec<Record>, StorageError>;
    fn query_one<T: Entity>(
        &self,
        request: &FetchRequest<T>,
        attributes: &[&str],
    ) -> Result<Option<Record>, StorageError>;
    fn query_values<T: Entity>(
        &self,
        request: &FetchRequest<T>,
        attribute: &str,
    ) -> Result<Vec<String>, StorageError>;
    fn query_set<T: Entity>(
        &self,
        request: &FetchRequest<T>,
        attribute: &str,
    ) -> Result<BTreeSet<String>, StorageError>;
    fn count<T: Entity>(&self, request: &FetchRequest<T>) -> usize;

    async fn query_async<T: Entity>(
        &self,
        request: &FetchRequest<T>,
        attributes: &[&str],
    ) -> Result<Vec<Record>, StorageError>;
    async fn query_one_async<T: Entity>(
        &self,
        request: &FetchRequest<T>,
        attributes: &[&str],
    ) -> Result<Option<Record>, StorageError>;
    async fn query_values_async<T: Entity>(
        &self,
        request: &FetchRequest<T>,
        attribute: &str,
    ) -> Result<Vec<String>, StorageError>;
    async fn query_set_async<T: Entity>(
        &self,
        request: &FetchRequest<T>,
        attribute: &str,
    ) -> Result<BTreeSet<String>, StorageError>;
    async fn count_async<T: Entity>(&self, request: &FetchRequest<T>) -> usize;

    // MARK: deletion

    fn remove<T: Entity>(&self, instance: &T) -> Result<(), StorageError>;
    fn remove_all<T: Entity>(&self, instances: &[T]) -> Result<(), StorageError>;

    async fn remove_async<T: Entity>(&self, instance: &T) -> Result<(), StorageError>;

    // MARK: saving

    /// Commit pending changes to the parent. No-op when nothing is pending.
    fn save(&self) -> Result<(), StorageError>;

    /// Save this context and every ancestor up to the physical store.
    fn save_to_persistent_store(&self) -> Result<(), StorageError>;
    async fn save_to_persistent_store_async(&self) -> Result<(), StorageError>;

    /// Discard the loaded view and any pending changes.
    fn reset(&self);

    // MARK: batch actions

    fn batch_update(
        &self,
        entity: &str,
        properties: &Record,
        predicate: Option<&Predicate>,
    ) -> Result<usize, StorageError>;
    fn batch_delete(
        &self,
        entity: &str,
        predicate: Option<&Predicate>,
    ) -> Result<usize, StorageError>;

    async fn batch_update_async(
        &self,
        entity: &str,
        properties: &Record,
        predicate: Option<&Predicate>,
    ) -> Result<usize, StorageError>;
    async fn batch_delete_async(
        &self,
        entity: &str,
        predicate: Option<&Predicate>,
    ) -> Result<usize, StorageError>;
}

#[async_trait]
impl Context for GraphContext {
    fn fetch<T: Entity>(&self, request: &FetchRequest<T>) -> Result<Vec<T>, StorageError> {
        let hits = self.queue.perform_wait(self.query_job(request, None))?;
        materialize(hits)
    }

    fn fetch_one<T: Entity>(&self, request: &FetchRequest<T>) -> Result<Option<T>, StorageError> {
        let hits = self.queue.perform_wait(self.query_job(request, Some(1)))?;
        Ok(materialize(hits)?.into_iter().next())
    }

    async fn fetch_async<T: Entity>(
        &self,
        request: &FetchRequest<T>,
    ) -> Result<Vec<T>, StorageError> {
        let hits = self.queue.perform(self.query_job(request, None)).await?;
        materialize(hits)
    }

    async fn fetch_one_async<T: Entity>(
        &self,
        request: &FetchRequest<T>,
    ) -> Result<Option<T>, StorageError> {
        let hits = self.queue.perform(self.query_job(request, Some(1))).await?;
        Ok(materialize(hits)?.into_iter().next())
    }

    fn new_instance<T: Entity + Default>(&self) -> Result<T, StorageError> {
        let mut instance = T::default();
        self.insert(&mut instance)?;
        Ok(instance)
    }

    fn create<T: Entity + Default>(&self) -> Result<T, StorageError> {
        let mut instance: T = self.new_instance()?;
        self.insert(&mut instance)?;
        Ok(instance)
    }

    fn insert<T: Entity>(&self, instance: &mut T) -> Result<(), StorageError> {
        let entity = T::entity_name();
        let record = instance.to_record()?;
        self.coordinator.schema().validate(entity, &record)?;
        let id = self.register_insert(entity, instance.record_id(), record);
        instance.set_record_id(Some(id));
        Ok(())
    }

    async fn create_async<T: Entity + Default>(&self) -> Result<T, StorageError> {
        let mut instance = T::default();
        self.insert_async(&mut instance).await?;
        Ok(instance)
    }

    async fn insert_async<T: Entity>(&self, instance: &mut T) -> Result<(), StorageError> {
        let entity = T::entity_name();
        let record = instance.to_record()?;
        self.coordinator.schema().validate(entity, &record)?;
        let hint = instance.record_id();
        let id = self
            .queue
            .perform(move |state| {
                let id = match hint {
                    Some(id) => state.resolve_id(id),
                    None => state.allocate_temporary(),
                };
                state
                    .pending
                    .insert(RecordKey::new(entity, id), Pending::Upsert(record));
                id
            })
            .await;
        instance.set_record_id(Some(id));
        Ok(())
    }

    fn query<T: Entity>(
        &self,
        request: &FetchRequest<T>,
        attributes: &[&str],
    ) -> Result<Vec<Record>, StorageError> {
        let attributes = owned(attributes);
        let hits = self.queue.perform_wait(self.query_job(request, None))?;
        Ok(hits
            .into_iter()
            .map(|(_, record)| project(&record, &attributes))
            .collect())
    }

    fn query_one<T: Entity>(
        &self,
        request: &FetchRequest<T>,
        attributes: &[&str],
    ) -> Result<Option<Record>, StorageError> {
        let attributes = owned(attributes);
        let hits = self.queue.perform_wait(self.query_job(request, Some(1)))?;
        Ok(hits
            .into_iter()
            .next()
            .map(|(_, record)| project(&record, &attributes)))
    }

    fn query_values<T: Entity>(
        &self,
        request: &FetchRequest<T>,
        attribute: &str,
    ) -> Result<Vec<String>, StorageError> {
        let hits = self.queue.perform_wait(self.query_job(request, None))?;
        Ok(collect_values(hits, attribute))
    }

    fn query_set<T: Entity>(
        &self,
        request: &FetchRequest<T>,
        attribute: &str,
    ) -> Result<BTreeSet<String>, StorageError> {
        let hits = self.queue.perform_wait(self.query_job(request, None))?;
        Ok(collect_values(hits, attribute).into_iter().collect())
    }

    fn count<T: Entity>(&self, request: &FetchRequest<T>) -> usize {
        self.queue
            .perform_wait(self.count_job(request))
            .unwrap_or(0)
    }

    async fn query_async<T: Entity>(
        &self,
        request: &FetchRequest<T>,
        attributes: &[&str],
    ) -> Result<Vec<Record>, StorageError> {
        let attributes = owned(attributes);
        let hits = self.queue.perform(self.query_job(request, None)).await?;
        Ok(hits
            .into_iter()
            .map(|(_, record)| project(&record, &attributes))
            .collect())
    }

    async fn query_one_async<T: Entity>(
        &self,
        request: &FetchRequest<T>,
        attributes: &[&str],
    ) -> Result<Option<Record>, StorageError> {
        let attributes = owned(attributes);
        let hits = self.queue.perform(self.query_job(request, Some(1))).await?;
        Ok(hits
            .into_iter()
            .next()
            .map(|(_, record)| project(&record, &attributes)))
    }

    async fn query_values_async<T: Entity>(
        &self,
        request: &FetchRequest<T>,
        attribute: &str,
    ) -> Result<Vec<String>, StorageError> {
        let hits = self.queue.perform(self.query_job(request, None)).await?;
        Ok(collect_values(hits, attribute))
    }

    async fn query_set_async<T: Entity>(
        &self,
        request: &FetchRequest<T>,
        attribute: &str,
    ) -> Result<BTreeSet<String>, StorageError> {
        let hits = self.queue.perform(self.query_job(request, None)).await?;
        Ok(collect_values(hits, attribute).into_iter().collect())
    }

    async fn count_async<T: Entity>(&self, request: &FetchRequest<T>) -> usize {
        self.queue
            .perform(self.count_job(request))
            .await
            .unwrap_or(0)
    }

    fn remove<T: Entity>(&self, instance: &T) -> Result<(), StorageError> {
        // Removing an instance that was never inserted is a no-op.
        let Some(id) = instance.record_id() else {
            return Ok(());
        };
        let entity = T::entity_name();
        self.queue.perform_wait(move |state| {
            let id = state.resolve_id(id);
            state
                .pending
                .insert(RecordKey::new(entity, id), Pending::Delete);
        });
        Ok(())
    }

    fn remove_all<T: Entity>(&self, instances: &[T]) -> Result<(), StorageError> {
        for instance in instances {
            self.remove(instance)?;
        }
        Ok(())
    }

    async fn remove_async<T: Entity>(&self, instance: &T) -> Result<(), StorageError> {
        let Some(id) = instance.record_id() else {
            return Ok(());
        };
        let entity = T::entity_name();
        self.queue
            .perform(move |state| {
                let id = state.resolve_id(id);
                state
                    .pending
                    .insert(RecordKey::new(entity, id), Pending::Delete);
            })
            .await;
        Ok(())
    }

    fn save(&self) -> Result<(), StorageError> {
        let notification = self.queue.perform_wait(self.save_job())?;
        self.publish(notification);
        Ok(())
    }

    fn save_to_persistent_store(&self) -> Result<(), StorageError> {
        self.save()?;
        match &self.parent {
            ContextParent::Context(parent) => parent.save_to_persistent_store(),
            ContextParent::Coordinator(_) => Ok(()),
        }
    }

    async fn save_to_persistent_store_async(&self) -> Result<(), StorageError> {
        let notification = self.queue.perform(self.save_job()).await?;
        self.publish(notification);
        match &self.parent {
            ContextParent::Context(parent) => parent.save_to_persistent_store_async().await,
            ContextParent::Coordinator(_) => Ok(()),
        }
    }

    fn reset(&self) {
        self.queue.perform_wait(|state| {
            state.loaded.clear();
            state.pending.clear();
        });
    }

    fn batch_update(
        &self,
        entity: &str,
        properties: &Record,
        predicate: Option<&Predicate>,
    ) -> Result<usize, StorageError> {
        let coordinator = self.coordinator.clone();
        let entity = entity.to_string();
        let properties = properties.clone();
        let predicate = predicate.cloned();
        self.queue.perform_wait(move |_| {
            coordinator.batch_update(&entity, &properties, predicate.as_ref())
        })
    }

    fn batch_delete(
        &self,
        entity: &str,
        predicate: Option<&Predicate>,
    ) -> Result<usize, StorageError> {
        let coordinator = self.coordinator.clone();
        let entity = entity.to_string();
        let predicate = predicate.cloned();
        self.queue
            .perform_wait(move |_| coordinator.batch_delete(&entity, predicate.as_ref()))
    }

    async fn batch_update_async(
        &self,
        entity: &str,
        properties: &Record,
        predicate: Option<&Predicate>,
    ) -> Result<usize, StorageError> {
        let coordinator = self.coordinator.clone();
        let entity = entity.to_string();
        let properties = properties.clone();
        let predicate = predicate.cloned();
        self.queue
            .perform(move |_| coordinator.batch_update(&entity, &properties, predicate.as_ref()))
            .await
    }

    async fn batch_delete_async(
        &self,
        entity: &str,
        predicate: Option<&Predicate>,
    ) -> Result<usize, StorageError> {
        let coordinator = self.coordinator.clone();
        let entity = entity.to_string();
        let predicate = predicate.cloned();
        self.queue
            .perform(move |_| coordinator.batch_delete(&entity, predicate.as_ref()))
            .await
    }
}

fn owned(attributes: &[&str]) -> Vec<String> {
    attributes.iter().map(|s| s.to_string()).collect()
}

/// Pull the string values of one attribute out of a hit list, skipping rows
/// where the attribute is absent or not a string.
fn collect_values(hits: Vec<(RecordId, Record)>, attribute: &str) -> Vec<String> {
    hits.into_iter()
        .filter_map(|(_, record)| {
            record
                .get(attribute)
                .and_then(|value| value.as_str().map(str::to_string))
        })
        .collect()
}

fn materialize<T: Entity>(hits: Vec<(RecordId, Record)>) -> Result<Vec<T>, StorageError> {
    hits.into_iter()
        .map(|(id, record)| {
            let mut instance = T::from_record(&record)?;
            instance.set_record_id(Some(id));
            Ok(instance)
        })
        .collect()
}
