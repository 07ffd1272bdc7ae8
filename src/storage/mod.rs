//! Storage stacks: the two-tier context hierarchy over one physical store.
//!
//! `DefaultStorage` opens (or migrates) the store, then wires the hierarchy:
//! a root context attached to the coordinator, and a main context parented
//! to root for reads. Background writes run on on-demand contexts that are
//! siblings of root; their did-save notifications merge back into the main
//! context through the stack's notification bus.

use std::fmt;
use std::sync::{Arc, OnceLock};

use tracing::debug;

use crate::config::StorageSettings;
use crate::context::{Context, ContextParent, GraphContext, SaveBus, SaveNotification};
use crate::entity::Entity;
use crate::error::{StackError, StorageError};
use crate::query::request::{FetchRequest, Requestable};
use crate::schema::SchemaSource;
use crate::store::{OpenOptions, StoreCoordinator, StoreLocation};

/// A generic storage abstraction: a stack of contexts over one store.
pub trait Storage: fmt::Display + Send + Sync {
    type Ctx: Context;

    /// Main/UI-facing read context.
    fn main_context(&self) -> Arc<Self::Ctx>;

    /// Background save context (child of root).
    fn save_context(&self) -> Arc<Self::Ctx>;

    /// Fetch entities using the main context.
    fn fetch<T: Entity>(&self, request: &FetchRequest<T>) -> Result<Vec<T>, StorageError> {
        self.main_context().fetch(request)
    }
}

/// The default sled-backed storage stack.
pub struct DefaultStorage {
    location: StoreLocation,
    coordinator: Arc<StoreCoordinator>,
    bus: Arc<SaveBus>,
    root: Arc<GraphContext>,
    main: Arc<GraphContext>,
    save: OnceLock<Arc<GraphContext>>,
}

impl DefaultStorage {
    /// Open the store and build the context hierarchy. `migrate` selects the
    /// option profile and enables the clean-and-retry recovery path for
    /// incompatible stores.
    pub fn open(
        store: StoreLocation,
        model: SchemaSource,
        migrate: bool,
    ) -> Result<Self, StackError> {
        let schema = model.load()?;
        let options = OpenOptions::for_migrate_flag(migrate);
        let coordinator = StoreCoordinator::open(store.clone(), schema, options, migrate)?;

        let bus = SaveBus::new();
        let root = GraphContext::new(
            "root",
            ContextParent::Coordinator(coordinator.clone()),
            coordinator.clone(),
            bus.clone(),
            true,
        );
        let main = GraphContext::new(
            "main",
            ContextParent::Context(root.clone()),
            coordinator.clone(),
            bus.clone(),
            true,
        );
        debug!(location = %store, "storage stack built");

        Ok(DefaultStorage {
            location: store,
            coordinator,
            bus,
            root,
            main,
            save: OnceLock::new(),
        })
    }

    /// Async builder: runs the blocking open off the calling task.
    pub async fn build(
        store: StoreLocation,
        model: SchemaSource,
        migrate: bool,
    ) -> Result<Self, StackError> {
        tokio::task::spawn_blocking(move || Self::open(store, model, migrate))
            .await
            .map_err(StackError::store_init)?
    }

    /// Build a stack from loaded configuration.
    pub fn from_settings(settings: &StorageSettings) -> Result<Self, StackError> {
        Self::open(
            settings.store_location(),
            settings.schema_source()?,
            settings.migrate,
        )
    }

    pub fn location(&self) -> &StoreLocation {
        &self.location
    }

    pub fn coordinator(&self) -> &Arc<StoreCoordinator> {
        &self.coordinator
    }

    pub fn root_context(&self) -> Arc<GraphContext> {
        self.root.clone()
    }

    /// Observe did-save notifications from every context of this stack.
    pub fn observe_saves<F>(&self, observer: F)
    where
        F: Fn(&SaveNotification) + Send + Sync + 'static,
    {
        self.bus.observe(observer);
    }

    /// A fresh context attached directly to the coordinator, isolated from
    /// the main context's queue.
    pub fn new_background_context(&self) -> Arc<GraphContext> {
        GraphContext::new(
            "background",
            ContextParent::Coordinator(self.coordinator.clone()),
            self.coordinator.clone(),
            self.bus.clone(),
            true,
        )
    }

    /// Run `task` against a dedicated background context and save on
    /// success. A failing task discards its pending changes. Saved changes
    /// reach the main context through the did-save notification path.
    pub async fn perform_background_task<F>(&self, task: F) -> Result<(), StorageError>
    where
        F: FnOnce(&GraphContext) -> Result<(), StorageError> + Send + 'static,
    {
        let context = self.new_background_context();
        tokio::task::spawn_blocking(move || {
            task(&context)?;
            context.save()
        })
        .await
        .map_err(|_| StorageError::Unknown)?
    }
}

impl Storage for DefaultStorage {
    type Ctx = GraphContext;

    fn main_context(&self) -> Arc<GraphContext> {
        self.main.clone()
    }

    fn save_context(&self) -> Arc<GraphContext> {
        self.save
            .get_or_init(|| {
                GraphContext::new(
                    "save",
                    ContextParent::Context(self.root.clone()),
                    self.coordinator.clone(),
                    self.bus.clone(),
                    true,
                )
            })
            .clone()
    }
}

impl Requestable for DefaultStorage {
    fn request_context(&self) -> Arc<GraphContext> {
        self.main.clone()
    }
}

impl fmt::Display for DefaultStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DefaultStorage({})", self.location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::RecordId;
    use crate::schema::{AttributeKind, EntityDescription, Schema};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct User {
        #[serde(skip)]
        id: Option<RecordId>,
        name: String,
        age: i64,
    }

    impl Entity for User {
        fn record_id(&self) -> Option<RecordId> {
            self.id
        }

        fn set_record_id(&mut self, id: Option<RecordId>) {
            self.id = id;
        }
    }

    fn user_schema() -> SchemaSource {
        SchemaSource::Inline(
            Schema::new().with_entity(
                EntityDescription::new("User")
                    .with_attribute("name", AttributeKind::String)
                    .with_attribute("age", AttributeKind::Integer),
            ),
        )
    }

    fn in_memory_storage() -> DefaultStorage {
        DefaultStorage::open(StoreLocation::InMemory, user_schema(), true).unwrap()
    }

    #[test]
    fn test_open_builds_both_contexts() {
        let storage = in_memory_storage();
        assert_eq!(storage.main_context().label(), "main");
        assert_eq!(storage.root_context().label(), "root");
        assert_eq!(
            *storage.main_context().parent(),
            ContextParent::Context(storage.root_context())
        );
    }

    #[test]
    fn test_invalid_model_fails_construction() {
        let missing = SchemaSource::Path("/nonexistent/model.toml".into());
        let result = DefaultStorage::open(StoreLocation::InMemory, missing, true);
        assert!(matches!(result, Err(StackError::InvalidModel(_))));
    }

    #[test]
    fn test_save_context_is_lazy_child_of_root() {
        let storage = in_memory_storage();
        let save = storage.save_context();
        assert_eq!(save.label(), "save");
        assert_eq!(
            *save.parent(),
            ContextParent::Context(storage.root_context())
        );
        // The same context is handed out on every call.
        assert!(Arc::ptr_eq(&save, &storage.save_context()));
    }

    #[test]
    fn test_storage_fetch_uses_main_context() {
        let storage = in_memory_storage();
        let main = storage.main_context();

        let mut user = User {
            id: None,
            name: "John".into(),
            age: 25,
        };
        main.insert(&mut user).unwrap();
        main.save().unwrap();

        let request = storage.request::<User>();
        let results = storage.fetch(&request).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "John");
    }

    #[tokio::test]
    async fn test_background_task_saves_and_merges() {
        let storage = in_memory_storage();

        storage
            .perform_background_task(|context| {
                let mut user = User {
                    id: None,
                    name: "Background".into(),
                    age: 30,
                };
                context.insert(&mut user)?;
                Ok(())
            })
            .await
            .unwrap();

        // The background save committed straight to the store; the main
        // context sees it after merging the notification.
        let request = storage.request::<User>().filtered_key_eq("name", "Background");
        assert_eq!(request.count(), 1);
    }

    #[tokio::test]
    async fn test_failed_background_task_discards_changes() {
        let storage = in_memory_storage();

        let result = storage
            .perform_background_task(|context| {
                let mut user = User {
                    id: None,
                    name: "Doomed".into(),
                    age: 1,
                };
                context.insert(&mut user)?;
                Err(StorageError::InvalidOperation("abort".into()))
            })
            .await;
        assert!(result.is_err());

        assert_eq!(storage.request::<User>().count(), 0);
    }

    #[tokio::test]
    async fn test_async_build() {
        let storage = DefaultStorage::build(StoreLocation::InMemory, user_schema(), true)
            .await
            .unwrap();
        assert_eq!(storage.main_context().label(), "main");
    }

    #[test]
    fn test_observe_saves_side_channel() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let storage = in_memory_storage();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        storage.observe_saves(move |notification| {
            counter.fetch_add(notification.changed.len(), Ordering::SeqCst);
        });

        let main = storage.main_context();
        let mut user = User {
            id: None,
            name: "John".into(),
            age: 25,
        };
        main.insert(&mut user).unwrap();
        main.save_to_persistent_store().unwrap();

        // One changed key per save along the chain (main, then root).
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
