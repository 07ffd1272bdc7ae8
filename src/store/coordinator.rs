//! Store coordinator: the single owner of the physical sled store.
//!
//! The coordinator attaches the embedded engine at a resolved location,
//! reconciles the on-disk schema with the requested one (migrating rows when
//! the option profile allows it), and exposes the row-level operations the
//! context layer builds on: scans, batched commits, durable identifier
//! allocation, and store-level batch update/delete.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::entity::{RecordId, RecordKey};
use crate::error::{StackError, StorageError};
use crate::query::Predicate;
use crate::schema::{AttributeKind, Schema};
use crate::store::{OpenOptions, StoreLocation};
use crate::value::{Record, Value};

const META_SCHEMA_KEY: &[u8] = b"meta:schema";
const META_CREATED_AT_KEY: &[u8] = b"meta:created_at";
const RECORD_PREFIX: &str = "rec:";

/// Schema reconciliation failures. Version-mismatch and missing-mapping are
/// the two recognized triggers for the clean-and-retry recovery path.
#[derive(Debug, Error)]
pub(crate) enum MigrationError {
    #[error("store schema does not match the requested model")]
    VersionMismatch,

    #[error("no mapping from stored attribute `{entity}.{attribute}` to the requested model")]
    MissingMapping { entity: String, attribute: String },

    #[error("storage engine error: {0}")]
    Engine(#[from] sled::Error),

    #[error("stored record could not be decoded: {0}")]
    Codec(#[from] bincode::Error),
}

impl MigrationError {
    fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MigrationError::VersionMismatch | MigrationError::MissingMapping { .. }
        )
    }
}

/// Owns the physical store and the loaded schema. Contexts hold a shared
/// reference and funnel every durable operation through it.
pub struct StoreCoordinator {
    location: StoreLocation,
    path: Option<PathBuf>,
    schema: Schema,
    db: sled::Db,
}

impl StoreCoordinator {
    /// Attach the physical store, applying the failure policy: a
    /// version-mismatch or missing-mapping failure with `clean_and_retry` set
    /// deletes the store files and retries exactly once.
    pub fn open(
        location: StoreLocation,
        schema: Schema,
        options: OpenOptions,
        clean_and_retry: bool,
    ) -> Result<Arc<Self>, StackError> {
        let path = location.resolve();
        if let Some(parent) = path.as_deref().and_then(Path::parent) {
            std::fs::create_dir_all(parent).map_err(StackError::store_init)?;
        }

        let db = match Self::attach(path.as_deref(), &schema, options) {
            Ok(db) => db,
            Err(err) if err.is_recoverable() && clean_and_retry => match path.as_deref() {
                Some(dir) => {
                    warn!(error = %err, "store incompatible with requested model, resetting files");
                    destroy_store_files(dir).map_err(StackError::store_init)?;
                    Self::attach(path.as_deref(), &schema, options)
                        .map_err(StackError::store_init)?
                }
                None => return Err(StackError::store_init(err)),
            },
            Err(err) => return Err(StackError::store_init(err)),
        };

        info!(location = %location, "persistent store attached");
        Ok(Arc::new(StoreCoordinator {
            location,
            path,
            schema,
            db,
        }))
    }

    fn attach(
        path: Option<&Path>,
        schema: &Schema,
        options: OpenOptions,
    ) -> Result<sled::Db, MigrationError> {
        let db = match path {
            Some(path) => sled::open(path)?,
            None => sled::Config::new().temporary(true).open()?,
        };
        // The handle closes when dropped, so a reconcile failure releases the
        // files before the caller resets them.
        match Self::reconcile_schema(&db, schema, options) {
            Ok(()) => Ok(db),
            Err(err) => {
                drop(db);
                Err(err)
            }
        }
    }

    /// Compare the stored schema against the requested one and migrate rows
    /// when they diverge.
    fn reconcile_schema(
        db: &sled::Db,
        schema: &Schema,
        options: OpenOptions,
    ) -> Result<(), MigrationError> {
        let stored: Option<Schema> = match db.get(META_SCHEMA_KEY)? {
            Some(bytes) => Some(bincode::deserialize(&bytes)?),
            None => None,
        };

        match stored {
            None => {
                db.insert(META_SCHEMA_KEY, bincode::serialize(schema)?)?;
                db.insert(
                    META_CREATED_AT_KEY,
                    chrono::Utc::now().to_rfc3339().as_bytes(),
                )?;
                db.flush()?;
                Ok(())
            }
            Some(stored) if stored.fingerprint() == schema.fingerprint() => Ok(()),
            Some(stored) => {
                if !options.automatic_migration {
                    return Err(MigrationError::VersionMismatch);
                }
                info!("schema fingerprint changed, migrating store");
                Self::migrate_records(db, &stored, schema, options.infer_mapping)?;
                db.insert(META_SCHEMA_KEY, bincode::serialize(schema)?)?;
                db.flush()?;
                Ok(())
            }
        }
    }

    /// Rewrite every stored row to the requested schema. Attributes present
    /// in both versions carry over; added attributes materialize their kind's
    /// default; kind changes coerce only when mapping inference is enabled.
    fn migrate_records(
        db: &sled::Db,
        stored: &Schema,
        requested: &Schema,
        infer_mapping: bool,
    ) -> Result<(), MigrationError> {
        let mut batch = sled::Batch::default();
        let mut migrated = 0usize;
        let mut dropped = 0usize;

        for old_entity in stored.entities() {
            let prefix = entity_prefix(&old_entity.name);
            let new_entity = requested.entity(&old_entity.name);

            for item in db.scan_prefix(&prefix) {
                let (key, value) = item?;
                let new_entity = match new_entity {
                    Some(entity) => entity,
                    None => {
                        batch.remove(key);
                        dropped += 1;
                        continue;
                    }
                };
                let record: Record = bincode::deserialize(&value)?;
                let mut next = Record::new();
                for (name, kind) in &new_entity.attributes {
                    let old_kind = old_entity.attributes.get(name);
                    let value = match (record.get(name), old_kind) {
                        (Some(value), Some(old_kind)) if old_kind == kind => value.clone(),
                        (Some(value), Some(_)) | (Some(value), None) => {
                            coerce_value(value, *kind, infer_mapping).ok_or_else(|| {
                                MigrationError::MissingMapping {
                                    entity: new_entity.name.clone(),
                                    attribute: name.clone(),
                                }
                            })?
                        }
                        (None, _) => kind.default_value(),
                    };
                    next.insert(name.clone(), value);
                }
                batch.insert(key, bincode::serialize(&next)?);
                migrated += 1;
            }
        }

        db.apply_batch(batch)?;
        debug!(migrated, dropped, "store migration complete");
        Ok(())
    }

    pub fn location(&self) -> &StoreLocation {
        &self.location
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Allocate a durable identifier from the engine.
    pub fn generate_id(&self) -> Result<RecordId, StorageError> {
        Ok(RecordId::Permanent(self.db.generate_id()?))
    }

    /// All committed rows of one entity.
    pub fn scan(&self, entity: &str) -> Result<HashMap<RecordId, Record>, StorageError> {
        let mut rows = HashMap::new();
        for item in self.db.scan_prefix(entity_prefix(entity)) {
            let (key, value) = item?;
            let id = decode_record_id(&key).ok_or(StorageError::Unknown)?;
            let record: Record =
                bincode::deserialize(&value).map_err(|e| StorageError::Fetch(Box::new(e)))?;
            rows.insert(id, record);
        }
        Ok(rows)
    }

    /// Commit a set of upserts and deletes as one engine batch, then flush.
    pub fn apply(
        &self,
        upserts: Vec<(RecordKey, Record)>,
        deletes: Vec<RecordKey>,
    ) -> Result<(), StorageError> {
        let mut batch = sled::Batch::default();
        for (key, record) in &upserts {
            if !key.id.is_permanent() {
                warn!(key = %key, "temporary identifier reached the persistent store");
                return Err(StorageError::Write);
            }
            let encoded =
                bincode::serialize(record).map_err(|e| StorageError::Store(Box::new(e)))?;
            batch.insert(record_storage_key(key), encoded);
        }
        for key in &deletes {
            if !key.id.is_permanent() {
                continue;
            }
            batch.remove(record_storage_key(key));
        }
        self.db.apply_batch(batch)?;
        self.db.flush()?;
        debug!(
            upserts = upserts.len(),
            deletes = deletes.len(),
            "committed batch to persistent store"
        );
        Ok(())
    }

    /// Update matching rows directly in the store, bypassing every context's
    /// in-memory graph. Returns the number of rows touched.
    pub fn batch_update(
        &self,
        entity: &str,
        properties: &Record,
        predicate: Option<&Predicate>,
    ) -> Result<usize, StorageError> {
        let description = self
            .schema
            .entity(entity)
            .ok_or_else(|| StorageError::InvalidOperation(format!("unknown entity `{}`", entity)))?;
        for (name, value) in properties {
            match description.attributes.get(name) {
                Some(kind) if kind.accepts(value) => {}
                _ => return Err(StorageError::InvalidType),
            }
        }

        let mut batch = sled::Batch::default();
        let mut updated = 0usize;
        for item in self.db.scan_prefix(entity_prefix(entity)) {
            let (key, value) = item?;
            let mut record: Record =
                bincode::deserialize(&value).map_err(|e| StorageError::Fetch(Box::new(e)))?;
            if predicate.map(|p| p.evaluate(&record)).unwrap_or(true) {
                for (name, value) in properties {
                    record.insert(name.clone(), value.clone());
                }
                let encoded =
                    bincode::serialize(&record).map_err(|e| StorageError::Store(Box::new(e)))?;
                batch.insert(key, encoded);
                updated += 1;
            }
        }
        self.db.apply_batch(batch)?;
        self.db.flush()?;
        debug!(entity, updated, "batch update committed");
        Ok(updated)
    }

    /// Delete matching rows directly in the store, bypassing every context's
    /// in-memory graph. Returns the number of rows removed.
    pub fn batch_delete(
        &self,
        entity: &str,
        predicate: Option<&Predicate>,
    ) -> Result<usize, StorageError> {
        self.schema
            .entity(entity)
            .ok_or_else(|| StorageError::InvalidOperation(format!("unknown entity `{}`", entity)))?;

        let mut batch = sled::Batch::default();
        let mut deleted = 0usize;
        for item in self.db.scan_prefix(entity_prefix(entity)) {
            let (key, value) = item?;
            let record: Record =
                bincode::deserialize(&value).map_err(|e| StorageError::Fetch(Box::new(e)))?;
            if predicate.map(|p| p.evaluate(&record)).unwrap_or(true) {
                batch.remove(key);
                deleted += 1;
            }
        }
        self.db.apply_batch(batch)?;
        self.db.flush()?;
        debug!(entity, deleted, "batch delete committed");
        Ok(deleted)
    }
}

impl std::fmt::Display for StoreCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StoreCoordinator({})", self.location)
    }
}

fn entity_prefix(entity: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(RECORD_PREFIX.len() + entity.len() + 1);
    prefix.extend_from_slice(RECORD_PREFIX.as_bytes());
    prefix.extend_from_slice(entity.as_bytes());
    prefix.push(b':');
    prefix
}

fn record_storage_key(key: &RecordKey) -> Vec<u8> {
    let mut encoded = entity_prefix(&key.entity);
    encoded.extend_from_slice(&key.id.value().to_be_bytes());
    encoded
}

fn decode_record_id(storage_key: &[u8]) -> Option<RecordId> {
    let id_bytes = storage_key.get(storage_key.len().checked_sub(8)?..)?;
    Some(RecordId::Permanent(u64::from_be_bytes(
        id_bytes.try_into().ok()?,
    )))
}

/// Coerce a stored value to a new attribute kind. Returns `None` when no
/// inferred mapping exists.
fn coerce_value(value: &Value, target: AttributeKind, infer_mapping: bool) -> Option<Value> {
    if value.is_null() {
        return Some(Value::Null);
    }
    if !infer_mapping {
        return None;
    }
    match (value, target) {
        (Value::Integer(i), AttributeKind::Double) => Some(Value::Double(*i as f64)),
        (Value::Double(d), AttributeKind::Integer) => Some(Value::Integer(*d as i64)),
        (Value::Integer(_) | Value::Double(_) | Value::Bool(_), AttributeKind::String) => {
            Some(Value::String(value.to_string()))
        }
        (Value::String(s), AttributeKind::Integer) => s.parse().ok().map(Value::Integer),
        (Value::String(s), AttributeKind::Double) => s.parse().ok().map(Value::Double),
        _ => None,
    }
}

/// Delete the store's primary file plus its auxiliary files. The primary
/// removal is strict; auxiliaries are best-effort, matching the recognized
/// reset-after-failed-migration recovery action.
fn destroy_store_files(dir: &Path) -> std::io::Result<()> {
    std::fs::remove_file(dir.join("db"))?;
    let _ = std::fs::remove_file(dir.join("conf"));
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with("snap.") {
                let _ = std::fs::remove_file(entry.path());
            }
        }
    }
    Ok(())
}
