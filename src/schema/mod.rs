//! Schema model: entity and attribute descriptions plus the sources they can
//! be loaded from.
//!
//! A schema describes the entities a store persists. Schemas are loaded from
//! TOML resource files, merged from directories of resources, or supplied
//! inline (useful for in-memory unit tests). The canonical fingerprint of a
//! schema decides store compatibility at open time.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{StackError, StorageError};
use crate::value::{Record, Value};

/// Closed set of attribute kinds a store can persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeKind {
    String,
    Integer,
    Double,
    Bool,
    Bytes,
}

impl AttributeKind {
    /// The default value materialized when automatic migration adds this
    /// attribute to existing rows.
    pub fn default_value(&self) -> Value {
        match self {
            AttributeKind::String => Value::String(String::new()),
            AttributeKind::Integer => Value::Integer(0),
            AttributeKind::Double => Value::Double(0.0),
            AttributeKind::Bool => Value::Bool(false),
            AttributeKind::Bytes => Value::Bytes(Vec::new()),
        }
    }

    /// Whether `value` is acceptable for this kind. `Null` is accepted for
    /// every kind.
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (AttributeKind::String, Value::String(_))
                | (AttributeKind::Integer, Value::Integer(_))
                | (AttributeKind::Double, Value::Double(_))
                | (AttributeKind::Double, Value::Integer(_))
                | (AttributeKind::Bool, Value::Bool(_))
                | (AttributeKind::Bytes, Value::Bytes(_))
        )
    }
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttributeKind::String => "string",
            AttributeKind::Integer => "integer",
            AttributeKind::Double => "double",
            AttributeKind::Bool => "bool",
            AttributeKind::Bytes => "bytes",
        };
        write!(f, "{}", name)
    }
}

/// One entity: a name plus its attribute kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescription {
    pub name: String,
    pub attributes: BTreeMap<String, AttributeKind>,
}

impl EntityDescription {
    pub fn new(name: impl Into<String>) -> Self {
        EntityDescription {
            name: name.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, kind: AttributeKind) -> Self {
        self.attributes.insert(name.into(), kind);
        self
    }
}

/// The full structural description of a store's contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    entities: BTreeMap<String, EntityDescription>,
}

impl Schema {
    pub fn new() -> Self {
        Schema::default()
    }

    pub fn with_entity(mut self, entity: EntityDescription) -> Self {
        self.entities.insert(entity.name.clone(), entity);
        self
    }

    pub fn entity(&self, name: &str) -> Option<&EntityDescription> {
        self.entities.get(name)
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityDescription> {
        self.entities.values()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Canonical content fingerprint. Two schemas with the same entities and
    /// attributes fingerprint identically regardless of how they were loaded.
    pub fn fingerprint(&self) -> String {
        let canonical =
            serde_json::to_vec(&self.entities).expect("schema serialization is infallible");
        hex::encode(blake3::hash(&canonical).as_bytes())
    }

    /// Validate a record against the named entity's attribute kinds.
    pub fn validate(&self, entity: &str, record: &Record) -> Result<(), StorageError> {
        let description = self.entity(entity).ok_or(StorageError::InvalidType)?;
        for (name, value) in record {
            match description.attributes.get(name) {
                Some(kind) if kind.accepts(value) => {}
                _ => return Err(StorageError::InvalidType),
            }
        }
        Ok(())
    }

    /// Parse a schema resource in TOML form:
    ///
    /// ```toml
    /// [entities.User]
    /// name = "string"
    /// age = "integer"
    /// ```
    pub fn from_toml_str(source: &str) -> Result<Self, StackError> {
        let file: SchemaFile = toml::from_str(source)
            .map_err(|e| StackError::InvalidModel(format!("schema resource: {}", e)))?;
        let mut schema = Schema::new();
        for (name, attributes) in file.entities {
            schema.entities.insert(
                name.clone(),
                EntityDescription { name, attributes },
            );
        }
        Ok(schema)
    }

    /// Merge another schema into this one. Entities defined in both must be
    /// structurally identical.
    pub fn merge(&mut self, other: Schema) -> Result<(), StackError> {
        for (name, entity) in other.entities {
            match self.entities.get(&name) {
                Some(existing) if *existing != entity => {
                    return Err(StackError::InvalidModel(format!(
                        "conflicting definitions for entity `{}`",
                        name
                    )));
                }
                Some(_) => {}
                None => {
                    self.entities.insert(name, entity);
                }
            }
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct SchemaFile {
    #[serde(default)]
    entities: BTreeMap<String, BTreeMap<String, AttributeKind>>,
}

/// Where a schema comes from.
#[derive(Debug, Clone)]
pub enum SchemaSource {
    /// A named `.toml` resource inside a directory.
    Named(String, PathBuf),
    /// Union of every `.toml` schema resource found in the given directories.
    Merged(Vec<PathBuf>),
    /// A schema resource at an explicit path.
    Path(PathBuf),
    /// A pre-built schema instance.
    Inline(Schema),
}

impl SchemaSource {
    /// Resolve the source into a loaded schema.
    pub fn load(&self) -> Result<Schema, StackError> {
        match self {
            SchemaSource::Named(name, dir) => {
                let path = dir.join(format!("{}.toml", name));
                load_schema_file(&path)
            }
            SchemaSource::Merged(dirs) => {
                let mut merged = Schema::new();
                for dir in dirs {
                    let entries = std::fs::read_dir(dir).map_err(|e| {
                        StackError::InvalidModel(format!("{}: {}", dir.display(), e))
                    })?;
                    for entry in entries {
                        let entry = entry.map_err(|e| {
                            StackError::InvalidModel(format!("{}: {}", dir.display(), e))
                        })?;
                        let path = entry.path();
                        if path.extension().map(|e| e == "toml").unwrap_or(false) {
                            merged.merge(load_schema_file(&path)?)?;
                        }
                    }
                }
                if merged.is_empty() {
                    return Err(StackError::InvalidModel(
                        "no schema resources found to merge".to_string(),
                    ));
                }
                Ok(merged)
            }
            SchemaSource::Path(path) => load_schema_file(path),
            SchemaSource::Inline(schema) => Ok(schema.clone()),
        }
    }
}

impl fmt::Display for SchemaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaSource::Named(name, dir) => {
                write!(f, "SchemaSource::Named({}, {})", name, dir.display())
            }
            SchemaSource::Merged(dirs) => {
                let joined = dirs
                    .iter()
                    .map(|d| d.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "SchemaSource::Merged([{}])", joined)
            }
            SchemaSource::Path(path) => write!(f, "SchemaSource::Path({})", path.display()),
            SchemaSource::Inline(_) => write!(f, "SchemaSource::Inline(<schema>)"),
        }
    }
}

fn load_schema_file(path: &Path) -> Result<Schema, StackError> {
    let source = std::fs::read_to_string(path)
        .map_err(|e| StackError::InvalidModel(format!("{}: {}", path.display(), e)))?;
    Schema::from_toml_str(&source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn user_schema() -> Schema {
        Schema::new().with_entity(
            EntityDescription::new("User")
                .with_attribute("name", AttributeKind::String)
                .with_attribute("age", AttributeKind::Integer),
        )
    }

    #[test]
    fn test_fingerprint_is_stable_across_sources() {
        let toml = r#"
            [entities.User]
            name = "string"
            age = "integer"
        "#;
        let parsed = Schema::from_toml_str(toml).unwrap();
        assert_eq!(parsed.fingerprint(), user_schema().fingerprint());
    }

    #[test]
    fn test_fingerprint_changes_with_attributes() {
        let extended = Schema::new().with_entity(
            EntityDescription::new("User")
                .with_attribute("name", AttributeKind::String)
                .with_attribute("age", AttributeKind::Integer)
                .with_attribute("email", AttributeKind::String),
        );
        assert_ne!(extended.fingerprint(), user_schema().fingerprint());
    }

    #[test]
    fn test_validate_accepts_matching_record() {
        let mut record = Record::new();
        record.insert("name".into(), Value::String("John".into()));
        record.insert("age".into(), Value::Integer(25));
        assert!(user_schema().validate("User", &record).is_ok());
    }

    #[test]
    fn test_validate_rejects_kind_mismatch() {
        let mut record = Record::new();
        record.insert("age".into(), Value::String("old".into()));
        assert!(matches!(
            user_schema().validate("User", &record),
            Err(StorageError::InvalidType)
        ));
    }

    #[test]
    fn test_validate_rejects_unknown_entity() {
        assert!(matches!(
            user_schema().validate("Ghost", &Record::new()),
            Err(StorageError::InvalidType)
        ));
    }

    #[test]
    fn test_named_source_loads_resource() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("app.toml"),
            "[entities.User]\nname = \"string\"\nage = \"integer\"\n",
        )
        .unwrap();

        let schema = SchemaSource::Named("app".into(), dir.path().to_path_buf())
            .load()
            .unwrap();
        assert!(schema.entity("User").is_some());
    }

    #[test]
    fn test_missing_named_source_is_invalid_model() {
        let dir = TempDir::new().unwrap();
        let result = SchemaSource::Named("absent".into(), dir.path().to_path_buf()).load();
        assert!(matches!(result, Err(StackError::InvalidModel(_))));
    }

    #[test]
    fn test_merged_source_unions_entities() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("users.toml"),
            "[entities.User]\nname = \"string\"\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("posts.toml"),
            "[entities.Post]\ntitle = \"string\"\n",
        )
        .unwrap();

        let schema = SchemaSource::Merged(vec![dir.path().to_path_buf()])
            .load()
            .unwrap();
        assert!(schema.entity("User").is_some());
        assert!(schema.entity("Post").is_some());
    }

    #[test]
    fn test_merged_source_rejects_conflicts() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("a.toml"),
            "[entities.User]\nname = \"string\"\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("b.toml"),
            "[entities.User]\nname = \"integer\"\n",
        )
        .unwrap();

        let result = SchemaSource::Merged(vec![dir.path().to_path_buf()]).load();
        assert!(matches!(result, Err(StackError::InvalidModel(_))));
    }
}
