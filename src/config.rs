//! Configuration surface for building storage stacks.
//!
//! The construction parameters (store location, schema source, migrate flag,
//! logging) can be loaded from a TOML file with `STRATA_*` environment
//! overrides layered on top.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::StackError;
use crate::logging::LoggingConfig;
use crate::schema::SchemaSource;
use crate::store::StoreLocation;

/// Settings for one storage stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Store target: `"memory"`, a filesystem path, or a bare store name
    /// resolved under the per-user data directory.
    #[serde(default = "default_store")]
    pub store: String,

    /// Path to a schema resource file.
    #[serde(default)]
    pub schema: Option<PathBuf>,

    /// Directory whose schema resources are merged into one model. Used when
    /// `schema` is not set.
    #[serde(default)]
    pub schema_dir: Option<PathBuf>,

    /// Migrate incompatible stores automatically (with reset-and-retry on
    /// failure).
    #[serde(default = "default_true")]
    pub migrate: bool,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_store() -> String {
    "memory".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            store: default_store(),
            schema: None,
            schema_dir: None,
            migrate: default_true(),
            logging: LoggingConfig::default(),
        }
    }
}

impl StorageSettings {
    /// Load settings from an optional TOML file plus `STRATA_*` environment
    /// variables (for example `STRATA_MIGRATE=false`,
    /// `STRATA_LOGGING__LEVEL=debug`).
    pub fn load(path: Option<&Path>) -> Result<Self, StackError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("STRATA")
                .separator("__")
                .try_parsing(true),
        );
        let settings = builder.build()?.try_deserialize()?;
        Ok(settings)
    }

    /// The store location this configuration names.
    pub fn store_location(&self) -> StoreLocation {
        match self.store.as_str() {
            "memory" | ":memory:" => StoreLocation::InMemory,
            other if other.contains(std::path::MAIN_SEPARATOR) || other.contains('/') => {
                StoreLocation::Path(PathBuf::from(other))
            }
            name => StoreLocation::Named(name.to_string()),
        }
    }

    /// The schema source this configuration names.
    pub fn schema_source(&self) -> Result<SchemaSource, StackError> {
        if let Some(path) = &self.schema {
            Ok(SchemaSource::Path(path.clone()))
        } else if let Some(dir) = &self.schema_dir {
            Ok(SchemaSource::Merged(vec![dir.clone()]))
        } else {
            Err(StackError::Configuration(
                "no schema resource configured".to_string(),
            ))
        }
    }
}
