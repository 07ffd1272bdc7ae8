//! Physical store location and open-time option profiles.

pub mod coordinator;

pub use coordinator::StoreCoordinator;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

/// Identifies where a physical store lives.
#[derive(Debug, Clone)]
pub enum StoreLocation {
    /// A store file under the per-user data directory.
    Named(String),
    /// A store at an explicit path.
    Path(PathBuf),
    /// A store with no backing files, discarded on close.
    InMemory,
}

impl StoreLocation {
    /// The resolved filesystem path of the store, or `None` for in-memory
    /// stores.
    pub fn resolve(&self) -> Option<PathBuf> {
        match self {
            StoreLocation::Path(path) => Some(path.clone()),
            StoreLocation::Named(name) => {
                let base = directories::ProjectDirs::from("", "", "strata")
                    .map(|dirs| dirs.data_dir().to_path_buf())
                    .unwrap_or_else(|| PathBuf::from(".strata"));
                Some(base.join(name))
            }
            StoreLocation::InMemory => None,
        }
    }
}

impl fmt::Display for StoreLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreLocation::Named(name) => match self.resolve() {
                Some(path) => write!(f, "StoreLocation::Named({}) → {}", name, path.display()),
                None => write!(f, "StoreLocation::Named({})", name),
            },
            StoreLocation::Path(path) => write!(f, "StoreLocation::Path({})", path.display()),
            StoreLocation::InMemory => write!(f, "StoreLocation::InMemory"),
        }
    }
}

// Locations compare by resolved path: a named store and an explicit path
// pointing at the same file are the same store.

impl PartialEq for StoreLocation {
    fn eq(&self, other: &Self) -> bool {
        self.resolve() == other.resolve()
            && matches!(self, StoreLocation::InMemory) == matches!(other, StoreLocation::InMemory)
    }
}

impl Eq for StoreLocation {}

impl Hash for StoreLocation {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.resolve().hash(state);
    }
}

/// Option profile applied when attaching the physical store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenOptions {
    /// Infer attribute mappings when record shapes change between schema
    /// versions (kind coercion).
    pub infer_mapping: bool,
    /// Rewrite existing rows to the current schema on fingerprint mismatch.
    pub automatic_migration: bool,
}

impl OpenOptions {
    pub fn basic() -> Self {
        OpenOptions {
            infer_mapping: false,
            automatic_migration: true,
        }
    }

    pub fn migration() -> Self {
        OpenOptions {
            infer_mapping: true,
            automatic_migration: true,
        }
    }

    /// Profile selected by the stack-level `migrate` flag.
    pub fn for_migrate_flag(migrate: bool) -> Self {
        if migrate {
            OpenOptions::migration()
        } else {
            OpenOptions::basic()
        }
    }
}
