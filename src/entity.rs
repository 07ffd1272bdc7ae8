//! Entity trait and row identifiers.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::StorageError;
use crate::value::{record_from_json, record_to_json, Record};

/// Identity of a stored row. Fresh inserts carry a context-local temporary
/// identifier until a pre-save hook obtains a durable one from the store;
/// only permanent identifiers ever reach the persistent store or cross
/// context boundaries.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum RecordId {
    Temporary(u64),
    Permanent(u64),
}

impl RecordId {
    pub fn is_permanent(&self) -> bool {
        matches!(self, RecordId::Permanent(_))
    }

    pub fn value(&self) -> u64 {
        match self {
            RecordId::Temporary(v) | RecordId::Permanent(v) => *v,
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Temporary(v) => write!(f, "t{}", v),
            RecordId::Permanent(v) => write!(f, "p{}", v),
        }
    }
}

/// Fully qualified identity of a row: entity name plus record identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub entity: String,
    pub id: RecordId,
}

impl RecordKey {
    pub fn new(entity: impl Into<String>, id: RecordId) -> Self {
        RecordKey {
            entity: entity.into(),
            id,
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity, self.id)
    }
}

/// A typed row. Implementors are plain serde structs whose serialized fields
/// are the entity's attributes; the record identifier lives outside the
/// attribute set (mark the id field `#[serde(skip)]`).
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The schema entity this type maps to. Defaults to the type name with
    /// the module path stripped.
    fn entity_name() -> &'static str {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full)
    }

    fn record_id(&self) -> Option<RecordId>;

    fn set_record_id(&mut self, id: Option<RecordId>);

    /// Serialize the attribute fields into a record.
    fn to_record(&self) -> Result<Record, StorageError> {
        let json = serde_json::to_value(self).map_err(|_| StorageError::InvalidType)?;
        record_from_json(json)
    }

    /// Materialize an instance from a stored record. The caller assigns the
    /// record identifier separately.
    fn from_record(record: &Record) -> Result<Self, StorageError> {
        let json = record_to_json(record);
        serde_json::from_value(json).map_err(|_| StorageError::InvalidType)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Gadget {
        #[serde(skip)]
        id: Option<RecordId>,
        label: String,
        weight: i64,
    }

    impl Entity for Gadget {
        fn record_id(&self) -> Option<RecordId> {
            self.id
        }

        fn set_record_id(&mut self, id: Option<RecordId>) {
            self.id = id;
        }
    }

    #[test]
    fn test_entity_name_strips_module_path() {
        assert_eq!(Gadget::entity_name(), "Gadget");
    }

    #[test]
    fn test_record_round_trip_excludes_id() {
        let gadget = Gadget {
            id: Some(RecordId::Permanent(7)),
            label: "widget".into(),
            weight: 3,
        };
        let record = gadget.to_record().unwrap();
        assert!(!record.contains_key("id"));
        assert_eq!(record.len(), 2);

        let restored = Gadget::from_record(&record).unwrap();
        assert_eq!(restored.id, None);
        assert_eq!(restored.label, "widget");
        assert_eq!(restored.weight, 3);
    }

    #[test]
    fn test_temporary_orders_before_permanent() {
        assert!(RecordId::Temporary(9) < RecordId::Permanent(1));
    }
}
