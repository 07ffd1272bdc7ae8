//! Shared fixtures for integration tests.
#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use strata::{
    AttributeKind, DefaultStorage, Entity, EntityDescription, RecordId, Schema, SchemaSource,
    StoreLocation,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(skip)]
    pub id: Option<RecordId>,
    pub name: String,
    pub age: i64,
}

impl Entity for User {
    fn record_id(&self) -> Option<RecordId> {
        self.id
    }

    fn set_record_id(&mut self, id: Option<RecordId>) {
        self.id = id;
    }
}

pub fn user(name: &str, age: i64) -> User {
    User {
        id: None,
        name: name.to_string(),
        age,
    }
}

pub fn user_schema() -> Schema {
    Schema::new().with_entity(
        EntityDescription::new("User")
            .with_attribute("name", AttributeKind::String)
            .with_attribute("age", AttributeKind::Integer),
    )
}

pub fn user_model() -> SchemaSource {
    SchemaSource::Inline(user_schema())
}

pub fn in_memory_storage() -> DefaultStorage {
    DefaultStorage::open(StoreLocation::InMemory, user_model(), true).unwrap()
}
