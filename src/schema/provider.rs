use std::collections::{HashMap, HashSet};

use crate::config::EntityConfig;
use crate::schema::definitions::{EntityDescriptor, RelationDescriptor};

/// Source of schema metadata.
///
/// Implementations typically come from reflection over migrations or a live
/// database catalog; the guard only reads through this trait once per load.
pub trait SchemaProvider: Send + Sync {
    fn entity_kinds(&self) -> Vec<String>;

    fn entity(&self, kind: &str) -> Option<EntityDescriptor>;

    fn fields_of(&self, kind: &str) -> HashSet<String>;

    fn relations_of(&self, kind: &str) -> HashMap<String, RelationDescriptor>;
}

/// Schema metadata declared in the `entities` section of the configuration
pub struct ConfigSchemaProvider {
    entities: Vec<EntityConfig>,
}

impl ConfigSchemaProvider {
    pub fn new(entities: Vec<EntityConfig>) -> Self {
        Self { entities }
    }

    fn find(&self, kind: &str) -> Option<&EntityConfig> {
        self.entities.iter().find(|e| e.name == kind)
    }
}

impl SchemaProvider for ConfigSchemaProvider {
    fn entity_kinds(&self) -> Vec<String> {
        self.entities.iter().map(|e| e.name.clone()).collect()
    }

    fn entity(&self, kind: &str) -> Option<EntityDescriptor> {
        self.find(kind).map(EntityConfig::descriptor)
    }

    fn fields_of(&self, kind: &str) -> HashSet<String> {
        self.find(kind)
            .map(|e| e.fields.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn relations_of(&self, kind: &str) -> HashMap<String, RelationDescriptor> {
        self.find(kind)
            .map(|e| {
                e.relations
                    .iter()
                    .map(|r| (r.name.clone(), r.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}
