use arc_swap::ArcSwap;
use convert_case::{Case, Casing};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::schema::definitions::{EntityDescriptor, RelationDescriptor};
use crate::schema::provider::SchemaProvider;

/// Metadata for one entity kind, indexed for O(1) name checks
#[derive(Debug, Clone)]
pub struct EntitySchema {
    pub descriptor: EntityDescriptor,
    /// lower-cased name -> canonical column name
    fields: HashMap<String, String>,
    relations: HashMap<String, RelationDescriptor>,
}

impl EntitySchema {
    pub fn new(
        descriptor: EntityDescriptor,
        fields: impl IntoIterator<Item = String>,
        relations: HashMap<String, RelationDescriptor>,
    ) -> Self {
        let fields = fields
            .into_iter()
            .map(|f| (f.to_lowercase(), f))
            .collect();
        Self {
            descriptor,
            fields,
            relations,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Canonical column name for `name`, matched case-insensitively
    pub fn resolve_field(&self, name: &str) -> Option<&str> {
        self.fields.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.resolve_field(name).is_some()
    }

    /// Relation by exact name, falling back to its camelCase spelling
    pub fn relation(&self, name: &str) -> Option<&RelationDescriptor> {
        self.relations
            .get(name)
            .or_else(|| self.relations.get(&name.to_case(Case::Camel)))
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.values().map(String::as_str)
    }

    /// Declared field names in a stable order
    pub fn sorted_field_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.field_names().collect();
        names.sort_unstable();
        names
    }

    pub fn relations(&self) -> impl Iterator<Item = &RelationDescriptor> {
        self.relations.values()
    }
}

/// Immutable view of the whole schema at one point in time
#[derive(Debug, Default)]
pub struct SchemaSnapshot {
    entities: HashMap<String, EntitySchema>,
}

impl SchemaSnapshot {
    pub fn from_provider(provider: &dyn SchemaProvider) -> AppResult<Self> {
        let mut entities = HashMap::new();
        for kind in provider.entity_kinds() {
            let descriptor = provider.entity(&kind).ok_or_else(|| {
                AppError::Configuration(format!("Schema provider has no descriptor for '{}'", kind))
            })?;
            let schema = EntitySchema::new(
                descriptor,
                provider.fields_of(&kind),
                provider.relations_of(&kind),
            );
            entities.insert(kind, schema);
        }
        Ok(Self { entities })
    }

    pub fn entity(&self, kind: &str) -> Option<&EntitySchema> {
        self.entities.get(kind)
    }

    /// All entity schemas ordered by name
    pub fn entities(&self) -> Vec<&EntitySchema> {
        let mut entities: Vec<&EntitySchema> = self.entities.values().collect();
        entities.sort_by(|a, b| a.name().cmp(b.name()));
        entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Process-wide, read-only authority on entity fields and relations.
///
/// Readers load the current snapshot without locking; `reload` builds a
/// complete new snapshot and stores it atomically, so a reader never observes
/// a partially loaded schema.
#[derive(Debug)]
pub struct SchemaGuard {
    snapshot: ArcSwap<SchemaSnapshot>,
}

impl SchemaGuard {
    pub fn load(provider: &dyn SchemaProvider) -> AppResult<Self> {
        let snapshot = SchemaSnapshot::from_provider(provider)?;
        tracing::info!("Loaded schema metadata for {} entities", snapshot.len());
        Ok(Self::from_snapshot(snapshot))
    }

    pub fn from_snapshot(snapshot: SchemaSnapshot) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(snapshot),
        }
    }

    pub fn snapshot(&self) -> Arc<SchemaSnapshot> {
        self.snapshot.load_full()
    }

    /// Replace the metadata with a freshly loaded snapshot
    pub fn reload(&self, provider: &dyn SchemaProvider) -> AppResult<()> {
        let fresh = SchemaSnapshot::from_provider(provider)?;
        tracing::info!("Reloaded schema metadata for {} entities", fresh.len());
        self.snapshot.store(Arc::new(fresh));
        Ok(())
    }

    pub fn entity(&self, kind: &str) -> Option<EntityDescriptor> {
        self.snapshot().entity(kind).map(|e| e.descriptor.clone())
    }

    pub fn has_field(&self, kind: &str, field: &str) -> bool {
        self.snapshot()
            .entity(kind)
            .map(|e| e.has_field(field))
            .unwrap_or(false)
    }

    pub fn relation_descriptor(&self, kind: &str, relation: &str) -> Option<RelationDescriptor> {
        self.snapshot()
            .entity(kind)
            .and_then(|e| e.relation(relation).cloned())
    }
}
