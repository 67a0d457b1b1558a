use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Shape of a relation between two entities.
///
/// Key semantics per kind (`parent` is the entity declaring the relation):
///
/// | kind                    | `foreign_key` lives on        | `owner_key` lives on |
/// |-------------------------|-------------------------------|----------------------|
/// | `OneToOne`, `OneToMany` | related table                 | parent table         |
/// | `ManyToOne`             | parent table                  | related table        |
/// | `ManyToMany`            | pivot, references parent      | pivot, references related |
/// | `ThroughMany`           | through table, refs parent    | related, refs through row key |
/// | `PolymorphicOneTo*`     | related table (+ `morph_type`) | parent table        |
/// | `PolymorphicManyToMany` | pivot, references parent (+ `morph_type`) | pivot, references related |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CardinalityKind {
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
    ThroughMany,
    PolymorphicOneToOne,
    PolymorphicOneToMany,
    PolymorphicManyToMany,
}

impl CardinalityKind {
    /// Kinds that are stored through an intermediate (pivot or through) table
    pub fn requires_intermediate_table(&self) -> bool {
        matches!(
            self,
            CardinalityKind::ManyToMany
                | CardinalityKind::ThroughMany
                | CardinalityKind::PolymorphicManyToMany
        )
    }

    pub fn is_polymorphic(&self) -> bool {
        matches!(
            self,
            CardinalityKind::PolymorphicOneToOne
                | CardinalityKind::PolymorphicOneToMany
                | CardinalityKind::PolymorphicManyToMany
        )
    }
}

impl fmt::Display for CardinalityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CardinalityKind::OneToOne => "one_to_one",
            CardinalityKind::OneToMany => "one_to_many",
            CardinalityKind::ManyToOne => "many_to_one",
            CardinalityKind::ManyToMany => "many_to_many",
            CardinalityKind::ThroughMany => "through_many",
            CardinalityKind::PolymorphicOneToOne => "polymorphic_one_to_one",
            CardinalityKind::PolymorphicOneToMany => "polymorphic_one_to_many",
            CardinalityKind::PolymorphicManyToMany => "polymorphic_many_to_many",
        };
        write!(f, "{}", name)
    }
}

/// Static metadata for one relation, supplied by the schema layer
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RelationDescriptor {
    pub name: String,
    /// Entity kind of the related side
    pub related: String,
    pub kind: CardinalityKind,
    pub foreign_key: String,
    pub owner_key: String,
    /// Pivot table for many-to-many shapes, through table for `ThroughMany`
    #[serde(default)]
    pub intermediate_table: Option<String>,
    /// Row key of the through table for `ThroughMany`, `id` when absent
    #[serde(default)]
    pub intermediate_key: Option<String>,
    /// Type discriminator column for polymorphic shapes
    #[serde(default)]
    pub morph_type: Option<String>,
}

/// Table-level metadata for one entity kind
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EntityDescriptor {
    pub name: String,
    pub table: String,
    pub primary_key: String,
}

/// A materialized row of some entity kind.
///
/// Attributes are kept as JSON values so the core never needs compile-time
/// knowledge of an entity's shape.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Entity {
    pub kind: String,
    pub attributes: serde_json::Map<String, Value>,
}

impl Entity {
    pub fn new(kind: impl Into<String>, attributes: serde_json::Map<String, Value>) -> Self {
        Self {
            kind: kind.into(),
            attributes,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.attributes.get(field)
    }

    pub fn set(&mut self, field: &str, value: Value) -> Option<Value> {
        self.attributes.insert(field.to_string(), value)
    }

    /// Primary key value, `None` when missing or null
    pub fn key(&self, descriptor: &EntityDescriptor) -> Option<&Value> {
        self.get(&descriptor.primary_key).filter(|v| !v.is_null())
    }
}
