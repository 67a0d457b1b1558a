pub mod definitions;
pub mod guard;
pub mod provider;
pub mod validation;

pub use definitions::{CardinalityKind, Entity, EntityDescriptor, RelationDescriptor};
pub use guard::{EntitySchema, SchemaGuard, SchemaSnapshot};
pub use provider::{ConfigSchemaProvider, SchemaProvider};
