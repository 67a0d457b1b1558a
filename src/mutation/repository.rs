use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::AppResult;
use crate::schema::{Entity, EntityDescriptor, RelationDescriptor};

/// Storage operations the mutation resolver depends on.
///
/// Column names handed over have been checked against the schema; key values
/// come straight from request input.
#[async_trait]
pub trait EntityRepository: Send + Sync {
    /// Look up one entity by primary key
    async fn find_by_key(&self, entity: &EntityDescriptor, key: &Value) -> AppResult<Option<Entity>>;

    /// Insert a new entity, assigning a primary key when `data` has none
    async fn create(&self, entity: &EntityDescriptor, data: &Map<String, Value>) -> AppResult<Entity>;

    /// Insert or update `record` by its primary key
    async fn save(&self, entity: &EntityDescriptor, record: &Entity) -> AppResult<Entity>;

    /// Add pivot rows linking `parent_key` to each of `related_keys`, skipping
    /// existing links. Returns the number of links added.
    async fn attach(
        &self,
        relation: &RelationDescriptor,
        parent_key: &Value,
        related_keys: &[Value],
    ) -> AppResult<usize>;

    /// Remove pivot rows linking `parent_key` to `related_keys`.
    /// Returns the number of links removed.
    async fn detach(
        &self,
        relation: &RelationDescriptor,
        parent_key: &Value,
        related_keys: &[Value],
    ) -> AppResult<usize>;

    /// Null the relation's foreign key on every `related` row owned by
    /// `owner_value`. Returns the number of rows released.
    async fn clear_owned(
        &self,
        relation: &RelationDescriptor,
        related: &EntityDescriptor,
        owner_value: &Value,
    ) -> AppResult<usize>;
}
