use serde_json::{Map, Value};
use std::sync::Arc;

use super::payload::{MutationRequest, RawEntry};
use super::repository::EntityRepository;
use crate::error::AppResult;
use crate::schema::{CardinalityKind, Entity, EntitySchema, RelationDescriptor, SchemaGuard};

/// Applies add/remove payloads to one relation of an aggregate root.
///
/// Not-found keys, failed creations and unsupported relation kinds are
/// absorbed: they are logged and skipped. An `Err` only comes from a storage
/// write that failed after the change was decided.
pub struct RelationMutationResolver<R: EntityRepository + ?Sized = dyn EntityRepository> {
    guard: Arc<SchemaGuard>,
    repository: Arc<R>,
}

/// Schema pieces resolved for one relation of one root
struct Target<'a> {
    root: &'a EntitySchema,
    relation: RelationDescriptor,
    related: &'a EntitySchema,
}

impl<R: EntityRepository + ?Sized> RelationMutationResolver<R> {
    pub fn new(guard: Arc<SchemaGuard>, repository: Arc<R>) -> Self {
        Self { guard, repository }
    }

    /// Apply `add` and `remove` to `relation_name` on `root`.
    ///
    /// Returns whether relation membership actually changed. A many-to-one
    /// change is made on `root` itself; the caller persists `root` afterwards.
    pub async fn resolve(
        &self,
        root: &mut Entity,
        relation_name: &str,
        add: &[RawEntry],
        remove: &[RawEntry],
    ) -> AppResult<bool> {
        let snapshot = self.guard.snapshot();
        let Some(root_schema) = snapshot.entity(&root.kind) else {
            tracing::debug!(kind = %root.kind, "Mutation on entity without schema");
            return Ok(false);
        };
        let Some(relation) = root_schema.relation(relation_name).cloned() else {
            tracing::debug!(entity = root_schema.name(), relation = relation_name, "Ignoring mutation on undeclared relation");
            return Ok(false);
        };
        let Some(related) = snapshot.entity(&relation.related) else {
            tracing::debug!(related = %relation.related, "Ignoring mutation on relation without schema");
            return Ok(false);
        };

        match relation.kind {
            CardinalityKind::ThroughMany
            | CardinalityKind::PolymorphicOneToOne
            | CardinalityKind::PolymorphicOneToMany
            | CardinalityKind::PolymorphicManyToMany => {
                tracing::info!(relation = %relation.name, kind = %relation.kind, "Mutation is not supported for this relation kind");
                return Ok(false);
            }
            CardinalityKind::OneToOne
            | CardinalityKind::OneToMany
            | CardinalityKind::ManyToOne
            | CardinalityKind::ManyToMany => {}
        }

        let target = Target {
            root: root_schema,
            relation,
            related,
        };

        let added = self.resolve_entries(target.related, add).await;
        let removed = self.resolve_entries(target.related, remove).await;

        let mut changed = false;
        if !added.is_empty() {
            changed |= self.apply_additions(root, &target, added).await?;
        }
        if !removed.is_empty() {
            changed |= self.apply_removals(root, &target, removed).await?;
        }
        Ok(changed)
    }

    pub async fn resolve_request(&self, root: &mut Entity, request: &MutationRequest) -> AppResult<bool> {
        self.resolve(root, &request.relation, &request.add, &request.remove)
            .await
    }

    /// Apply every request in order; returns the names of relations that changed
    pub async fn resolve_all(
        &self,
        root: &mut Entity,
        requests: &[MutationRequest],
    ) -> AppResult<Vec<String>> {
        let mut changed = Vec::new();
        for request in requests {
            if self.resolve_request(root, request).await? {
                changed.push(request.relation.clone());
            }
        }
        Ok(changed)
    }

    /// Turn raw payload entries into concrete related entities, dropping
    /// anything that cannot be found or created
    async fn resolve_entries(&self, related: &EntitySchema, entries: &[RawEntry]) -> Vec<Entity> {
        let mut resolved = Vec::with_capacity(entries.len());

        for entry in entries {
            match entry {
                RawEntry::Entity(entity) => {
                    if entity.kind == related.name() {
                        resolved.push(entity.clone());
                    } else {
                        tracing::debug!(kind = %entity.kind, expected = related.name(), "Dropping entity of another kind");
                    }
                }
                RawEntry::Key(key) => match self.repository.find_by_key(&related.descriptor, key).await {
                    Ok(Some(entity)) => resolved.push(entity),
                    Ok(None) => {
                        tracing::debug!(entity = related.name(), key = %key, "Related entity not found");
                    }
                    Err(e) => {
                        tracing::warn!(entity = related.name(), key = %key, "Lookup failed, treating as not found: {}", e);
                    }
                },
                RawEntry::Create(data) => {
                    let data = declared_attributes(related, data);
                    if data.is_empty() {
                        tracing::debug!(entity = related.name(), "Skipping creation data without declared attributes");
                        continue;
                    }
                    match self.repository.create(&related.descriptor, &data).await {
                        Ok(entity) => resolved.push(entity),
                        Err(e) => {
                            tracing::warn!(entity = related.name(), "Failed to create related entity: {}", e);
                        }
                    }
                }
            }
        }

        resolved
    }

    async fn apply_additions(&self, root: &mut Entity, target: &Target<'_>, added: Vec<Entity>) -> AppResult<bool> {
        let relation = &target.relation;

        match relation.kind {
            CardinalityKind::OneToOne => {
                let Some(owner) = owner_value(root, relation) else {
                    return Ok(false);
                };
                let Some(mut first) = added.into_iter().next() else {
                    return Ok(false);
                };
                if first.get(&relation.foreign_key) == Some(&owner) {
                    return Ok(false);
                }
                first.set(&relation.foreign_key, owner);
                self.repository.save(&target.related.descriptor, &first).await?;
                Ok(true)
            }
            CardinalityKind::ManyToOne => {
                let Some(first) = added.first() else {
                    return Ok(false);
                };
                let value = first.get(&relation.owner_key).cloned().unwrap_or(Value::Null);
                if value.is_null() || root.get(&relation.foreign_key) == Some(&value) {
                    return Ok(false);
                }
                root.set(&relation.foreign_key, value);
                Ok(true)
            }
            CardinalityKind::OneToMany => {
                let Some(owner) = owner_value(root, relation) else {
                    return Ok(false);
                };
                let mut changed = false;
                for mut entity in added {
                    if entity.get(&relation.foreign_key) == Some(&owner) {
                        continue;
                    }
                    entity.set(&relation.foreign_key, owner.clone());
                    self.repository.save(&target.related.descriptor, &entity).await?;
                    changed = true;
                }
                Ok(changed)
            }
            CardinalityKind::ManyToMany => {
                let Some(parent_key) = root.key(&target.root.descriptor).cloned() else {
                    tracing::warn!(entity = target.root.name(), "Cannot attach to a root without a key");
                    return Ok(false);
                };
                let keys = related_keys(&added, target.related);
                let attached = self.repository.attach(relation, &parent_key, &keys).await?;
                Ok(attached > 0)
            }
            CardinalityKind::ThroughMany
            | CardinalityKind::PolymorphicOneToOne
            | CardinalityKind::PolymorphicOneToMany
            | CardinalityKind::PolymorphicManyToMany => Ok(false),
        }
    }

    async fn apply_removals(&self, root: &mut Entity, target: &Target<'_>, removed: Vec<Entity>) -> AppResult<bool> {
        let relation = &target.relation;

        match relation.kind {
            // The resolved entities are not compared with the current
            // association: removal always clears it
            CardinalityKind::OneToOne => {
                let Some(owner) = owner_value(root, relation) else {
                    return Ok(false);
                };
                let released = self
                    .repository
                    .clear_owned(relation, &target.related.descriptor, &owner)
                    .await?;
                Ok(released > 0)
            }
            CardinalityKind::ManyToOne => {
                let previous = root.set(&relation.foreign_key, Value::Null);
                Ok(previous.is_some_and(|v| !v.is_null()))
            }
            CardinalityKind::OneToMany => {
                tracing::debug!(relation = %relation.name, "Removal from a one-to-many relation is not supported");
                Ok(false)
            }
            CardinalityKind::ManyToMany => {
                let Some(parent_key) = root.key(&target.root.descriptor).cloned() else {
                    return Ok(false);
                };
                let keys = related_keys(&removed, target.related);
                let detached = self.repository.detach(relation, &parent_key, &keys).await?;
                Ok(detached > 0)
            }
            CardinalityKind::ThroughMany
            | CardinalityKind::PolymorphicOneToOne
            | CardinalityKind::PolymorphicOneToMany
            | CardinalityKind::PolymorphicManyToMany => Ok(false),
        }
    }
}

/// Value of the relation's owner key on `root`, `None` when unset
fn owner_value(root: &Entity, relation: &RelationDescriptor) -> Option<Value> {
    let value = root.get(&relation.owner_key).filter(|v| !v.is_null()).cloned();
    if value.is_none() {
        tracing::warn!(relation = %relation.name, "Root has no value for owner key '{}'", relation.owner_key);
    }
    value
}

fn related_keys(entities: &[Entity], related: &EntitySchema) -> Vec<Value> {
    entities
        .iter()
        .filter_map(|e| e.key(&related.descriptor).cloned())
        .collect()
}

/// Keep only attributes naming declared fields, under their canonical names
fn declared_attributes(entity: &EntitySchema, data: &Map<String, Value>) -> Map<String, Value> {
    let mut attributes = Map::new();
    for (name, value) in data {
        match entity.resolve_field(name) {
            Some(column) => {
                attributes.insert(column.to_string(), value.clone());
            }
            None => tracing::debug!(entity = entity.name(), field = %name, "Dropping undeclared attribute"),
        }
    }
    attributes
}
