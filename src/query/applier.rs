use serde_json::Value;
use std::sync::Arc;

use super::{QueryBuilder, QueryContext};
use crate::parser::filter_parser::FilterExpression;
use crate::parser::sort_parser::SortSpec;
use crate::schema::{EntitySchema, SchemaSnapshot};

/// Walks a [`FilterExpression`] and emits builder calls.
///
/// Holds one schema snapshot for the whole walk, so a concurrent reload can
/// never mix two schema versions inside one compiled query.
pub struct QueryPlanApplier {
    snapshot: Arc<SchemaSnapshot>,
    context: QueryContext,
}

impl QueryPlanApplier {
    pub fn new(snapshot: Arc<SchemaSnapshot>, context: QueryContext) -> Self {
        Self { snapshot, context }
    }

    /// Emit `filter` into `query`.
    ///
    /// The first group is an AND scope on the base query, every later group an
    /// OR scope. With an active access policy both the policy and the group
    /// disjunction get their own AND scope, giving `policy AND (g1 OR g2 ...)`.
    pub fn apply(&self, filter: &FilterExpression, query: &mut dyn QueryBuilder) {
        let Some(entity) = self.snapshot.entity(filter.entity()) else {
            tracing::warn!(entity = filter.entity(), "Filter targets an entity without schema");
            return;
        };

        match self.context.active_policy() {
            Some(policy) => {
                query.and_scope(&mut |q: &mut dyn QueryBuilder| policy.restrict(entity, q));
                query.and_scope(&mut |q: &mut dyn QueryBuilder| {
                    self.apply_groups(filter, entity, q)
                });
            }
            None => self.apply_groups(filter, entity, query),
        }
    }

    /// Schema of the entity `relation` points to, when `parent` declares it
    pub fn related_schema(&self, parent: &str, relation: &str) -> Option<&EntitySchema> {
        let relation = self.snapshot.entity(parent)?.relation(relation)?;
        self.snapshot.entity(&relation.related)
    }

    /// Emit `filter` for the rows reached from the `parent` row keyed
    /// `parent_key` through `relation`.
    ///
    /// `filter` must target the related entity. Returns `false` and emits
    /// nothing when the relation is undeclared or the filter targets another
    /// entity; callers list nothing in that case.
    pub fn apply_on_relation(
        &self,
        parent: &str,
        parent_key: &Value,
        relation: &str,
        filter: &FilterExpression,
        query: &mut dyn QueryBuilder,
    ) -> bool {
        let Some(owner) = self.snapshot.entity(parent) else {
            tracing::warn!(entity = parent, "Relation listing on an entity without schema");
            return false;
        };
        let Some(descriptor) = owner.relation(relation) else {
            tracing::debug!(entity = parent, relation, "Relation listing on undeclared relation");
            return false;
        };
        if descriptor.related != filter.entity() {
            tracing::warn!(
                relation,
                related = %descriptor.related,
                target = filter.entity(),
                "Relation listing filter targets another entity"
            );
            return false;
        }

        // Later groups are ORed, so they must not escape the parent scope
        query.related_to(&owner.descriptor, descriptor, parent_key);
        query.and_scope(&mut |q: &mut dyn QueryBuilder| self.apply(filter, q));
        true
    }

    fn apply_groups(&self, filter: &FilterExpression, entity: &EntitySchema, query: &mut dyn QueryBuilder) {
        for (index, group) in filter.groups().iter().enumerate() {
            let mut emit = |q: &mut dyn QueryBuilder| group.apply(q, entity, &self.snapshot);
            if index == 0 {
                query.and_scope(&mut emit);
            } else {
                query.or_scope(&mut emit);
            }
        }
    }

    /// Emit ordering for every sort spec naming a declared field of `entity`
    pub fn apply_sort(&self, entity: &str, specs: &[SortSpec], query: &mut dyn QueryBuilder) {
        let Some(schema) = self.snapshot.entity(entity) else {
            return;
        };
        for spec in specs {
            match schema.resolve_field(&spec.field) {
                Some(column) => query.order_by(column, spec.order),
                None => tracing::debug!(entity, field = %spec.field, "Dropping sort on undeclared field"),
            }
        }
    }
}
