//! Query-building seam.
//!
//! The compiler never talks to a database directly: it walks a validated
//! filter and emits calls against a [`QueryBuilder`]. Two builders ship with
//! the crate:
//!
//! ```text
//! FilterExpression ── QueryPlanApplier ──▶ QueryBuilder
//!                                            ├── PredicateBuilder (structured tree)
//!                                            └── SqlQueryBuilder  (parameterized SQL)
//! ```

pub mod applier;
pub mod context;
pub mod predicate;
pub mod sql;

use serde_json::Value;

use crate::parser::filter_operator::Operator;
use crate::parser::sort_parser::SortOrder;
use crate::schema::{EntityDescriptor, RelationDescriptor};

pub use applier::QueryPlanApplier;
pub use context::{AccessPolicy, QueryContext, RowRestriction};
pub use predicate::{Predicate, PredicateBuilder};
pub use sql::{CompiledSql, SqlDialect, SqlQueryBuilder};

/// How a nested scope joins the predicates registered before it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conjunction {
    And,
    Or,
}

/// Predicate registration contract of the query engine.
///
/// Column names handed to a builder have already been validated against the
/// schema; builders may interpolate them as identifiers.
pub trait QueryBuilder {
    /// Register `column <operator> value`, ANDed with the current scope
    fn compare(&mut self, column: &str, operator: Operator, value: &Value);

    /// Open a nested scope joined with `conjunction`. A scope that ends up
    /// empty registers nothing.
    fn scope(&mut self, conjunction: Conjunction, build: &mut dyn FnMut(&mut dyn QueryBuilder));

    /// Register "a related row exists matching the nested scope"
    fn exists(
        &mut self,
        relation: &RelationDescriptor,
        related: &EntityDescriptor,
        build: &mut dyn FnMut(&mut dyn QueryBuilder),
    );

    /// Restrict the rows to those reached from the `parent` row keyed
    /// `parent_key` through `relation`, a relation declared on `parent` whose
    /// related side is the entity this builder selects
    fn related_to(&mut self, parent: &EntityDescriptor, relation: &RelationDescriptor, parent_key: &Value);

    fn order_by(&mut self, column: &str, order: SortOrder);

    fn and_scope(&mut self, build: &mut dyn FnMut(&mut dyn QueryBuilder)) {
        self.scope(Conjunction::And, build);
    }

    fn or_scope(&mut self, build: &mut dyn FnMut(&mut dyn QueryBuilder)) {
        self.scope(Conjunction::Or, build);
    }
}
