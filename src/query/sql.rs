use serde_json::Value;
use std::mem;

use super::{Conjunction, QueryBuilder};
use crate::error::{AppError, AppResult};
use crate::parser::filter_operator::Operator;
use crate::parser::sort_parser::SortOrder;
use crate::schema::{CardinalityKind, EntityDescriptor, RelationDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Sqlite,
    Postgres,
}

impl SqlDialect {
    pub fn from_db_type(db_type: &str) -> AppResult<Self> {
        match db_type.to_lowercase().as_str() {
            "sqlite" => Ok(SqlDialect::Sqlite),
            "postgres" | "postgresql" => Ok(SqlDialect::Postgres),
            other => Err(AppError::Configuration(format!(
                "Unsupported database type: {}",
                other
            ))),
        }
    }

    fn placeholder(&self, index: usize) -> String {
        match self {
            SqlDialect::Sqlite => format!("?{}", index),
            SqlDialect::Postgres => format!("${}", index),
        }
    }

    fn json_object_fn(&self) -> &'static str {
        match self {
            SqlDialect::Sqlite => "json_object",
            SqlDialect::Postgres => "json_build_object",
        }
    }
}

pub(crate) fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier)
}

fn column(alias: &str, name: &str) -> String {
    format!("{}.{}", alias, quote(name))
}

/// Parameterized query parts produced by [`SqlQueryBuilder`]
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledSql {
    pub dialect: SqlDialect,
    pub table: String,
    pub alias: String,
    pub where_clause: Option<String>,
    pub order_by: Vec<String>,
    pub params: Vec<Value>,
}

impl CompiledSql {
    /// `SELECT` returning one JSON object per row built from `columns`
    pub fn select_json(&self, columns: &[&str]) -> String {
        let pairs: Vec<String> = columns
            .iter()
            .map(|c| format!("'{}', {}", c, column(&self.alias, c)))
            .collect();

        let mut sql = format!(
            "SELECT {}({}) AS record FROM {} AS {}",
            self.dialect.json_object_fn(),
            pairs.join(", "),
            quote(&self.table),
            self.alias
        );
        if let Some(where_clause) = &self.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(where_clause);
        }
        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by.join(", "));
        }
        sql
    }
}

/// `QueryBuilder` rendering a parameterized WHERE clause.
///
/// Column names arrive already validated, so they are quoted and
/// interpolated; every value goes through a numbered placeholder.
#[derive(Debug)]
pub struct SqlQueryBuilder {
    dialect: SqlDialect,
    entity: EntityDescriptor,
    alias: String,
    clauses: Vec<(Conjunction, String)>,
    params: Vec<Value>,
    order_by: Vec<String>,
    aliases: usize,
}

impl SqlQueryBuilder {
    pub fn new(dialect: SqlDialect, entity: &EntityDescriptor) -> Self {
        Self {
            dialect,
            entity: entity.clone(),
            alias: "t0".to_string(),
            clauses: Vec::new(),
            params: Vec::new(),
            order_by: Vec::new(),
            aliases: 1,
        }
    }

    /// Child builder sharing parameter numbering and alias counter
    fn child(&mut self, entity: EntityDescriptor, alias: String) -> Self {
        Self {
            dialect: self.dialect,
            entity,
            alias,
            clauses: Vec::new(),
            params: mem::take(&mut self.params),
            order_by: Vec::new(),
            aliases: self.aliases,
        }
    }

    /// Take back shared state from a finished child, returning its clause
    fn adopt(&mut self, child: SqlQueryBuilder) -> Option<String> {
        self.params = child.params;
        self.aliases = child.aliases;
        render(&child.clauses)
    }

    fn next_alias(&mut self) -> String {
        let alias = format!("t{}", self.aliases);
        self.aliases += 1;
        alias
    }

    fn bind(&mut self, value: Value) -> String {
        self.params.push(value);
        self.dialect.placeholder(self.params.len())
    }

    /// Correlation between a `parent` row aliased `parent_alias` and a related
    /// row aliased `related_alias`, as `(JOIN ..., WHERE ...)` fragments. The
    /// joins bring in the pivot or through table and belong after the FROM
    /// item of whichever side the subquery selects from.
    fn correlate(
        &mut self,
        parent: &EntityDescriptor,
        parent_alias: &str,
        relation: &RelationDescriptor,
        related: &EntityDescriptor,
        related_alias: &str,
    ) -> (String, Vec<String>) {
        let mut conditions = Vec::new();

        let joins = match relation.kind {
            CardinalityKind::OneToOne | CardinalityKind::OneToMany => {
                conditions.push(format!(
                    "{} = {}",
                    column(related_alias, &relation.foreign_key),
                    column(parent_alias, &relation.owner_key)
                ));
                String::new()
            }
            CardinalityKind::ManyToOne => {
                conditions.push(format!(
                    "{} = {}",
                    column(related_alias, &relation.owner_key),
                    column(parent_alias, &relation.foreign_key)
                ));
                String::new()
            }
            CardinalityKind::PolymorphicOneToOne | CardinalityKind::PolymorphicOneToMany => {
                conditions.push(format!(
                    "{} = {}",
                    column(related_alias, &relation.foreign_key),
                    column(parent_alias, &relation.owner_key)
                ));
                if let Some(morph_type) = &relation.morph_type {
                    let placeholder = self.bind(Value::String(parent.name.clone()));
                    conditions.push(format!("{} = {}", column(related_alias, morph_type), placeholder));
                }
                String::new()
            }
            CardinalityKind::ManyToMany | CardinalityKind::PolymorphicManyToMany => {
                let pivot = format!("{}_pivot", related_alias);
                let pivot_table = relation.intermediate_table.as_deref().unwrap_or_default();
                conditions.push(format!(
                    "{} = {}",
                    column(&pivot, &relation.foreign_key),
                    column(parent_alias, &parent.primary_key)
                ));
                if let Some(morph_type) = &relation.morph_type {
                    let placeholder = self.bind(Value::String(parent.name.clone()));
                    conditions.push(format!("{} = {}", column(&pivot, morph_type), placeholder));
                }
                format!(
                    " JOIN {} AS {} ON {} = {}",
                    quote(pivot_table),
                    pivot,
                    column(&pivot, &relation.owner_key),
                    column(related_alias, &related.primary_key)
                )
            }
            CardinalityKind::ThroughMany => {
                let through = format!("{}_through", related_alias);
                let through_table = relation.intermediate_table.as_deref().unwrap_or_default();
                let through_key = relation.intermediate_key.as_deref().unwrap_or("id");
                conditions.push(format!(
                    "{} = {}",
                    column(&through, &relation.foreign_key),
                    column(parent_alias, &parent.primary_key)
                ));
                format!(
                    " JOIN {} AS {} ON {} = {}",
                    quote(through_table),
                    through,
                    column(related_alias, &relation.owner_key),
                    column(&through, through_key)
                )
            }
        };

        (joins, conditions)
    }

    pub fn finish(self) -> CompiledSql {
        CompiledSql {
            dialect: self.dialect,
            table: self.entity.table,
            where_clause: render(&self.clauses),
            alias: self.alias,
            order_by: self.order_by,
            params: self.params,
        }
    }
}

fn render(clauses: &[(Conjunction, String)]) -> Option<String> {
    if clauses.is_empty() {
        return None;
    }

    let mut sql = String::new();
    for (index, (conjunction, clause)) in clauses.iter().enumerate() {
        if index > 0 {
            sql.push_str(match conjunction {
                Conjunction::And => " AND ",
                Conjunction::Or => " OR ",
            });
        }
        sql.push_str(clause);
    }
    Some(sql)
}

impl QueryBuilder for SqlQueryBuilder {
    fn compare(&mut self, name: &str, operator: Operator, value: &Value) {
        let target = column(&self.alias, name);
        let clause = match operator {
            Operator::Contains => {
                let needle = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let placeholder = self.bind(Value::String(format!("%{}%", needle)));
                format!("CAST({} AS TEXT) LIKE {}", target, placeholder)
            }
            _ => {
                let placeholder = self.bind(value.clone());
                format!("{} {} {}", target, operator.sql(), placeholder)
            }
        };
        self.clauses.push((Conjunction::And, clause));
    }

    fn scope(&mut self, conjunction: Conjunction, build: &mut dyn FnMut(&mut dyn QueryBuilder)) {
        let mut child = self.child(self.entity.clone(), self.alias.clone());
        build(&mut child);
        if let Some(inner) = self.adopt(child) {
            self.clauses.push((conjunction, format!("({})", inner)));
        }
    }

    fn exists(
        &mut self,
        relation: &RelationDescriptor,
        related: &EntityDescriptor,
        build: &mut dyn FnMut(&mut dyn QueryBuilder),
    ) {
        let related_alias = self.next_alias();
        let (parent, parent_alias) = (self.entity.clone(), self.alias.clone());
        let (joins, mut conditions) =
            self.correlate(&parent, &parent_alias, relation, related, &related_alias);
        let from = format!("{} AS {}{}", quote(&related.table), related_alias, joins);

        let mut child = self.child(related.clone(), related_alias);
        build(&mut child);
        if let Some(inner) = self.adopt(child) {
            conditions.push(format!("({})", inner));
        }

        self.clauses.push((
            Conjunction::And,
            format!("EXISTS (SELECT 1 FROM {} WHERE {})", from, conditions.join(" AND ")),
        ));
    }

    fn related_to(&mut self, parent: &EntityDescriptor, relation: &RelationDescriptor, parent_key: &Value) {
        let parent_alias = self.next_alias();
        let (related, related_alias) = (self.entity.clone(), self.alias.clone());
        let (joins, mut conditions) =
            self.correlate(parent, &parent_alias, relation, &related, &related_alias);

        let placeholder = self.bind(parent_key.clone());
        conditions.push(format!("{} = {}", column(&parent_alias, &parent.primary_key), placeholder));

        self.clauses.push((
            Conjunction::And,
            format!(
                "EXISTS (SELECT 1 FROM {} AS {}{} WHERE {})",
                quote(&parent.table),
                parent_alias,
                joins,
                conditions.join(" AND ")
            ),
        ));
    }

    fn order_by(&mut self, name: &str, order: SortOrder) {
        self.order_by
            .push(format!("{} {}", column(&self.alias, name), order.sql()));
    }
}
