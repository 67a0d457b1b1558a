use serde::Serialize;
use serde_json::Value;
use std::fmt;

use super::{Conjunction, QueryBuilder};
use crate::parser::filter_operator::Operator;
use crate::parser::sort_parser::SortOrder;
use crate::schema::{EntityDescriptor, RelationDescriptor};

/// Compiled boolean predicate tree
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Compare {
        column: String,
        operator: Operator,
        value: Value,
    },
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
    Exists {
        relation: String,
        predicate: Option<Box<Predicate>>,
    },
    RelatedTo {
        parent: String,
        relation: String,
        key: Value,
    },
}

impl Predicate {
    pub fn compare(column: &str, operator: Operator, value: Value) -> Self {
        Predicate::Compare {
            column: column.to_string(),
            operator,
            value,
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Compare {
                column,
                operator,
                value,
            } => write!(f, "{} {} {}", column, operator, value),
            Predicate::All(children) => {
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, " AND ")?;
                    }
                    match child {
                        Predicate::Any(_) => write!(f, "({})", child)?,
                        _ => write!(f, "{}", child)?,
                    }
                }
                Ok(())
            }
            Predicate::Any(children) => {
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, " OR ")?;
                    }
                    write!(f, "({})", child)?;
                }
                Ok(())
            }
            Predicate::Exists {
                relation,
                predicate: Some(inner),
            } => write!(f, "EXISTS({} WHERE {})", relation, inner),
            Predicate::Exists {
                relation,
                predicate: None,
            } => write!(f, "EXISTS({})", relation),
            Predicate::RelatedTo {
                parent,
                relation,
                key,
            } => write!(f, "RELATED_TO({}.{} = {})", parent, relation, key),
        }
    }
}

/// `QueryBuilder` that records registrations as a [`Predicate`] tree.
///
/// Clauses follow SQL precedence: AND binds tighter than OR, so
/// `a AND b OR c` folds to `Any[All[a, b], c]`.
#[derive(Debug, Default)]
pub struct PredicateBuilder {
    clauses: Vec<(Conjunction, Predicate)>,
    ordering: Vec<(String, SortOrder)>,
}

impl PredicateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn ordering(&self) -> &[(String, SortOrder)] {
        &self.ordering
    }

    /// Fold the registered clauses; `None` when nothing was registered
    pub fn build(&self) -> Option<Predicate> {
        let mut runs: Vec<Vec<Predicate>> = Vec::new();

        for (index, (conjunction, predicate)) in self.clauses.iter().enumerate() {
            // The conjunction of the first clause has nothing to join
            if index == 0 || *conjunction == Conjunction::Or {
                runs.push(Vec::new());
            }
            if let Some(run) = runs.last_mut() {
                match predicate {
                    Predicate::All(children) => run.extend(children.iter().cloned()),
                    other => run.push(other.clone()),
                }
            }
        }

        let mut alternatives: Vec<Predicate> = runs
            .into_iter()
            .filter(|run| !run.is_empty())
            .map(|mut run| {
                if run.len() == 1 {
                    run.remove(0)
                } else {
                    Predicate::All(run)
                }
            })
            .collect();

        match alternatives.len() {
            0 => None,
            1 => alternatives.pop(),
            _ => Some(Predicate::Any(alternatives)),
        }
    }

    fn nested(build: &mut dyn FnMut(&mut dyn QueryBuilder)) -> Option<Predicate> {
        let mut inner = PredicateBuilder::new();
        build(&mut inner);
        inner.build()
    }
}

impl QueryBuilder for PredicateBuilder {
    fn compare(&mut self, column: &str, operator: Operator, value: &Value) {
        self.clauses.push((
            Conjunction::And,
            Predicate::compare(column, operator, value.clone()),
        ));
    }

    fn scope(&mut self, conjunction: Conjunction, build: &mut dyn FnMut(&mut dyn QueryBuilder)) {
        if let Some(predicate) = Self::nested(build) {
            self.clauses.push((conjunction, predicate));
        }
    }

    fn exists(
        &mut self,
        relation: &RelationDescriptor,
        _related: &EntityDescriptor,
        build: &mut dyn FnMut(&mut dyn QueryBuilder),
    ) {
        let predicate = Self::nested(build).map(Box::new);
        self.clauses.push((
            Conjunction::And,
            Predicate::Exists {
                relation: relation.name.clone(),
                predicate,
            },
        ));
    }

    fn related_to(&mut self, parent: &EntityDescriptor, relation: &RelationDescriptor, parent_key: &Value) {
        self.clauses.push((
            Conjunction::And,
            Predicate::RelatedTo {
                parent: parent.name.clone(),
                relation: relation.name.clone(),
                key: parent_key.clone(),
            },
        ));
    }

    fn order_by(&mut self, column: &str, order: SortOrder) {
        self.ordering.push((column.to_string(), order));
    }
}
