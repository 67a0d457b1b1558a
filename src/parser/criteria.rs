use serde_json::{Map, Value};

use crate::parser::filter_operator::Operator;
use crate::query::QueryBuilder;
use crate::schema::{EntitySchema, SchemaSnapshot};

/// One `field <operator> value` comparison taken from request input.
///
/// `name` is either a bare field or `relation.field`; only the first `.`
/// separates, so `a.b.c` targets field `b.c` of relation `a` (which no
/// declared column can match).
#[derive(Debug, Clone, PartialEq)]
pub struct Criterion {
    name: String,
    relation: Option<String>,
    field: String,
    verb: String,
    operator: Option<Operator>,
    value: Value,
}

impl Criterion {
    pub fn new(name: &str, value: Value, verb: &str) -> Self {
        let (relation, field) = match name.split_once('.') {
            Some((relation, field)) => (Some(relation.to_string()), field.to_string()),
            None => (None, name.to_string()),
        };
        let verb = verb.to_lowercase();

        Self {
            name: name.to_string(),
            relation,
            field,
            operator: Operator::from_verb(&verb),
            verb,
            value,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn on_relation(&self) -> bool {
        self.relation.is_some()
    }

    pub fn relation(&self) -> Option<&str> {
        self.relation.as_deref()
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    /// Lower-cased verb as received
    pub fn verb(&self) -> &str {
        &self.verb
    }

    /// `None` for unrecognized verbs; such criteria never emit a predicate
    pub fn operator(&self) -> Option<Operator> {
        self.operator
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Whether applying against `entity` would emit a predicate
    pub fn resolves_against(&self, entity: &EntitySchema) -> bool {
        self.operator.is_some() && entity.has_field(&self.field)
    }

    /// Emit the comparison if the verb is known and `entity` has the field.
    /// Returns whether a predicate was emitted.
    pub fn apply(&self, query: &mut dyn QueryBuilder, entity: &EntitySchema) -> bool {
        let Some(operator) = self.operator else {
            tracing::debug!(verb = %self.verb, "Ignoring criterion with unknown verb");
            return false;
        };
        let Some(column) = entity.resolve_field(&self.field) else {
            tracing::debug!(
                entity = entity.name(),
                field = %self.field,
                "Dropping criterion on undeclared field"
            );
            return false;
        };

        query.compare(column, operator, &self.value);
        true
    }
}

/// AND-combination of criteria, bucketed by whether they target the entity
/// itself or one of its relations. Insertion order is kept in both buckets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CriteriaGroup {
    criteria: Vec<Criterion>,
    relation_criteria: Vec<(String, Vec<Criterion>)>,
}

impl CriteriaGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_criterion(&mut self, criterion: Criterion) {
        let Some(relation) = criterion.relation() else {
            self.criteria.push(criterion);
            return;
        };

        match self
            .relation_criteria
            .iter_mut()
            .find(|(name, _)| name == relation)
        {
            Some((_, bucket)) => bucket.push(criterion),
            None => {
                let relation = relation.to_string();
                self.relation_criteria.push((relation, vec![criterion]));
            }
        }
    }

    pub fn own_criteria(&self) -> &[Criterion] {
        &self.criteria
    }

    pub fn relation_criteria(&self, relation: &str) -> Option<&[Criterion]> {
        self.relation_criteria
            .iter()
            .find(|(name, _)| name == relation)
            .map(|(_, criteria)| criteria.as_slice())
    }

    pub fn relation_names(&self) -> impl Iterator<Item = &str> {
        self.relation_criteria.iter().map(|(name, _)| name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty() && self.relation_criteria.is_empty()
    }

    pub fn len(&self) -> usize {
        self.criteria.len()
            + self
                .relation_criteria
                .iter()
                .map(|(_, c)| c.len())
                .sum::<usize>()
    }

    /// Emit this group's predicates into `query`.
    ///
    /// Own-field criteria go through the entity's declared fields. A relation
    /// bucket becomes one existence predicate, but only when the name is a
    /// declared relation and at least one of its criteria survives the related
    /// entity's field check; otherwise the whole bucket is dropped.
    pub fn apply(
        &self,
        query: &mut dyn QueryBuilder,
        entity: &EntitySchema,
        schema: &SchemaSnapshot,
    ) {
        for criterion in &self.criteria {
            criterion.apply(query, entity);
        }

        for (name, criteria) in &self.relation_criteria {
            let Some(relation) = entity.relation(name) else {
                tracing::debug!(entity = entity.name(), relation = %name, "Dropping criteria on undeclared relation");
                continue;
            };
            let Some(related) = schema.entity(&relation.related) else {
                tracing::debug!(related = %relation.related, "Dropping criteria on relation without schema");
                continue;
            };
            // A bare EXISTS would still narrow the rows, so an empty bucket is dropped instead
            if !criteria.iter().any(|c| c.resolves_against(related)) {
                tracing::debug!(relation = %name, "Dropping relation criteria with no usable fields");
                continue;
            }

            query.exists(relation, &related.descriptor, &mut |q: &mut dyn QueryBuilder| {
                for criterion in criteria {
                    criterion.apply(q, related);
                }
            });
        }
    }

    /// `name -> verb -> [values]` projection of every criterion in the group
    pub fn to_value(&self) -> Value {
        let mut result = Map::new();
        let all = self
            .criteria
            .iter()
            .chain(self.relation_criteria.iter().flat_map(|(_, c)| c.iter()));

        for criterion in all {
            let verbs = result
                .entry(criterion.name().to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(verbs) = verbs {
                let values = verbs
                    .entry(criterion.verb().to_string())
                    .or_insert_with(|| Value::Array(Vec::new()));
                if let Value::Array(values) = values {
                    values.push(criterion.value().clone());
                }
            }
        }

        Value::Object(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bare_name_is_own_field() {
        let criterion = Criterion::new("id", json!(5), "equal");
        assert!(!criterion.on_relation());
        assert_eq!(criterion.relation(), None);
        assert_eq!(criterion.field(), "id");
        assert_eq!(criterion.operator(), Some(Operator::Equal));
    }

    #[test]
    fn test_dotted_name_is_relation_scoped() {
        let criterion = Criterion::new("a.b", json!(1), "equal");
        assert!(criterion.on_relation());
        assert_eq!(criterion.relation(), Some("a"));
        assert_eq!(criterion.field(), "b");
    }

    #[test]
    fn test_only_first_separator_splits() {
        let criterion = Criterion::new("a.b.c", json!(1), "equal");
        assert_eq!(criterion.relation(), Some("a"));
        assert_eq!(criterion.field(), "b.c");
    }

    #[test]
    fn test_verb_is_normalized() {
        for verb in ["EQUAL", "Equal", "equal"] {
            let criterion = Criterion::new("id", json!(1), verb);
            assert_eq!(criterion.operator(), Some(Operator::Equal));
            assert_eq!(criterion.verb(), "equal");
        }
    }

    #[test]
    fn test_unknown_verb_keeps_verb_without_operator() {
        let criterion = Criterion::new("id", json!(1), "Between");
        assert_eq!(criterion.operator(), None);
        assert_eq!(criterion.verb(), "between");
    }

    #[test]
    fn test_group_buckets_by_relation() {
        let mut group = CriteriaGroup::new();
        group.add_criterion(Criterion::new("medias.event_id", json!(7), "equal"));
        group.add_criterion(Criterion::new("id", json!(52323), "equal"));
        group.add_criterion(Criterion::new("medias.kind", json!("photo"), "equal"));
        group.add_criterion(Criterion::new("tags.name", json!("x"), "contains"));

        assert_eq!(group.own_criteria().len(), 1);
        assert_eq!(group.relation_criteria("medias").unwrap().len(), 2);
        assert_eq!(group.relation_criteria("tags").unwrap().len(), 1);
        assert!(group.relation_criteria("ghosts").is_none());
        assert_eq!(group.relation_names().collect::<Vec<_>>(), vec!["medias", "tags"]);
        assert_eq!(group.len(), 4);
    }

    #[test]
    fn test_group_to_value_collects_values_per_verb() {
        let mut group = CriteriaGroup::new();
        group.add_criterion(Criterion::new("id", json!(5), "equal"));
        group.add_criterion(Criterion::new("id", json!(6), "EQUAL"));
        group.add_criterion(Criterion::new("medias.event_id", json!(7), "equal"));

        assert_eq!(
            group.to_value(),
            json!({
                "id": {"equal": [5, 6]},
                "medias.event_id": {"equal": [7]}
            })
        );
    }
}
