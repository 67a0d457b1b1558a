use serde_json::{json, Value};

use crate::parser::criteria::{CriteriaGroup, Criterion};
use crate::parser::query_string::decode_nested;
use crate::query::{QueryBuilder, QueryContext, QueryPlanApplier};
use crate::schema::SchemaGuard;

/// OR-combination of criteria groups built from request input.
///
/// Built once per request, applied once, then discarded.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterExpression {
    entity: String,
    original: Value,
    groups: Vec<CriteriaGroup>,
}

impl FilterExpression {
    /// Build from the decoded `filter` structure:
    /// `[group][field or relation.field][verb][value index] = value`.
    ///
    /// The outer level may be a JSON array or an index-keyed object (what a
    /// decoded query string produces). Entries that are not maps are skipped,
    /// as are fields whose verbs are not a map. Never fails.
    pub fn build_from_nested_map(entity: &str, raw: &Value) -> Self {
        let entries: Vec<&Value> = match raw {
            Value::Array(items) => items.iter().collect(),
            Value::Object(map) => map.values().collect(),
            _ => Vec::new(),
        };

        let mut groups = Vec::with_capacity(entries.len());
        for entry in entries {
            let Some(fields) = entry.as_object() else {
                tracing::debug!("Skipping filter entry that is not a map");
                continue;
            };

            let mut group = CriteriaGroup::new();
            for (name, verbs) in fields {
                let Some(verbs) = verbs.as_object() else {
                    tracing::debug!("Skipping filter field without verb map");
                    continue;
                };
                for (verb, values) in verbs {
                    match values {
                        Value::Array(items) => {
                            for value in items {
                                group.add_criterion(Criterion::new(name, value.clone(), verb));
                            }
                        }
                        Value::Object(indexed) => {
                            for value in indexed.values() {
                                group.add_criterion(Criterion::new(name, value.clone(), verb));
                            }
                        }
                        scalar => group.add_criterion(Criterion::new(name, scalar.clone(), verb)),
                    }
                }
            }
            groups.push(group);
        }

        Self {
            entity: entity.to_string(),
            original: raw.clone(),
            groups,
        }
    }

    /// Decode a raw query string and build from its `filter` section
    pub fn from_query_string(entity: &str, query: &str) -> Self {
        let decoded = decode_nested(query);
        let raw = decoded.get("filter").cloned().unwrap_or(Value::Null);
        Self::build_from_nested_map(entity, &raw)
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn groups(&self) -> &[CriteriaGroup] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(CriteriaGroup::is_empty)
    }

    /// Emit the compiled predicates into `query`, validating every name
    /// against the current schema snapshot
    pub fn apply(&self, query: &mut dyn QueryBuilder, guard: &SchemaGuard, context: &QueryContext) {
        QueryPlanApplier::new(guard.snapshot(), context.clone()).apply(self, query);
    }

    /// `{ original, parsed }` diagnostic projection. Names dropped by schema
    /// validation still appear here: it reflects input, not the compiled query.
    pub fn serialize(&self) -> Value {
        let parsed: Vec<Value> = self.groups.iter().map(CriteriaGroup::to_value).collect();
        json!({
            "original": self.original,
            "parsed": parsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_group_per_outer_entry() {
        let raw = json!([{"id": {"equal": [5]}}, {"id": {"equal": [6]}}]);
        let filter = FilterExpression::build_from_nested_map("events", &raw);
        assert_eq!(filter.groups().len(), 2);
        assert_eq!(filter.groups()[0].own_criteria()[0].value(), &json!(5));
        assert_eq!(filter.groups()[1].own_criteria()[0].value(), &json!(6));
    }

    #[test]
    fn test_sequence_values_emit_one_criterion_each() {
        let raw = json!([{"id": {"equal": [5, 6]}}]);
        let filter = FilterExpression::build_from_nested_map("events", &raw);
        assert_eq!(filter.groups().len(), 1);
        assert_eq!(filter.groups()[0].len(), 2);
    }

    #[test]
    fn test_scalar_value_emits_single_criterion() {
        let raw = json!([{"name": {"contains": "launch"}}]);
        let filter = FilterExpression::build_from_nested_map("events", &raw);
        assert_eq!(filter.groups()[0].len(), 1);
        assert_eq!(filter.groups()[0].own_criteria()[0].value(), &json!("launch"));
    }

    #[test]
    fn test_index_keyed_objects_are_accepted() {
        let raw = json!({"0": {"id": {"equal": {"0": 5, "1": 6}}}, "1": {"id": {"equal": {"0": 7}}}});
        let filter = FilterExpression::build_from_nested_map("events", &raw);
        assert_eq!(filter.groups().len(), 2);
        assert_eq!(filter.groups()[0].len(), 2);
        assert_eq!(filter.groups()[1].len(), 1);
    }

    #[test]
    fn test_non_map_entries_are_skipped() {
        let raw = json!(["id", 5, null, {"id": {"equal": [1]}}, {"name": "bare"}]);
        let filter = FilterExpression::build_from_nested_map("events", &raw);
        // "bare" has no verb map, so its group stays empty
        assert_eq!(filter.groups().len(), 2);
        assert_eq!(filter.groups()[0].len(), 1);
        assert!(filter.groups()[1].is_empty());
    }

    #[test]
    fn test_unusable_raw_input_builds_empty_filter() {
        for raw in [Value::Null, json!("filter"), json!(42)] {
            let filter = FilterExpression::build_from_nested_map("events", &raw);
            assert!(filter.groups().is_empty());
            assert!(filter.is_empty());
        }
    }

    #[test]
    fn test_relation_criteria_are_bucketed() {
        let raw = json!([{"medias.event_id": {"equal": [7]}, "id": {"equal": [52323]}}]);
        let filter = FilterExpression::build_from_nested_map("events", &raw);
        let group = &filter.groups()[0];
        assert_eq!(group.own_criteria().len(), 1);
        assert_eq!(group.relation_criteria("medias").unwrap().len(), 1);
    }

    #[test]
    fn test_serialize_keeps_original_and_parsed() {
        let raw = json!([{"id": {"EQUAL": [5, 6]}, "ghost": {"equal": [1]}}]);
        let filter = FilterExpression::build_from_nested_map("events", &raw);
        assert_eq!(
            filter.serialize(),
            json!({
                "original": raw,
                "parsed": [{"id": {"equal": [5, 6]}, "ghost": {"equal": [1]}}]
            })
        );
    }

    #[test]
    fn test_from_query_string() {
        let filter = FilterExpression::from_query_string(
            "events",
            "filter[0][id][equal][0]=5&filter[1][id][equal][0]=6&page=2",
        );
        assert_eq!(filter.groups().len(), 2);
        assert_eq!(filter.groups()[1].own_criteria()[0].value(), &json!(6));

        let filter = FilterExpression::from_query_string("events", "page=2");
        assert!(filter.groups().is_empty());
    }
}
