use serde_json::{Map, Value};

use crate::schema::Entity;

/// One entry of an add/remove payload
#[derive(Debug, Clone, PartialEq)]
pub enum RawEntry {
    /// Primary key of an existing related entity
    Key(Value),
    /// Attributes for a related entity to be created
    Create(Map<String, Value>),
    /// Entity already loaded by the caller
    Entity(Entity),
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Values of an object keyed only by integer indices (`{"0": 3, "1": 7}`),
/// the shape bracketed form fields decode to
fn indexed_values(map: &Map<String, Value>) -> Option<Vec<&Value>> {
    map.keys()
        .all(|key| key.parse::<usize>().is_ok())
        .then(|| map.values().collect())
}

/// Decode a JSON add/remove payload.
///
/// A blank payload (null, empty string, empty array or object) yields
/// nothing. An array, or an object keyed only by indices, yields one entry per
/// non-blank element: maps become creation data, anything else a key. Any
/// other lone object is creation data and a lone scalar is a key.
pub fn entries_from_json(payload: &Value) -> Vec<RawEntry> {
    if is_blank(payload) {
        return Vec::new();
    }

    let items: Vec<&Value> = match payload {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => match indexed_values(map) {
            Some(items) => items,
            None => return vec![RawEntry::Create(map.clone())],
        },
        key => return vec![RawEntry::Key(key.clone())],
    };

    items
        .into_iter()
        .filter(|item| !is_blank(item))
        .map(|item| match item {
            Value::Object(map) => RawEntry::Create(map.clone()),
            key => RawEntry::Key(key.clone()),
        })
        .collect()
}

/// Requested membership change for one relation of an aggregate root
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRequest {
    pub relation: String,
    pub add: Vec<RawEntry>,
    pub remove: Vec<RawEntry>,
}

impl MutationRequest {
    pub fn new(relation: &str, add: Vec<RawEntry>, remove: Vec<RawEntry>) -> Self {
        Self {
            relation: relation.to_string(),
            add,
            remove,
        }
    }

    /// Decode `{ <relation>: { "add": ..., "remove": ... }, ... }`.
    /// Relations whose value is not a map are skipped.
    pub fn from_relations(relations: &Value) -> Vec<MutationRequest> {
        let Some(relations) = relations.as_object() else {
            return Vec::new();
        };

        relations
            .iter()
            .filter_map(|(name, change)| {
                let change = change.as_object()?;
                let add = change.get("add").map(entries_from_json).unwrap_or_default();
                let remove = change
                    .get("remove")
                    .map(entries_from_json)
                    .unwrap_or_default();
                Some(MutationRequest::new(name, add, remove))
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}
