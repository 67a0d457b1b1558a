use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    pub fn from_str(s: &str) -> SortOrder {
        match s.to_lowercase().as_str() {
            "descending" | "desc" => SortOrder::Descending,
            _ => SortOrder::Ascending, // Default to ascending
        }
    }

    pub fn sql(&self) -> &'static str {
        match self {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortSpec {
    pub field: String,
    pub order: SortOrder,
}

impl SortSpec {
    pub fn new(field: String, order: SortOrder) -> Self {
        SortSpec { field, order }
    }

    /// Parse a decoded `sort_by[field]=direction` map, keeping key order.
    /// Non-object input yields no specs; non-string directions sort ascending.
    pub fn from_nested(raw: &Value) -> Vec<SortSpec> {
        let Some(map) = raw.as_object() else {
            return Vec::new();
        };

        map.iter()
            .filter(|(field, _)| !field.is_empty())
            .map(|(field, direction)| {
                let order = direction
                    .as_str()
                    .map(SortOrder::from_str)
                    .unwrap_or(SortOrder::Ascending);
                SortSpec::new(field.clone(), order)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sort_order_from_str() {
        assert_eq!(SortOrder::from_str("ascending"), SortOrder::Ascending);
        assert_eq!(SortOrder::from_str("ASC"), SortOrder::Ascending);
        assert_eq!(SortOrder::from_str("descending"), SortOrder::Descending);
        assert_eq!(SortOrder::from_str("DESC"), SortOrder::Descending);
        assert_eq!(SortOrder::from_str("invalid"), SortOrder::Ascending); // Default
    }

    #[test]
    fn test_sort_spec_from_nested_keeps_order() {
        let specs = SortSpec::from_nested(&json!({"starts_at": "desc", "name": "asc", "id": 3}));
        assert_eq!(
            specs,
            vec![
                SortSpec::new("starts_at".to_string(), SortOrder::Descending),
                SortSpec::new("name".to_string(), SortOrder::Ascending),
                SortSpec::new("id".to_string(), SortOrder::Ascending),
            ]
        );

        assert!(SortSpec::from_nested(&json!("name")).is_empty());
    }
}
