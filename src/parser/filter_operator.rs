use serde::Serialize;
use std::fmt;

/// Comparison operators accepted in filter verbs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Operator {
    Contains,
    Equal,
    NotEqual,
    GreaterThan,
    LowerThan,
    GreaterThanOrEqual,
    LowerThanOrEqual,
}

impl Operator {
    pub const ALL: [Operator; 7] = [
        Operator::Contains,
        Operator::Equal,
        Operator::NotEqual,
        Operator::GreaterThan,
        Operator::LowerThan,
        Operator::GreaterThanOrEqual,
        Operator::LowerThanOrEqual,
    ];

    /// Resolve a request verb, ignoring case. Unknown verbs yield `None`.
    pub fn from_verb(verb: &str) -> Option<Operator> {
        match verb.to_lowercase().as_str() {
            "contains" => Some(Operator::Contains),
            "equal" => Some(Operator::Equal),
            "notequal" => Some(Operator::NotEqual),
            "greaterthan" => Some(Operator::GreaterThan),
            "lowerthan" => Some(Operator::LowerThan),
            "greaterthanorequal" => Some(Operator::GreaterThanOrEqual),
            "lowerthanorequal" => Some(Operator::LowerThanOrEqual),
            _ => None,
        }
    }

    /// Normalized request verb
    pub fn verb(&self) -> &'static str {
        match self {
            Operator::Contains => "contains",
            Operator::Equal => "equal",
            Operator::NotEqual => "notequal",
            Operator::GreaterThan => "greaterthan",
            Operator::LowerThan => "lowerthan",
            Operator::GreaterThanOrEqual => "greaterthanorequal",
            Operator::LowerThanOrEqual => "lowerthanorequal",
        }
    }

    /// SQL comparison token
    pub fn sql(&self) -> &'static str {
        match self {
            Operator::Contains => "LIKE",
            Operator::Equal => "=",
            Operator::NotEqual => "!=",
            Operator::GreaterThan => ">",
            Operator::LowerThan => "<",
            Operator::GreaterThanOrEqual => ">=",
            Operator::LowerThanOrEqual => "<=",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::Contains => write!(f, "CONTAINS"),
            other => write!(f, "{}", other.sql()),
        }
    }
}
