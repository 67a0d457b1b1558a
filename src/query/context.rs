use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::QueryBuilder;
use crate::config::{QueryConfig, RestrictionConfig};
use crate::error::{AppError, AppResult};
use crate::parser::filter_operator::Operator;
use crate::schema::{EntitySchema, SchemaSnapshot};

/// Default row-level scope applied around every compiled filter
pub trait AccessPolicy: Send + Sync {
    fn restrict(&self, entity: &EntitySchema, query: &mut dyn QueryBuilder);
}

/// Per-call query options, handed explicitly to the applier
#[derive(Clone)]
pub struct QueryContext {
    pub restrictions_enabled: bool,
    pub policy: Option<Arc<dyn AccessPolicy>>,
}

impl QueryContext {
    pub fn unrestricted() -> Self {
        Self {
            restrictions_enabled: false,
            policy: None,
        }
    }

    pub fn with_policy(policy: Arc<dyn AccessPolicy>) -> Self {
        Self {
            restrictions_enabled: true,
            policy: Some(policy),
        }
    }

    /// Build the context described by the `query` config section.
    /// Restrictions are checked against the schema so a typo fails at startup.
    pub fn from_config(config: &QueryConfig, schema: &SchemaSnapshot) -> AppResult<Self> {
        if config.restrictions.is_empty() {
            return Ok(Self {
                restrictions_enabled: config.restrictions_enabled,
                policy: None,
            });
        }

        let restriction = RowRestriction::from_config(&config.restrictions, schema)?;
        Ok(Self {
            restrictions_enabled: config.restrictions_enabled,
            policy: Some(Arc::new(restriction)),
        })
    }

    /// Policy to apply, if restrictions are switched on
    pub fn active_policy(&self) -> Option<&dyn AccessPolicy> {
        if self.restrictions_enabled {
            self.policy.as_deref()
        } else {
            None
        }
    }
}

impl Default for QueryContext {
    fn default() -> Self {
        Self::unrestricted()
    }
}

impl fmt::Debug for QueryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryContext")
            .field("restrictions_enabled", &self.restrictions_enabled)
            .field("has_policy", &self.policy.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
struct RestrictionRule {
    column: String,
    operator: Operator,
    value: Value,
}

/// Config-driven policy: fixed comparisons ANDed onto queries per entity kind
#[derive(Debug, Clone, Default)]
pub struct RowRestriction {
    rules: HashMap<String, Vec<RestrictionRule>>,
}

impl RowRestriction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(
        restrictions: &[RestrictionConfig],
        schema: &SchemaSnapshot,
    ) -> AppResult<Self> {
        let mut policy = Self::new();
        for restriction in restrictions {
            let entity = schema.entity(&restriction.entity).ok_or_else(|| {
                AppError::Configuration(format!(
                    "Restriction targets undeclared entity '{}'",
                    restriction.entity
                ))
            })?;
            let column = entity.resolve_field(&restriction.field).ok_or_else(|| {
                AppError::Configuration(format!(
                    "Restriction field '{}' is not declared on '{}'",
                    restriction.field, restriction.entity
                ))
            })?;
            let operator = Operator::from_verb(&restriction.operator).ok_or_else(|| {
                AppError::Configuration(format!(
                    "Unknown restriction operator '{}'",
                    restriction.operator
                ))
            })?;
            policy.add_rule(entity.name(), column, operator, restriction.value.clone());
        }
        Ok(policy)
    }

    pub fn add_rule(&mut self, entity: &str, column: &str, operator: Operator, value: Value) {
        self.rules
            .entry(entity.to_string())
            .or_default()
            .push(RestrictionRule {
                column: column.to_string(),
                operator,
                value,
            });
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl AccessPolicy for RowRestriction {
    fn restrict(&self, entity: &EntitySchema, query: &mut dyn QueryBuilder) {
        let Some(rules) = self.rules.get(entity.name()) else {
            return;
        };
        for rule in rules {
            query.compare(&rule.column, rule.operator, &rule.value);
        }
    }
}
