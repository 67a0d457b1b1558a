use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;

use crate::error::{AppError, AppResult};
use crate::schema::definitions::{EntityDescriptor, RelationDescriptor};
use crate::schema::validation::validate_entities;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub query: QueryConfig,
    pub entities: Vec<EntityConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    #[serde(rename = "type")]
    pub db_type: String,
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct QueryConfig {
    /// Apply configured row restrictions when compiling queries
    #[serde(default = "default_restrictions_enabled")]
    pub restrictions_enabled: bool,
    #[serde(default)]
    pub restrictions: Vec<RestrictionConfig>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            restrictions_enabled: default_restrictions_enabled(),
            restrictions: Vec::new(),
        }
    }
}

fn default_restrictions_enabled() -> bool {
    true
}

/// A fixed predicate ANDed into every query on `entity`
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RestrictionConfig {
    pub entity: String,
    pub field: String,
    #[serde(default = "default_restriction_operator")]
    pub operator: String,
    pub value: Value,
}

fn default_restriction_operator() -> String {
    "equal".to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EntityConfig {
    pub name: String,
    /// Defaults to the entity name
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    pub fields: Vec<String>,
    #[serde(default)]
    pub relations: Vec<RelationDescriptor>,
}

fn default_primary_key() -> String {
    "id".to_string()
}

impl EntityConfig {
    pub fn descriptor(&self) -> EntityDescriptor {
        EntityDescriptor {
            name: self.name.clone(),
            table: self.table.clone().unwrap_or_else(|| self.name.clone()),
            primary_key: self.primary_key.clone(),
        }
    }
}

impl AppConfig {
    /// Load configuration from YAML file
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> AppResult<Self> {
        let path = config_path.as_ref();

        if !path.exists() {
            return Err(AppError::Configuration(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let content = fs::read_to_string(path).map_err(|e| {
            AppError::Configuration(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        Self::from_yaml_str(&content)
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml_str(content: &str) -> AppResult<Self> {
        let expanded_content = Self::expand_env_vars(content)?;

        let app_config: AppConfig = serde_yaml::from_str(&expanded_content)?;

        if app_config.entities.is_empty() {
            return Err(AppError::Configuration(
                "Configuration must declare at least one entity".to_string(),
            ));
        }

        validate_entities(&app_config.entities)?;

        Ok(app_config)
    }

    /// Create default configuration: in-memory SQLite and a single `items` entity
    pub fn default_config() -> Self {
        AppConfig {
            database: DatabaseConfig {
                db_type: "sqlite".to_string(),
                url: "sqlite::memory:".to_string(),
                max_connections: 1,
            },
            query: QueryConfig::default(),
            entities: vec![EntityConfig {
                name: "items".to_string(),
                table: None,
                primary_key: default_primary_key(),
                fields: vec!["id".to_string(), "name".to_string()],
                relations: Vec::new(),
            }],
        }
    }

    /// Expand environment variables in format ${VAR_NAME} or ${VAR_NAME:-default}
    fn expand_env_vars(content: &str) -> AppResult<String> {
        let chars: Vec<char> = content.chars().collect();
        let mut expanded = String::new();
        let mut i = 0;

        while i < chars.len() {
            if i + 1 < chars.len() && chars[i] == '$' && chars[i + 1] == '{' {
                let mut j = i + 2;
                while j < chars.len() && chars[j] != '}' {
                    j += 1;
                }

                if j < chars.len() {
                    let var_expr: String = chars[i + 2..j].iter().collect();

                    let (var_name, default_value) = match var_expr.find(":-") {
                        Some(pos) => (
                            var_expr[..pos].to_string(),
                            Some(var_expr[pos + 2..].to_string()),
                        ),
                        None => (var_expr, None),
                    };

                    let value = match std::env::var(&var_name) {
                        Ok(val) => val,
                        Err(_) => default_value.ok_or_else(|| {
                            AppError::Configuration(format!(
                                "Environment variable {} not found and no default provided",
                                var_name
                            ))
                        })?,
                    };

                    expanded.push_str(&value);
                    i = j + 1;
                } else {
                    expanded.push(chars[i]);
                    i += 1;
                }
            } else {
                expanded.push(chars[i]);
                i += 1;
            }
        }

        Ok(expanded)
    }

    pub fn entity(&self, name: &str) -> Option<&EntityConfig> {
        self.entities.iter().find(|e| e.name == name)
    }
}
