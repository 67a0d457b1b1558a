use async_trait::async_trait;
use std::sync::Arc;

use crate::backend::database::DatabaseBackendConfig;
use crate::error::{AppError, AppResult};
use crate::mutation::EntityRepository;
use crate::query::{CompiledSql, SqlDialect};
use crate::schema::{Entity, SchemaGuard};

pub mod database;
pub mod memory;

/// Supported database backend types
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DatabaseType {
    PostgreSQL,
    SQLite,
}

impl DatabaseType {
    pub fn from_name(name: &str) -> AppResult<Self> {
        match name.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(DatabaseType::PostgreSQL),
            "sqlite" => Ok(DatabaseType::SQLite),
            other => Err(AppError::Configuration(format!(
                "Unsupported database type: {}",
                other
            ))),
        }
    }

    pub fn dialect(&self) -> SqlDialect {
        match self {
            DatabaseType::PostgreSQL => SqlDialect::Postgres,
            DatabaseType::SQLite => SqlDialect::Sqlite,
        }
    }
}

/// Storage backend able to run compiled filters and relation mutations
#[async_trait]
pub trait Backend: EntityRepository {
    /// Connect and initialize the storage backend
    async fn connect(config: &DatabaseBackendConfig, schema: Arc<SchemaGuard>) -> AppResult<Self>
    where
        Self: Sized;

    /// Check if the storage backend is healthy and accessible
    async fn health_check(&self) -> AppResult<()>;

    /// Create tables and pivot tables for every entity in the schema
    async fn init_schema(&self) -> AppResult<()>;

    /// Fetch the rows of `entity` matching a compiled filter
    async fn find_where(&self, entity: &str, compiled: &CompiledSql) -> AppResult<Vec<Entity>>;

    fn dialect(&self) -> SqlDialect;
}

/// Factory for creating backend instances
pub struct BackendFactory;

impl BackendFactory {
    pub async fn create(
        config: &DatabaseBackendConfig,
        schema: Arc<SchemaGuard>,
    ) -> AppResult<Arc<dyn Backend>> {
        match config.database_type {
            DatabaseType::SQLite => {
                let backend = database::sqlite::SqliteRepository::connect(config, schema).await?;
                Ok(Arc::new(backend))
            }
            // Queries for PostgreSQL can be compiled but not executed
            DatabaseType::PostgreSQL => Err(AppError::Configuration(
                "Query execution is only available for SQLite; use `compile` to render PostgreSQL SQL"
                    .to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_type_from_name() {
        assert_eq!(DatabaseType::from_name("SQLite").unwrap(), DatabaseType::SQLite);
        assert_eq!(DatabaseType::from_name("postgresql").unwrap(), DatabaseType::PostgreSQL);
        assert!(DatabaseType::from_name("oracle").is_err());
        assert_eq!(DatabaseType::PostgreSQL.dialect(), SqlDialect::Postgres);
    }
}
