use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqlitePoolOptions};
use sqlx::{Row, Sqlite, SqlitePool};
use std::sync::Arc;
use std::time::Duration;

use super::DatabaseBackendConfig;
use crate::backend::Backend;
use crate::error::{AppError, AppResult};
use crate::mutation::EntityRepository;
use crate::query::sql::quote;
use crate::query::{CompiledSql, SqlDialect};
use crate::schema::validation::is_valid_identifier;
use crate::schema::{Entity, EntityDescriptor, RelationDescriptor, SchemaGuard};

pub mod schema;

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

/// Bind a JSON value with the closest SQLite storage class
fn bind_value<'q>(query: SqliteQuery<'q>, value: &Value) -> SqliteQuery<'q> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(other.to_string()),
    }
}

fn require_columns<'a>(names: impl IntoIterator<Item = &'a String>) -> AppResult<()> {
    for name in names {
        if !is_valid_identifier(name) {
            return Err(AppError::BadRequest(format!("Invalid column name: {}", name)));
        }
    }
    Ok(())
}

/// SQLite-backed repository. Rows are read through `json_object(...)` so
/// every entity comes back as a plain attribute map.
pub struct SqliteRepository {
    pool: SqlitePool,
    schema: Arc<SchemaGuard>,
}

impl SqliteRepository {
    pub fn new(pool: SqlitePool, schema: Arc<SchemaGuard>) -> Self {
        Self { pool, schema }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn columns_of(&self, entity: &str) -> AppResult<Vec<String>> {
        let snapshot = self.schema.snapshot();
        let schema = snapshot
            .entity(entity)
            .ok_or_else(|| AppError::NotFound(format!("Entity '{}' is not declared", entity)))?;
        Ok(schema
            .sorted_field_names()
            .into_iter()
            .map(str::to_string)
            .collect())
    }

    fn select_sql(&self, entity: &EntityDescriptor, columns: &[String]) -> String {
        let pairs: Vec<String> = columns
            .iter()
            .map(|c| format!("'{}', {}", c, quote(c)))
            .collect();
        format!(
            "SELECT json_object({}) AS record FROM {}",
            pairs.join(", "),
            quote(&entity.table)
        )
    }

    fn decode_record(kind: &str, record: &str) -> AppResult<Entity> {
        let attributes: Map<String, Value> = serde_json::from_str(record)?;
        Ok(Entity::new(kind, attributes))
    }

    async fn insert_row(&self, entity: &EntityDescriptor, row: &Map<String, Value>) -> AppResult<i64> {
        require_columns(row.keys())?;

        let sql = if row.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", quote(&entity.table))
        } else {
            let columns: Vec<String> = row.keys().map(|c| quote(c)).collect();
            let placeholders: Vec<String> = (1..=row.len()).map(|i| format!("?{}", i)).collect();
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote(&entity.table),
                columns.join(", "),
                placeholders.join(", ")
            )
        };

        let mut query = sqlx::query(&sql);
        for value in row.values() {
            query = bind_value(query, value);
        }
        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to insert into {}: {}", entity.table, e)))?;
        Ok(result.last_insert_rowid())
    }

    fn pivot_table(relation: &RelationDescriptor) -> AppResult<&str> {
        relation.intermediate_table.as_deref().ok_or_else(|| {
            AppError::Internal(format!("Relation '{}' has no pivot table", relation.name))
        })
    }
}

#[async_trait]
impl EntityRepository for SqliteRepository {
    async fn find_by_key(&self, entity: &EntityDescriptor, key: &Value) -> AppResult<Option<Entity>> {
        let columns = self.columns_of(&entity.name)?;
        let sql = format!(
            "{} WHERE {} = ?1",
            self.select_sql(entity, &columns),
            quote(&entity.primary_key)
        );

        let row = bind_value(sqlx::query(&sql), key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to find {}: {}", entity.name, e)))?;

        match row {
            Some(row) => {
                let record: String = row.try_get("record")?;
                Ok(Some(Self::decode_record(&entity.name, &record)?))
            }
            None => Ok(None),
        }
    }

    async fn create(&self, entity: &EntityDescriptor, data: &Map<String, Value>) -> AppResult<Entity> {
        let rowid = self.insert_row(entity, data).await?;
        let key = data
            .get(&entity.primary_key)
            .filter(|v| !v.is_null())
            .cloned()
            .unwrap_or_else(|| Value::from(rowid));

        self.find_by_key(entity, &key).await?.ok_or_else(|| {
            AppError::Internal(format!("Created {} row could not be read back", entity.name))
        })
    }

    async fn save(&self, entity: &EntityDescriptor, record: &Entity) -> AppResult<Entity> {
        let Some(key) = record.key(entity).cloned() else {
            return self.create(entity, &record.attributes).await;
        };
        require_columns(record.attributes.keys())?;

        let columns: Vec<String> = record.attributes.keys().map(|c| quote(c)).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        let updates: Vec<String> = record
            .attributes
            .keys()
            .filter(|c| **c != entity.primary_key)
            .map(|c| format!("{} = excluded.{}", quote(c), quote(c)))
            .collect();

        let conflict = if updates.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {}", updates.join(", "))
        };
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT({}) {}",
            quote(&entity.table),
            columns.join(", "),
            placeholders.join(", "),
            quote(&entity.primary_key),
            conflict
        );

        let mut query = sqlx::query(&sql);
        for value in record.attributes.values() {
            query = bind_value(query, value);
        }
        query
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to save {}: {}", entity.name, e)))?;

        self.find_by_key(entity, &key).await?.ok_or_else(|| {
            AppError::Internal(format!("Saved {} row could not be read back", entity.name))
        })
    }

    async fn attach(
        &self,
        relation: &RelationDescriptor,
        parent_key: &Value,
        related_keys: &[Value],
    ) -> AppResult<usize> {
        let pivot = Self::pivot_table(relation)?;
        let sql = format!(
            "INSERT OR IGNORE INTO {} ({}, {}) VALUES (?1, ?2)",
            quote(pivot),
            quote(&relation.foreign_key),
            quote(&relation.owner_key)
        );

        let mut tx = self.pool.begin().await?;
        let mut attached = 0;
        for key in related_keys {
            let query = bind_value(bind_value(sqlx::query(&sql), parent_key), key);
            let result = query
                .execute(&mut *tx)
                .await
                .map_err(|e| AppError::Database(format!("Failed to attach to {}: {}", pivot, e)))?;
            attached += result.rows_affected() as usize;
        }
        tx.commit().await?;

        Ok(attached)
    }

    async fn detach(
        &self,
        relation: &RelationDescriptor,
        parent_key: &Value,
        related_keys: &[Value],
    ) -> AppResult<usize> {
        let pivot = Self::pivot_table(relation)?;
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?1 AND {} = ?2",
            quote(pivot),
            quote(&relation.foreign_key),
            quote(&relation.owner_key)
        );

        let mut tx = self.pool.begin().await?;
        let mut detached = 0;
        for key in related_keys {
            let query = bind_value(bind_value(sqlx::query(&sql), parent_key), key);
            let result = query
                .execute(&mut *tx)
                .await
                .map_err(|e| AppError::Database(format!("Failed to detach from {}: {}", pivot, e)))?;
            detached += result.rows_affected() as usize;
        }
        tx.commit().await?;

        Ok(detached)
    }

    async fn clear_owned(
        &self,
        relation: &RelationDescriptor,
        related: &EntityDescriptor,
        owner_value: &Value,
    ) -> AppResult<usize> {
        let sql = format!(
            "UPDATE {} SET {} = NULL WHERE {} = ?1",
            quote(&related.table),
            quote(&relation.foreign_key),
            quote(&relation.foreign_key)
        );
        let result = bind_value(sqlx::query(&sql), owner_value)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to release {}: {}", related.table, e)))?;
        Ok(result.rows_affected() as usize)
    }
}

#[async_trait]
impl Backend for SqliteRepository {
    async fn connect(config: &DatabaseBackendConfig, schema: Arc<SchemaGuard>) -> AppResult<Self> {
        // Every connection to an in-memory database opens a fresh database
        let options = if config.is_memory_database() {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(config.max_connections)
        };

        let pool = options
            .acquire_timeout(Duration::from_secs(config.connection_timeout))
            .connect(&config.connection_url)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to SQLite: {}", e)))?;

        tracing::info!("Connected to SQLite database: {}", config.connection_url);
        Ok(Self::new(pool, schema))
    }

    async fn health_check(&self) -> AppResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Health check failed: {}", e)))?;
        Ok(())
    }

    async fn init_schema(&self) -> AppResult<()> {
        schema::init_schema(&self.pool, &self.schema.snapshot()).await
    }

    async fn find_where(&self, entity: &str, compiled: &CompiledSql) -> AppResult<Vec<Entity>> {
        if compiled.dialect != SqlDialect::Sqlite {
            return Err(AppError::BadRequest(
                "Compiled query targets another SQL dialect".to_string(),
            ));
        }
        let columns = self.columns_of(entity)?;
        let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
        let sql = compiled.select_json(&columns);
        tracing::debug!(sql = %sql, params = compiled.params.len(), "Executing compiled filter");

        let mut query = sqlx::query(&sql);
        for value in &compiled.params {
            query = bind_value(query, value);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to query {}: {}", entity, e)))?;

        let mut entities = Vec::with_capacity(rows.len());
        for row in rows {
            let record: String = row.try_get("record")?;
            entities.push(Self::decode_record(entity, &record)?);
        }
        Ok(entities)
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::Sqlite
    }
}
