use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::error::{AppError, AppResult};
use crate::mutation::EntityRepository;
use crate::schema::{Entity, EntityDescriptor, RelationDescriptor};

type Row = Map<String, Value>;

#[derive(Debug, Default)]
struct Tables {
    rows: HashMap<String, Vec<Row>>,
}

impl Tables {
    fn table(&mut self, name: &str) -> &mut Vec<Row> {
        self.rows.entry(name.to_string()).or_default()
    }

    fn next_key(&self, table: &str, primary_key: &str) -> i64 {
        self.rows
            .get(table)
            .into_iter()
            .flatten()
            .filter_map(|row| row.get(primary_key).and_then(Value::as_i64))
            .max()
            .unwrap_or(0)
            + 1
    }
}

/// Keys match when equal as JSON or when they render the same (`3` and `"3"`)
fn same_key(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    let text = |v: &Value| match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    };
    matches!((text(a), text(b)), (Some(x), Some(y)) if x == y)
}

/// In-process repository used by tests and dry runs.
///
/// Tables and pivot tables are plain row lists keyed by table name.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    tables: Mutex<Tables>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, Tables>> {
        Ok(self.tables.lock()?)
    }

    /// Seed a row into `table`
    pub fn insert(&self, table: &str, row: Row) {
        let mut tables = self.tables.lock().unwrap_or_else(|p| p.into_inner());
        tables.table(table).push(row);
    }

    /// Seed a link row into a pivot table
    pub fn insert_pivot(&self, table: &str, row: Row) {
        self.insert(table, row);
    }

    /// Snapshot of the rows currently stored in `table`
    pub fn rows(&self, table: &str) -> Vec<Row> {
        let tables = self.tables.lock().unwrap_or_else(|p| p.into_inner());
        tables.rows.get(table).cloned().unwrap_or_default()
    }

    fn pivot_table(relation: &RelationDescriptor) -> AppResult<&str> {
        relation.intermediate_table.as_deref().ok_or_else(|| {
            AppError::Internal(format!("Relation '{}' has no pivot table", relation.name))
        })
    }
}

#[async_trait]
impl EntityRepository for MemoryRepository {
    async fn find_by_key(&self, entity: &EntityDescriptor, key: &Value) -> AppResult<Option<Entity>> {
        let tables = self.lock()?;
        let found = tables.rows.get(&entity.table).and_then(|rows| {
            rows.iter().find(|row| {
                row.get(&entity.primary_key)
                    .map(|v| same_key(v, key))
                    .unwrap_or(false)
            })
        });
        Ok(found.map(|row| Entity::new(entity.name.clone(), row.clone())))
    }

    async fn create(&self, entity: &EntityDescriptor, data: &Map<String, Value>) -> AppResult<Entity> {
        let mut tables = self.lock()?;
        let mut row = data.clone();
        let has_key = row
            .get(&entity.primary_key)
            .map(|v| !v.is_null())
            .unwrap_or(false);
        if !has_key {
            let key = tables.next_key(&entity.table, &entity.primary_key);
            row.insert(entity.primary_key.clone(), Value::from(key));
        }
        tables.table(&entity.table).push(row.clone());
        Ok(Entity::new(entity.name.clone(), row))
    }

    async fn save(&self, entity: &EntityDescriptor, record: &Entity) -> AppResult<Entity> {
        let Some(key) = record.key(entity).cloned() else {
            return self.create(entity, &record.attributes).await;
        };

        let mut tables = self.lock()?;
        let rows = tables.table(&entity.table);
        match rows.iter_mut().find(|row| {
            row.get(&entity.primary_key)
                .map(|v| same_key(v, &key))
                .unwrap_or(false)
        }) {
            Some(row) => {
                for (name, value) in &record.attributes {
                    row.insert(name.clone(), value.clone());
                }
            }
            None => rows.push(record.attributes.clone()),
        }
        Ok(record.clone())
    }

    async fn attach(
        &self,
        relation: &RelationDescriptor,
        parent_key: &Value,
        related_keys: &[Value],
    ) -> AppResult<usize> {
        let pivot = Self::pivot_table(relation)?;
        let mut tables = self.lock()?;
        let rows = tables.table(pivot);

        let mut attached = 0;
        for key in related_keys {
            let exists = rows.iter().any(|row| {
                row.get(&relation.foreign_key).is_some_and(|v| same_key(v, parent_key))
                    && row.get(&relation.owner_key).is_some_and(|v| same_key(v, key))
            });
            if exists {
                continue;
            }
            let mut row = Map::new();
            row.insert(relation.foreign_key.clone(), parent_key.clone());
            row.insert(relation.owner_key.clone(), key.clone());
            rows.push(row);
            attached += 1;
        }
        Ok(attached)
    }

    async fn detach(
        &self,
        relation: &RelationDescriptor,
        parent_key: &Value,
        related_keys: &[Value],
    ) -> AppResult<usize> {
        let pivot = Self::pivot_table(relation)?;
        let mut tables = self.lock()?;
        let rows = tables.table(pivot);

        let before = rows.len();
        rows.retain(|row| {
            let linked = row.get(&relation.foreign_key).is_some_and(|v| same_key(v, parent_key))
                && row
                    .get(&relation.owner_key)
                    .is_some_and(|v| related_keys.iter().any(|k| same_key(v, k)));
            !linked
        });
        Ok(before - rows.len())
    }

    async fn clear_owned(
        &self,
        relation: &RelationDescriptor,
        related: &EntityDescriptor,
        owner_value: &Value,
    ) -> AppResult<usize> {
        let mut tables = self.lock()?;
        let mut released = 0;
        for row in tables.table(&related.table).iter_mut() {
            if row.get(&relation.foreign_key).is_some_and(|v| same_key(v, owner_value)) {
                row.insert(relation.foreign_key.clone(), Value::Null);
                released += 1;
            }
        }
        Ok(released)
    }
}
