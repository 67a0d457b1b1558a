use sqlx::SqlitePool;

use crate::error::{AppError, AppResult};
use crate::query::sql::quote;
use crate::schema::{CardinalityKind, EntitySchema, RelationDescriptor, SchemaSnapshot};

/// Create one table per entity plus the pivot tables of many-to-many
/// relations. Existing tables are left untouched.
pub async fn init_schema(pool: &SqlitePool, snapshot: &SchemaSnapshot) -> AppResult<()> {
    let entities = snapshot.entities();

    for entity in &entities {
        let sql = entity_table_sql(entity);
        sqlx::query(&sql).execute(pool).await.map_err(|e| {
            AppError::Database(format!(
                "Failed to create table for '{}': {}",
                entity.name(),
                e
            ))
        })?;
    }

    for entity in &entities {
        for relation in entity.relations() {
            if let Some(sql) = pivot_table_sql(relation) {
                sqlx::query(&sql).execute(pool).await.map_err(|e| {
                    AppError::Database(format!(
                        "Failed to create pivot table for '{}.{}': {}",
                        entity.name(),
                        relation.name,
                        e
                    ))
                })?;
            }
        }
    }

    create_indexes(pool, snapshot).await?;

    tracing::info!("Initialized SQLite schema for {} entities", entities.len());
    Ok(())
}

fn entity_table_sql(entity: &EntitySchema) -> String {
    let primary_key = &entity.descriptor.primary_key;
    let mut columns = vec![format!("{} INTEGER PRIMARY KEY", quote(primary_key))];
    for field in entity.sorted_field_names() {
        if !field.eq_ignore_ascii_case(primary_key) {
            columns.push(quote(field));
        }
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote(&entity.descriptor.table),
        columns.join(", ")
    )
}

fn pivot_table_sql(relation: &RelationDescriptor) -> Option<String> {
    match relation.kind {
        CardinalityKind::ManyToMany | CardinalityKind::PolymorphicManyToMany => {}
        CardinalityKind::OneToOne
        | CardinalityKind::OneToMany
        | CardinalityKind::ManyToOne
        | CardinalityKind::ThroughMany
        | CardinalityKind::PolymorphicOneToOne
        | CardinalityKind::PolymorphicOneToMany => return None,
    }

    let table = relation.intermediate_table.as_deref()?;
    let mut columns = vec![quote(&relation.foreign_key), quote(&relation.owner_key)];
    if let Some(morph_type) = &relation.morph_type {
        columns.push(quote(morph_type));
    }

    Some(format!(
        "CREATE TABLE IF NOT EXISTS {} ({}, UNIQUE({}))",
        quote(table),
        columns.join(", "),
        columns.join(", ")
    ))
}

/// Index the foreign key columns that existence predicates join on
async fn create_indexes(pool: &SqlitePool, snapshot: &SchemaSnapshot) -> AppResult<()> {
    let mut indexes = Vec::new();

    for entity in snapshot.entities() {
        for relation in entity.relations() {
            let indexed_on_related = matches!(
                relation.kind,
                CardinalityKind::OneToOne
                    | CardinalityKind::OneToMany
                    | CardinalityKind::PolymorphicOneToOne
                    | CardinalityKind::PolymorphicOneToMany
            );
            if !indexed_on_related {
                continue;
            }
            let Some(related) = snapshot.entity(&relation.related) else {
                continue;
            };
            let Some(column) = related.resolve_field(&relation.foreign_key) else {
                continue;
            };
            indexes.push(format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                quote(&format!("idx_{}_{}", related.descriptor.table, column)),
                quote(&related.descriptor.table),
                quote(column)
            ));
        }
    }

    for sql in indexes {
        sqlx::query(&sql)
            .execute(pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to create index: {}", e)))?;
    }

    Ok(())
}
