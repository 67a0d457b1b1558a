#![allow(dead_code)]

use relfilter::backend::database::{DatabaseBackendConfig, SqliteRepository};
use relfilter::backend::Backend;
use relfilter::config::AppConfig;
use relfilter::extractors::FilterQuery;
use relfilter::mutation::EntityRepository;
use relfilter::query::{QueryContext, QueryPlanApplier, SqlQueryBuilder};
use relfilter::schema::{ConfigSchemaProvider, Entity, SchemaGuard};
use serde_json::{json, Map, Value};
use std::sync::Arc;

pub const SCHEMA: &str = r#"
database:
  type: sqlite
  url: "sqlite::memory:"

entities:
  - name: events
    fields: [id, name, published, venue_id, price]
    relations:
      - name: tags
        related: tags
        kind: many_to_many
        foreign_key: event_id
        owner_key: tag_id
        intermediate_table: event_tag
      - name: medias
        related: medias
        kind: one_to_many
        foreign_key: event_id
        owner_key: id
      - name: venue
        related: venues
        kind: many_to_one
        foreign_key: venue_id
        owner_key: id
      - name: poster
        related: medias
        kind: one_to_one
        foreign_key: poster_of
        owner_key: id
  - name: tags
    fields: [id, name]
  - name: medias
    fields: [id, event_id, poster_of, kind]
  - name: venues
    fields: [id, name]
"#;

pub struct TestApp {
    pub guard: Arc<SchemaGuard>,
    pub backend: Arc<SqliteRepository>,
}

/// In-memory SQLite database with the events schema and no rows
pub async fn setup_empty() -> TestApp {
    let config = AppConfig::from_yaml_str(SCHEMA).expect("schema config");
    let guard = Arc::new(
        SchemaGuard::load(&ConfigSchemaProvider::new(config.entities)).expect("schema guard"),
    );

    let backend = SqliteRepository::connect(&DatabaseBackendConfig::memory_sqlite(), Arc::clone(&guard))
        .await
        .expect("sqlite connection");
    backend.init_schema().await.expect("schema creation");

    TestApp {
        guard,
        backend: Arc::new(backend),
    }
}

/// Seeded database:
///
/// | event | name       | published | venue | price | tags | medias      |
/// |-------|------------|-----------|-------|-------|------|-------------|
/// | 1     | launch     | true      | 4     | 2.5   | 5    | 11 (video)  |
/// | 2     | meetup     | false     | 8     | 4.5   | 3    |             |
/// | 3     | big launch | true      | -     | -     |      |             |
/// | 52323 | gala       | true      | 4     | 10    |      | 10 (photo)  |
pub async fn setup_seeded() -> TestApp {
    let app = setup_empty().await;

    app.create("venues", json!({"id": 4, "name": "hall"})).await;
    app.create("venues", json!({"id": 8, "name": "park"})).await;
    for id in [3, 5, 7] {
        app.create("tags", json!({"id": id, "name": format!("tag{}", id)})).await;
    }

    app.create("events", json!({"id": 1, "name": "launch", "published": true, "venue_id": 4, "price": 2.5})).await;
    app.create("events", json!({"id": 2, "name": "meetup", "published": false, "venue_id": 8, "price": 4.5})).await;
    app.create("events", json!({"id": 3, "name": "big launch", "published": true, "venue_id": null, "price": null})).await;
    app.create("events", json!({"id": 52323, "name": "gala", "published": true, "venue_id": 4, "price": 10})).await;

    app.create("medias", json!({"id": 10, "event_id": 52323, "poster_of": null, "kind": "photo"})).await;
    app.create("medias", json!({"id": 11, "event_id": 1, "poster_of": 1, "kind": "video"})).await;
    app.create("medias", json!({"id": 12, "event_id": null, "poster_of": null, "kind": "photo"})).await;

    let tags = app
        .guard
        .relation_descriptor("events", "tags")
        .expect("tags relation");
    app.backend.attach(&tags, &json!(1), &[json!(5)]).await.expect("attach");
    app.backend.attach(&tags, &json!(2), &[json!(3)]).await.expect("attach");

    app
}

impl TestApp {
    pub async fn create(&self, entity: &str, data: Value) -> Entity {
        let descriptor = self.guard.entity(entity).expect("declared entity");
        let data: Map<String, Value> = data.as_object().cloned().expect("object row");
        self.backend.create(&descriptor, &data).await.expect("row creation")
    }

    pub async fn find(&self, entity: &str, key: Value) -> Option<Entity> {
        let descriptor = self.guard.entity(entity).expect("declared entity");
        self.backend.find_by_key(&descriptor, &key).await.expect("lookup")
    }

    /// Compile `query` for `entity` and run it, returning rows in result order
    pub async fn query_with(&self, entity: &str, query: &str, context: QueryContext) -> Vec<Entity> {
        let snapshot = self.guard.snapshot();
        let schema = snapshot.entity(entity).expect("declared entity");
        let request = FilterQuery::from_query_string(query);
        let applier = QueryPlanApplier::new(Arc::clone(&snapshot), context);

        let mut sql = SqlQueryBuilder::new(self.backend.dialect(), &schema.descriptor);
        applier.apply(&request.expression(entity), &mut sql);
        applier.apply_sort(entity, &request.sort_by, &mut sql);

        self.backend
            .find_where(entity, &sql.finish())
            .await
            .expect("compiled query runs")
    }

    /// Run `query` against the rows reached from `parent` row `key` through
    /// `relation`; `None` when the relation cannot be listed
    pub async fn related_with(
        &self,
        parent: &str,
        key: Value,
        relation: &str,
        query: &str,
        context: QueryContext,
    ) -> Option<Vec<Entity>> {
        let snapshot = self.guard.snapshot();
        let applier = QueryPlanApplier::new(Arc::clone(&snapshot), context);
        let related = applier.related_schema(parent, relation)?;
        let request = FilterQuery::from_query_string(query);

        let mut sql = SqlQueryBuilder::new(self.backend.dialect(), &related.descriptor);
        let filter = request.expression(related.name());
        if !applier.apply_on_relation(parent, &key, relation, &filter, &mut sql) {
            return None;
        }
        applier.apply_sort(related.name(), &request.sort_by, &mut sql);

        let rows = self
            .backend
            .find_where(related.name(), &sql.finish())
            .await
            .expect("compiled relation query runs");
        Some(rows)
    }

    /// Sorted primary keys of the unrestricted result
    pub async fn ids(&self, entity: &str, query: &str) -> Vec<i64> {
        let mut ids = keys(&self.query_with(entity, query, QueryContext::unrestricted()).await);
        ids.sort_unstable();
        ids
    }

    /// Tag ids linked to `event` through the pivot table
    pub async fn tag_ids(&self, event: i64) -> Vec<i64> {
        sqlx::query_scalar("SELECT tag_id FROM event_tag WHERE event_id = ?1 ORDER BY tag_id")
            .bind(event)
            .fetch_all(self.backend.pool())
            .await
            .expect("pivot rows")
    }
}

pub fn keys(rows: &[Entity]) -> Vec<i64> {
    rows.iter()
        .filter_map(|row| row.get("id").and_then(Value::as_i64))
        .collect()
}
