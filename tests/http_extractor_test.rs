use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    routing::{get, patch},
    Json, Router,
};
use axum_test::TestServer;
use relfilter::backend::database::SqliteRepository;
use relfilter::backend::Backend;
use relfilter::error::{AppError, AppResult};
use relfilter::extractors::{FilterQuery, RelationsJson};
use relfilter::logging::logging_middleware;
use relfilter::mutation::{EntityRepository, RelationMutationResolver};
use relfilter::query::{QueryContext, QueryPlanApplier, SqlQueryBuilder};
use relfilter::schema::SchemaGuard;
use serde_json::{json, Value};
use std::sync::Arc;

mod common;
use common::setup_seeded;

#[derive(Clone)]
struct AppState {
    guard: Arc<SchemaGuard>,
    backend: Arc<SqliteRepository>,
}

async fn list_events(State(state): State<AppState>, query: FilterQuery) -> AppResult<Json<Value>> {
    let snapshot = state.guard.snapshot();
    let schema = snapshot
        .entity("events")
        .ok_or_else(|| AppError::NotFound("events".to_string()))?;
    let applier = QueryPlanApplier::new(Arc::clone(&snapshot), QueryContext::unrestricted());

    let mut sql = SqlQueryBuilder::new(state.backend.dialect(), &schema.descriptor);
    applier.apply(&query.expression("events"), &mut sql);
    applier.apply_sort("events", &query.sort_by, &mut sql);

    let rows = state.backend.find_where("events", &sql.finish()).await?;
    Ok(Json(Value::Array(
        rows.into_iter().map(|row| Value::Object(row.attributes)).collect(),
    )))
}

async fn update_relations(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    RelationsJson(requests): RelationsJson,
) -> AppResult<Json<Value>> {
    let events = state
        .guard
        .entity("events")
        .ok_or_else(|| AppError::NotFound("events".to_string()))?;
    let mut root = state
        .backend
        .find_by_key(&events, &json!(id))
        .await?
        .ok_or_else(|| AppError::NotFound(format!("event {}", id)))?;

    let resolver = RelationMutationResolver::new(Arc::clone(&state.guard), Arc::clone(&state.backend));
    let changed = resolver.resolve_all(&mut root, &requests).await?;
    let root = state.backend.save(&events, &root).await?;

    Ok(Json(json!({"changed": changed, "event": root.attributes})))
}

async fn server() -> TestServer {
    let app = setup_seeded().await;
    let state = AppState {
        guard: app.guard,
        backend: app.backend,
    };

    let router = Router::new()
        .route("/events", get(list_events))
        .route("/events/{id}/relations", patch(update_relations))
        .layer(middleware::from_fn(logging_middleware))
        .with_state(state);

    TestServer::new(router).unwrap()
}

fn ids(body: &Value) -> Vec<i64> {
    body.as_array()
        .unwrap()
        .iter()
        .map(|row| row["id"].as_i64().unwrap())
        .collect()
}

#[tokio::test]
async fn test_list_with_encoded_filter_and_sort() {
    let server = server().await;

    // filter[0][venue.name][equal][0]=hall&sort_by[id]=desc
    let response = server
        .get("/events?filter%5B0%5D%5Bvenue.name%5D%5Bequal%5D%5B0%5D=hall&sort_by%5Bid%5D=desc")
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(ids(&response.json::<Value>()), vec![52323, 1]);
}

#[tokio::test]
async fn test_list_with_malformed_filter_returns_everything() {
    let server = server().await;

    let response = server.get("/events?filter=oops&sort_by=name").await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let mut found = ids(&response.json::<Value>());
    found.sort_unstable();
    assert_eq!(found, vec![1, 2, 3, 52323]);
}

#[tokio::test]
async fn test_patch_relations() {
    let server = server().await;

    let response = server
        .patch("/events/2/relations")
        .json(&json!({"relations": {
            "tags": {"add": [5, 999], "remove": [3]},
            "venue": {"add": 4}
        }}))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["changed"], json!(["tags", "venue"]));
    assert_eq!(body["event"]["venue_id"], json!(4));

    // tags[0][id][equal][0]=5 now matches event 2
    let response = server
        .get("/events?filter%5B0%5D%5Btags.id%5D%5Bequal%5D%5B0%5D=5")
        .await;
    let mut found = ids(&response.json::<Value>());
    found.sort_unstable();
    assert_eq!(found, vec![1, 2]);
}

#[tokio::test]
async fn test_patch_relations_rejects_bad_bodies() {
    let server = server().await;

    let response = server
        .patch("/events/1/relations")
        .json(&json!({"tags": {"add": [5]}}))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    let response = server
        .patch("/events/404/relations")
        .json(&json!({"relations": {}}))
        .await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
}
