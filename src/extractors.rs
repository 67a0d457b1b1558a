use axum::{
    extract::{FromRequest, FromRequestParts, Request},
    http::request::Parts,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use std::convert::Infallible;

use crate::error::AppError;
use crate::mutation::MutationRequest;
use crate::parser::{decode_nested, FilterExpression, SortSpec};

/// `filter` and `sort_by` sections of the request query string.
///
/// Never rejects: malformed parameters decode to an empty filter, the same
/// way unknown fields are dropped later on.
#[derive(Debug, Clone)]
pub struct FilterQuery {
    pub filter: Value,
    pub sort_by: Vec<SortSpec>,
}

impl FilterQuery {
    pub fn from_query_string(query: &str) -> Self {
        let decoded = decode_nested(query);
        let filter = decoded.get("filter").cloned().unwrap_or(Value::Null);
        let sort_by = decoded
            .get("sort_by")
            .map(SortSpec::from_nested)
            .unwrap_or_default();
        Self { filter, sort_by }
    }

    pub fn expression(&self, entity: &str) -> FilterExpression {
        FilterExpression::build_from_nested_map(entity, &self.filter)
    }
}

impl<S> FromRequestParts<S> for FilterQuery
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_query_string(parts.uri.query().unwrap_or("")))
    }
}

/// JSON body carrying `{ "relations": { <name>: { "add": ..., "remove": ... } } }`
#[derive(Debug, Clone)]
pub struct RelationsJson(pub Vec<MutationRequest>);

impl<S> FromRequest<S> for RelationsJson
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(body) = Json::<Value>::from_request(req, state)
            .await
            .map_err(|rejection| AppError::BadRequest(format!("Invalid JSON: {}", rejection)))?;

        let relations = body.get("relations").ok_or_else(|| {
            AppError::BadRequest("Request body must contain a 'relations' object".to_string())
        })?;
        if !relations.is_object() {
            return Err(AppError::BadRequest(
                "'relations' must be an object".to_string(),
            ));
        }

        Ok(RelationsJson(MutationRequest::from_relations(relations)))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.to_response().into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::query::{PredicateBuilder, QueryContext};
    use crate::schema::{ConfigSchemaProvider, SchemaGuard};
    use axum::{extract::State, http::StatusCode, routing::{get, post}, Router};
    use axum_test::TestServer;
    use serde_json::json;
    use std::sync::Arc;

    const SCHEMA: &str = r#"
database:
  type: sqlite
  url: "sqlite::memory:"
entities:
  - name: events
    fields: [id, name]
    relations:
      - name: medias
        related: medias
        kind: one_to_many
        foreign_key: event_id
        owner_key: id
  - name: medias
    fields: [id, event_id]
"#;

    async fn compile(State(guard): State<Arc<SchemaGuard>>, query: FilterQuery) -> Json<Value> {
        let filter = query.expression("events");
        let mut builder = PredicateBuilder::new();
        filter.apply(&mut builder, &guard, &QueryContext::unrestricted());
        Json(json!({
            "predicate": builder.build().map(|p| p.to_string()),
            "sort": query.sort_by.iter().map(|s| s.field.clone()).collect::<Vec<_>>(),
        }))
    }

    async fn relations(RelationsJson(requests): RelationsJson) -> Json<Value> {
        Json(json!(requests.iter().map(|r| r.relation.clone()).collect::<Vec<_>>()))
    }

    fn server() -> TestServer {
        let config = AppConfig::from_yaml_str(SCHEMA).unwrap();
        let guard = Arc::new(SchemaGuard::load(&ConfigSchemaProvider::new(config.entities)).unwrap());
        let app = Router::new()
            .route("/events", get(compile))
            .route("/events/relations", post(relations))
            .with_state(guard);
        TestServer::new(app).unwrap()
    }

    #[tokio::test]
    async fn test_filter_query_compiles_from_url() {
        let server = server();
        let response = server
            .get("/events?filter%5B0%5D%5Bmedias.event_id%5D%5Bequal%5D%5B0%5D=7&filter%5B0%5D%5Bid%5D%5Bequal%5D%5B0%5D=52323&sort_by%5Bname%5D=desc")
            .await;

        assert_eq!(response.status_code(), StatusCode::OK);
        let body: Value = response.json();
        assert_eq!(
            body["predicate"],
            json!("id = 52323 AND EXISTS(medias WHERE event_id = 7)")
        );
        assert_eq!(body["sort"], json!(["name"]));
    }

    #[tokio::test]
    async fn test_filter_query_without_parameters() {
        let server = server();
        let response = server.get("/events").await;
        assert_eq!(response.status_code(), StatusCode::OK);
        assert_eq!(response.json::<Value>()["predicate"], Value::Null);
    }

    #[tokio::test]
    async fn test_relations_json() {
        let server = server();
        let response = server
            .post("/events/relations")
            .json(&json!({"relations": {"medias": {"add": [1, 2]}, "tags": {"remove": 3}}}))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        assert_eq!(response.json::<Value>(), json!(["medias", "tags"]));
    }

    #[tokio::test]
    async fn test_relations_json_rejections() {
        let server = server();

        let response = server.post("/events/relations").text("not json").await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

        let response = server
            .post("/events/relations")
            .json(&json!({"relations": [1, 2]}))
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
        assert!(response.json::<Value>()["error"].is_string());
    }
}
