use relfilter::parser::Operator;
use relfilter::query::{QueryContext, RowRestriction};
use serde_json::json;
use std::sync::Arc;

mod common;
use common::{keys, setup_seeded, TestApp};

async fn related_ids(app: &TestApp, parent: &str, key: i64, relation: &str, query: &str) -> Vec<i64> {
    let rows = app
        .related_with(parent, json!(key), relation, query, QueryContext::unrestricted())
        .await
        .expect("listable relation");
    let mut ids = keys(&rows);
    ids.sort_unstable();
    ids
}

#[tokio::test]
async fn test_many_to_many_lists_attached_rows_only() {
    let app = setup_seeded().await;

    assert_eq!(related_ids(&app, "events", 1, "tags", "").await, vec![5]);
    assert_eq!(related_ids(&app, "events", 2, "tags", "").await, vec![3]);
    assert!(related_ids(&app, "events", 3, "tags", "").await.is_empty());
}

#[tokio::test]
async fn test_one_to_many_with_filter_and_sort() {
    let app = setup_seeded().await;

    assert_eq!(related_ids(&app, "events", 52323, "medias", "").await, vec![10]);
    assert_eq!(
        related_ids(&app, "events", 52323, "medias", "filter[0][kind][equal][0]=photo").await,
        vec![10]
    );
    // Media 12 is a photo too but belongs to no event
    assert!(related_ids(&app, "events", 1, "medias", "filter[0][kind][equal][0]=photo")
        .await
        .is_empty());

    let rows = app
        .related_with("events", json!(1), "medias", "sort_by[id]=desc", QueryContext::unrestricted())
        .await
        .expect("listable relation");
    assert_eq!(keys(&rows), vec![11]);
}

#[tokio::test]
async fn test_later_groups_stay_inside_the_parent() {
    let app = setup_seeded().await;

    // Tag 7 exists but is not attached to event 1
    let ids = related_ids(
        &app,
        "events",
        1,
        "tags",
        "filter[0][id][equal][0]=5&filter[1][id][equal][0]=7",
    )
    .await;
    assert_eq!(ids, vec![5]);
}

#[tokio::test]
async fn test_many_to_one_and_one_to_one() {
    let app = setup_seeded().await;

    assert_eq!(related_ids(&app, "events", 2, "venue", "").await, vec![8]);
    assert!(related_ids(&app, "events", 3, "venue", "").await.is_empty());
    assert_eq!(related_ids(&app, "events", 1, "poster", "").await, vec![11]);
}

#[tokio::test]
async fn test_field_criteria_narrow_listed_rows() {
    let app = setup_seeded().await;

    let ids = related_ids(&app, "events", 1, "medias", "filter[0][kind][contains][0]=vid").await;
    assert_eq!(ids, vec![11]);
    assert!(related_ids(&app, "events", 1, "medias", "filter[0][kind][contains][0]=pho")
        .await
        .is_empty());
}

#[tokio::test]
async fn test_restriction_applies_to_related_entity() {
    let app = setup_seeded().await;

    let mut policy = RowRestriction::new();
    policy.add_rule("medias", "kind", Operator::Equal, json!("photo"));
    let context = QueryContext::with_policy(Arc::new(policy));

    let rows = app
        .related_with("events", json!(1), "medias", "", context.clone())
        .await
        .expect("listable relation");
    assert!(rows.is_empty());

    let rows = app
        .related_with("events", json!(52323), "medias", "", context)
        .await
        .expect("listable relation");
    assert_eq!(keys(&rows), vec![10]);
}

#[tokio::test]
async fn test_undeclared_relation_is_not_listable() {
    let app = setup_seeded().await;

    let rows = app
        .related_with("events", json!(1), "owner", "", QueryContext::unrestricted())
        .await;
    assert!(rows.is_none());
}
