//! The SQLite backend behind the full router, plus its version checks.
//!
//! Run with: cargo test --test sqlite_backend_tests

mod common;

use axum::http::{Method, StatusCode};
use serde_json::json;

use object_api::{
    build_app,
    config::ApiSettings,
    models::{epoch::Epoch, object::Object, path::ResourcePath},
    storage::{Backend, StorageError, sqlite::SqliteBackend},
};

use common::{ALICE, BOB, create_account, get, post_json, put_json, send, setup_bucket};

const MEMORY_URL: &str = "sqlite::memory:";

fn path(raw: &str) -> ResourcePath {
    ResourcePath::parse(raw).unwrap()
}

#[tokio::test]
async fn full_lifecycle_over_sqlite() {
    let app = build_app(MEMORY_URL, ApiSettings::default()).await.unwrap();
    setup_bucket(&app).await;
    create_account(&app, BOB).await;

    let records = "/v1/buckets/b/collections/c/records";
    for num in [33, 22] {
        let created = post_json(&app, records, Some(ALICE), json!({"data": {"num": num}})).await;
        assert_eq!(created.status, StatusCode::CREATED);
    }

    let first = get(&app, &format!("{records}?_sort=num&_limit=1"), Some(ALICE)).await;
    assert_eq!(first.body["data"][0]["num"], 22);
    assert!(first.header("next-page").is_some());

    let forbidden = get(&app, records, Some(BOB)).await;
    assert_eq!(forbidden.status, StatusCode::FORBIDDEN);

    let record = format!("{}/{}", records, first.body["data"][0]["id"].as_str().unwrap());
    let stale = send(
        &app,
        Method::PATCH,
        &record,
        Some(ALICE),
        &[("if-match", "\"1\"")],
        Some(json!({"data": {"num": 23}})),
    )
    .await;
    assert_eq!(stale.status, StatusCode::PRECONDITION_FAILED);

    let fresh = put_json(&app, &record, Some(ALICE), json!({"data": {"num": 23}})).await;
    assert_eq!(fresh.status, StatusCode::OK);
    assert!(
        fresh.body["data"]["last_modified"].as_i64().unwrap()
            > first.body["data"][0]["last_modified"].as_i64().unwrap()
    );
}

#[tokio::test]
async fn compare_and_swap_and_cascade() {
    let backend = SqliteBackend::connect(MEMORY_URL).await.unwrap();
    let buckets = path("/buckets/*");
    let bucket = backend.create(&buckets, Object::from_data("b", Default::default())).await.unwrap();

    let collections = path("/buckets/b/collections/*");
    let first = backend
        .create(&collections, Object::from_data("c1", Default::default()))
        .await
        .unwrap();
    let second = backend
        .create(&collections, Object::from_data("c2", Default::default()))
        .await
        .unwrap();
    assert!(bucket.last_modified < first.last_modified);
    assert!(first.last_modified < second.last_modified);

    let duplicate = backend
        .create(&collections, Object::from_data("c1", Default::default()))
        .await;
    assert!(matches!(duplicate, Err(StorageError::AlreadyExists(_))));

    let stale = backend
        .update(&path("/buckets/b/collections/c1"), first.clone(), Epoch(1))
        .await;
    assert!(matches!(stale, Err(StorageError::Conflict { .. })));

    let tomb = backend.delete(&path("/buckets/b"), bucket.last_modified).await.unwrap();
    assert!(tomb.deleted);
    assert!(!backend.exists(&path("/buckets/b/collections/c1")).await.unwrap());
    let listed = backend.list(&collections, true).await.unwrap();
    assert!(listed.iter().all(|o| o.deleted));
    assert!(backend.mod_time(&collections).await.unwrap() > second.last_modified);
}
