//! Batch endpoint: per-request isolation, ordering, validation.
//!
//! Run with: cargo test --test batch_tests

mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{ALICE, create_test_app, get, post_json, setup_bucket};

#[tokio::test]
async fn failures_stay_inside_their_envelope() {
    let app = create_test_app();
    setup_bucket(&app).await;

    let batch = post_json(
        &app,
        "/v1/batch",
        Some(ALICE),
        json!({"requests": [
            {"method": "GET", "path": "/buckets/b/collections/missing"},
            {"method": "PUT", "path": "/v1/buckets/b/collections/c2", "body": {"data": {"title": "two"}}},
        ]}),
    )
    .await;
    assert_eq!(batch.status, StatusCode::OK);
    assert!(batch.header("etag").is_none());

    let responses = batch.body["responses"].as_array().unwrap();
    assert_eq!(responses.len(), 2);

    assert_eq!(responses[0]["status"], 404);
    assert_eq!(responses[0]["path"], "/v1/buckets/b/collections/missing");
    assert_eq!(responses[0]["body"]["errno"], 110);

    assert_eq!(responses[1]["status"], 201);
    assert_eq!(responses[1]["body"]["data"]["title"], "two");
    assert!(responses[1]["headers"]["Etag"].is_string());
    assert_eq!(responses[1]["headers"]["Content-Type"], "application/json");

    let created = get(&app, "/v1/buckets/b/collections/c2", Some(ALICE)).await;
    assert_eq!(created.status, StatusCode::OK);
}

#[tokio::test]
async fn sub_requests_run_in_order_with_defaults() {
    let app = create_test_app();
    setup_bucket(&app).await;

    let batch = post_json(
        &app,
        "/v1/batch",
        Some(ALICE),
        json!({
            "defaults": {"method": "PUT", "body": {"data": {"n": 1}}},
            "requests": [
                {"path": "/buckets/b/collections/c/records/r1"},
                {"path": "/buckets/b/collections/c/records/r1", "body": {"data": {"n": 2}}},
                {"method": "GET", "path": "/buckets/b/collections/c/records/r1"},
            ],
        }),
    )
    .await;
    assert_eq!(batch.status, StatusCode::OK);
    let responses = batch.body["responses"].as_array().unwrap();
    assert_eq!(responses[0]["status"], 201);
    assert_eq!(responses[1]["status"], 200);
    assert_eq!(responses[2]["body"]["data"]["n"], 2);
}

#[tokio::test]
async fn recursive_batches_are_rejected_up_front() {
    let app = create_test_app();
    setup_bucket(&app).await;

    let batch = post_json(
        &app,
        "/v1/batch",
        Some(ALICE),
        json!({"requests": [
            {"method": "PUT", "path": "/buckets/b/collections/never"},
            {"method": "POST", "path": "/batch", "body": {"requests": []}},
        ]}),
    )
    .await;
    assert_eq!(batch.status, StatusCode::BAD_REQUEST);
    assert_eq!(batch.errno(), 107);

    // Nothing ran.
    let never = get(&app, "/v1/buckets/b/collections/never", Some(ALICE)).await;
    assert_eq!(never.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_sub_request_headers_reject_the_batch_before_any_write() {
    let app = create_test_app();
    setup_bucket(&app).await;

    let batch = post_json(
        &app,
        "/v1/batch",
        Some(ALICE),
        json!({"requests": [
            {"method": "PUT", "path": "/buckets/b/collections/committed"},
            {"method": "GET", "path": "/buckets/b", "headers": {"bad header": "x"}},
        ]}),
    )
    .await;
    assert_eq!(batch.status, StatusCode::BAD_REQUEST);
    assert_eq!(batch.errno(), 107);
    assert_eq!(batch.body["details"][0]["name"], "requests.1");

    let committed = get(&app, "/v1/buckets/b/collections/committed", Some(ALICE)).await;
    assert_eq!(committed.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn batch_size_and_shape_are_validated() {
    let app = create_test_app();

    let requests: Vec<_> = (0..26).map(|_| json!({"path": "/buckets"})).collect();
    let too_many = post_json(&app, "/v1/batch", None, json!({ "requests": requests })).await;
    assert_eq!(too_many.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        too_many.body["message"],
        "requests in body: Number of requests is limited to 25"
    );

    let bad_method = post_json(
        &app,
        "/v1/batch",
        None,
        json!({"requests": [{"method": "BAD", "path": "/buckets"}]}),
    )
    .await;
    assert_eq!(bad_method.status, StatusCode::BAD_REQUEST);
    assert_eq!(bad_method.body["details"][0]["name"], "requests.0");
}

#[tokio::test]
async fn anonymous_sub_requests_are_authenticated_individually() {
    let app = create_test_app();
    setup_bucket(&app).await;

    let batch = post_json(
        &app,
        "/v1/batch",
        None,
        json!({"requests": [
            {"path": "/buckets/b"},
            {"path": "/buckets/b", "headers": {"Authorization": common::basic(ALICE)}},
        ]}),
    )
    .await;
    let responses = batch.body["responses"].as_array().unwrap();
    assert_eq!(responses[0]["status"], 401);
    assert_eq!(responses[1]["status"], 200);
}
