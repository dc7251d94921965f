//! Accounts, Basic authentication and group-based permissions.
//!
//! Run with: cargo test --test account_tests

mod common;

use axum::http::{Method, StatusCode};
use serde_json::json;

use common::{
    ALICE, BOB, create_account, create_test_app, delete, get, post_json, put_json, send,
    setup_bucket,
};

#[tokio::test]
async fn accounts_self_register_and_authenticate() {
    let app = create_test_app();
    let created = post_json(
        &app,
        "/v1/accounts",
        None,
        json!({"data": {"id": "alice", "password": "alice-secret"}}),
    )
    .await;
    assert_eq!(created.status, StatusCode::CREATED);
    assert_ne!(created.body["data"]["password"], "alice-secret");
    assert_eq!(created.body["permissions"]["write"], json!(["account:alice"]));

    let own = get(&app, "/v1/accounts/alice", Some(ALICE)).await;
    assert_eq!(own.status, StatusCode::OK);

    let anonymous = get(&app, "/v1/accounts/alice", None).await;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);

    let wrong_password = get(&app, "/v1/accounts/alice", Some(("alice", "nope"))).await;
    assert_eq!(wrong_password.status, StatusCode::UNAUTHORIZED);

    let listing = get(&app, "/v1/accounts", Some(ALICE)).await;
    assert_eq!(listing.body["data"].as_array().unwrap().len(), 1);
    assert_eq!(get(&app, "/v1/accounts", None).await.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn account_creation_validates_input() {
    let app = create_test_app();

    let no_id = post_json(&app, "/v1/accounts", None, json!({"data": {"password": "x"}})).await;
    assert_eq!(no_id.status, StatusCode::BAD_REQUEST);
    assert_eq!(no_id.body["message"], "data.id in body: Required");

    let no_password = put_json(&app, "/v1/accounts/carol", None, json!({"data": {}})).await;
    assert_eq!(no_password.status, StatusCode::BAD_REQUEST);
    assert_eq!(no_password.body["message"], "data.password in body: Required");
}

#[tokio::test]
async fn accounts_cannot_be_managed_by_others() {
    let app = create_test_app();
    create_account(&app, ALICE).await;
    create_account(&app, BOB).await;

    let foreign_create = put_json(
        &app,
        "/v1/accounts/mallory",
        Some(ALICE),
        json!({"data": {"password": "x"}}),
    )
    .await;
    assert_eq!(foreign_create.status, StatusCode::FORBIDDEN);

    let foreign_update = put_json(
        &app,
        "/v1/accounts/bob",
        Some(ALICE),
        json!({"data": {"password": "x"}}),
    )
    .await;
    assert_eq!(foreign_update.status, StatusCode::FORBIDDEN);

    let changed = send(
        &app,
        Method::PATCH,
        "/v1/accounts/bob",
        Some(BOB),
        &[],
        Some(json!({"data": {"password": "new-secret"}})),
    )
    .await;
    assert_eq!(changed.status, StatusCode::OK);
    assert_eq!(get(&app, "/v1/accounts/bob", Some(BOB)).await.status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        get(&app, "/v1/accounts/bob", Some(("bob", "new-secret"))).await.status,
        StatusCode::OK
    );
}

#[tokio::test]
async fn group_members_inherit_group_grants() {
    let app = create_test_app();
    setup_bucket(&app).await;
    create_account(&app, BOB).await;

    let group = put_json(
        &app,
        "/v1/buckets/b/groups/readers",
        Some(ALICE),
        json!({"data": {"members": ["account:bob", "", "account:bob"]}}),
    )
    .await;
    assert_eq!(group.status, StatusCode::CREATED);
    assert_eq!(group.body["data"]["members"], json!(["account:bob"]));

    let shared = send(
        &app,
        Method::PATCH,
        "/v1/buckets/b/collections/c",
        Some(ALICE),
        &[],
        Some(json!({"permissions": {"read": ["group:readers"]}})),
    )
    .await;
    assert_eq!(shared.status, StatusCode::OK);

    assert_eq!(
        get(&app, "/v1/buckets/b/collections/c", Some(BOB)).await.status,
        StatusCode::OK
    );

    assert_eq!(
        delete(&app, "/v1/buckets/b/groups/readers", Some(ALICE)).await.status,
        StatusCode::OK
    );
    assert_eq!(
        get(&app, "/v1/buckets/b/collections/c", Some(BOB)).await.status,
        StatusCode::FORBIDDEN
    );
}

#[tokio::test]
async fn invalid_group_members_are_rejected() {
    let app = create_test_app();
    setup_bucket(&app).await;
    let response = put_json(
        &app,
        "/v1/buckets/b/groups/g",
        Some(ALICE),
        json!({"data": {"members": "account:bob"}}),
    )
    .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["details"][0]["name"], "data.members");
}
