//! Shared helpers for the HTTP integration tests.
//!
//! Every helper drives the full router with `oneshot`, so requests go
//! through the same middleware stack as a served request.

// Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Method, Request, StatusCode},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::{Value, json};
use tower::ServiceExt;

use object_api::{
    config::ApiSettings, routes::routes, services::resource_service::ResourceService,
    storage::memory::MemoryBackend,
};

pub const ALICE: (&str, &str) = ("alice", "alice-secret");
pub const BOB: (&str, &str) = ("bob", "bob-secret");

/// Status, headers and parsed body (`Null` when empty).
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn errno(&self) -> u64 {
        self.body["errno"].as_u64().unwrap_or_default()
    }
}

/// Fresh app over an in-memory backend with default settings.
pub fn create_test_app() -> Router {
    create_test_app_with(ApiSettings::default())
}

pub fn create_test_app_with(settings: ApiSettings) -> Router {
    let backend = Arc::new(MemoryBackend::new());
    routes(ResourceService::new(backend, settings))
}

/// `Authorization` header value for Basic credentials.
pub fn basic((user, password): (&str, &str)) -> String {
    format!("Basic {}", STANDARD.encode(format!("{user}:{password}")))
}

/// Send one request. `auth` is a `(user, password)` pair.
pub async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    auth: Option<(&str, &str)>,
    headers: &[(&str, &str)],
    body: Option<Value>,
) -> TestResponse {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(creds) = auth {
        builder = builder.header("authorization", basic(creds));
    }
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&value).unwrap())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            json!({ "raw_body": String::from_utf8_lossy(&bytes).to_string() })
        })
    };
    TestResponse {
        status,
        headers,
        body,
    }
}

pub async fn get(app: &Router, uri: &str, auth: Option<(&str, &str)>) -> TestResponse {
    send(app, Method::GET, uri, auth, &[], None).await
}

pub async fn put_json(
    app: &Router,
    uri: &str,
    auth: Option<(&str, &str)>,
    body: Value,
) -> TestResponse {
    send(app, Method::PUT, uri, auth, &[], Some(body)).await
}

pub async fn post_json(
    app: &Router,
    uri: &str,
    auth: Option<(&str, &str)>,
    body: Value,
) -> TestResponse {
    send(app, Method::POST, uri, auth, &[], Some(body)).await
}

pub async fn delete(app: &Router, uri: &str, auth: Option<(&str, &str)>) -> TestResponse {
    send(app, Method::DELETE, uri, auth, &[], None).await
}

/// Register an account through the API.
pub async fn create_account(app: &Router, (user, password): (&str, &str)) {
    let response = post_json(
        app,
        "/v1/accounts",
        None,
        json!({"data": {"id": user, "password": password}}),
    )
    .await;
    assert_eq!(response.status, StatusCode::CREATED, "{:?}", response.body);
}

/// Alice owns bucket `b` with collection `c`.
pub async fn setup_bucket(app: &Router) {
    create_account(app, ALICE).await;
    let response = put_json(app, "/v1/buckets/b", Some(ALICE), json!({})).await;
    assert_eq!(response.status, StatusCode::CREATED, "{:?}", response.body);
    let response = put_json(app, "/v1/buckets/b/collections/c", Some(ALICE), json!({})).await;
    assert_eq!(response.status, StatusCode::CREATED, "{:?}", response.body);
}
