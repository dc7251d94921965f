//! Service handlers.
//!
//! - GET /v1/                 -> hello: project metadata and public settings
//! - GET /v1/__heartbeat__    -> per-subsystem health flags
//! - GET /v1/__lbheartbeat__  -> cheap liveness probe
//! - redirects to the canonical `/v1/` paths, 404 and 405 fallbacks

use crate::{
    errors::AppError, routes::API_PREFIX, services::resource_service::ResourceService,
};
use axum::{
    Json,
    extract::State,
    http::{HeaderMap, Method, Uri, header},
    response::{IntoResponse, Redirect, Response},
};
use serde::Serialize;
use serde_json::{Value, json};

const HTTP_API_VERSION: &str = "1.22";

#[derive(Serialize)]
struct HelloResponse {
    project_name: String,
    project_version: String,
    project_docs: String,
    http_api_version: &'static str,
    url: String,
    settings: HelloSettings,
    capabilities: Value,
}

#[derive(Serialize)]
struct HelloSettings {
    batch_max_requests: usize,
    readonly: bool,
}

#[derive(Serialize)]
struct HeartbeatResponse {
    storage: bool,
    permission: bool,
    cache: bool,
}

/// `GET /v1/`
pub async fn hello(State(service): State<ResourceService>, headers: HeaderMap) -> impl IntoResponse {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let settings = &service.settings;
    Json(HelloResponse {
        project_name: settings.project_name.clone(),
        project_version: settings.project_version.clone(),
        project_docs: settings.project_docs.clone(),
        http_api_version: HTTP_API_VERSION,
        url: format!("http://{host}{API_PREFIX}/"),
        settings: HelloSettings {
            batch_max_requests: settings.batch_max_requests,
            readonly: false,
        },
        capabilities: json!({}),
    })
}

/// `GET /v1/__heartbeat__`
///
/// Objects and ACLs share one backend, so both flags reflect the same
/// probe. There is no separate cache tier.
pub async fn heartbeat(State(service): State<ResourceService>) -> impl IntoResponse {
    let healthy = match service.backend.ping().await {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(error = %err, "storage heartbeat failed");
            false
        }
    };
    Json(HeartbeatResponse {
        storage: healthy,
        permission: healthy,
        cache: true,
    })
}

/// `GET /v1/__lbheartbeat__`
pub async fn lbheartbeat() -> impl IntoResponse {
    Json(json!({}))
}

/// Unknown routes. `GET` requests outside the API prefix, and API paths
/// with a trailing slash, redirect to their canonical location.
pub async fn fallback(method: Method, uri: Uri) -> Response {
    if method == Method::GET || method == Method::HEAD {
        if let Some(target) = canonical_location(&uri) {
            return Redirect::temporary(&target).into_response();
        }
    }
    AppError::not_found().into_response()
}

fn canonical_location(uri: &Uri) -> Option<String> {
    let path = uri.path();
    let query = uri.query().map(|q| format!("?{q}")).unwrap_or_default();
    if path == API_PREFIX {
        return Some(format!("{API_PREFIX}/{query}"));
    }
    match path.strip_prefix(API_PREFIX) {
        Some(rest) if rest.starts_with('/') => {
            let trimmed = path.trim_end_matches('/');
            (trimmed.len() < path.len() && trimmed != API_PREFIX)
                .then(|| format!("{trimmed}{query}"))
        }
        _ => Some(format!("{API_PREFIX}{path}{query}")),
    }
}

/// Known route, unsupported verb.
pub async fn method_not_allowed() -> AppError {
    AppError::method_not_allowed()
}
