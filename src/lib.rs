//! Multi-tenant JSON object storage behind an HTTP API.
//!
//! Buckets hold collections and groups, collections hold records, and
//! accounts authenticate callers. Every object carries an ACL and a
//! millisecond version used as its ETag.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod listing;
pub mod models;
pub mod routes;
pub mod services;
pub mod storage;

use axum::Router;
use config::ApiSettings;
use services::resource_service::ResourceService;
use storage::StorageResult;

/// Open the configured backend and assemble the full application router.
pub async fn build_app(database_url: &str, settings: ApiSettings) -> StorageResult<Router> {
    let backend = storage::connect(database_url).await?;
    Ok(routes::routes(ResourceService::new(backend, settings)))
}
