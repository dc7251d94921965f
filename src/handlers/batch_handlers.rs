//! `POST /v1/batch`

use crate::{
    errors::AppError,
    routes::api_router,
    services::{batch_service, resource_service::ResourceService},
};
use axum::{Json, extract::State, http::HeaderMap};
use bytes::Bytes;
use serde_json::{Value, json};

/// Validate the whole batch, then run every sub-request through the API
/// router. Sub-request failures land in their own envelopes; the batch
/// itself answers 200.
pub async fn batch(
    State(service): State<ResourceService>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let requests = batch_service::prepare(&body, service.settings.batch_max_requests)?;
    tracing::info!(count = requests.len(), "running batch");

    let router = api_router(service);
    let responses = batch_service::execute(router, &headers, requests).await;
    Ok(Json(json!({ "responses": responses })))
}
