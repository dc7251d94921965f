//! Defines the HTTP surface of the API.
//!
//! ## Structure
//! - **Service endpoints**
//!   - `GET /v1/` hello, `GET /v1/__heartbeat__`, `GET /v1/__lbheartbeat__`
//!   - `POST /v1/batch` runs sub-requests through [`api_router`]
//!
//! - **Listings** (`/v1/buckets`, `/v1/buckets/{bucket_id}/collections`, ...)
//!   - `GET` list, `HEAD` count, `POST` create, `DELETE` bulk delete
//!
//! - **Objects** (`/v1/buckets/{bucket_id}`, ...)
//!   - `GET` / `HEAD` read, `PUT` replace or create, `PATCH` merge, `DELETE`
//!
//! Object routes resolve the caller through the authentication middleware.
//! Unknown routes fall through to a redirect (for `GET` outside `/v1`) or a
//! 404; known routes with the wrong verb answer 405.

use crate::{
    handlers::{
        batch_handlers::batch,
        health_handlers::{fallback, heartbeat, hello, lbheartbeat, method_not_allowed},
        resource_handlers::{
            count_objects, create_object, delete_object, delete_objects, get_object,
            list_objects, patch_object, put_object,
        },
    },
    routes::middleware::{authenticate, content_security_policy, cors_layer, no_sniff},
    services::resource_service::ResourceService,
};
use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{MethodRouter, get, post},
};
use tower_http::trace::TraceLayer;

const LISTINGS: [&str; 5] = [
    "/v1/buckets",
    "/v1/buckets/{bucket_id}/collections",
    "/v1/buckets/{bucket_id}/collections/{collection_id}/records",
    "/v1/buckets/{bucket_id}/groups",
    "/v1/accounts",
];

const OBJECTS: [&str; 5] = [
    "/v1/buckets/{bucket_id}",
    "/v1/buckets/{bucket_id}/collections/{collection_id}",
    "/v1/buckets/{bucket_id}/collections/{collection_id}/records/{record_id}",
    "/v1/buckets/{bucket_id}/groups/{group_id}",
    "/v1/accounts/{account_id}",
];

fn listing() -> MethodRouter<ResourceService> {
    get(list_objects)
        .head(count_objects)
        .post(create_object)
        .delete(delete_objects)
}

fn object() -> MethodRouter<ResourceService> {
    get(get_object)
        .put(put_object)
        .patch(patch_object)
        .delete(delete_object)
}

/// Every route except batch, with caller resolution but without the outer
/// layers. Batch sub-requests are dispatched through this router.
pub fn api_router(service: ResourceService) -> Router {
    let mut router = Router::new()
        .route("/v1/", get(hello))
        .route("/v1/__heartbeat__", get(heartbeat))
        .route("/v1/__lbheartbeat__", get(lbheartbeat));
    for path in LISTINGS {
        router = router.route(path, listing());
    }
    for path in OBJECTS {
        router = router.route(path, object());
    }

    router
        .method_not_allowed_fallback(method_not_allowed)
        .route_layer(from_fn_with_state(service.clone(), authenticate))
        .fallback(fallback)
        .with_state(service)
}

/// The full application: API routes, batch, tracing, CORS and security
/// headers.
pub fn routes(service: ResourceService) -> Router {
    let max_age = service.settings.cors_max_age;
    let batch_routes = Router::new()
        .route("/v1/batch", post(batch))
        .method_not_allowed_fallback(method_not_allowed)
        .with_state(service.clone());

    api_router(service)
        .merge(batch_routes)
        .layer(content_security_policy())
        .layer(no_sniff())
        .layer(cors_layer(max_age))
        .layer(TraceLayer::new_for_http())
}
